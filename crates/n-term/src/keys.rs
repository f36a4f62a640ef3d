// SPDX-License-Identifier: MIT
//
// Portable key codes and the mapping from terminal codes to them.
//
// A `KeyCode` is a single `u32` bit-set: the low 21 bits hold exactly one
// base symbol (a Unicode scalar, or a named key in the range just past the
// last scalar), and three high bits carry Shift, Alt, and Ctrl
// independently. Comparing, hashing, and storing keys is as cheap as
// comparing integers, and a binding table can key on the full value.
//
// ```text
//  31  30   29   28  27 ....... 21  20 ............................ 0
// ┌───┬────┬────┬────┬─────────────┬───────────────────────────────┐
// │ 0 │Ctrl│Alt │Shft│  reserved   │ base symbol (char or named)   │
// └───┴────┴────┴────┴─────────────┴───────────────────────────────┘
// ```
//
// `KeyMapper` owns the fixed tables: ground-state bytes, CSI final bytes
// (letter and `~` forms), SS3 final bytes, and the xterm modifier
// parameter where value−1 is a Shift|Alt|Ctrl mask.

use std::fmt;

use bitflags::bitflags;

// ─── Modifiers ──────────────────────────────────────────────────────────────

bitflags! {
    /// Keyboard modifier flags.
    ///
    /// Bit values match the xterm CSI modifier encoding where
    /// `param = 1 + bitmask`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b001;
        const ALT   = 0b010;
        const CTRL  = 0b100;
    }
}

// ─── KeyCode ────────────────────────────────────────────────────────────────

const BASE_MASK: u32 = 0x001F_FFFF;
const SHIFT_BIT: u32 = 1 << 28;
const ALT_BIT: u32 = 1 << 29;
const CTRL_BIT: u32 = 1 << 30;
const FLAG_MASK: u32 = SHIFT_BIT | ALT_BIT | CTRL_BIT;

/// First base value past the Unicode scalar range.
const NAMED_BASE: u32 = 0x11_0000;
/// F1; F2..F20 follow contiguously.
const FUNCTION_BASE: u32 = NAMED_BASE + 0x100;
const MAX_FUNCTION: u8 = 20;

/// A portable key: one base symbol plus independent modifier flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(u32);

impl KeyCode {
    pub const ESCAPE: Self = Self(NAMED_BASE);
    pub const ENTER: Self = Self(NAMED_BASE + 1);
    pub const TAB: Self = Self(NAMED_BASE + 2);
    pub const BACKSPACE: Self = Self(NAMED_BASE + 3);
    pub const INSERT: Self = Self(NAMED_BASE + 4);
    pub const DELETE: Self = Self(NAMED_BASE + 5);
    pub const HOME: Self = Self(NAMED_BASE + 6);
    pub const END: Self = Self(NAMED_BASE + 7);
    pub const PAGE_UP: Self = Self(NAMED_BASE + 8);
    pub const PAGE_DOWN: Self = Self(NAMED_BASE + 9);
    pub const UP: Self = Self(NAMED_BASE + 10);
    pub const DOWN: Self = Self(NAMED_BASE + 11);
    pub const LEFT: Self = Self(NAMED_BASE + 12);
    pub const RIGHT: Self = Self(NAMED_BASE + 13);
    /// A key the terminal reported that has no portable name.
    pub const UNKNOWN: Self = Self(NAMED_BASE + 14);

    /// A printable character.
    #[inline]
    #[must_use]
    pub const fn char(ch: char) -> Self {
        Self(ch as u32)
    }

    /// Function key `F<n>`. Numbers outside 1..=20 clamp to that range.
    #[must_use]
    pub const fn f(n: u8) -> Self {
        let n = if n == 0 {
            1
        } else if n > MAX_FUNCTION {
            MAX_FUNCTION
        } else {
            n
        };
        Self(FUNCTION_BASE + n as u32 - 1)
    }

    /// Rebuild a key from its raw bits, rejecting reserved bits and base
    /// values that name nothing.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw & !(BASE_MASK | FLAG_MASK) != 0 {
            return None;
        }
        let base = raw & BASE_MASK;
        let valid = if base < NAMED_BASE {
            char::from_u32(base).is_some()
        } else {
            base <= Self::UNKNOWN.0
                || (base >= FUNCTION_BASE && base < FUNCTION_BASE + MAX_FUNCTION as u32)
        };
        if valid { Some(Self(raw)) } else { None }
    }

    /// The raw bit-set.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The same key with `mods` added.
    #[must_use]
    pub const fn with_modifiers(self, mods: Modifiers) -> Self {
        let mut bits = self.0;
        if mods.contains(Modifiers::SHIFT) {
            bits |= SHIFT_BIT;
        }
        if mods.contains(Modifiers::ALT) {
            bits |= ALT_BIT;
        }
        if mods.contains(Modifiers::CTRL) {
            bits |= CTRL_BIT;
        }
        Self(bits)
    }

    /// Modifier flags carried by this key.
    #[must_use]
    pub const fn modifiers(self) -> Modifiers {
        let mut mods = Modifiers::empty();
        if self.0 & SHIFT_BIT != 0 {
            mods = mods.union(Modifiers::SHIFT);
        }
        if self.0 & ALT_BIT != 0 {
            mods = mods.union(Modifiers::ALT);
        }
        if self.0 & CTRL_BIT != 0 {
            mods = mods.union(Modifiers::CTRL);
        }
        mods
    }

    /// The base symbol with every modifier stripped.
    #[inline]
    #[must_use]
    pub const fn base(self) -> Self {
        Self(self.0 & BASE_MASK)
    }

    /// The character, when the base symbol is one.
    #[must_use]
    pub const fn as_char(self) -> Option<char> {
        let base = self.0 & BASE_MASK;
        if base < NAMED_BASE {
            char::from_u32(base)
        } else {
            None
        }
    }

    /// `n` for `F<n>`, `None` for anything else.
    #[allow(clippy::cast_possible_truncation)] // Bounded by MAX_FUNCTION.
    #[must_use]
    pub const fn function_number(self) -> Option<u8> {
        let base = self.0 & BASE_MASK;
        if base >= FUNCTION_BASE && base < FUNCTION_BASE + MAX_FUNCTION as u32 {
            Some((base - FUNCTION_BASE + 1) as u8)
        } else {
            None
        }
    }

    const fn name(self) -> Option<&'static str> {
        Some(match self.base() {
            Self::ESCAPE => "Esc",
            Self::ENTER => "Enter",
            Self::TAB => "Tab",
            Self::BACKSPACE => "Backspace",
            Self::INSERT => "Insert",
            Self::DELETE => "Delete",
            Self::HOME => "Home",
            Self::END => "End",
            Self::PAGE_UP => "PageUp",
            Self::PAGE_DOWN => "PageDown",
            Self::UP => "Up",
            Self::DOWN => "Down",
            Self::LEFT => "Left",
            Self::RIGHT => "Right",
            Self::UNKNOWN => "Unknown",
            _ => return None,
        })
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mods = self.modifiers();
        if mods.contains(Modifiers::CTRL) {
            f.write_str("Ctrl+")?;
        }
        if mods.contains(Modifiers::ALT) {
            f.write_str("Alt+")?;
        }
        if mods.contains(Modifiers::SHIFT) {
            f.write_str("Shift+")?;
        }
        if let Some(name) = self.name() {
            f.write_str(name)
        } else if let Some(n) = self.function_number() {
            write!(f, "F{n}")
        } else if let Some(ch) = self.as_char() {
            match ch {
                ' ' => f.write_str("Space"),
                c => write!(f, "{c}"),
            }
        } else {
            write!(f, "<{:#x}>", self.0)
        }
    }
}

impl fmt::Debug for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyCode({self})")
    }
}

// ─── KeyEvent ───────────────────────────────────────────────────────────────

/// A decoded key press.
///
/// `modifiers` always equals `code.modifiers()`; it is broken out so
/// consumers can match on it without unpacking the bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    #[inline]
    #[must_use]
    pub const fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: code.modifiers(),
        }
    }
}

impl From<KeyCode> for KeyEvent {
    fn from(code: KeyCode) -> Self {
        Self::new(code)
    }
}

// ─── KeyMapper ──────────────────────────────────────────────────────────────

/// Fixed tables mapping terminal codes to [`KeyCode`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMapper;

impl KeyMapper {
    /// Map a single 7-bit byte read in the ground state.
    ///
    /// Total over `0x00..=0x7F`: every byte yields a key.
    #[must_use]
    pub const fn ground(byte: u8) -> KeyCode {
        match byte {
            0x1B => KeyCode::ESCAPE,
            0x0D | 0x0A => KeyCode::ENTER,
            0x09 => KeyCode::TAB,
            0x08 | 0x7F => KeyCode::BACKSPACE,
            0x00 => KeyCode::char(' ').with_modifiers(Modifiers::CTRL),
            b @ 0x01..=0x1A => {
                KeyCode::char((b + b'a' - 1) as char).with_modifiers(Modifiers::CTRL)
            }
            // 0x1C..=0x1F: Ctrl+\ Ctrl+] Ctrl+^ Ctrl+_
            b @ 0x1C..=0x1F => {
                KeyCode::char((b + b'@') as char).with_modifiers(Modifiers::CTRL)
            }
            b @ 0x20..=0x7E => KeyCode::char(b as char),
            _ => KeyCode::UNKNOWN,
        }
    }

    /// Map the byte following a lone ESC: the ESC-letter convention for
    /// Alt. Control bytes combine Alt with Ctrl.
    #[must_use]
    pub const fn alt(byte: u8) -> KeyCode {
        Self::ground(byte).with_modifiers(Modifiers::ALT)
    }

    /// Map an SS3 (`ESC O <final>`) sequence.
    #[must_use]
    pub const fn ss3(final_byte: u8) -> Option<KeyCode> {
        Some(match final_byte {
            b'A' => KeyCode::UP,
            b'B' => KeyCode::DOWN,
            b'C' => KeyCode::RIGHT,
            b'D' => KeyCode::LEFT,
            b'H' => KeyCode::HOME,
            b'F' => KeyCode::END,
            b'P' => KeyCode::f(1),
            b'Q' => KeyCode::f(2),
            b'R' => KeyCode::f(3),
            b'S' => KeyCode::f(4),
            _ => return None,
        })
    }

    /// Map a parameterized CSI sequence (`ESC [ params final`).
    ///
    /// The second parameter, when present, is the xterm modifier value.
    #[must_use]
    pub fn csi(params: &[u16], final_byte: u8) -> Option<KeyCode> {
        let mods = params
            .get(1)
            .map_or(Modifiers::empty(), |&p| Self::modifiers(p));

        let code = match final_byte {
            b'~' => Self::tilde(params.first().copied().unwrap_or(0))?,
            b'A' => KeyCode::UP,
            b'B' => KeyCode::DOWN,
            b'C' => KeyCode::RIGHT,
            b'D' => KeyCode::LEFT,
            b'H' => KeyCode::HOME,
            b'F' => KeyCode::END,
            b'P' => KeyCode::f(1),
            b'Q' => KeyCode::f(2),
            b'R' => KeyCode::f(3),
            b'S' => KeyCode::f(4),
            b'Z' => return Some(KeyCode::TAB.with_modifiers(Modifiers::SHIFT)),
            _ => return None,
        };
        Some(code.with_modifiers(mods))
    }

    /// Editing and function keys of the `CSI n ~` form.
    const fn tilde(n: u16) -> Option<KeyCode> {
        Some(match n {
            1 | 7 => KeyCode::HOME,
            2 => KeyCode::INSERT,
            3 => KeyCode::DELETE,
            4 | 8 => KeyCode::END,
            5 => KeyCode::PAGE_UP,
            6 => KeyCode::PAGE_DOWN,
            11 => KeyCode::f(1),
            12 => KeyCode::f(2),
            13 => KeyCode::f(3),
            14 => KeyCode::f(4),
            15 => KeyCode::f(5),
            17 => KeyCode::f(6),
            18 => KeyCode::f(7),
            19 => KeyCode::f(8),
            20 => KeyCode::f(9),
            21 => KeyCode::f(10),
            23 => KeyCode::f(11),
            24 => KeyCode::f(12),
            25 => KeyCode::f(13),
            26 => KeyCode::f(14),
            28 => KeyCode::f(15),
            29 => KeyCode::f(16),
            31 => KeyCode::f(17),
            32 => KeyCode::f(18),
            33 => KeyCode::f(19),
            34 => KeyCode::f(20),
            _ => return None,
        })
    }

    /// Decode the xterm modifier parameter.
    ///
    /// `param − 1` is a Shift(1)|Alt(2)|Ctrl(4) mask. 0 and 1 mean no
    /// modifiers; bits above Ctrl (Super, Meta) are ignored.
    #[allow(clippy::cast_possible_truncation)] // Masked to 3 bits.
    #[must_use]
    pub const fn modifiers(param: u16) -> Modifiers {
        let mask = param.saturating_sub(1) & 0b111;
        Modifiers::from_bits_truncate(mask as u8)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
