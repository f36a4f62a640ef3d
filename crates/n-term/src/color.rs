// SPDX-License-Identifier: MIT
//
// Cell colours, terminal colour depth, and the colour-pair cache.
//
// Single-character variable names (r, g, b, l, m, s) are the standard
// mathematical convention in colour science.
#![allow(clippy::many_single_char_names)]
//
// The theming collaborator hands us colours as `CellColor`s. Terminals
// differ in how many they can show, so before a cell is written its colours
// are downgraded to the negotiated `ColorDepth`. Downgrading picks the
// perceptually nearest palette entry (distance in Oklab, not raw RGB),
// which keeps hues recognisable on 16-colour terminals.
//
// Backends address colours by pair: a (foreground, background)
// combination registered once and referenced by a small integer after.
// `ColorPairCache` hands out those integers. It lives in the driver
// context for the lifetime of the session. Pair 0 is always the terminal
// default pair.

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

// ─── CellColor ───────────────────────────────────────────────────────────────

/// Compact colour for terminal cell storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellColor {
    /// 24-bit `TrueColor`.
    Rgb(u8, u8, u8),

    /// ANSI 256-colour palette index. 0–15 are the classic 16 colours.
    Ansi256(u8),

    /// Terminal default colour (inherits from terminal settings).
    #[default]
    Default,
}

impl CellColor {
    pub const BLACK: Self = Self::Ansi256(0);
    pub const RED: Self = Self::Ansi256(1);
    pub const GREEN: Self = Self::Ansi256(2);
    pub const YELLOW: Self = Self::Ansi256(3);
    pub const BLUE: Self = Self::Ansi256(4);
    pub const MAGENTA: Self = Self::Ansi256(5);
    pub const CYAN: Self = Self::Ansi256(6);
    pub const WHITE: Self = Self::Ansi256(7);

    /// Whether this is the terminal default colour.
    #[inline]
    #[must_use]
    pub const fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }

    /// RGB value, `None` for [`CellColor::Default`].
    #[must_use]
    pub const fn to_rgb(self) -> Option<(u8, u8, u8)> {
        match self {
            Self::Rgb(r, g, b) => Some((r, g, b)),
            Self::Ansi256(idx) => Some(ansi256_to_rgb(idx)),
            Self::Default => None,
        }
    }

    /// Reduce to what a terminal of `depth` can display.
    #[must_use]
    pub fn downgrade(self, depth: ColorDepth) -> Self {
        match (depth, self) {
            (_, Self::Default) | (ColorDepth::TrueColor, _) => self,
            (ColorDepth::Mono, _) => Self::Default,
            (ColorDepth::Ansi256, Self::Rgb(r, g, b)) => Self::Ansi256(nearest_ansi256((r, g, b))),
            (ColorDepth::Ansi256, Self::Ansi256(_)) => self,
            (ColorDepth::Ansi16, Self::Ansi256(idx)) if idx < 16 => self,
            (ColorDepth::Ansi16, c) => c
                .to_rgb()
                .map_or(Self::Default, |rgb| Self::Ansi256(nearest_ansi16(rgb))),
        }
    }
}

impl fmt::Debug for CellColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb(r, g, b) => write!(f, "#{r:02x}{g:02x}{b:02x}"),
            Self::Ansi256(idx) => write!(f, "ansi({idx})"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl fmt::Display for CellColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ─── ColorDepth ──────────────────────────────────────────────────────────────

/// How many colours the terminal can show. Ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ColorDepth {
    /// No colour at all (`NO_COLOR`, dumb-ish terminals).
    Mono,
    /// The 16 classic ANSI colours.
    Ansi16,
    /// The xterm 256-colour palette.
    #[default]
    Ansi256,
    /// 24-bit colour.
    TrueColor,
}

impl fmt::Display for ColorDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mono => "mono",
            Self::Ansi16 => "16",
            Self::Ansi256 => "256",
            Self::TrueColor => "truecolor",
        })
    }
}

// ─── Colour Pairs ────────────────────────────────────────────────────────────

/// Backend handle for a registered (foreground, background) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PairId(pub u16);

impl PairId {
    /// The terminal default pair. Always defined.
    pub const DEFAULT: Self = Self(0);
}

/// Process-lifetime mapping from colour pairs to backend handles.
#[derive(Debug, Clone)]
pub struct ColorPairCache {
    pairs: HashMap<(CellColor, CellColor), PairId>,
    next: u16,
}

impl ColorPairCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pairs: HashMap::new(),
            next: 1,
        }
    }

    /// Look up the pair, registering it if unseen. The flag is `true` when
    /// the pair was just created and the backend must be told about it.
    ///
    /// Once every handle is taken, new pairs fall back to the default pair.
    pub fn get_or_insert(&mut self, fg: CellColor, bg: CellColor) -> (PairId, bool) {
        if fg.is_default() && bg.is_default() {
            return (PairId::DEFAULT, false);
        }
        if let Some(&id) = self.pairs.get(&(fg, bg)) {
            return (id, false);
        }
        if self.next == u16::MAX {
            warn!(?fg, ?bg, "colour pair table full, using default pair");
            return (PairId::DEFAULT, false);
        }
        let id = PairId(self.next);
        self.next += 1;
        self.pairs.insert((fg, bg), id);
        (id, true)
    }

    #[must_use]
    pub fn get(&self, fg: CellColor, bg: CellColor) -> Option<PairId> {
        if fg.is_default() && bg.is_default() {
            return Some(PairId::DEFAULT);
        }
        self.pairs.get(&(fg, bg)).copied()
    }

    /// Registered pairs, excluding the default pair.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl Default for ColorPairCache {
    fn default() -> Self {
        Self::new()
    }
}

// ─── ANSI Palette ────────────────────────────────────────────────────────────

/// The standard ANSI-16 palette as RGB values (xterm defaults).
pub const ANSI16_RGB: [(u8, u8, u8); 16] = [
    (0, 0, 0),       // 0: Black
    (128, 0, 0),     // 1: Red
    (0, 128, 0),     // 2: Green
    (128, 128, 0),   // 3: Yellow
    (0, 0, 128),     // 4: Blue
    (128, 0, 128),   // 5: Magenta
    (0, 128, 128),   // 6: Cyan
    (192, 192, 192), // 7: White
    (128, 128, 128), // 8: Bright Black
    (255, 0, 0),     // 9: Bright Red
    (0, 255, 0),     // 10: Bright Green
    (255, 255, 0),   // 11: Bright Yellow
    (0, 0, 255),     // 12: Bright Blue
    (255, 0, 255),   // 13: Bright Magenta
    (0, 255, 255),   // 14: Bright Cyan
    (255, 255, 255), // 15: Bright White
];

/// Convert an ANSI-256 palette index to RGB values.
#[must_use]
pub const fn ansi256_to_rgb(idx: u8) -> (u8, u8, u8) {
    match idx {
        0..=15 => ANSI16_RGB[idx as usize],
        // 6×6×6 cube with levels 0, 95, 135, 175, 215, 255.
        16..=231 => {
            let i = idx - 16;
            (cube_level(i / 36), cube_level((i % 36) / 6), cube_level(i % 6))
        }
        // 24-step grey ramp.
        232..=255 => {
            let v = 8 + 10 * (idx - 232);
            (v, v, v)
        }
    }
}

const fn cube_level(i: u8) -> u8 {
    if i == 0 { 0 } else { 55 + 40 * i }
}

/// Nearest ANSI-256 entry by Oklab distance.
#[must_use]
pub fn nearest_ansi256(rgb: (u8, u8, u8)) -> u8 {
    nearest_in(rgb, 0..=255)
}

/// Nearest ANSI-16 entry by Oklab distance.
#[must_use]
pub fn nearest_ansi16(rgb: (u8, u8, u8)) -> u8 {
    nearest_in(rgb, 0..=15)
}

fn nearest_in(rgb: (u8, u8, u8), range: std::ops::RangeInclusive<u8>) -> u8 {
    let target = rgb8_to_oklab(rgb);
    let mut best_idx = 0u8;
    let mut best_dist = f32::MAX;
    for idx in range {
        let (l2, a2, b2) = rgb8_to_oklab(ansi256_to_rgb(idx));
        let dl = target.0 - l2;
        let da = target.1 - a2;
        let db = target.2 - b2;
        let dist = db.mul_add(db, dl.mul_add(dl, da * da));
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }
    best_idx
}

// ─── Oklab ───────────────────────────────────────────────────────────────────
//
// Matrices from Björn Ottosson's Oklab definition.

fn rgb8_to_oklab((r, g, b): (u8, u8, u8)) -> (f32, f32, f32) {
    let lin = |v: u8| srgb_to_linear(f32::from(v) / 255.0);
    linear_srgb_to_oklab(lin(r), lin(g), lin(b))
}

#[inline]
fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_srgb_to_oklab(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let l = 0.051_445_995f32.mul_add(b, 0.412_221_47f32.mul_add(r, 0.536_332_55 * g));
    let m = 0.107_396_96f32.mul_add(b, 0.211_903_5f32.mul_add(r, 0.680_699_5 * g));
    let s = 0.629_978_7f32.mul_add(b, 0.088_302_46f32.mul_add(r, 0.281_718_84 * g));

    let l_ = l.cbrt();
    let m_ = m.cbrt();
    let s_ = s.cbrt();

    let l_ok = 0.004_072_047f32.mul_add(-s_, 0.210_454_26f32.mul_add(l_, 0.793_617_8 * m_));
    let a = 0.450_593_7f32.mul_add(s_, 1.977_998_5f32.mul_add(l_, -(2.428_592_2 * m_)));
    let b_ok = 0.808_675_77f32.mul_add(-s_, 0.025_904_037f32.mul_add(l_, 0.782_771_77 * m_));

    (l_ok, a, b_ok)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    // ── Palette ──────────────────────────────────────────────────────

    #[test]
    fn palette_landmarks() {
        assert_eq!(ansi256_to_rgb(1), (128, 0, 0));
        assert_eq!(ansi256_to_rgb(16), (0, 0, 0));
        assert_eq!(ansi256_to_rgb(196), (255, 0, 0));
        assert_eq!(ansi256_to_rgb(231), (255, 255, 255));
        assert_eq!(ansi256_to_rgb(232), (8, 8, 8));
        assert_eq!(ansi256_to_rgb(255), (238, 238, 238));
    }

    #[test]
    fn exact_palette_colours_match_themselves() {
        assert_eq!(nearest_ansi256((255, 0, 0)), 9);
        assert_eq!(nearest_ansi256((95, 135, 175)), 67);
        assert_eq!(nearest_ansi16((0, 0, 128)), 4);
    }

    #[test]
    fn near_colours_snap() {
        assert_eq!(nearest_ansi16((250, 5, 5)), 9);
        assert_eq!(nearest_ansi16((10, 10, 10)), 0);
    }

    // ── Downgrade ────────────────────────────────────────────────────

    #[test]
    fn truecolor_keeps_everything() {
        let c = CellColor::Rgb(1, 2, 3);
        assert_eq!(c.downgrade(ColorDepth::TrueColor), c);
    }

    #[test]
    fn mono_drops_colour() {
        assert_eq!(CellColor::RED.downgrade(ColorDepth::Mono), CellColor::Default);
    }

    #[test]
    fn ansi256_maps_rgb() {
        assert_eq!(
            CellColor::Rgb(255, 0, 0).downgrade(ColorDepth::Ansi256),
            CellColor::Ansi256(9)
        );
        assert_eq!(
            CellColor::Ansi256(200).downgrade(ColorDepth::Ansi256),
            CellColor::Ansi256(200)
        );
    }

    #[test]
    fn ansi16_folds_palette() {
        assert_eq!(
            CellColor::Ansi256(196).downgrade(ColorDepth::Ansi16),
            CellColor::Ansi256(9)
        );
        assert_eq!(CellColor::BLUE.downgrade(ColorDepth::Ansi16), CellColor::BLUE);
    }

    #[test]
    fn default_survives_every_depth() {
        for depth in [
            ColorDepth::Mono,
            ColorDepth::Ansi16,
            ColorDepth::Ansi256,
            ColorDepth::TrueColor,
        ] {
            assert_eq!(CellColor::Default.downgrade(depth), CellColor::Default);
        }
    }

    #[test]
    fn depth_ordering() {
        assert!(ColorDepth::Mono < ColorDepth::Ansi16);
        assert!(ColorDepth::Ansi256 < ColorDepth::TrueColor);
        assert_eq!(ColorDepth::TrueColor.to_string(), "truecolor");
    }

    // ── Pair cache ───────────────────────────────────────────────────

    #[test]
    fn default_pair_is_zero_and_never_new() {
        let mut cache = ColorPairCache::new();
        assert_eq!(
            cache.get_or_insert(CellColor::Default, CellColor::Default),
            (PairId::DEFAULT, false)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn pairs_are_cached() {
        let mut cache = ColorPairCache::new();
        let (a, new_a) = cache.get_or_insert(CellColor::RED, CellColor::Default);
        let (b, new_b) = cache.get_or_insert(CellColor::RED, CellColor::Default);
        let (c, new_c) = cache.get_or_insert(CellColor::Default, CellColor::RED);
        assert_eq!((a, new_a), (PairId(1), true));
        assert_eq!((b, new_b), (PairId(1), false));
        assert_eq!((c, new_c), (PairId(2), true));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(CellColor::Default, CellColor::RED), Some(PairId(2)));
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", CellColor::Rgb(255, 0, 16)), "#ff0010");
        assert_eq!(CellColor::Ansi256(3).to_string(), "ansi(3)");
        assert_eq!(CellColor::Default.to_string(), "default");
    }
}
