// SPDX-License-Identifier: MIT
//
// Mouse reports and the synthesizer that turns them into semantic events.
//
// The terminal only ever says "button N went down here" or "came up there"
// (plus motion and wheel ticks). Everything a widget actually wants, such as
// clicks, double clicks, drags and held-button repeat, is inferred here from
// the sequence of raw reports and their timing:
//
//   press                      → Pressed
//   motion while held          → Pressed | REPORT_MOUSE_POSITION (drag)
//   release near the press     → Released, then Clicked / DoubleClicked /
//                                TripleClicked depending on the click run
//   release elsewhere          → Released (a drag ended, no click)
//   release with no press      → nothing (stray report)
//
// Wire format (SGR 1006): `ESC [ < Cb ; Cx ; Cy M` for press/motion and
// `... m` for release. Coordinates are 1-based on the wire and 0-based
// everywhere else. `Cb` packs the button (low two bits), Shift (4), Alt (8),
// Ctrl (16), motion (32), wheel (64), and extended buttons (128).

use std::time::{Duration, Instant};

use bitflags::bitflags;
use tracing::trace;

use crate::config::DriverConfig;

// ─── MouseFlags ─────────────────────────────────────────────────────────────

bitflags! {
    /// Semantic mouse state bits. Only validly simultaneous states are ever
    /// combined (a pressed button with a position report during a drag, a
    /// click with the modifiers held at the time).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct MouseFlags: u32 {
        const BUTTON1_PRESSED        = 1 << 0;
        const BUTTON1_RELEASED       = 1 << 1;
        const BUTTON1_CLICKED        = 1 << 2;
        const BUTTON1_DOUBLE_CLICKED = 1 << 3;
        const BUTTON1_TRIPLE_CLICKED = 1 << 4;

        const BUTTON2_PRESSED        = 1 << 5;
        const BUTTON2_RELEASED       = 1 << 6;
        const BUTTON2_CLICKED        = 1 << 7;
        const BUTTON2_DOUBLE_CLICKED = 1 << 8;
        const BUTTON2_TRIPLE_CLICKED = 1 << 9;

        const BUTTON3_PRESSED        = 1 << 10;
        const BUTTON3_RELEASED       = 1 << 11;
        const BUTTON3_CLICKED        = 1 << 12;
        const BUTTON3_DOUBLE_CLICKED = 1 << 13;
        const BUTTON3_TRIPLE_CLICKED = 1 << 14;

        const BUTTON4_PRESSED        = 1 << 15;
        const BUTTON4_RELEASED       = 1 << 16;
        const BUTTON4_CLICKED        = 1 << 17;
        const BUTTON4_DOUBLE_CLICKED = 1 << 18;
        const BUTTON4_TRIPLE_CLICKED = 1 << 19;

        const WHEELED_UP    = 1 << 20;
        const WHEELED_DOWN  = 1 << 21;
        const WHEELED_LEFT  = 1 << 22;
        const WHEELED_RIGHT = 1 << 23;

        const REPORT_MOUSE_POSITION = 1 << 24;

        const BUTTON_SHIFT = 1 << 25;
        const BUTTON_CTRL  = 1 << 26;
        const BUTTON_ALT   = 1 << 27;

        const WHEEL = Self::WHEELED_UP.bits()
            | Self::WHEELED_DOWN.bits()
            | Self::WHEELED_LEFT.bits()
            | Self::WHEELED_RIGHT.bits();
        const MODIFIERS = Self::BUTTON_SHIFT.bits()
            | Self::BUTTON_CTRL.bits()
            | Self::BUTTON_ALT.bits();
    }
}

/// Mouse button identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Usually left.
    Button1,
    /// Usually middle.
    Button2,
    /// Usually right.
    Button3,
    /// First extended button (back/forward on most mice).
    Button4,
}

impl MouseButton {
    pub const ALL: [Self; 4] = [Self::Button1, Self::Button2, Self::Button3, Self::Button4];

    const fn shift(self) -> u32 {
        match self {
            Self::Button1 => 0,
            Self::Button2 => 5,
            Self::Button3 => 10,
            Self::Button4 => 15,
        }
    }

    const fn flag(self, offset: u32) -> MouseFlags {
        MouseFlags::from_bits_retain(1 << (self.shift() + offset))
    }

    #[must_use]
    pub const fn pressed(self) -> MouseFlags {
        self.flag(0)
    }

    #[must_use]
    pub const fn released(self) -> MouseFlags {
        self.flag(1)
    }

    #[must_use]
    pub const fn clicked(self) -> MouseFlags {
        self.flag(2)
    }

    #[must_use]
    pub const fn double_clicked(self) -> MouseFlags {
        self.flag(3)
    }

    #[must_use]
    pub const fn triple_clicked(self) -> MouseFlags {
        self.flag(4)
    }

    /// Every state bit belonging to this button.
    #[must_use]
    pub const fn all_states(self) -> MouseFlags {
        MouseFlags::from_bits_retain(0b1_1111 << self.shift())
    }

    /// The button encoded in an SGR button code, if any. Wheel codes and
    /// the "no button" value 3 name none.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        if code & 64 != 0 {
            return None;
        }
        if code & 128 != 0 {
            return Some(Self::Button4);
        }
        match code & 3 {
            0 => Some(Self::Button1),
            1 => Some(Self::Button2),
            2 => Some(Self::Button3),
            _ => None,
        }
    }

    /// Low bits of the SGR button code for this button.
    const fn code(self) -> u16 {
        match self {
            Self::Button1 => 0,
            Self::Button2 => 1,
            Self::Button3 => 2,
            Self::Button4 => 128,
        }
    }
}

// ─── MouseEvent ─────────────────────────────────────────────────────────────

/// A semantic mouse event with 0-based cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseEvent {
    pub flags: MouseFlags,
    pub x: u16,
    pub y: u16,
}

impl MouseEvent {
    #[inline]
    #[must_use]
    pub const fn new(flags: MouseFlags, x: u16, y: u16) -> Self {
        Self { flags, x, y }
    }

    /// The button this event concerns, if any.
    #[must_use]
    pub fn button(&self) -> Option<MouseButton> {
        MouseButton::ALL
            .into_iter()
            .find(|b| self.flags.intersects(b.all_states()))
    }

    /// Re-encode as the SGR report that would produce this event's button
    /// and position. Click flags are encoded as the release that caused
    /// them; wheel events as a wheel press.
    #[must_use]
    pub fn to_report(&self) -> MouseReport {
        let mut code = 0u16;
        if self.flags.contains(MouseFlags::BUTTON_SHIFT) {
            code |= 4;
        }
        if self.flags.contains(MouseFlags::BUTTON_ALT) {
            code |= 8;
        }
        if self.flags.contains(MouseFlags::BUTTON_CTRL) {
            code |= 16;
        }
        if self.flags.contains(MouseFlags::REPORT_MOUSE_POSITION) {
            code |= 32;
        }

        let mut press = true;
        if self.flags.intersects(MouseFlags::WHEEL) {
            code |= 64;
            code |= if self.flags.contains(MouseFlags::WHEELED_UP) {
                0
            } else if self.flags.contains(MouseFlags::WHEELED_DOWN) {
                1
            } else if self.flags.contains(MouseFlags::WHEELED_LEFT) {
                2
            } else {
                3
            };
        } else if let Some(b) = self.button() {
            code |= b.code();
            press = self.flags.contains(b.pressed());
        } else {
            code |= 3;
        }

        MouseReport {
            code,
            x: self.x,
            y: self.y,
            press,
        }
    }
}

// ─── MouseReport ────────────────────────────────────────────────────────────

/// A raw SGR mouse report as the terminal sent it (coordinates 0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseReport {
    /// SGR button code (`Cb`).
    pub code: u16,
    pub x: u16,
    pub y: u16,
    /// `true` for `M` (press or motion), `false` for `m` (release).
    pub press: bool,
}

impl MouseReport {
    /// Parse the parameter bytes that follow `ESC [ <`, given the final
    /// byte. Exactly three decimal fields are required.
    #[must_use]
    pub fn parse_sgr(params: &[u8], final_byte: u8) -> Option<Self> {
        let press = match final_byte {
            b'M' => true,
            b'm' => false,
            _ => return None,
        };
        let mut fields = params.split(|&b| b == b';');
        let code = parse_field(fields.next()?)?;
        let raw_x = parse_field(fields.next()?)?;
        let raw_y = parse_field(fields.next()?)?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            code,
            x: raw_x.saturating_sub(1),
            y: raw_y.saturating_sub(1),
            press,
        })
    }

    /// Encode back to the full SGR sequence.
    #[must_use]
    pub fn encode_sgr(&self) -> Vec<u8> {
        let fin = if self.press { 'M' } else { 'm' };
        format!(
            "\x1b[<{};{};{}{fin}",
            self.code,
            u32::from(self.x) + 1,
            u32::from(self.y) + 1
        )
        .into_bytes()
    }

    #[inline]
    #[must_use]
    pub const fn is_wheel(&self) -> bool {
        self.code & 64 != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_motion(&self) -> bool {
        self.code & 32 != 0
    }
}

fn parse_field(raw: &[u8]) -> Option<u16> {
    if raw.is_empty() {
        return None;
    }
    raw.iter().try_fold(0u16, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u16::from(b - b'0'))
    })
}

/// Modifier flags carried in an SGR button code.
const fn modifier_flags(code: u16) -> MouseFlags {
    let mut flags = MouseFlags::empty();
    if code & 4 != 0 {
        flags = flags.union(MouseFlags::BUTTON_SHIFT);
    }
    if code & 8 != 0 {
        flags = flags.union(MouseFlags::BUTTON_ALT);
    }
    if code & 16 != 0 {
        flags = flags.union(MouseFlags::BUTTON_CTRL);
    }
    flags
}

// ─── LastMouseState ─────────────────────────────────────────────────────────

/// A button currently held down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Held {
    button: MouseButton,
    /// Where the press happened.
    origin: (u16, u16),
    /// Latest position seen while held.
    at: (u16, u16),
}

/// What the synthesizer last emitted, and which button (if any) it believes
/// is down. Releases and clicks are only produced against a tracked press.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastMouseState {
    flags: MouseFlags,
    at: Option<Instant>,
    held: Option<Held>,
}

impl LastMouseState {
    /// Flags of the last emitted event.
    #[must_use]
    pub const fn flags(&self) -> MouseFlags {
        self.flags
    }

    /// When the last event was emitted.
    #[must_use]
    pub const fn timestamp(&self) -> Option<Instant> {
        self.at
    }

    /// The button currently held, if any.
    #[must_use]
    pub fn pressed_button(&self) -> Option<MouseButton> {
        self.held.map(|h| h.button)
    }
}

/// The current multi-click run.
#[derive(Debug, Clone, Copy)]
struct ClickRun {
    button: MouseButton,
    x: u16,
    y: u16,
    count: u8,
    at: Instant,
}

// ─── MouseEventSynthesizer ──────────────────────────────────────────────────

/// Stateful converter from raw reports to semantic [`MouseEvent`]s.
#[derive(Debug, Clone)]
pub struct MouseEventSynthesizer {
    double_click_interval: Duration,
    click_distance: u16,
    continuous: bool,
    last: LastMouseState,
    clicks: Option<ClickRun>,
}

impl MouseEventSynthesizer {
    #[must_use]
    pub const fn new(double_click_interval: Duration, click_distance: u16) -> Self {
        Self {
            double_click_interval,
            click_distance,
            continuous: false,
            last: LastMouseState {
                flags: MouseFlags::empty(),
                at: None,
                held: None,
            },
            clicks: None,
        }
    }

    #[must_use]
    pub const fn from_config(config: &DriverConfig) -> Self {
        Self::new(config.double_click_interval, config.click_distance)
    }

    /// Opt in or out of continuous-press mode. While enabled, [`tick`]
    /// re-emits Pressed for a held button. Opting out takes effect on the
    /// next tick.
    ///
    /// [`tick`]: Self::tick
    pub const fn set_continuous_press(&mut self, enabled: bool) {
        self.continuous = enabled;
    }

    #[must_use]
    pub const fn continuous_press(&self) -> bool {
        self.continuous
    }

    #[must_use]
    pub const fn last_state(&self) -> &LastMouseState {
        &self.last
    }

    /// Feed a parsed SGR report.
    pub fn synthesize_report(&mut self, report: MouseReport, now: Instant) -> Vec<MouseEvent> {
        self.synthesize(report.code, report.x, report.y, report.press, now)
    }

    /// Turn one raw report into zero or more semantic events.
    ///
    /// Never fails: reports that make no sense against the tracked state
    /// (a release with no press) yield an empty list.
    pub fn synthesize(
        &mut self,
        code: u16,
        x: u16,
        y: u16,
        is_press: bool,
        now: Instant,
    ) -> Vec<MouseEvent> {
        let mods = modifier_flags(code);
        let mut out = Vec::with_capacity(2);

        if code & 64 != 0 {
            // Wheel: terminals send press-only; a stray release means nothing.
            if is_press {
                let dir = match code & 3 {
                    0 => MouseFlags::WHEELED_UP,
                    1 => MouseFlags::WHEELED_DOWN,
                    2 => MouseFlags::WHEELED_LEFT,
                    _ => MouseFlags::WHEELED_RIGHT,
                };
                self.emit(&mut out, dir | mods, x, y, now);
            }
            return out;
        }

        let button = MouseButton::from_code(code);
        let motion = code & 32 != 0;

        if is_press {
            match button {
                None => {
                    self.emit(&mut out, MouseFlags::REPORT_MOUSE_POSITION | mods, x, y, now);
                }
                Some(b) if motion => {
                    match &mut self.last.held {
                        Some(held) if held.button == b => held.at = (x, y),
                        // Press happened before tracking began; adopt it.
                        slot => {
                            *slot = Some(Held {
                                button: b,
                                origin: (x, y),
                                at: (x, y),
                            });
                        }
                    }
                    let flags = b.pressed() | MouseFlags::REPORT_MOUSE_POSITION | mods;
                    self.emit(&mut out, flags, x, y, now);
                }
                Some(b) => {
                    self.last.held = Some(Held {
                        button: b,
                        origin: (x, y),
                        at: (x, y),
                    });
                    self.emit(&mut out, b.pressed() | mods, x, y, now);
                }
            }
            return out;
        }

        // Release. Legacy encodings report code 3 ("some button") on release.
        let held = match (button, self.last.held) {
            (Some(b), Some(h)) if h.button == b => h,
            (None, Some(h)) => h,
            _ => {
                trace!(code, x, y, "stray mouse release dropped");
                return out;
            }
        };
        self.last.held = None;

        let b = held.button;
        self.emit(&mut out, b.released() | mods, x, y, now);

        if !self.near(held.origin, (x, y)) {
            self.clicks = None;
            return out;
        }

        let count = match self.clicks {
            Some(run)
                if run.button == b
                    && run.count < 3
                    && self.near((run.x, run.y), (x, y))
                    && now.saturating_duration_since(run.at) <= self.double_click_interval =>
            {
                run.count + 1
            }
            _ => 1,
        };
        self.clicks = Some(ClickRun {
            button: b,
            x,
            y,
            count,
            at: now,
        });

        let click = match count {
            1 => b.clicked(),
            2 => b.double_clicked(),
            _ => b.triple_clicked(),
        };
        self.emit(&mut out, click | mods, x, y, now);
        out
    }

    /// Continuous-press heartbeat. Returns a Pressed event at the latest
    /// held position while a button is down and the mode is enabled.
    pub fn tick(&mut self, now: Instant) -> Option<MouseEvent> {
        if !self.continuous {
            return None;
        }
        let held = self.last.held?;
        let flags = held.button.pressed();
        self.last.flags = flags;
        self.last.at = Some(now);
        Some(MouseEvent::new(flags, held.at.0, held.at.1))
    }

    /// Forget any held button and click run (e.g. after mouse reporting
    /// was toggled off).
    pub fn reset(&mut self) {
        self.last = LastMouseState::default();
        self.clicks = None;
    }

    fn near(&self, a: (u16, u16), b: (u16, u16)) -> bool {
        a.0.abs_diff(b.0) <= self.click_distance && a.1.abs_diff(b.1) <= self.click_distance
    }

    fn emit(&mut self, out: &mut Vec<MouseEvent>, flags: MouseFlags, x: u16, y: u16, now: Instant) {
        self.last.flags = flags;
        self.last.at = Some(now);
        out.push(MouseEvent::new(flags, x, y));
    }
}

impl Default for MouseEventSynthesizer {
    fn default() -> Self {
        Self::from_config(&DriverConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn synth() -> MouseEventSynthesizer {
        MouseEventSynthesizer::new(INTERVAL, 0)
    }

    fn flags(events: &[MouseEvent]) -> Vec<MouseFlags> {
        events.iter().map(|e| e.flags).collect()
    }

    /// Press and release button 1 at `(x, y)`; returns the release output.
    fn click(s: &mut MouseEventSynthesizer, x: u16, y: u16, now: Instant) -> Vec<MouseEvent> {
        s.synthesize(0, x, y, true, now);
        s.synthesize(0, x, y, false, now)
    }

    // ── Press / release ─────────────────────────────────────────────

    #[test]
    fn press_emits_pressed() {
        let mut s = synth();
        let out = s.synthesize(0, 3, 4, true, Instant::now());
        assert_eq!(out, vec![MouseEvent::new(MouseFlags::BUTTON1_PRESSED, 3, 4)]);
        assert_eq!(s.last_state().pressed_button(), Some(MouseButton::Button1));
    }

    #[test]
    fn release_at_press_point_clicks() {
        let mut s = synth();
        let out = click(&mut s, 3, 4, Instant::now());
        assert_eq!(
            flags(&out),
            vec![MouseFlags::BUTTON1_RELEASED, MouseFlags::BUTTON1_CLICKED]
        );
        assert_eq!(s.last_state().pressed_button(), None);
    }

    #[test]
    fn stray_release_yields_nothing() {
        let mut s = synth();
        assert!(s.synthesize(0, 1, 1, false, Instant::now()).is_empty());
        assert!(s.synthesize(3, 1, 1, false, Instant::now()).is_empty());
    }

    #[test]
    fn release_of_other_button_is_stray() {
        let mut s = synth();
        s.synthesize(0, 1, 1, true, Instant::now());
        assert!(s.synthesize(2, 1, 1, false, Instant::now()).is_empty());
        // Button 1 is still held.
        assert_eq!(s.last_state().pressed_button(), Some(MouseButton::Button1));
    }

    #[test]
    fn legacy_release_code_matches_held_button() {
        let mut s = synth();
        s.synthesize(1, 5, 5, true, Instant::now());
        let out = s.synthesize(3, 5, 5, false, Instant::now());
        assert_eq!(
            flags(&out),
            vec![MouseFlags::BUTTON2_RELEASED, MouseFlags::BUTTON2_CLICKED]
        );
    }

    #[test]
    fn release_elsewhere_is_not_a_click() {
        let mut s = synth();
        let now = Instant::now();
        s.synthesize(0, 1, 1, true, now);
        s.synthesize(32, 5, 1, true, now);
        let out = s.synthesize(0, 5, 1, false, now);
        assert_eq!(flags(&out), vec![MouseFlags::BUTTON1_RELEASED]);
    }

    #[test]
    fn click_distance_tolerates_jitter() {
        let mut s = MouseEventSynthesizer::new(INTERVAL, 1);
        let now = Instant::now();
        s.synthesize(0, 10, 10, true, now);
        let out = s.synthesize(0, 11, 10, false, now);
        assert!(out[1].flags.contains(MouseFlags::BUTTON1_CLICKED));
    }

    // ── Multi-click ─────────────────────────────────────────────────

    #[test]
    fn second_click_within_interval_is_double() {
        let mut s = synth();
        let t0 = Instant::now();
        let first = click(&mut s, 2, 2, t0);
        let second = click(&mut s, 2, 2, t0 + Duration::from_millis(200));

        let all: Vec<_> = first.iter().chain(&second).collect();
        let doubles = all
            .iter()
            .filter(|e| e.flags.contains(MouseFlags::BUTTON1_DOUBLE_CLICKED))
            .count();
        assert_eq!(doubles, 1);
        assert_eq!(
            flags(&second),
            vec![MouseFlags::BUTTON1_RELEASED, MouseFlags::BUTTON1_DOUBLE_CLICKED]
        );
    }

    #[test]
    fn second_click_after_interval_is_single() {
        let mut s = synth();
        let t0 = Instant::now();
        click(&mut s, 2, 2, t0);
        let second = click(&mut s, 2, 2, t0 + INTERVAL + Duration::from_millis(1));
        assert_eq!(second[1].flags, MouseFlags::BUTTON1_CLICKED);
    }

    #[test]
    fn second_click_elsewhere_is_single() {
        let mut s = synth();
        let t0 = Instant::now();
        click(&mut s, 2, 2, t0);
        let second = click(&mut s, 3, 2, t0 + Duration::from_millis(100));
        assert_eq!(second[1].flags, MouseFlags::BUTTON1_CLICKED);
    }

    #[test]
    fn third_click_is_triple_fourth_restarts() {
        let mut s = synth();
        let t0 = Instant::now();
        let step = Duration::from_millis(100);
        click(&mut s, 0, 0, t0);
        click(&mut s, 0, 0, t0 + step);
        let third = click(&mut s, 0, 0, t0 + step * 2);
        let fourth = click(&mut s, 0, 0, t0 + step * 3);
        assert_eq!(third[1].flags, MouseFlags::BUTTON1_TRIPLE_CLICKED);
        assert_eq!(fourth[1].flags, MouseFlags::BUTTON1_CLICKED);
    }

    #[test]
    fn different_button_breaks_run() {
        let mut s = synth();
        let t0 = Instant::now();
        click(&mut s, 0, 0, t0);
        s.synthesize(2, 0, 0, true, t0);
        let out = s.synthesize(2, 0, 0, false, t0);
        assert_eq!(out[1].flags, MouseFlags::BUTTON3_CLICKED);
    }

    // ── Motion / wheel / modifiers ──────────────────────────────────

    #[test]
    fn drag_reports_pressed_with_position() {
        let mut s = synth();
        let now = Instant::now();
        s.synthesize(0, 0, 0, true, now);
        let out = s.synthesize(32, 4, 0, true, now);
        assert_eq!(
            out,
            vec![MouseEvent::new(
                MouseFlags::BUTTON1_PRESSED | MouseFlags::REPORT_MOUSE_POSITION,
                4,
                0
            )]
        );
    }

    #[test]
    fn hover_motion_reports_position_only() {
        let mut s = synth();
        let out = s.synthesize(35, 7, 8, true, Instant::now());
        assert_eq!(
            out,
            vec![MouseEvent::new(MouseFlags::REPORT_MOUSE_POSITION, 7, 8)]
        );
    }

    #[test]
    fn wheel_directions() {
        let mut s = synth();
        let now = Instant::now();
        assert_eq!(s.synthesize(64, 0, 0, true, now)[0].flags, MouseFlags::WHEELED_UP);
        assert_eq!(s.synthesize(65, 0, 0, true, now)[0].flags, MouseFlags::WHEELED_DOWN);
        assert_eq!(s.synthesize(66, 0, 0, true, now)[0].flags, MouseFlags::WHEELED_LEFT);
        assert_eq!(s.synthesize(67, 0, 0, true, now)[0].flags, MouseFlags::WHEELED_RIGHT);
        assert!(s.synthesize(64, 0, 0, false, now).is_empty());
    }

    #[test]
    fn modifiers_carry_through() {
        let mut s = synth();
        let out = s.synthesize(4 | 8 | 16, 0, 0, true, Instant::now());
        assert_eq!(
            out[0].flags,
            MouseFlags::BUTTON1_PRESSED | MouseFlags::MODIFIERS
        );
    }

    #[test]
    fn extended_button() {
        let mut s = synth();
        let out = s.synthesize(128, 0, 0, true, Instant::now());
        assert_eq!(out[0].flags, MouseFlags::BUTTON4_PRESSED);
        assert_eq!(out[0].button(), Some(MouseButton::Button4));
    }

    // ── Continuous press ────────────────────────────────────────────

    #[test]
    fn tick_is_silent_unless_enabled() {
        let mut s = synth();
        s.synthesize(0, 1, 1, true, Instant::now());
        assert_eq!(s.tick(Instant::now()), None);
    }

    #[test]
    fn tick_repeats_pressed_at_latest_position() {
        let mut s = synth();
        s.set_continuous_press(true);
        let now = Instant::now();
        s.synthesize(0, 1, 1, true, now);
        s.synthesize(32, 6, 2, true, now);
        assert_eq!(
            s.tick(now),
            Some(MouseEvent::new(MouseFlags::BUTTON1_PRESSED, 6, 2))
        );
        assert_eq!(
            s.tick(now + Duration::from_millis(50)),
            Some(MouseEvent::new(MouseFlags::BUTTON1_PRESSED, 6, 2))
        );
        assert_eq!(s.last_state().flags(), MouseFlags::BUTTON1_PRESSED);
    }

    #[test]
    fn tick_stops_on_release_and_opt_out() {
        let mut s = synth();
        s.set_continuous_press(true);
        let now = Instant::now();
        s.synthesize(0, 1, 1, true, now);
        s.set_continuous_press(false);
        assert_eq!(s.tick(now), None);
        s.set_continuous_press(true);
        s.synthesize(0, 1, 1, false, now);
        assert_eq!(s.tick(now), None);
    }

    // ── SGR reports ─────────────────────────────────────────────────

    #[test]
    fn parse_sgr_converts_to_zero_based() {
        assert_eq!(
            MouseReport::parse_sgr(b"0;10;5", b'M'),
            Some(MouseReport {
                code: 0,
                x: 9,
                y: 4,
                press: true
            })
        );
    }

    #[test]
    fn parse_sgr_rejects_malformed() {
        assert_eq!(MouseReport::parse_sgr(b"0;10", b'M'), None);
        assert_eq!(MouseReport::parse_sgr(b"0;10;5;1", b'M'), None);
        assert_eq!(MouseReport::parse_sgr(b"0;;5", b'M'), None);
        assert_eq!(MouseReport::parse_sgr(b"0;99999;5", b'M'), None);
        assert_eq!(MouseReport::parse_sgr(b"0;1;1", b'X'), None);
    }

    #[test]
    fn event_to_report_reencodes_click_as_release() {
        let ev = MouseEvent::new(MouseFlags::BUTTON3_CLICKED, 4, 9);
        assert_eq!(ev.to_report().encode_sgr(), b"\x1b[<2;5;10m".to_vec());
    }

    proptest! {
        #[test]
        fn sgr_report_roundtrip(code in 0u16..256, x in 1u16..2000, y in 1u16..2000, press: bool) {
            let fin = if press { 'M' } else { 'm' };
            let wire = format!("\x1b[<{code};{x};{y}{fin}").into_bytes();
            let report = MouseReport::parse_sgr(&wire[3..wire.len() - 1], wire[wire.len() - 1]).unwrap();
            prop_assert_eq!(report.x, x - 1);
            prop_assert_eq!(report.y, y - 1);
            prop_assert_eq!(report.encode_sgr(), wire);
        }

        #[test]
        fn synthesized_events_keep_coordinates(code in 0u16..256, x in 0u16..500, y in 0u16..500) {
            let mut s = synth();
            let now = Instant::now();
            for ev in s.synthesize(code, x, y, true, now) {
                prop_assert_eq!((ev.x, ev.y), (x, y));
                let back = ev.to_report();
                prop_assert_eq!((back.x, back.y), (x, y));
            }
        }
    }
}
