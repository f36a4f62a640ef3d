// SPDX-License-Identifier: MIT
//
// Escape sequence decoder.
//
// Pulls bytes from a `ByteSource` one at a time and turns them into
// `InputEvent`s. The state machine:
//
//   Ground ──ESC──▶ SawEscape ──'['──▶ CollectingCSIParams ──final──▶ emit
//     │               │  └────'O'──▶ CollectingSS3 ──letter──▶ emit
//     │               │  └────']'──▶ CollectingOSC ──BEL/ST──▶ emit
//     │               │  └────ESC──▶ '[' or 'O' key with Alt added
//     │               └──timeout──▶ Escape
//     └──other──▶ KeyMapper::ground ──▶ emit
//
// Every read after the first byte of a sequence waits at most the
// configured escape timeout. That bound is the only thing separating a
// lone Escape keypress from the start of an escape sequence. A slow link
// that splits `ESC [ A` across the timeout will decode as Escape, '[', 'A'.
// There is no way to do better without protocol support.
//
// Nothing is ever dropped. A sequence that goes wrong halfway (timeout,
// byte out of range, too long) is replayed as literal keys: the ESC and
// the byte after it become one Alt+<byte> key, the remainder become plain
// keys, and the offending byte is pushed back to be decoded fresh.
//
// Completed sequences are classified in this order:
//
//   1. `CSI < … M|m`                → mouse report → synthesizer
//   2. terminator has a pending query → DeviceResponse (query consumed)
//   3. known key table entry         → Key
//   4. anything else well-formed     → DeviceResponse

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::DriverConfig;
use crate::event::InputEvent;
use crate::keys::{KeyCode, KeyEvent, KeyMapper, Modifiers};
use crate::mouse::{MouseEventSynthesizer, MouseReport};
use crate::pending::{self, PendingRequestTable};
use crate::source::ByteSource;

/// Longest CSI sequence accepted before it is treated as garbage.
const MAX_CSI_LEN: usize = 64;

/// Longest OSC/DCS string accepted. Version strings and colour reports
/// are well under this.
const MAX_STRING_LEN: usize = 4096;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

/// Where the decoder is inside a sequence. Transient: always `Ground`
/// between calls to [`EscapeSequenceDecoder::decode_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    #[default]
    Ground,
    SawEscape,
    CollectingSS3,
    CollectingCSIParams,
    /// OSC, or DCS while a DCS answer is expected.
    CollectingOSC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringKind {
    Osc,
    Dcs,
}

impl StringKind {
    const fn terminator_key(self) -> &'static str {
        match self {
            Self::Osc => pending::OSC,
            Self::Dcs => pending::DCS,
        }
    }
}

/// Turns the raw input byte stream into [`InputEvent`]s.
pub struct EscapeSequenceDecoder {
    state: DecoderState,
    escape_timeout: Duration,
    clock: SharedClock,
    mouse: MouseEventSynthesizer,
    /// Decoded events not yet handed out (one byte run can yield several).
    backlog: VecDeque<InputEvent>,
    /// Bytes read but not consumed by the sequence that read them.
    pushback: VecDeque<u8>,
    /// The sequence being collected, introducer included.
    seq: Vec<u8>,
}

impl EscapeSequenceDecoder {
    #[must_use]
    pub fn new(config: &DriverConfig, clock: SharedClock) -> Self {
        Self {
            state: DecoderState::Ground,
            escape_timeout: config.escape_timeout,
            clock,
            mouse: MouseEventSynthesizer::from_config(config),
            backlog: VecDeque::new(),
            pushback: VecDeque::new(),
            seq: Vec::with_capacity(32),
        }
    }

    #[must_use]
    pub const fn state(&self) -> DecoderState {
        self.state
    }

    #[must_use]
    pub const fn escape_timeout(&self) -> Duration {
        self.escape_timeout
    }

    #[must_use]
    pub const fn mouse(&self) -> &MouseEventSynthesizer {
        &self.mouse
    }

    pub const fn mouse_mut(&mut self) -> &mut MouseEventSynthesizer {
        &mut self.mouse
    }

    /// Whether decoded events or unread bytes are buffered, so the next
    /// [`decode_next`](Self::decode_next) may succeed without new input.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.backlog.is_empty() || !self.pushback.is_empty()
    }

    /// Continuous-press heartbeat, forwarded to the mouse synthesizer.
    pub fn tick(&mut self) -> Option<InputEvent> {
        let now = self.clock.now();
        self.mouse.tick(now).map(InputEvent::Mouse)
    }

    /// Decode the next event.
    ///
    /// Returns `Ok(None)` when no complete event is available without
    /// waiting. Blocks at most the escape timeout per byte once a sequence
    /// has started.
    ///
    /// # Errors
    ///
    /// Only I/O errors from the byte source. Malformed input is never an
    /// error.
    pub fn decode_next<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        pending: &mut PendingRequestTable,
    ) -> io::Result<Option<InputEvent>> {
        loop {
            if let Some(ev) = self.backlog.pop_front() {
                return Ok(Some(ev));
            }
            let Some(byte) = self.next_byte(src, Some(Duration::ZERO))? else {
                return Ok(None);
            };
            let result = self.ground(byte, src, pending);
            self.state = DecoderState::Ground;
            result?;
            // A byte run can legitimately produce nothing (stray mouse
            // release); keep reading.
        }
    }

    // ── States ──────────────────────────────────────────────────────────

    fn ground<S: ByteSource + ?Sized>(
        &mut self,
        byte: u8,
        src: &mut S,
        pending: &mut PendingRequestTable,
    ) -> io::Result<()> {
        match byte {
            ESC => self.saw_escape(src, pending),
            0x00..=0x7F => {
                self.push_key(KeyMapper::ground(byte));
                Ok(())
            }
            _ => self.utf8(byte, src, Modifiers::empty()),
        }
    }

    fn saw_escape<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        pending: &mut PendingRequestTable,
    ) -> io::Result<()> {
        self.state = DecoderState::SawEscape;
        let Some(next) = self.next_byte(src, Some(self.escape_timeout))? else {
            self.push_key(KeyCode::ESCAPE);
            return Ok(());
        };
        match next {
            b'[' => self.csi(src, pending),
            b'O' => self.ss3(src),
            b']' => self.string(src, pending, StringKind::Osc),
            b'P' if pending.is_pending(pending::DCS) => {
                self.string(src, pending, StringKind::Dcs)
            }
            ESC => self.double_escape(src, pending),
            0x80..=0xFF => self.utf8(next, src, Modifiers::ALT),
            _ => {
                self.push_key(KeyMapper::alt(next));
                Ok(())
            }
        }
    }

    /// `ESC ESC`: some terminals send Alt+<key> as ESC followed by the
    /// key's own sequence. A CSI or SS3 key right after the second ESC
    /// gains Alt; anything else leaves Alt+Escape and decodes on its own.
    fn double_escape<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        pending: &mut PendingRequestTable,
    ) -> io::Result<()> {
        let alt_escape = KeyMapper::alt(ESC);
        let intro = match self.next_byte(src, Some(self.escape_timeout))? {
            Some(b @ (b'[' | b'O')) => b,
            Some(other) => {
                self.push_key(alt_escape);
                self.pushback.push_back(other);
                return Ok(());
            }
            None => {
                self.push_key(alt_escape);
                return Ok(());
            }
        };

        let before = self.backlog.len();
        if intro == b'[' {
            self.csi(src, pending)?;
        } else {
            self.ss3(src)?;
        }
        let produced = self.backlog.len() - before;
        let replayed = KeyMapper::alt(intro);
        let is_key = produced == 1
            && matches!(self.backlog.back(), Some(InputEvent::Key(k)) if k.code != replayed);
        if is_key {
            if let Some(InputEvent::Key(key)) = self.backlog.back_mut() {
                *key = KeyEvent::new(key.code.with_modifiers(Modifiers::ALT));
            }
        } else {
            // Not a key (a response, a mouse report) or replayed as
            // literals: the first ESC stays its own key.
            self.backlog
                .insert(before, InputEvent::Key(KeyEvent::new(alt_escape)));
        }
        Ok(())
    }

    fn ss3<S: ByteSource + ?Sized>(&mut self, src: &mut S) -> io::Result<()> {
        self.state = DecoderState::CollectingSS3;
        match self.next_byte(src, Some(self.escape_timeout))? {
            Some(fin) => {
                if let Some(code) = KeyMapper::ss3(fin) {
                    self.push_key(code);
                } else {
                    trace!(byte = fin, "unknown SS3 final, replaying literally");
                    self.push_key(KeyMapper::alt(b'O'));
                    self.pushback.push_back(fin);
                }
            }
            None => self.push_key(KeyMapper::alt(b'O')),
        }
        Ok(())
    }

    fn csi<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        pending: &mut PendingRequestTable,
    ) -> io::Result<()> {
        self.state = DecoderState::CollectingCSIParams;
        self.seq.clear();
        self.seq.extend_from_slice(b"\x1b[");
        loop {
            let Some(b) = self.next_byte(src, Some(self.escape_timeout))? else {
                trace!(len = self.seq.len(), "CSI timed out, replaying literally");
                self.flush_literal();
                return Ok(());
            };
            match b {
                0x20..=0x3F if self.seq.len() < MAX_CSI_LEN => self.seq.push(b),
                0x40..=0x7E => {
                    self.seq.push(b);
                    self.finish_csi(pending);
                    return Ok(());
                }
                _ => {
                    trace!(byte = b, "CSI aborted, replaying literally");
                    self.flush_literal();
                    self.pushback.push_back(b);
                    return Ok(());
                }
            }
        }
    }

    fn finish_csi(&mut self, pending: &mut PendingRequestTable) {
        let Some((&fin, rest)) = self.seq.split_last() else {
            return;
        };
        let body = &rest[2..];

        if body.first() == Some(&b'<') && matches!(fin, b'M' | b'm') {
            match MouseReport::parse_sgr(&body[1..], fin) {
                Some(report) => {
                    let now = self.clock.now();
                    let events = self.mouse.synthesize_report(report, now);
                    self.backlog.extend(events.into_iter().map(InputEvent::Mouse));
                }
                None => {
                    trace!("malformed SGR mouse report, replaying literally");
                    self.flush_literal();
                }
            }
            return;
        }

        let mut buf = [0u8; 4];
        let terminator: &str = char::from(fin).encode_utf8(&mut buf);
        if pending.try_consume(terminator) {
            debug!(terminator, "device response matched pending query");
            self.push_response();
            return;
        }

        let private = body.first().is_some_and(|b| (b'<'..=b'?').contains(b));
        let intermediate = body.iter().any(|b| (0x20..=0x2F).contains(b));
        if !private && !intermediate {
            if let Some(code) = parse_params(body).and_then(|p| KeyMapper::csi(&p, fin)) {
                self.push_key(code);
                return;
            }
        }

        trace!(final_byte = fin, "unmapped CSI sequence");
        self.push_response();
    }

    fn string<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        pending: &mut PendingRequestTable,
        kind: StringKind,
    ) -> io::Result<()> {
        self.state = DecoderState::CollectingOSC;
        self.seq.clear();
        self.seq.push(ESC);
        self.seq.push(match kind {
            StringKind::Osc => b']',
            StringKind::Dcs => b'P',
        });

        loop {
            let Some(b) = self.next_byte(src, Some(self.escape_timeout))? else {
                trace!(len = self.seq.len(), "string sequence timed out");
                self.flush_literal();
                return Ok(());
            };
            match b {
                BEL => {
                    self.seq.push(BEL);
                    break;
                }
                ESC => match self.next_byte(src, Some(self.escape_timeout))? {
                    Some(b'\\') => {
                        self.seq.extend_from_slice(b"\x1b\\");
                        break;
                    }
                    Some(other) => {
                        // A new sequence started mid-string.
                        self.flush_literal();
                        self.pushback.push_back(ESC);
                        self.pushback.push_back(other);
                        return Ok(());
                    }
                    None => {
                        self.flush_literal();
                        self.push_key(KeyCode::ESCAPE);
                        return Ok(());
                    }
                },
                _ if self.seq.len() >= MAX_STRING_LEN => {
                    trace!("string sequence too long, replaying literally");
                    self.flush_literal();
                    self.pushback.push_back(b);
                    return Ok(());
                }
                _ => self.seq.push(b),
            }
        }

        // OSC reports are device responses whether or not we asked.
        let key = kind.terminator_key();
        if pending.try_consume(key) {
            debug!(kind = ?kind, "string response matched pending query");
        }
        self.push_response();
        Ok(())
    }

    fn utf8<S: ByteSource + ?Sized>(
        &mut self,
        lead: u8,
        src: &mut S,
        mods: Modifiers,
    ) -> io::Result<()> {
        let replacement = KeyCode::char(char::REPLACEMENT_CHARACTER).with_modifiers(mods);
        let len = utf8_len(lead);
        if len == 0 {
            self.push_key(replacement);
            return Ok(());
        }

        let mut buf = [lead, 0, 0, 0];
        for slot in &mut buf[1..len] {
            match self.next_byte(src, Some(self.escape_timeout))? {
                Some(b) if b & 0xC0 == 0x80 => *slot = b,
                Some(b) => {
                    self.push_key(replacement);
                    self.pushback.push_back(b);
                    return Ok(());
                }
                None => {
                    self.push_key(replacement);
                    return Ok(());
                }
            }
        }

        let code = std::str::from_utf8(&buf[..len])
            .ok()
            .and_then(|s| s.chars().next())
            .map_or(replacement, |ch| KeyCode::char(ch).with_modifiers(mods));
        self.push_key(code);
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn next_byte<S: ByteSource + ?Sized>(
        &mut self,
        src: &mut S,
        timeout: Option<Duration>,
    ) -> io::Result<Option<u8>> {
        if let Some(b) = self.pushback.pop_front() {
            return Ok(Some(b));
        }
        src.read_byte(timeout)
    }

    fn push_key(&mut self, code: KeyCode) {
        self.backlog.push_back(InputEvent::Key(KeyEvent::new(code)));
    }

    fn push_response(&mut self) {
        let raw = std::mem::take(&mut self.seq);
        self.backlog.push_back(InputEvent::DeviceResponse { raw });
    }

    /// Replay the collected sequence as keys: ESC plus the introducer as
    /// one Alt key, every following character as a plain key.
    #[allow(clippy::cast_possible_truncation)] // ASCII checked.
    fn flush_literal(&mut self) {
        let seq = std::mem::take(&mut self.seq);
        let Some(&intro) = seq.get(1) else {
            self.push_key(KeyCode::ESCAPE);
            return;
        };
        self.push_key(KeyMapper::alt(intro));
        for ch in String::from_utf8_lossy(&seq[2..]).chars() {
            let code = if ch.is_ascii() {
                KeyMapper::ground(ch as u8)
            } else {
                KeyCode::char(ch)
            };
            self.push_key(code);
        }
    }
}

impl std::fmt::Debug for EscapeSequenceDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscapeSequenceDecoder")
            .field("state", &self.state)
            .field("escape_timeout", &self.escape_timeout)
            .field("backlog", &self.backlog.len())
            .field("pushback", &self.pushback)
            .finish_non_exhaustive()
    }
}

/// Numeric CSI parameters. Empty fields default to 0. Returns `None` if
/// any field holds something other than digits.
fn parse_params(body: &[u8]) -> Option<Vec<u16>> {
    if body.is_empty() {
        return Some(Vec::new());
    }
    body.split(|&b| b == b';')
        .map(|field| {
            field.iter().try_fold(0u16, |acc, &b| {
                b.is_ascii_digit()
                    .then(|| acc.saturating_mul(10).saturating_add(u16::from(b - b'0')))
            })
        })
        .collect()
}

/// Byte length of a UTF-8 character from its lead byte, 0 if the byte
/// cannot start one.
const fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::clock::ManualClock;
    use crate::mouse::MouseFlags;
    use crate::source::ScriptedSource;

    fn decoder() -> EscapeSequenceDecoder {
        EscapeSequenceDecoder::new(&DriverConfig::default(), ManualClock::new().shared())
    }

    fn drain(
        dec: &mut EscapeSequenceDecoder,
        src: &mut ScriptedSource,
        pending: &mut PendingRequestTable,
    ) -> Vec<InputEvent> {
        let mut out = Vec::new();
        while let Some(ev) = dec.decode_next(src, pending).unwrap() {
            out.push(ev);
        }
        out
    }

    fn decode_src(mut src: ScriptedSource) -> Vec<InputEvent> {
        drain(&mut decoder(), &mut src, &mut PendingRequestTable::new())
    }

    fn decode(bytes: &[u8]) -> Vec<InputEvent> {
        decode_src(ScriptedSource::from_bytes(bytes))
    }

    fn key(code: KeyCode) -> InputEvent {
        InputEvent::Key(KeyEvent::new(code))
    }

    fn ch(c: char) -> InputEvent {
        key(KeyCode::char(c))
    }

    fn alt(c: char) -> InputEvent {
        key(KeyCode::char(c).with_modifiers(Modifiers::ALT))
    }

    fn response(raw: &[u8]) -> InputEvent {
        InputEvent::DeviceResponse { raw: raw.to_vec() }
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[test]
    fn csi_f3_with_ctrl() {
        let ev = decode(b"\x1b[1;5R");
        assert_eq!(ev, vec![key(KeyCode::f(3).with_modifiers(Modifiers::CTRL))]);
        let k = ev[0].as_key().unwrap();
        assert_eq!(k.modifiers, Modifiers::CTRL);
    }

    #[test]
    fn ss3_f3() {
        let ev = decode(b"\x1bOR");
        assert_eq!(ev, vec![key(KeyCode::f(3))]);
        assert!(ev[0].as_key().unwrap().modifiers.is_empty());
    }

    #[test]
    fn lone_escape_after_timeout() {
        assert_eq!(decode(b"\x1b"), vec![key(KeyCode::ESCAPE)]);
    }

    #[test]
    fn escape_then_pause_then_letter() {
        let mut src = ScriptedSource::new();
        src.feed(b"\x1b").pause().feed(b"a");
        assert_eq!(decode_src(src), vec![key(KeyCode::ESCAPE), ch('a')]);
    }

    #[test]
    fn decoder_returns_to_ground() {
        let mut dec = decoder();
        let mut src = ScriptedSource::from_bytes(b"\x1b[A");
        let mut pending = PendingRequestTable::new();
        dec.decode_next(&mut src, &mut pending).unwrap();
        assert_eq!(dec.state(), DecoderState::Ground);
        assert!(!dec.has_buffered());
    }

    // ── Ground / Alt ────────────────────────────────────────────────

    #[test]
    fn plain_text() {
        assert_eq!(decode(b"hi"), vec![ch('h'), ch('i')]);
    }

    #[test]
    fn control_bytes() {
        assert_eq!(
            decode(b"\x01\r\t\x7f"),
            vec![
                key(KeyCode::char('a').with_modifiers(Modifiers::CTRL)),
                key(KeyCode::ENTER),
                key(KeyCode::TAB),
                key(KeyCode::BACKSPACE),
            ]
        );
    }

    #[test]
    fn alt_letter_and_digit() {
        assert_eq!(decode(b"\x1bx\x1b7"), vec![alt('x'), alt('7')]);
    }

    #[test]
    fn alt_ctrl_letter() {
        assert_eq!(
            decode(b"\x1b\x01"),
            vec![key(
                KeyCode::char('a').with_modifiers(Modifiers::ALT | Modifiers::CTRL)
            )]
        );
    }

    #[test]
    fn double_escape_is_alt_escape() {
        assert_eq!(
            decode(b"\x1b\x1b"),
            vec![key(KeyCode::ESCAPE.with_modifiers(Modifiers::ALT))]
        );
    }

    #[test]
    fn escape_before_csi_key_adds_alt() {
        assert_eq!(
            decode(b"\x1b\x1b[A\x1b\x1b[1;5C\x1b\x1bOP"),
            vec![
                key(KeyCode::UP.with_modifiers(Modifiers::ALT)),
                key(KeyCode::RIGHT.with_modifiers(Modifiers::ALT | Modifiers::CTRL)),
                key(KeyCode::f(1).with_modifiers(Modifiers::ALT)),
            ]
        );
    }

    #[test]
    fn escape_before_other_bytes_stays_alt_escape() {
        let alt_esc = key(KeyCode::ESCAPE.with_modifiers(Modifiers::ALT));
        assert_eq!(decode(b"\x1b\x1bx"), vec![alt_esc.clone(), ch('x')]);
        assert_eq!(
            decode(b"\x1b\x1bOx"),
            vec![alt_esc.clone(), alt('O'), ch('x')]
        );
        assert_eq!(
            decode(b"\x1b\x1b[?1u"),
            vec![alt_esc, response(b"\x1b[?1u")]
        );
    }

    // ── CSI ─────────────────────────────────────────────────────────

    #[test]
    fn arrows_and_modifiers() {
        assert_eq!(
            decode(b"\x1b[A\x1b[1;2B\x1b[1;3C\x1b[1;8D"),
            vec![
                key(KeyCode::UP),
                key(KeyCode::DOWN.with_modifiers(Modifiers::SHIFT)),
                key(KeyCode::RIGHT.with_modifiers(Modifiers::ALT)),
                key(KeyCode::LEFT.with_modifiers(Modifiers::all())),
            ]
        );
    }

    #[test]
    fn tilde_keys() {
        assert_eq!(
            decode(b"\x1b[3~\x1b[5;5~\x1b[24~"),
            vec![
                key(KeyCode::DELETE),
                key(KeyCode::PAGE_UP.with_modifiers(Modifiers::CTRL)),
                key(KeyCode::f(12)),
            ]
        );
    }

    #[test]
    fn back_tab() {
        assert_eq!(
            decode(b"\x1b[Z"),
            vec![key(KeyCode::TAB.with_modifiers(Modifiers::SHIFT))]
        );
    }

    #[test]
    fn unmapped_csi_is_device_response() {
        assert_eq!(decode(b"\x1b[200~"), vec![response(b"\x1b[200~")]);
        assert_eq!(decode(b"\x1b[I"), vec![response(b"\x1b[I")]);
    }

    #[test]
    fn private_csi_is_device_response() {
        assert_eq!(decode(b"\x1b[?62;c"), vec![response(b"\x1b[?62;c")]);
    }

    #[test]
    fn invalid_byte_aborts_csi() {
        assert_eq!(
            decode(b"\x1b[1\x01"),
            vec![
                alt('['),
                ch('1'),
                key(KeyCode::char('a').with_modifiers(Modifiers::CTRL)),
            ]
        );
    }

    #[test]
    fn timeout_aborts_csi() {
        let mut src = ScriptedSource::new();
        src.feed(b"\x1b[1").pause().feed(b"x");
        assert_eq!(decode_src(src), vec![alt('['), ch('1'), ch('x')]);
    }

    #[test]
    fn esc_inside_csi_restarts() {
        assert_eq!(
            decode(b"\x1b[\x1b[A"),
            vec![alt('['), key(KeyCode::UP)]
        );
    }

    #[test]
    fn overlong_csi_is_replayed() {
        let mut bytes = b"\x1b[".to_vec();
        bytes.extend(std::iter::repeat_n(b'1', MAX_CSI_LEN));
        bytes.push(b'A');
        let ev = decode(&bytes);
        assert_eq!(ev[0], alt('['));
        assert!(ev.iter().all(|e| e.as_key().is_some()));
    }

    // ── SS3 ─────────────────────────────────────────────────────────

    #[test]
    fn ss3_arrows() {
        assert_eq!(decode(b"\x1bOA\x1bOP"), vec![key(KeyCode::UP), key(KeyCode::f(1))]);
    }

    #[test]
    fn unknown_ss3_replays() {
        assert_eq!(decode(b"\x1bOx"), vec![alt('O'), ch('x')]);
    }

    // ── Pending queries ─────────────────────────────────────────────

    #[test]
    fn pending_terminator_wins_over_key() {
        let mut dec = decoder();
        let mut pending = PendingRequestTable::new();
        pending.register("R", Instant::now() + std::time::Duration::from_secs(60));
        let mut src = ScriptedSource::from_bytes(b"\x1b[12;5R\x1b[1;5R");
        let ev = drain(&mut dec, &mut src, &mut pending);
        assert_eq!(
            ev,
            vec![
                response(b"\x1b[12;5R"),
                key(KeyCode::f(3).with_modifiers(Modifiers::CTRL)),
            ]
        );
        assert_eq!(pending.outstanding("R"), 0);
    }

    #[test]
    fn dcs_only_when_expected() {
        assert_eq!(decode(b"\x1bPq"), vec![alt('P'), ch('q')]);

        let mut dec = decoder();
        let mut pending = PendingRequestTable::new();
        pending.register(pending::DCS, Instant::now() + std::time::Duration::from_secs(60));
        let mut src = ScriptedSource::from_bytes(b"\x1bP>|xterm(390)\x1b\\");
        let ev = drain(&mut dec, &mut src, &mut pending);
        assert_eq!(ev, vec![response(b"\x1bP>|xterm(390)\x1b\\")]);
        assert!(!pending.is_pending(pending::DCS));
    }

    // ── OSC ─────────────────────────────────────────────────────────

    #[test]
    fn osc_with_bel_and_st() {
        assert_eq!(
            decode(b"\x1b]11;rgb:0000/0000/0000\x07\x1b]10;x\x1b\\"),
            vec![
                response(b"\x1b]11;rgb:0000/0000/0000\x07"),
                response(b"\x1b]10;x\x1b\\"),
            ]
        );
    }

    #[test]
    fn osc_interrupted_by_new_sequence() {
        assert_eq!(
            decode(b"\x1b]1\x1b[A"),
            vec![alt(']'), ch('1'), key(KeyCode::UP)]
        );
    }

    // ── UTF-8 ───────────────────────────────────────────────────────

    #[test]
    fn utf8_chars() {
        assert_eq!(decode("é世🎉".as_bytes()), vec![ch('é'), ch('世'), ch('🎉')]);
    }

    #[test]
    fn alt_utf8() {
        assert_eq!(decode("\x1bé".as_bytes()), vec![alt('é')]);
    }

    #[test]
    fn invalid_utf8_yields_replacement() {
        assert_eq!(
            decode(b"\xff\xc3a"),
            vec![ch(char::REPLACEMENT_CHARACTER), ch(char::REPLACEMENT_CHARACTER), ch('a')]
        );
    }

    // ── Mouse ───────────────────────────────────────────────────────

    #[test]
    fn sgr_click() {
        let ev = decode(b"\x1b[<0;5;3M\x1b[<0;5;3m");
        let flags: Vec<_> = ev.iter().map(|e| e.as_mouse().unwrap().flags).collect();
        assert_eq!(
            flags,
            vec![
                MouseFlags::BUTTON1_PRESSED,
                MouseFlags::BUTTON1_RELEASED,
                MouseFlags::BUTTON1_CLICKED,
            ]
        );
        assert_eq!(ev[0].as_mouse().map(|m| (m.x, m.y)), Some((4, 2)));
    }

    #[test]
    fn stray_release_is_skipped() {
        assert_eq!(decode(b"\x1b[<0;1;1mz"), vec![ch('z')]);
    }

    #[test]
    fn malformed_sgr_replays() {
        assert_eq!(
            decode(b"\x1b[<0;1M"),
            vec![alt('['), ch('<'), ch('0'), ch(';'), ch('1'), ch('M')]
        );
    }

    #[test]
    fn double_click_through_decoder() {
        let clock = ManualClock::new();
        let mut dec = EscapeSequenceDecoder::new(&DriverConfig::default(), clock.shared());
        let mut pending = PendingRequestTable::new();
        let mut src = ScriptedSource::from_bytes(b"\x1b[<0;2;2M\x1b[<0;2;2m");
        drain(&mut dec, &mut src, &mut pending);
        clock.advance(Duration::from_millis(100));
        src.feed(b"\x1b[<0;2;2M\x1b[<0;2;2m");
        let ev = drain(&mut dec, &mut src, &mut pending);
        assert!(
            ev.iter()
                .any(|e| e.as_mouse().unwrap().flags == MouseFlags::BUTTON1_DOUBLE_CLICKED)
        );
    }

    #[test]
    fn tick_repeats_held_button() {
        let mut dec = decoder();
        dec.mouse_mut().set_continuous_press(true);
        let mut src = ScriptedSource::from_bytes(b"\x1b[<0;3;3M");
        drain(&mut dec, &mut src, &mut PendingRequestTable::new());
        let ev = dec.tick().unwrap();
        assert_eq!(ev.as_mouse().unwrap().flags, MouseFlags::BUTTON1_PRESSED);
    }

    // ── Properties ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn ground_passthrough(bytes in proptest::collection::vec(
            (0u8..0x80).prop_filter("no ESC", |b| *b != ESC), 0..64)
        ) {
            let expected: Vec<_> = bytes.iter().map(|&b| key(KeyMapper::ground(b))).collect();
            prop_assert_eq!(decode(&bytes), expected);
        }

        #[test]
        fn sgr_decode_reencode(code in 0u16..=255, x in 1u16..=1000, y in 1u16..=1000) {
            // Press, then release, so every button press has a partner.
            let press = format!("\x1b[<{code};{x};{y}M").into_bytes();
            let mut dec = EscapeSequenceDecoder::new(
                &DriverConfig::default(),
                ManualClock::new().shared(),
            );
            let mut pending = PendingRequestTable::new();
            let mut src = ScriptedSource::from_bytes(&press);
            let events = drain(&mut dec, &mut src, &mut pending);
            prop_assert!(events.len() <= 1);
            for ev in events {
                let m = *ev.as_mouse().unwrap();
                prop_assert_eq!((m.x, m.y), (x - 1, y - 1));
                let again = m.to_report().encode_sgr();
                let mut src = ScriptedSource::from_bytes(&again);
                let mut fresh = EscapeSequenceDecoder::new(
                    &DriverConfig::default(),
                    ManualClock::new().shared(),
                );
                let back = drain(&mut fresh, &mut src, &mut pending);
                prop_assert_eq!(back.len(), 1);
                prop_assert_eq!(back[0].as_mouse().map(|b| (b.x, b.y)), Some((m.x, m.y)));
            }
        }
    }

    #[test]
    fn clock_is_used_for_click_timing() {
        let clock = ManualClock::new();
        let start: Instant = clock.shared().now();
        let mut dec = EscapeSequenceDecoder::new(&DriverConfig::default(), clock.shared());
        let mut pending = PendingRequestTable::new();
        let mut src = ScriptedSource::from_bytes(b"\x1b[<0;1;1M");
        drain(&mut dec, &mut src, &mut pending);
        assert_eq!(dec.mouse().last_state().timestamp(), Some(start));
    }
}
