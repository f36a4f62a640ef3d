// SPDX-License-Identifier: MIT
//
// Output buffering and stateful cell writing for the TTY backend.
//
// Two components work together to minimize terminal I/O:
//
//   OutputBuffer: accumulates all ANSI bytes in memory so a whole frame
//   goes out in a single write() when the renderer presents it.
//
//   CellWriter: tracks the terminal's current pen (cursor position,
//   colours, style) and skips redundant escape sequences. Two adjacent
//   cells in the same colours cost one cursor move and two characters.

use std::io::{self, Write};

use unicode_width::UnicodeWidthStr;

use crate::ansi;
use crate::cell::Attr;
use crate::color::CellColor;

// ─── OutputBuffer ────────────────────────────────────────────────────────────

/// A byte buffer that accumulates ANSI output for a single `write()`.
pub struct OutputBuffer {
    buf: Vec<u8>,
}

const DEFAULT_CAPACITY: usize = 16_384;

impl OutputBuffer {
    /// Create an empty buffer with default capacity (16 KB).
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(DEFAULT_CAPACITY),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The accumulated bytes (for testing and debugging).
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn push_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Clear the buffer for reuse (keeps allocated capacity).
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Write accumulated output to `w`, flush it, and clear the buffer.
    /// An empty buffer touches nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `w` fails. The buffer is kept so a
    /// caller could inspect what was lost.
    pub fn flush_to(&mut self, w: &mut impl Write) -> io::Result<()> {
        if !self.buf.is_empty() {
            w.write_all(&self.buf)?;
            w.flush()?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl Write for OutputBuffer {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Real flushing goes through flush_to().
        Ok(())
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutputBuffer({} bytes)", self.buf.len())
    }
}

// ─── Pen ─────────────────────────────────────────────────────────────────────

/// Colours and style a cell is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pen {
    pub fg: CellColor,
    pub bg: CellColor,
    pub style: Attr,
}

// ─── CellWriter ──────────────────────────────────────────────────────────────

/// Stateful cell writer that tracks terminal state to skip redundant escapes.
///
/// - **Cursor**: skipped when the next cell starts where the terminal
///   cursor already is (it auto-advances by the glyph's width).
/// - **Style**: on change, reset (SGR 0) and re-emit, which also forgets
///   the tracked colours. Going from no style to some style skips the
///   reset.
/// - **Colours**: skipped if unchanged since last emit.
#[allow(clippy::struct_field_names)] // The `last_` prefix is the grouping.
#[derive(Debug, Clone)]
pub struct CellWriter {
    /// Column the terminal cursor sits at after the last write.
    next_x: i32,
    last_y: i32,
    last_fg: Option<CellColor>,
    last_bg: Option<CellColor>,
    last_style: Attr,
}

impl CellWriter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_x: -1,
            last_y: -1,
            last_fg: None,
            last_bg: None,
            last_style: Attr::empty(),
        }
    }

    /// Forget all tracked state. Call after a screen clear or an SGR reset
    /// written by someone else.
    #[allow(clippy::missing_const_for_fn)]
    pub fn reset_state(&mut self) {
        *self = Self::new();
    }

    /// The cursor was moved explicitly; the next write must reposition.
    pub const fn cursor_moved(&mut self) {
        self.next_x = -1;
        self.last_y = -1;
    }

    /// Write `text` (one cell's glyph) at `(x, y)` under `pen`.
    pub fn put(&mut self, out: &mut OutputBuffer, x: u16, y: u16, text: &str, pen: &Pen) {
        let xi = i32::from(x);
        let yi = i32::from(y);

        if yi != self.last_y || xi != self.next_x {
            ansi::cursor_to(out, x, y).ok();
        }

        self.apply_style(out, pen);
        out.push_str(text);

        let width = i32::try_from(text.width().max(1)).unwrap_or(1);
        self.next_x = xi + width;
        self.last_y = yi;
    }

    fn apply_style(&mut self, out: &mut OutputBuffer, pen: &Pen) {
        if pen.style != self.last_style {
            if !self.last_style.is_empty() {
                // SGR 0 clears everything, colours included.
                ansi::reset(out).ok();
                self.last_fg = None;
                self.last_bg = None;
            }
            self.last_style = pen.style;
            ansi::attrs(out, pen.style).ok();
        }

        if self.last_fg != Some(pen.fg) {
            ansi::fg(out, pen.fg).ok();
            self.last_fg = Some(pen.fg);
        }

        if self.last_bg != Some(pen.bg) {
            ansi::bg(out, pen.bg).ok();
            self.last_bg = Some(pen.bg);
        }
    }
}

impl Default for CellWriter {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
