// SPDX-License-Identifier: MIT
//
// Backend capability interface.
//
// The engine never writes to a terminal directly. Everything it needs from
// the outside world goes through `Backend`: negotiate capabilities, hand
// out the raw input stream, define colour pairs, write cells, place the
// cursor, present a frame. The real terminal (`TtyBackend`) and the
// in-memory fake (`MemoryBackend`) are the two implementations; the
// renderer and driver are generic over the trait and cannot tell them
// apart.
//
// Cell coordinates are 0-based `(x, y)` = `(col, row)`.

use std::fmt;
use std::io;
#[cfg(unix)]
use std::os::fd::RawFd;

use crate::cell::Attr;
use crate::color::{CellColor, ColorDepth, PairId};
use crate::error::Result;
use crate::event::Size;
use crate::source::ByteSource;

// ─── Capabilities ────────────────────────────────────────────────────────────

/// What the backend reported (or was detected) at startup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Richest colour encoding the terminal understands.
    pub color_depth: ColorDepth,
    /// Whether SGR mouse reporting is available.
    pub mouse: bool,
    /// Terminal name and version from XTVERSION, once it has answered.
    pub version: Option<String>,
}

impl Capabilities {
    #[must_use]
    pub const fn new(color_depth: ColorDepth, mouse: bool) -> Self {
        Self {
            color_depth,
            mouse,
            version: None,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} colours, mouse {}",
            self.color_depth,
            if self.mouse { "on" } else { "off" }
        )?;
        if let Some(v) = &self.version {
            write!(f, ", {v}")?;
        }
        Ok(())
    }
}

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// Hardware cursor visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorVisibility {
    /// Not drawn.
    #[default]
    Hidden,
    /// Normal steady cursor.
    Visible,
    /// Emphasised (blinking) cursor.
    VeryVisible,
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A terminal the engine can drive.
///
/// Output methods may buffer; nothing is guaranteed to reach the terminal
/// before [`flush`](Self::flush). Output failures are reported as
/// `io::Error` and turned into a fatal `Error::Write` by the caller.
pub trait Backend {
    /// Take over the terminal and report what it can do.
    ///
    /// # Errors
    ///
    /// `Error::Unsupported` when the terminal cannot be driven at all.
    fn init(&mut self) -> Result<Capabilities>;

    /// Restore the terminal. Must be safe to call more than once.
    ///
    /// # Errors
    ///
    /// I/O failure while restoring.
    fn shutdown(&mut self) -> Result<()>;

    /// Capabilities negotiated by [`init`](Self::init).
    fn capabilities(&self) -> &Capabilities;

    /// The raw input byte stream.
    fn input(&mut self) -> &mut dyn ByteSource;

    /// Descriptor the event loop should watch for input, if any.
    #[cfg(unix)]
    fn input_fd(&self) -> Option<RawFd> {
        None
    }

    /// Current size in cells.
    ///
    /// # Errors
    ///
    /// The size probe failed.
    fn size(&self) -> io::Result<Size>;

    /// Bind `pair` to a foreground/background combination. Called once per
    /// pair, before the first cell that uses it.
    ///
    /// # Errors
    ///
    /// Output failure.
    fn define_pair(&mut self, pair: PairId, fg: CellColor, bg: CellColor) -> io::Result<()>;

    /// Write one cell's text (a whole grapheme cluster).
    ///
    /// # Errors
    ///
    /// Output failure.
    fn write_cell(&mut self, x: u16, y: u16, text: &str, pair: PairId, style: Attr)
    -> io::Result<()>;

    /// Blank the whole screen.
    ///
    /// # Errors
    ///
    /// Output failure.
    fn clear(&mut self) -> io::Result<()>;

    /// Move the hardware cursor.
    ///
    /// # Errors
    ///
    /// Output failure.
    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()>;

    /// # Errors
    ///
    /// Output failure.
    fn set_cursor_visibility(&mut self, visibility: CursorVisibility) -> io::Result<()>;

    /// Send bytes untouched (device queries).
    ///
    /// # Errors
    ///
    /// Output failure.
    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Present everything written since the last flush.
    ///
    /// # Errors
    ///
    /// Output failure.
    fn flush(&mut self) -> io::Result<()>;
}
