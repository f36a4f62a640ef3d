// SPDX-License-Identifier: MIT
//
// The event stream handed to the widget layer.

use std::fmt;

use crate::keys::KeyEvent;
use crate::mouse::MouseEvent;

// ─── Size ───────────────────────────────────────────────────────────────────

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// Number of columns (width in character cells).
    pub cols: u16,
    /// Number of rows (height in character cells).
    pub rows: u16,
}

impl Size {
    #[inline]
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Total number of cells (`cols × rows`).
    #[inline]
    #[must_use]
    pub const fn area(self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

// ─── InputEvent ─────────────────────────────────────────────────────────────

/// One decoded unit of terminal input.
///
/// Produced once per decode cycle and consumed immediately; nothing in the
/// engine keeps a reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press.
    Key(KeyEvent),
    /// A semantic mouse event from the synthesizer.
    Mouse(MouseEvent),
    /// The terminal changed size. The screen buffer has already been
    /// reallocated to these dimensions.
    Resize { cols: u16, rows: u16 },
    /// A complete sequence the terminal sent on its own behalf: an answer
    /// to a query, an OSC report, or a well-formed CSI sequence that is
    /// not a key. `raw` holds every byte including the introducer.
    DeviceResponse { raw: Vec<u8> },
}

impl InputEvent {
    /// The key, when this is a key event.
    #[must_use]
    pub const fn as_key(&self) -> Option<&KeyEvent> {
        match self {
            Self::Key(k) => Some(k),
            _ => None,
        }
    }

    /// The mouse event, when this is one.
    #[must_use]
    pub const fn as_mouse(&self) -> Option<&MouseEvent> {
        match self {
            Self::Mouse(m) => Some(m),
            _ => None,
        }
    }
}

impl From<KeyEvent> for InputEvent {
    fn from(key: KeyEvent) -> Self {
        Self::Key(key)
    }
}

impl From<MouseEvent> for InputEvent {
    fn from(mouse: MouseEvent) -> Self {
        Self::Mouse(mouse)
    }
}

impl From<Size> for InputEvent {
    fn from(size: Size) -> Self {
        Self::Resize {
            cols: size.cols,
            rows: size.rows,
        }
    }
}
