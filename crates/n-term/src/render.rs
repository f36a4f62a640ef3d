// SPDX-License-Identifier: MIT
//
// Renderer: pushes the dirty part of a ScreenBuffer to a Backend.
//
// The buffer already knows which cells differ from what the terminal
// shows, so there is nothing to diff here: walk the rows whose flag is
// raised, write each dirty cell, record it as flushed, lower the flag.
// Clean rows are skipped without looking at their cells.
//
// Wide glyphs are written once, from their first cell; the terminal
// advances two columns by itself. A wide glyph that starts in the last
// column has nowhere to put its second half, so the configured
// replacement glyph is written instead of splitting it.
//
// The hardware cursor is the renderer's too. Writing cells moves it, so
// after any cell output the cursor is put back at its logical position.
// When neither the buffer nor the cursor changed, a flush touches the
// backend zero times.
//
// Output errors are fatal. They come back as `Error::Write` and the
// renderer makes no attempt to resend.

use std::io;

use tracing::{error, trace};

use crate::backend::{Backend, CursorVisibility};
use crate::buffer::ScreenBuffer;
use crate::cell::Cell;
use crate::context::DriverContext;
use crate::error::{Error, Result};

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// Cells handed to the backend.
    pub cells_written: usize,
    /// Rows whose dirty flag was raised.
    pub rows_visited: usize,
    /// Whether the screen was cleared first.
    pub cleared: bool,
}

impl FlushStats {
    /// Whether the flush reached the backend at all.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.cells_written == 0 && !self.cleared
    }
}

/// Dirty-cell renderer and cursor owner.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    cursor: (u16, u16),
    visibility: CursorVisibility,
    /// What the backend was last told. `None` forces a resend.
    applied_cursor: Option<(u16, u16)>,
    applied_visibility: Option<CursorVisibility>,
}

impl Renderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical cursor position `(x, y)`, applied on the next flush.
    pub const fn move_cursor(&mut self, x: u16, y: u16) {
        self.cursor = (x, y);
    }

    pub const fn set_cursor_visibility(&mut self, visibility: CursorVisibility) {
        self.visibility = visibility;
    }

    #[must_use]
    pub const fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    #[must_use]
    pub const fn cursor_visibility(&self) -> CursorVisibility {
        self.visibility
    }

    /// Forget what the backend was told about the cursor (after a resize
    /// or anything else that may have reset the terminal).
    pub const fn invalidate(&mut self) {
        self.applied_cursor = None;
        self.applied_visibility = None;
    }

    /// Write every dirty cell of `screen` to `backend` and present the
    /// frame. Afterwards no cell in `screen` is dirty.
    ///
    /// # Errors
    ///
    /// [`Error::Write`] when the backend fails. The session should end.
    pub fn flush<B: Backend + ?Sized>(
        &mut self,
        screen: &mut ScreenBuffer,
        backend: &mut B,
        ctx: &mut DriverContext,
    ) -> Result<FlushStats> {
        self.flush_inner(screen, backend, ctx).map_err(|e| {
            error!(error = %e, "terminal write failed, ending session");
            Error::Write(e)
        })
    }

    fn flush_inner<B: Backend + ?Sized>(
        &mut self,
        screen: &mut ScreenBuffer,
        backend: &mut B,
        ctx: &mut DriverContext,
    ) -> io::Result<FlushStats> {
        let mut stats = FlushStats::default();

        if screen.take_needs_clear() {
            backend.clear()?;
            stats.cleared = true;
        }

        for row in 0..screen.rows() {
            if !screen.row_is_dirty(row) {
                continue;
            }
            stats.rows_visited += 1;
            stats.cells_written += Self::flush_row(screen, row, backend, ctx)?;
            screen.clear_row_flag(row);
        }

        let mut sent = !stats.is_noop();
        if sent || self.applied_cursor != Some(self.cursor) {
            backend.set_cursor(self.cursor.0, self.cursor.1)?;
            self.applied_cursor = Some(self.cursor);
            sent = true;
        }
        if self.applied_visibility != Some(self.visibility) {
            backend.set_cursor_visibility(self.visibility)?;
            self.applied_visibility = Some(self.visibility);
            sent = true;
        }
        if sent {
            backend.flush()?;
        }

        trace!(
            cells = stats.cells_written,
            rows = stats.rows_visited,
            cleared = stats.cleared,
            "flush"
        );
        Ok(stats)
    }

    fn flush_row<B: Backend + ?Sized>(
        screen: &mut ScreenBuffer,
        row: u16,
        backend: &mut B,
        ctx: &mut DriverContext,
    ) -> io::Result<usize> {
        let cols = screen.cols();
        let mut written = 0;
        // Whether the previous column held a wide glyph written this pass.
        let mut wrote_wide = false;

        for col in 0..cols {
            let Some(sc) = screen.row(row).get(usize::from(col)).cloned() else {
                break;
            };
            if !sc.dirty {
                wrote_wide = false;
                continue;
            }

            if sc.cell.is_continuation() {
                // The terminal only shows this half if its owner is
                // (re)written, so make sure it is.
                if !wrote_wide && col > 0 {
                    if let Some(owner) = screen.get(row, col - 1).cloned() {
                        Self::write_cell(&owner, col - 1, row, cols, backend, ctx)?;
                        screen.mark_flushed(row, col - 1);
                        written += 1;
                    }
                }
                screen.mark_flushed(row, col);
                wrote_wide = false;
                continue;
            }

            Self::write_cell(&sc.cell, col, row, cols, backend, ctx)?;
            screen.mark_flushed(row, col);
            written += 1;
            wrote_wide = sc.cell.width() > 1;
        }
        Ok(written)
    }

    fn write_cell<B: Backend + ?Sized>(
        cell: &Cell,
        x: u16,
        y: u16,
        cols: u16,
        backend: &mut B,
        ctx: &mut DriverContext,
    ) -> io::Result<()> {
        let depth = ctx.capabilities.color_depth;
        let fg = cell.attr.fg.downgrade(depth);
        let bg = cell.attr.bg.downgrade(depth);
        let (pair, new) = ctx.colors.get_or_insert(fg, bg);
        if new {
            backend.define_pair(pair, fg, bg)?;
        }

        if cell.width() > 1 && x + 1 >= cols {
            let mut buf = [0u8; 4];
            let glyph = ctx.config.replacement_glyph.encode_utf8(&mut buf);
            return backend.write_cell(x, y, glyph, pair, cell.attr.style);
        }
        backend.write_cell(x, y, &cell.text(), pair, cell.attr.style)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
