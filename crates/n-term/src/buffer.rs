// SPDX-License-Identifier: MIT
//
// ScreenBuffer: the cell grid the widget layer writes into.
//
// Alongside the cells it keeps a copy of what was last flushed to the
// terminal. A cell is dirty exactly when it differs from that copy, so
// writing a value and then writing the old value back leaves nothing to
// render. Each row also carries a flag that is raised when any of its cells
// becomes dirty; the renderer uses it to skip clean rows without scanning
// them, and clears it once the row is flushed.
//
// Layout:
//
//   - Flat `Vec` with row-major indexing (`row * cols + col`). A row's cells
//     are contiguous, so the renderer's left-to-right scan is linear.
//
//   - Wide characters occupy two columns. The first cell holds the
//     character; the second is a continuation cell. Writing over either
//     half breaks the pair and blanks the other half.
//
//   - A grapheme cluster lives in one cell: the base character plus its
//     whole tail (stacked accents, ZWJ emoji parts, the second half of a
//     flag). Zero-width characters written on their own attach to the cell
//     they are written at instead of taking a column.
//
//   - A wide character written at the last column is stored as-is; the
//     renderer substitutes the replacement glyph when it gets there.
//
// Coordinates are (row, col), 0-based, matching how the widget layer
// addresses cells.

use tracing::trace;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthChar;

use crate::cell::{Attribute, Cell, ScreenCell};
use crate::event::Size;

/// Most characters one cell carries after its base. Stacks beyond this are
/// truncated.
pub const MAX_CLUSTER_TAIL: usize = 16;

/// The widget layer's canvas, with per-cell and per-row dirty tracking.
#[derive(Clone, PartialEq, Eq)]
pub struct ScreenBuffer {
    cols: u16,
    rows: u16,
    cells: Vec<ScreenCell>,
    /// What the terminal shows, as of the last flush.
    flushed: Vec<Cell>,
    row_dirty: Vec<bool>,
    /// The terminal contents are unknown; clear before drawing.
    needs_clear: bool,
}

impl ScreenBuffer {
    /// A blank buffer. The first flush clears the terminal.
    #[must_use]
    pub fn new(size: Size) -> Self {
        let area = size.area();
        Self {
            cols: size.cols,
            rows: size.rows,
            cells: vec![ScreenCell::default(); area],
            flushed: vec![Cell::EMPTY; area],
            row_dirty: vec![false; usize::from(size.rows)],
            needs_clear: true,
        }
    }

    // ─── Geometry ────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub const fn size(&self) -> Size {
        Size::new(self.cols, self.rows)
    }

    #[inline]
    #[must_use]
    pub const fn cols(&self) -> u16 {
        self.cols
    }

    #[inline]
    #[must_use]
    pub const fn rows(&self) -> u16 {
        self.rows
    }

    #[inline]
    const fn in_bounds(&self, row: u16, col: u16) -> bool {
        row < self.rows && col < self.cols
    }

    #[inline]
    const fn index(&self, row: u16, col: u16) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    /// Reallocate for a new terminal size. All content is discarded and the
    /// next flush clears the terminal. Returns `false` if the size did not
    /// change (nothing is touched then).
    pub fn resize(&mut self, size: Size) -> bool {
        if size == self.size() {
            return false;
        }
        *self = Self::new(size);
        true
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, row: u16, col: u16) -> Option<&Cell> {
        self.in_bounds(row, col)
            .then(|| &self.cells[self.index(row, col)].cell)
    }

    #[must_use]
    pub fn is_dirty(&self, row: u16, col: u16) -> bool {
        self.in_bounds(row, col) && self.cells[self.index(row, col)].dirty
    }

    #[must_use]
    pub fn row_is_dirty(&self, row: u16) -> bool {
        self.row_dirty.get(usize::from(row)).copied().unwrap_or(false)
    }

    /// The cells of one row.
    #[must_use]
    pub fn row(&self, row: u16) -> &[ScreenCell] {
        if row >= self.rows {
            return &[];
        }
        let start = self.index(row, 0);
        &self.cells[start..start + usize::from(self.cols)]
    }

    /// Number of dirty cells in the whole buffer.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.cells.iter().filter(|c| c.dirty).count()
    }

    #[must_use]
    pub const fn needs_clear(&self) -> bool {
        self.needs_clear
    }

    /// Text of a row with continuations skipped, for tests and debugging.
    #[must_use]
    pub fn row_text(&self, row: u16) -> String {
        self.row(row)
            .iter()
            .filter(|c| !c.cell.is_continuation())
            .map(|c| c.cell.text())
            .collect()
    }

    // ─── Writes ──────────────────────────────────────────────────────────

    /// Write one character.
    ///
    /// Zero-width characters attach to the cell at `(row, col)` as a mark.
    /// Wide characters also claim `col + 1` when it exists. Control
    /// characters are rejected. Returns `false` when nothing was written.
    pub fn set_cell(&mut self, row: u16, col: u16, ch: char, attr: Attribute) -> bool {
        if !self.in_bounds(row, col) {
            return false;
        }
        let Some(width) = ch.width() else {
            trace!(?ch, "control character rejected");
            return false;
        };

        if width == 0 {
            self.attach_mark(row, col, ch)
        } else {
            self.place(row, col, Cell::new(ch, attr));
            true
        }
    }

    /// Write one grapheme cluster into the cell at `(row, col)`, keeping
    /// every character after the base with it. A wide cluster also claims
    /// `col + 1`. A cluster without a printable base (a stray mark, a
    /// control character) is handed to `set_cell` character by character
    /// at the previous column. Returns the number of columns consumed.
    pub fn set_grapheme(&mut self, row: u16, col: u16, grapheme: &str, attr: Attribute) -> u16 {
        if !self.in_bounds(row, col) {
            return 0;
        }
        let Some(mut cell) = Cell::cluster(grapheme, attr) else {
            return 0;
        };
        if matches!(cell.ch.width(), None | Some(0)) {
            for ch in grapheme.chars() {
                self.set_cell(row, col.saturating_sub(1), ch, attr);
            }
            return 0;
        }
        if cell.tail.len() > MAX_CLUSTER_TAIL {
            trace!(len = cell.tail.len(), "cluster tail truncated");
            cell.tail.truncate(MAX_CLUSTER_TAIL);
        }
        let width = u16::try_from(cell.width()).unwrap_or(2);
        self.place(row, col, cell);
        width
    }

    /// Write a string starting at `(row, col)`, one grapheme cluster per
    /// cell (two for wide clusters). Stops at the right edge. Returns the
    /// number of columns consumed.
    pub fn set_str(&mut self, row: u16, col: u16, text: &str, attr: Attribute) -> u16 {
        if row >= self.rows {
            return 0;
        }
        let mut at = col;
        for grapheme in text.graphemes(true) {
            if at >= self.cols {
                break;
            }
            at = at.saturating_add(self.set_grapheme(row, at, grapheme, attr));
        }
        at.saturating_sub(col).min(self.cols.saturating_sub(col))
    }

    /// Reset every cell to a space under `attr`.
    pub fn fill(&mut self, attr: Attribute) {
        let blank = Cell::new(' ', attr);
        for row in 0..self.rows {
            for col in 0..self.cols {
                self.put(row, col, blank.clone());
            }
        }
    }

    /// Reset every cell to the default blank.
    pub fn clear(&mut self) {
        self.fill(Attribute::DEFAULT);
    }

    /// Forget what the terminal shows: the next flush clears it and
    /// redraws every non-blank cell.
    pub fn invalidate(&mut self) {
        self.needs_clear = true;
        self.flushed.fill(Cell::EMPTY);
        for idx in 0..self.cells.len() {
            self.refresh(idx);
        }
    }

    // ─── Flush bookkeeping (renderer side) ───────────────────────────────

    /// Record that `(row, col)` now shows its current content.
    pub fn mark_flushed(&mut self, row: u16, col: u16) {
        if !self.in_bounds(row, col) {
            return;
        }
        let idx = self.index(row, col);
        self.flushed[idx] = self.cells[idx].cell.clone();
        self.cells[idx].dirty = false;
    }

    /// Lower a row's flag after all its dirty cells were flushed.
    pub fn clear_row_flag(&mut self, row: u16) {
        if let Some(flag) = self.row_dirty.get_mut(usize::from(row)) {
            *flag = false;
        }
    }

    /// Consume the pending-clear flag. The caller must clear the terminal.
    /// Afterwards the terminal is blank, so every cell that is not blank
    /// becomes dirty.
    pub fn take_needs_clear(&mut self) -> bool {
        if !self.needs_clear {
            return false;
        }
        self.needs_clear = false;
        self.flushed.fill(Cell::EMPTY);
        for idx in 0..self.cells.len() {
            self.refresh(idx);
        }
        true
    }

    // ─── Internals ───────────────────────────────────────────────────────

    /// Store a non-continuation cell, breaking whatever wide characters it
    /// lands on. Wide cells get their continuation at `col + 1`.
    fn place(&mut self, row: u16, col: u16, cell: Cell) {
        let attr = cell.attr;
        let wide = cell.width() > 1;
        self.break_wide_char_at(row, col);
        self.put(row, col, cell);
        if wide && col + 1 < self.cols {
            self.break_wide_char_at(row, col + 1);
            self.put(row, col + 1, Cell::continuation(attr));
        }
    }

    fn put(&mut self, row: u16, col: u16, cell: Cell) {
        let idx = self.index(row, col);
        self.cells[idx].cell = cell;
        self.refresh(idx);
    }

    /// Recompute a cell's dirty flag from the flushed copy.
    fn refresh(&mut self, idx: usize) {
        let dirty = self.cells[idx].cell != self.flushed[idx];
        self.cells[idx].dirty = dirty;
        if dirty {
            let row = idx / usize::from(self.cols.max(1));
            self.row_dirty[row] = true;
        }
    }

    fn attach_mark(&mut self, row: u16, col: u16, mark: char) -> bool {
        if !self.in_bounds(row, col) {
            return false;
        }
        let mut idx = self.index(row, col);
        if self.cells[idx].cell.is_continuation() && col > 0 {
            idx -= 1;
        }
        let cell = &mut self.cells[idx].cell;
        if cell.tail.len() >= MAX_CLUSTER_TAIL {
            trace!(?mark, "cell mark stack is full");
            return false;
        }
        cell.tail.push(mark);
        self.refresh(idx);
        true
    }

    /// Break any wide character that touches `(row, col)`, blanking the
    /// half that is not about to be overwritten.
    fn break_wide_char_at(&mut self, row: u16, col: u16) {
        let idx = self.index(row, col);

        if self.cells[idx].cell.is_continuation() && col > 0 {
            let owner = self.cells[idx - 1].cell.attr;
            self.put(row, col - 1, Cell::new(' ', owner));
        }

        if col + 1 < self.cols {
            let next = &self.cells[idx + 1].cell;
            if next.is_continuation() {
                let attr = next.attr;
                self.put(row, col + 1, Cell::new(' ', attr));
            }
        }
    }
}

impl std::fmt::Debug for ScreenBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ScreenBuffer({}x{}, {} dirty)",
            self.cols,
            self.rows,
            self.dirty_count()
        )
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::color::CellColor;

    const A: Attribute = Attribute::DEFAULT;

    fn buf(cols: u16, rows: u16) -> ScreenBuffer {
        ScreenBuffer::new(Size::new(cols, rows))
    }

    /// Pretend everything was flushed.
    fn settle(b: &mut ScreenBuffer) {
        b.take_needs_clear();
        for row in 0..b.rows() {
            for col in 0..b.cols() {
                b.mark_flushed(row, col);
            }
            b.clear_row_flag(row);
        }
    }

    // ── Dirty tracking ───────────────────────────────────────────────────

    #[test]
    fn new_buffer_is_clean_but_needs_clear() {
        let b = buf(10, 3);
        assert_eq!(b.dirty_count(), 0);
        assert!(b.needs_clear());
    }

    #[test]
    fn write_marks_cell_and_row() {
        let mut b = buf(10, 3);
        assert!(b.set_cell(1, 2, 'x', A));
        assert!(b.is_dirty(1, 2));
        assert!(b.row_is_dirty(1));
        assert!(!b.row_is_dirty(0));
        assert_eq!(b.dirty_count(), 1);
    }

    #[test]
    fn writing_back_flushed_value_is_clean() {
        let mut b = buf(10, 3);
        b.set_cell(0, 0, 'x', A);
        settle(&mut b);
        b.set_cell(0, 0, 'y', A);
        assert!(b.is_dirty(0, 0));
        b.set_cell(0, 0, 'x', A);
        assert!(!b.is_dirty(0, 0));
    }

    #[test]
    fn attribute_change_is_dirty() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, 'x', A);
        settle(&mut b);
        b.set_cell(0, 0, 'x', Attribute::new(CellColor::RED, CellColor::Default));
        assert!(b.is_dirty(0, 0));
    }

    #[test]
    fn out_of_bounds_rejected() {
        let mut b = buf(4, 2);
        assert!(!b.set_cell(2, 0, 'x', A));
        assert!(!b.set_cell(0, 4, 'x', A));
        assert!(b.get(2, 0).is_none());
    }

    #[test]
    fn control_chars_rejected() {
        let mut b = buf(4, 1);
        assert!(!b.set_cell(0, 0, '\x1b', A));
        assert_eq!(b.dirty_count(), 0);
    }

    // ── Wide and combining ───────────────────────────────────────────────

    #[test]
    fn wide_char_claims_two_columns() {
        let mut b = buf(4, 1);
        b.set_cell(0, 1, '世', A);
        assert_eq!(b.get(0, 1).unwrap().ch, '世');
        assert!(b.get(0, 2).unwrap().is_continuation());
        assert_eq!(b.row_text(0), " 世 ");
    }

    #[test]
    fn overwriting_continuation_breaks_owner() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, '世', A);
        b.set_cell(0, 1, 'x', A);
        assert_eq!(b.get(0, 0).unwrap().ch, ' ');
        assert_eq!(b.row_text(0), " x  ");
    }

    #[test]
    fn overwriting_owner_clears_continuation() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, '世', A);
        b.set_cell(0, 0, 'x', A);
        assert!(!b.get(0, 1).unwrap().is_continuation());
        assert_eq!(b.row_text(0), "x   ");
    }

    #[test]
    fn wide_char_at_last_column_stored_alone() {
        let mut b = buf(3, 1);
        b.set_cell(0, 2, '世', A);
        assert_eq!(b.get(0, 2).unwrap().ch, '世');
    }

    #[test]
    fn combining_mark_attaches() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, 'e', A);
        assert!(b.set_cell(0, 0, '\u{301}', A));
        assert_eq!(b.get(0, 0).unwrap().tail.as_slice(), &['\u{301}']);
        assert_eq!(b.get(0, 1).unwrap().ch, ' ');
    }

    #[test]
    fn marks_stack_on_one_cell() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, 'e', A);
        assert!(b.set_cell(0, 0, '\u{301}', A));
        assert!(b.set_cell(0, 0, '\u{323}', A));
        assert_eq!(b.get(0, 0).unwrap().text(), "e\u{301}\u{323}");
    }

    #[test]
    fn mark_stack_is_capped() {
        let mut b = buf(2, 1);
        b.set_cell(0, 0, 'a', A);
        for _ in 0..MAX_CLUSTER_TAIL {
            assert!(b.set_cell(0, 0, '\u{301}', A));
        }
        assert!(!b.set_cell(0, 0, '\u{301}', A));
        assert_eq!(b.get(0, 0).unwrap().tail.len(), MAX_CLUSTER_TAIL);
    }

    #[test]
    fn mark_on_continuation_goes_to_owner() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, '世', A);
        b.set_cell(0, 1, '\u{301}', A);
        assert_eq!(b.get(0, 0).unwrap().tail.as_slice(), &['\u{301}']);
    }

    // ── Strings ──────────────────────────────────────────────────────────

    #[test]
    fn set_str_handles_graphemes() {
        let mut b = buf(10, 1);
        let used = b.set_str(0, 0, "ae\u{301}世b", A);
        assert_eq!(used, 5);
        assert_eq!(b.row_text(0), "ae\u{301}世b     ");
    }

    #[test]
    fn set_str_keeps_stacked_marks() {
        let mut b = buf(10, 1);
        assert_eq!(b.set_str(0, 0, "e\u{301}\u{323}x", A), 2);
        assert_eq!(b.row_text(0), "e\u{301}\u{323}x        ");
    }

    #[test]
    fn set_str_keeps_zwj_sequence_in_one_wide_cell() {
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let mut b = buf(6, 1);
        let used = b.set_str(0, 0, &format!("{family}z"), A);
        assert_eq!(used, 3);
        assert_eq!(b.get(0, 0).unwrap().text(), family);
        assert!(b.get(0, 1).unwrap().is_continuation());
        assert_eq!(b.get(0, 2).unwrap().ch, 'z');
    }

    #[test]
    fn set_str_keeps_flag_whole() {
        let mut b = buf(4, 1);
        assert_eq!(b.set_str(0, 0, "\u{1F1FA}\u{1F1F8}!", A), 3);
        assert_eq!(b.get(0, 0).unwrap().text(), "\u{1F1FA}\u{1F1F8}");
        assert!(b.get(0, 1).unwrap().is_continuation());
        assert_eq!(b.get(0, 2).unwrap().ch, '!');
    }

    #[test]
    fn set_str_clips_at_edge() {
        let mut b = buf(4, 1);
        assert_eq!(b.set_str(0, 2, "hello", A), 2);
        assert_eq!(b.row_text(0), "  he");
    }

    // ── Resize / clear ───────────────────────────────────────────────────

    #[test]
    fn resize_reallocates() {
        let mut b = buf(4, 2);
        b.set_cell(0, 0, 'x', A);
        settle(&mut b);
        assert!(b.resize(Size::new(6, 3)));
        assert_eq!(b.size(), Size::new(6, 3));
        assert_eq!(b.get(0, 0), Some(&Cell::EMPTY));
        assert!(b.needs_clear());
        assert!(!b.resize(Size::new(6, 3)));
    }

    #[test]
    fn take_needs_clear_dirties_non_blank() {
        let mut b = buf(4, 1);
        b.set_cell(0, 0, 'x', A);
        settle(&mut b);
        b.invalidate();
        assert!(b.take_needs_clear());
        assert!(b.is_dirty(0, 0));
        assert!(!b.is_dirty(0, 1));
        assert!(!b.take_needs_clear());
    }

    #[test]
    fn clear_blanks_everything() {
        let mut b = buf(3, 1);
        b.set_str(0, 0, "abc", A);
        settle(&mut b);
        b.clear();
        assert_eq!(b.row_text(0), "   ");
        assert_eq!(b.dirty_count(), 3);
    }
}
