// SPDX-License-Identifier: MIT
//
// In-memory backend.
//
// Records every output operation in order and keeps a text grid of what a
// real terminal would be showing. Input comes from a `ScriptedSource`.
// This is the backend tests drive the renderer and the driver through:
// "a second flush performs zero output operations" is literally
// `take_ops().is_empty()`.

use std::collections::HashMap;
use std::io;

use unicode_width::UnicodeWidthStr;

use crate::backend::{Backend, Capabilities, CursorVisibility};
use crate::cell::Attr;
use crate::color::{CellColor, ColorDepth, PairId};
use crate::error::Result;
use crate::event::Size;
use crate::source::{ByteSource, ScriptedSource};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Clear,
    DefinePair {
        pair: PairId,
        fg: CellColor,
        bg: CellColor,
    },
    WriteCell {
        x: u16,
        y: u16,
        text: String,
        pair: PairId,
        style: Attr,
    },
    SetCursor {
        x: u16,
        y: u16,
    },
    Visibility(CursorVisibility),
    Raw(Vec<u8>),
    Flush,
}

/// A backend that renders into memory.
#[derive(Debug)]
pub struct MemoryBackend {
    caps: Capabilities,
    size: Size,
    input: ScriptedSource,
    ops: Vec<Op>,
    grid: Vec<Vec<String>>,
    pairs: HashMap<PairId, (CellColor, CellColor)>,
    cursor: (u16, u16),
    visibility: CursorVisibility,
    fail_writes: bool,
    active: bool,
}

impl MemoryBackend {
    /// A truecolour, mouse-capable fake terminal of the given size.
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self::with_capabilities(size, Capabilities::new(ColorDepth::TrueColor, true))
    }

    #[must_use]
    pub fn with_capabilities(size: Size, caps: Capabilities) -> Self {
        Self {
            caps,
            size,
            input: ScriptedSource::new(),
            ops: Vec::new(),
            grid: blank_grid(size),
            pairs: HashMap::new(),
            cursor: (0, 0),
            visibility: CursorVisibility::Hidden,
            fail_writes: false,
            active: false,
        }
    }

    /// Queue bytes as if the user typed them.
    pub fn feed(&mut self, bytes: &[u8]) -> &mut Self {
        self.input.feed(bytes);
        self
    }

    /// Queue one "nothing arrived" read.
    pub fn pause(&mut self) -> &mut Self {
        self.input.pause();
        self
    }

    /// Whether queued input remains unread.
    #[must_use]
    pub fn has_input(&self) -> bool {
        self.input.has_bytes()
    }

    /// Change the reported size, as a window resize would. The grid is
    /// blanked, like a terminal that reflows on resize.
    pub fn resize(&mut self, size: Size) {
        self.size = size;
        self.grid = blank_grid(size);
    }

    /// Make every later output call fail with `BrokenPipe`.
    pub const fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Recorded operations since the last call, oldest first.
    pub fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }

    /// What row `y` shows, with wide glyphs occupying two columns.
    #[must_use]
    pub fn text_at(&self, y: u16) -> String {
        self.grid
            .get(usize::from(y))
            .map(|row| row.concat())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn pair(&self, pair: PairId) -> Option<(CellColor, CellColor)> {
        self.pairs.get(&pair).copied()
    }

    #[must_use]
    pub const fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    #[must_use]
    pub const fn visibility(&self) -> CursorVisibility {
        self.visibility
    }

    /// Between `init` and `shutdown`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Raw bytes sent through [`Backend::write_raw`], concatenated.
    #[must_use]
    pub fn raw_output(&self) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Raw(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn check(&self) -> io::Result<()> {
        if self.fail_writes {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal detached"))
        } else {
            Ok(())
        }
    }
}

fn blank_grid(size: Size) -> Vec<Vec<String>> {
    vec![vec![" ".to_owned(); usize::from(size.cols)]; usize::from(size.rows)]
}

impl Backend for MemoryBackend {
    fn init(&mut self) -> Result<Capabilities> {
        self.active = true;
        Ok(self.caps.clone())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn input(&mut self) -> &mut dyn ByteSource {
        &mut self.input
    }

    fn size(&self) -> io::Result<Size> {
        Ok(self.size)
    }

    fn define_pair(&mut self, pair: PairId, fg: CellColor, bg: CellColor) -> io::Result<()> {
        self.check()?;
        self.pairs.insert(pair, (fg, bg));
        self.ops.push(Op::DefinePair { pair, fg, bg });
        Ok(())
    }

    fn write_cell(
        &mut self,
        x: u16,
        y: u16,
        text: &str,
        pair: PairId,
        style: Attr,
    ) -> io::Result<()> {
        self.check()?;
        if let Some(row) = self.grid.get_mut(usize::from(y)) {
            let col = usize::from(x);
            if let Some(slot) = row.get_mut(col) {
                text.clone_into(slot);
            }
            if text.width() > 1 {
                if let Some(next) = row.get_mut(col + 1) {
                    next.clear();
                }
            }
        }
        self.ops.push(Op::WriteCell {
            x,
            y,
            text: text.to_owned(),
            pair,
            style,
        });
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.check()?;
        self.grid = blank_grid(self.size);
        self.ops.push(Op::Clear);
        Ok(())
    }

    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        self.check()?;
        self.cursor = (x, y);
        self.ops.push(Op::SetCursor { x, y });
        Ok(())
    }

    fn set_cursor_visibility(&mut self, visibility: CursorVisibility) -> io::Result<()> {
        self.check()?;
        self.visibility = visibility;
        self.ops.push(Op::Visibility(visibility));
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.check()?;
        self.ops.push(Op::Raw(bytes.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.ops.push(Op::Flush);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn records_ops_in_order() {
        let mut b = MemoryBackend::new(Size::new(4, 2));
        b.clear().unwrap();
        b.write_cell(1, 0, "x", PairId::DEFAULT, Attr::empty()).unwrap();
        b.flush().unwrap();
        assert_eq!(
            b.take_ops(),
            vec![
                Op::Clear,
                Op::WriteCell {
                    x: 1,
                    y: 0,
                    text: "x".into(),
                    pair: PairId::DEFAULT,
                    style: Attr::empty(),
                },
                Op::Flush,
            ]
        );
        assert!(b.ops().is_empty());
    }

    #[test]
    fn grid_tracks_wide_glyphs() {
        let mut b = MemoryBackend::new(Size::new(4, 1));
        b.write_cell(0, 0, "世", PairId::DEFAULT, Attr::empty()).unwrap();
        b.write_cell(2, 0, "a", PairId::DEFAULT, Attr::empty()).unwrap();
        assert_eq!(b.text_at(0), "世a ");
    }

    #[test]
    fn failing_writes_are_broken_pipe() {
        let mut b = MemoryBackend::new(Size::new(4, 1));
        b.fail_writes(true);
        let err = b.flush().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(b.ops().is_empty());
    }

    #[test]
    fn input_is_scripted() {
        let mut b = MemoryBackend::new(Size::new(4, 1));
        b.feed(b"a");
        assert!(b.has_input());
        assert_eq!(b.input().read_byte(None).unwrap(), Some(b'a'));
        assert_eq!(b.input().read_byte(None).unwrap(), None);
    }

    #[test]
    fn raw_output_concatenates() {
        let mut b = MemoryBackend::new(Size::new(1, 1));
        b.write_raw(b"\x1b[").unwrap();
        b.write_raw(b"6n").unwrap();
        assert_eq!(b.raw_output(), b"\x1b[6n");
    }
}
