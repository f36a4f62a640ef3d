// SPDX-License-Identifier: MIT
//
// Cell: the atomic unit of terminal rendering.
//
// Every character position on screen is a Cell: a base character, the rest
// of its grapheme cluster (combining marks, joiners, the second regional
// indicator of a flag), and the attribute it is drawn under. An attribute is a (foreground, background) colour pair plus style
// flags; the colour pair is what the renderer maps to a backend pair handle.
//
// Wide characters (CJK, most emoji) occupy two columns. The first cell
// holds the character; the second is a continuation cell (ch = '\0'). The
// renderer never writes continuation cells: the terminal advances two
// columns after printing the wide character.

use smallvec::SmallVec;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::color::CellColor;

// ─── Text Attributes ─────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Text style flags.
    ///
    /// These map directly to SGR (Select Graphic Rendition) parameters.
    ///
    /// ```
    /// use n_term::cell::Attr;
    ///
    /// let style = Attr::BOLD | Attr::UNDERLINE;
    /// assert!(style.contains(Attr::BOLD));
    /// assert!(!style.contains(Attr::DIM));
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Attr: u8 {
        /// SGR 1: increased intensity.
        const BOLD          = 1 << 0;
        /// SGR 2: decreased intensity (faint).
        const DIM           = 1 << 1;
        /// SGR 3: italic.
        const ITALIC        = 1 << 2;
        /// SGR 4: underline.
        const UNDERLINE     = 1 << 3;
        /// SGR 5: blink.
        const BLINK         = 1 << 4;
        /// SGR 7: swap foreground and background.
        const INVERSE       = 1 << 5;
        /// SGR 8: invisible text.
        const HIDDEN        = 1 << 6;
        /// SGR 9: crossed-out text.
        const STRIKETHROUGH = 1 << 7;
    }
}

// ─── Attribute ───────────────────────────────────────────────────────────────

/// How a cell is drawn: colour pair plus style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attribute {
    pub fg: CellColor,
    pub bg: CellColor,
    pub style: Attr,
}

impl Attribute {
    /// Default colours, no style.
    pub const DEFAULT: Self = Self {
        fg: CellColor::Default,
        bg: CellColor::Default,
        style: Attr::empty(),
    };

    #[inline]
    #[must_use]
    pub const fn new(fg: CellColor, bg: CellColor) -> Self {
        Self {
            fg,
            bg,
            style: Attr::empty(),
        }
    }

    #[must_use]
    pub const fn with_style(mut self, style: Attr) -> Self {
        self.style = style;
        self
    }
}

// ─── Cell ────────────────────────────────────────────────────────────────────

/// Characters that follow the base of a grapheme cluster. Two inline slots
/// cover stacked accents; emoji ZWJ sequences spill to the heap.
pub type ClusterTail = SmallVec<[char; 2]>;

/// A single terminal cell.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    /// Character to display. `'\0'` marks a continuation cell.
    pub ch: char,
    /// The rest of the cluster, written right after `ch`.
    pub tail: ClusterTail,
    pub attr: Attribute,
}

impl Cell {
    /// Continuation marker for the second column of a wide character.
    pub const CONTINUATION_CHAR: char = '\0';

    /// A space under the default attribute.
    pub const EMPTY: Self = Self {
        ch: ' ',
        tail: SmallVec::new_const(),
        attr: Attribute::DEFAULT,
    };

    #[inline]
    #[must_use]
    pub const fn new(ch: char, attr: Attribute) -> Self {
        Self {
            ch,
            tail: SmallVec::new_const(),
            attr,
        }
    }

    /// A whole grapheme cluster: its first char is the base, the rest is
    /// kept as the tail. `None` for an empty string.
    #[must_use]
    pub fn cluster(grapheme: &str, attr: Attribute) -> Option<Self> {
        let mut chars = grapheme.chars();
        let ch = chars.next()?;
        Some(Self {
            ch,
            tail: chars.collect(),
            attr,
        })
    }

    /// The second half of a wide character drawn under `attr`.
    #[inline]
    #[must_use]
    pub const fn continuation(attr: Attribute) -> Self {
        Self {
            ch: Self::CONTINUATION_CHAR,
            tail: SmallVec::new_const(),
            attr,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.ch == Self::CONTINUATION_CHAR
    }

    /// Display width in columns: 0 for continuations, 2 for wide
    /// characters and wide clusters (flags, ZWJ emoji), 1 otherwise.
    /// Control characters count as 1 so they still occupy their cell.
    #[must_use]
    pub fn width(&self) -> usize {
        if self.is_continuation() {
            0
        } else if self.tail.is_empty() {
            self.ch.width().unwrap_or(1).max(1)
        } else {
            self.text().width().clamp(1, 2)
        }
    }

    /// The whole cluster, ready to write.
    #[must_use]
    pub fn text(&self) -> String {
        let mut s = String::with_capacity(4 + 4 * self.tail.len());
        if !self.is_continuation() {
            s.push(self.ch);
            s.extend(self.tail.iter());
        }
        s
    }
}

impl Default for Cell {
    #[inline]
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_continuation() {
            return write!(f, "Cell(continuation)");
        }
        write!(f, "Cell({:?}", self.ch)?;
        for m in &self.tail {
            write!(f, "+{m:?}")?;
        }
        if self.attr.fg != CellColor::Default {
            write!(f, ", fg={:?}", self.attr.fg)?;
        }
        if self.attr.bg != CellColor::Default {
            write!(f, ", bg={:?}", self.attr.bg)?;
        }
        if !self.attr.style.is_empty() {
            write!(f, ", {:?}", self.attr.style)?;
        }
        write!(f, ")")
    }
}

// ─── ScreenCell ──────────────────────────────────────────────────────────────

/// A cell in the screen buffer with its dirty flag. `dirty` is true exactly
/// when the cell differs from what was last flushed to the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenCell {
    pub cell: Cell,
    pub dirty: bool,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_is_blank_space() {
        let c = Cell::default();
        assert_eq!(c.ch, ' ');
        assert_eq!(c.attr, Attribute::DEFAULT);
        assert_eq!(c.width(), 1);
    }

    #[test]
    fn widths() {
        let a = Attribute::DEFAULT;
        assert_eq!(Cell::new('a', a).width(), 1);
        assert_eq!(Cell::new('世', a).width(), 2);
        assert_eq!(Cell::new('\x07', a).width(), 1);
        assert_eq!(Cell::continuation(a).width(), 0);
    }

    #[test]
    fn text_includes_every_mark() {
        let mut c = Cell::new('e', Attribute::DEFAULT);
        c.tail.push('\u{301}');
        c.tail.push('\u{323}');
        assert_eq!(c.text(), "e\u{301}\u{323}");
        assert_eq!(c.width(), 1);
        assert_eq!(format!("{c:?}"), "Cell('e'+'\\u{301}'+'\\u{323}')");
        assert_eq!(Cell::continuation(Attribute::DEFAULT).text(), "");
    }

    #[test]
    fn cluster_keeps_zwj_sequence_whole() {
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let c = Cell::cluster(family, Attribute::DEFAULT).unwrap();
        assert_eq!(c.ch, '\u{1F468}');
        assert_eq!(c.tail.len(), 4);
        assert_eq!(c.text(), family);
        assert_eq!(c.width(), 2);
        assert!(Cell::cluster("", Attribute::DEFAULT).is_none());
    }

    #[test]
    fn flag_is_one_wide_cluster() {
        let c = Cell::cluster("\u{1F1FA}\u{1F1F8}", Attribute::DEFAULT).unwrap();
        assert_eq!(c.text(), "\u{1F1FA}\u{1F1F8}");
        assert_eq!(c.width(), 2);
    }

    #[test]
    fn attribute_builder() {
        let a = Attribute::new(CellColor::RED, CellColor::Default).with_style(Attr::BOLD);
        assert_eq!(a.fg, CellColor::RED);
        assert!(a.style.contains(Attr::BOLD));
    }

    #[test]
    fn debug_is_compact() {
        let c = Cell::new('x', Attribute::new(CellColor::Ansi256(1), CellColor::Default));
        assert_eq!(format!("{c:?}"), "Cell('x', fg=ansi(1))");
    }
}
