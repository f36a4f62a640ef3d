// SPDX-License-Identifier: MIT
//
// Byte sources for the decoder.
//
// The decoder never touches a file descriptor. It pulls one byte at a time
// through `ByteSource::read_byte`, passing how long it is willing to wait.
// The real terminal source polls its descriptor with that timeout; the
// scripted source replays a fixed byte sequence with explicit pauses, which
// is how tests express "ESC, then nothing for longer than the timeout".

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// A source of raw input bytes with a bounded wait.
pub trait ByteSource {
    /// Read one byte.
    ///
    /// `timeout` of `None` waits indefinitely; `Some(Duration::ZERO)` only
    /// returns a byte that is already available. `Ok(None)` means nothing
    /// arrived in time.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures of the underlying device, including end of
    /// input as [`io::ErrorKind::UnexpectedEof`].
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>> {
        (**self).read_byte(timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Byte(u8),
    Pause,
}

/// A byte source driven by a script.
///
/// Bytes come out in order regardless of the requested timeout. A pause
/// makes exactly one read report "nothing arrived", which the decoder sees
/// as its disambiguation timeout expiring. An exhausted script behaves as
/// a permanent pause.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that will yield `bytes` and then run dry.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut s = Self::new();
        s.feed(bytes);
        s
    }

    /// Append bytes to the script.
    pub fn feed(&mut self, bytes: &[u8]) -> &mut Self {
        self.steps.extend(bytes.iter().copied().map(Step::Byte));
        self
    }

    /// Append one timed-out read.
    pub fn pause(&mut self) -> &mut Self {
        self.steps.push_back(Step::Pause);
        self
    }

    /// Whether unread bytes remain (pauses don't count).
    #[must_use]
    pub fn has_bytes(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::Byte(_)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl ByteSource for ScriptedSource {
    fn read_byte(&mut self, _timeout: Option<Duration>) -> io::Result<Option<u8>> {
        Ok(match self.steps.pop_front() {
            Some(Step::Byte(b)) => Some(b),
            Some(Step::Pause) | None => None,
        })
    }
}
