// SPDX-License-Identifier: MIT
//
// n-term: terminal protocol and event engine.
//
// Everything between a raw terminal and a widget layer: decoding the byte
// stream into keys, mouse gestures and device responses; one blocking
// point that multiplexes input, timers, idle work, signals and
// cross-thread wakeups; and a cell buffer that is diffed against what the
// terminal already shows so a frame only sends what changed.
//
// Data flows one way in each direction:
//
//   input:  ByteSource → EscapeSequenceDecoder (KeyMapper,
//           MouseEventSynthesizer, PendingRequestTable) → InputEvent queue
//   output: ScreenBuffer → Renderer → Backend (TtyBackend writes ANSI
//           through CellWriter; MemoryBackend records operations)
//
// `Session` ties one backend to its decoder, buffer and renderer.
// `Driver` puts a session on the `EventLoop`. Tests drive either through
// `MemoryBackend`, `ScriptedSource` and `ManualClock` without a terminal.
//
// The decoder, buffer, renderer and in-memory backend are plain Rust. The
// live terminal, the poll loop and the wakeup pipe are unix-only.

pub mod ansi;
pub mod backend;
pub mod buffer;
pub mod cell;
pub mod clock;
pub mod color;
pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod event;
pub mod keys;
pub mod logging;
pub mod memory;
pub mod mouse;
pub mod output;
pub mod pending;
pub mod render;
pub mod session;
pub mod source;

#[cfg(unix)]
pub mod driver;
#[cfg(unix)]
pub mod event_loop;
#[cfg(unix)]
pub mod tty;
#[cfg(unix)]
pub mod wakeup;

pub use error::{Error, Result};
