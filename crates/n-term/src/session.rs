// SPDX-License-Identifier: MIT
//
// Session: one backend, fully wired.
//
// A session owns everything that talks to one terminal: the backend, the
// decoder reading its input, the screen buffer the widget layer writes
// into, the renderer flushing it, and the driver context they share. It
// is the contract the widget layer sees, minus the event loop: pump input,
// probe for resize, write cells, flush.
//
// Decoded events wait in a queue until the caller takes them. Device
// responses are queued too, after the session has looked at them: an
// XTVERSION answer fills in `Capabilities::version`.
//
// `Driver` puts a session on an event loop. Tests drive a session over
// `MemoryBackend` directly.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, info};

use crate::ansi;
use crate::backend::{Backend, Capabilities, CursorVisibility};
use crate::buffer::ScreenBuffer;
use crate::cell::Attribute;
use crate::clock::SharedClock;
use crate::config::DriverConfig;
use crate::context::DriverContext;
use crate::decoder::EscapeSequenceDecoder;
use crate::error::{Error, Result};
use crate::event::{InputEvent, Size};
use crate::pending;
use crate::render::{FlushStats, Renderer};

/// Terminator of a cursor position report (`CSI row ; col R`).
const CURSOR_POSITION_TERMINATOR: &str = "R";

/// A live terminal session.
pub struct Session<B: Backend> {
    backend: B,
    ctx: DriverContext,
    decoder: EscapeSequenceDecoder,
    renderer: Renderer,
    screen: ScreenBuffer,
    events: VecDeque<InputEvent>,
    active: bool,
}

impl<B: Backend> Session<B> {
    /// Initialise `backend` and size the screen to it. Sends the version
    /// query when `config.query_version` is set.
    ///
    /// # Errors
    ///
    /// Whatever the backend's `init` reports (`Error::Unsupported` for a
    /// terminal that cannot be driven), or the size probe failing.
    pub fn new(mut backend: B, config: DriverConfig, clock: SharedClock) -> Result<Self> {
        let capabilities = backend.init()?;
        let size = match backend.size() {
            Ok(size) => size,
            Err(e) => {
                backend.shutdown().ok();
                return Err(e.into());
            }
        };
        info!(%capabilities, %size, "backend initialised");

        let decoder = EscapeSequenceDecoder::new(&config, clock.clone());
        let mut session = Self {
            backend,
            ctx: DriverContext::new(config, capabilities, clock),
            decoder,
            renderer: Renderer::new(),
            screen: ScreenBuffer::new(size),
            events: VecDeque::new(),
            active: true,
        };
        if config.query_version {
            session.query(ansi::REQUEST_VERSION, pending::DCS)?;
        }
        Ok(session)
    }

    // ── Input ───────────────────────────────────────────────────────────

    /// Decode everything the backend has buffered. Returns how many events
    /// were queued.
    ///
    /// # Errors
    ///
    /// I/O failure reading input; end of input is `UnexpectedEof`.
    pub fn pump_input(&mut self) -> Result<usize> {
        self.expire_queries();
        let mut queued = 0;
        while let Some(event) =
            self.decoder
                .decode_next(self.backend.input(), &mut self.ctx.pending)?
        {
            self.observe(&event);
            self.events.push_back(event);
            queued += 1;
        }
        Ok(queued)
    }

    /// Continuous-press heartbeat. Queues a repeated press while a target
    /// has opted in and a button is held.
    pub fn tick_mouse(&mut self) -> bool {
        match self.decoder.tick() {
            Some(event) => {
                self.events.push_back(event);
                true
            }
            None => false,
        }
    }

    /// Opt the current mouse target in or out of continuous press.
    pub const fn set_continuous_press(&mut self, enabled: bool) {
        self.decoder.mouse_mut().set_continuous_press(enabled);
    }

    /// Re-probe the backend size. On change the screen is reallocated and
    /// a `Resize` event is queued ahead of the next render.
    ///
    /// # Errors
    ///
    /// The size probe failed.
    pub fn check_resize(&mut self) -> Result<bool> {
        let size = self.backend.size()?;
        if !self.screen.resize(size) {
            return Ok(false);
        }
        debug!(%size, "terminal resized");
        self.renderer.invalidate();
        self.events.push_back(InputEvent::from(size));
        Ok(true)
    }

    /// Next queued event, oldest first.
    pub fn poll_event(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    fn observe(&mut self, event: &InputEvent) {
        if let InputEvent::DeviceResponse { raw } = event {
            if let Some(version) = parse_xtversion(raw) {
                debug!(%version, "terminal version");
                self.ctx.capabilities.version = Some(version);
            }
        }
    }

    // ── Output ──────────────────────────────────────────────────────────

    /// Write one character; see [`ScreenBuffer::set_cell`].
    pub fn set_cell(&mut self, row: u16, col: u16, ch: char, attr: Attribute) -> bool {
        self.screen.set_cell(row, col, ch, attr)
    }

    pub fn set_str(&mut self, row: u16, col: u16, text: &str, attr: Attribute) -> u16 {
        self.screen.set_str(row, col, text, attr)
    }

    #[must_use]
    pub const fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub const fn screen_mut(&mut self) -> &mut ScreenBuffer {
        &mut self.screen
    }

    /// Place the hardware cursor at `(col, row)` on the next flush.
    pub const fn move_cursor(&mut self, col: u16, row: u16) {
        self.renderer.move_cursor(col, row);
    }

    pub const fn set_cursor_visibility(&mut self, visibility: CursorVisibility) {
        self.renderer.set_cursor_visibility(visibility);
    }

    /// Push the dirty part of the screen to the terminal.
    ///
    /// # Errors
    ///
    /// `Error::Write`. The session is over when this happens.
    pub fn flush(&mut self) -> Result<FlushStats> {
        self.renderer
            .flush(&mut self.screen, &mut self.backend, &mut self.ctx)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Send `request` to the terminal and expect an answer ending in
    /// `terminator`. The answer arrives later as a `DeviceResponse`.
    ///
    /// # Errors
    ///
    /// `Error::Write` when the request cannot be sent.
    pub fn query(&mut self, request: &[u8], terminator: &str) -> Result<()> {
        let deadline = self.ctx.clock.now() + self.ctx.config.query_timeout;
        self.ctx.pending.register(terminator, deadline);
        if let Err(e) = self
            .backend
            .write_raw(request)
            .and_then(|()| self.backend.flush())
        {
            self.ctx.pending.unregister(terminator);
            return Err(Error::Write(e));
        }
        debug!(terminator, "device query sent");
        Ok(())
    }

    /// Drop queries the terminal has not answered within
    /// `query_timeout`. Runs before every decode.
    fn expire_queries(&mut self) {
        let dropped = self.ctx.pending.expire(self.ctx.clock.now());
        if dropped > 0 {
            debug!(dropped, "device queries timed out");
        }
    }

    /// Ask for a cursor position report.
    ///
    /// # Errors
    ///
    /// `Error::Write` when the request cannot be sent.
    pub fn query_cursor_position(&mut self) -> Result<()> {
        self.query(ansi::REQUEST_CURSOR_POSITION, CURSOR_POSITION_TERMINATOR)
    }

    // ── State ───────────────────────────────────────────────────────────

    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.ctx.capabilities
    }

    #[must_use]
    pub const fn size(&self) -> Size {
        self.screen.size()
    }

    #[must_use]
    pub const fn context(&self) -> &DriverContext {
        &self.ctx
    }

    #[must_use]
    pub const fn decoder(&self) -> &EscapeSequenceDecoder {
        &self.decoder
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Restore the terminal. Idempotent.
    ///
    /// # Errors
    ///
    /// The backend failed to restore.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.backend.shutdown()
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl<B: Backend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("size", &self.screen.size())
            .field("ctx", &self.ctx)
            .field("queued", &self.events.len())
            .finish_non_exhaustive()
    }
}

/// Name and version from an XTVERSION answer, `DCS > | text ST`.
fn parse_xtversion(raw: &[u8]) -> Option<String> {
    let body = raw.strip_prefix(b"\x1bP>|")?;
    let body = body
        .strip_suffix(b"\x1b\\")
        .or_else(|| body.strip_suffix(b"\x07"))?;
    let text = String::from_utf8_lossy(body).trim().to_owned();
    (!text.is_empty()).then_some(text)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
