// SPDX-License-Identifier: MIT
//
// Driver: a session on an event loop.
//
// The driver is the facade an application sees. It owns the event loop
// and the session the loop's callbacks operate on, and wires the standard
// sources at construction:
//
//   - a read watch on the backend's input descriptor that pumps the
//     decoder whenever bytes arrive
//   - a repeating timer at `mouse_repeat_interval` that drives
//     continuous press (only when the terminal reports mouse support)
//   - SIGWINCH routed into the loop's wakeup pipe; after every iteration
//     a pending resize is re-probed and queued as a `Resize` event
//
// A backend without a descriptor (the in-memory one) is pumped at the
// start of every iteration instead, and the wait is skipped while events
// are queued.
//
// `run` is the usual shape of an application: take events, hand them to
// the `App`, flush the screen, repeat until the app asks to quit. The
// app can also register its own timers and watches through `on_start`;
// their callbacks receive the session.

use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::clock::{SharedClock, SystemClock};
use crate::config::DriverConfig;
use crate::error::Result;
use crate::event::InputEvent;
use crate::event_loop::{Activity, EventLoop, Interest, LoopHandle, Readiness, Token};
use crate::render::FlushStats;
use crate::session::Session;
use crate::wakeup::{SignalWake, WakeHandle};

// ─── App ────────────────────────────────────────────────────────────────────

/// What the application wants after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    Continue,
    Quit,
}

/// An application driven by [`Driver::run`].
pub trait App<B: Backend + 'static> {
    /// Called once before the first iteration. Register timers, draw the
    /// first frame.
    ///
    /// # Errors
    ///
    /// Any error aborts `run` before the loop starts.
    fn on_start(&mut self, driver: &mut Driver<B>) -> Result<()> {
        let _ = driver;
        Ok(())
    }

    /// Handle one decoded event.
    ///
    /// # Errors
    ///
    /// Any error ends `run` and is returned from it.
    fn on_event(&mut self, event: InputEvent, session: &mut Session<B>) -> Result<Action>;

    /// Called after each iteration's events, before the flush.
    ///
    /// # Errors
    ///
    /// Any error ends `run`.
    fn on_iteration(&mut self, session: &mut Session<B>) -> Result<Action> {
        let _ = session;
        Ok(Action::Continue)
    }
}

// ─── Driver ─────────────────────────────────────────────────────────────────

/// Event loop plus session plus the standard wiring.
pub struct Driver<B: Backend> {
    event_loop: EventLoop<Session<B>>,
    session: Session<B>,
    resize: Option<SignalWake>,
    /// The backend's input is watched by descriptor.
    watched: bool,
}

impl<B: Backend + 'static> Driver<B> {
    /// Drive `backend` with the system clock.
    ///
    /// # Errors
    ///
    /// Backend initialisation failure (`Error::Unsupported` for a terminal
    /// that cannot be driven), or the wakeup pipe not being available.
    pub fn new(backend: B, config: DriverConfig) -> Result<Self> {
        Self::with_clock(backend, config, SystemClock::shared())
    }

    /// Drive `backend` with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_clock(backend: B, config: DriverConfig, clock: SharedClock) -> Result<Self> {
        let session = Session::new(backend, config, clock.clone())?;
        let mut event_loop = EventLoop::new(clock)?;

        let input_fd = session.backend().input_fd();
        if let Some(fd) = input_fd {
            event_loop.add_watch(fd, Interest::READABLE, pump_on_ready::<B>);
        }

        if session.capabilities().mouse {
            event_loop.add_repeating_timer(config.mouse_repeat_interval, |s: &mut Session<B>| {
                s.tick_mouse();
                Ok(())
            });
        }

        let resize = match SignalWake::register(libc::SIGWINCH, &event_loop.handle().wake_handle())
        {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(error = %e, "resize signal unavailable, size is probed on demand only");
                None
            }
        };

        info!(input_fd = ?input_fd, "driver ready");
        Ok(Self {
            event_loop,
            session,
            resize,
            watched: input_fd.is_some(),
        })
    }

    // ── Iteration ───────────────────────────────────────────────────────

    /// One pass of the event loop. With `wait` the call blocks until input,
    /// a timer, a signal or a wakeup arrives; it never blocks while events
    /// are already queued.
    ///
    /// # Errors
    ///
    /// Input or poll failure, or the first error a callback returned.
    pub fn run_iteration(&mut self, wait: bool) -> Result<Activity> {
        if !self.watched {
            self.session.pump_input()?;
        }
        let wait = wait && !self.session.has_events();
        let activity = self.event_loop.run_iteration(&mut self.session, wait)?;
        if self.resize.as_ref().is_some_and(SignalWake::take) {
            debug!("SIGWINCH");
            self.session.check_resize()?;
        }
        Ok(activity)
    }

    /// Next event, running iterations until one is queued. With `wait`
    /// false at most one non-blocking iteration runs.
    ///
    /// # Errors
    ///
    /// See [`run_iteration`](Self::run_iteration).
    pub fn next_event(&mut self, wait: bool) -> Result<Option<InputEvent>> {
        loop {
            if let Some(event) = self.session.poll_event() {
                return Ok(Some(event));
            }
            self.run_iteration(wait)?;
            if !wait {
                return Ok(self.session.poll_event());
            }
        }
    }

    /// Run `app` until it returns [`Action::Quit`] or an error occurs. The
    /// screen is flushed after every iteration.
    ///
    /// # Errors
    ///
    /// The first error from the loop, a callback, the app or a flush.
    pub fn run(&mut self, app: &mut impl App<B>) -> Result<()> {
        app.on_start(self)?;
        self.session.flush()?;
        loop {
            self.run_iteration(true)?;
            while let Some(event) = self.session.poll_event() {
                if app.on_event(event, &mut self.session)? == Action::Quit {
                    info!("application quit");
                    return Ok(());
                }
            }
            if app.on_iteration(&mut self.session)? == Action::Quit {
                info!("application quit");
                return Ok(());
            }
            self.session.flush()?;
        }
    }

    // ── Sources ─────────────────────────────────────────────────────────

    /// Call `callback` with the session whenever `fd` is ready.
    /// `Ok(false)` from the callback removes the watch.
    pub fn add_watch<F>(&mut self, fd: RawFd, interest: Interest, callback: F) -> Token
    where
        F: FnMut(&mut Session<B>, Readiness) -> Result<bool> + 'static,
    {
        self.event_loop.add_watch(fd, interest, callback)
    }

    pub fn remove_watch(&mut self, token: Token) -> bool {
        self.event_loop.remove_watch(token)
    }

    pub fn add_timer<F>(&mut self, after: Duration, callback: F) -> Token
    where
        F: FnMut(&mut Session<B>) -> Result<()> + 'static,
    {
        self.event_loop.add_timer(after, callback)
    }

    pub fn add_repeating_timer<F>(&mut self, interval: Duration, callback: F) -> Token
    where
        F: FnMut(&mut Session<B>) -> Result<()> + 'static,
    {
        self.event_loop.add_repeating_timer(interval, callback)
    }

    pub fn remove_timer(&mut self, token: Token) -> bool {
        self.event_loop.remove_timer(token)
    }

    /// Run `callback` once at the end of the next iteration.
    pub fn add_idle<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Session<B>) -> Result<()> + 'static,
    {
        self.event_loop.add_idle(callback);
    }

    // ── Cross-thread ────────────────────────────────────────────────────

    /// Handle for other threads: wake the loop or post work to it.
    #[must_use]
    pub fn handle(&self) -> LoopHandle<Session<B>> {
        self.event_loop.handle()
    }

    /// Bare wakeup handle.
    #[must_use]
    pub fn wake_handle(&self) -> WakeHandle {
        self.event_loop.handle().wake_handle()
    }

    // ── Session passthroughs ────────────────────────────────────────────

    #[must_use]
    pub const fn session(&self) -> &Session<B> {
        &self.session
    }

    pub const fn session_mut(&mut self) -> &mut Session<B> {
        &mut self.session
    }

    #[must_use]
    pub const fn event_loop(&self) -> &EventLoop<Session<B>> {
        &self.event_loop
    }

    /// See [`Session::flush`].
    ///
    /// # Errors
    ///
    /// `Error::Write`, fatal for the session.
    pub fn flush(&mut self) -> Result<FlushStats> {
        self.session.flush()
    }

    /// See [`Session::query`].
    ///
    /// # Errors
    ///
    /// `Error::Write` when the request cannot be sent.
    pub fn query(&mut self, request: &[u8], terminator: &str) -> Result<()> {
        self.session.query(request, terminator)
    }

    /// # Errors
    ///
    /// `Error::Write` when the request cannot be sent.
    pub fn query_cursor_position(&mut self) -> Result<()> {
        self.session.query_cursor_position()
    }

    /// Re-probe the size now instead of waiting for SIGWINCH.
    ///
    /// # Errors
    ///
    /// The size probe failed.
    pub fn check_resize(&mut self) -> Result<bool> {
        self.session.check_resize()
    }

    /// Restore the terminal. Idempotent; also done on drop.
    ///
    /// # Errors
    ///
    /// The backend failed to restore.
    pub fn shutdown(&mut self) -> Result<()> {
        self.session.shutdown()
    }
}

fn pump_on_ready<B: Backend>(session: &mut Session<B>, _: Readiness) -> Result<bool> {
    session.pump_input()?;
    Ok(true)
}

impl<B: Backend> fmt::Debug for Driver<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("session", &self.session)
            .field("event_loop", &self.event_loop)
            .field("resize", &self.resize)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
