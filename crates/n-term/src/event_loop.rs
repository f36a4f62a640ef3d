// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Event loop: the single blocking point of the engine.
//
// One poll(2) call multiplexes every watched descriptor plus the wakeup
// pipe, with a timeout that ends at the earliest timer deadline. An
// iteration runs in a fixed order:
//
//   1. poll, retried on EINTR (the only automatic retry)
//   2. drain the wakeup pipe
//   3. watch callbacks, in registration order; returning `false` removes
//      the watch
//   4. expired timers, in deadline order; one-shot timers are removed,
//      repeating timers fire once per whole interval that has elapsed
//   5. tasks posted from other threads
//   6. queued idle callbacks
//
// Callbacks get `&mut C`, the loop's context (the driver puts its session
// there). An error from any callback stops the iteration and reaches the
// caller of `run_iteration` untouched.
//
// Nothing here is shared across threads except through `LoopHandle`: it
// can wake the loop and queue a task, and the task runs on the loop's own
// thread. The watch table, the timers and the context are never touched
// from anywhere else, so none of them need a lock.
//
// Safety: the only unsafe block is the poll(2) call, on a `Vec<pollfd>`
// built and owned by the iteration.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::wakeup::{WakeHandle, Waker};

/// Shortest interval a repeating timer may have.
pub const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);
/// Missed intervals a repeating timer makes up for before skipping ahead.
pub const MAX_CATCH_UP: u32 = 8;

// ─── Flags and tokens ───────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Conditions a watch waits for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Conditions that fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Readiness: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        /// Peer closed.
        const HANGUP   = 1 << 2;
        /// Error or invalid descriptor.
        const ERROR    = 1 << 3;
    }
}

impl Interest {
    const fn poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.contains(Self::READABLE) {
            events |= libc::POLLIN;
        }
        if self.contains(Self::WRITABLE) {
            events |= libc::POLLOUT;
        }
        events
    }
}

impl Readiness {
    const fn from_revents(revents: libc::c_short) -> Self {
        let mut r = Self::empty();
        if revents & libc::POLLIN != 0 {
            r = r.union(Self::READABLE);
        }
        if revents & libc::POLLOUT != 0 {
            r = r.union(Self::WRITABLE);
        }
        if revents & libc::POLLHUP != 0 {
            r = r.union(Self::HANGUP);
        }
        if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            r = r.union(Self::ERROR);
        }
        r
    }
}

/// Identifies a watch or a timer for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

// ─── Callbacks ──────────────────────────────────────────────────────────────

/// Watch callback. `Ok(false)` removes the watch.
pub type WatchFn<C> = Box<dyn FnMut(&mut C, Readiness) -> Result<bool>>;
pub type TimerFn<C> = Box<dyn FnMut(&mut C) -> Result<()>>;
pub type IdleFn<C> = Box<dyn FnOnce(&mut C) -> Result<()>>;
/// Work posted from another thread.
pub type Task<C> = Box<dyn FnOnce(&mut C) -> Result<()> + Send>;

struct Watch<C> {
    token: Token,
    fd: RawFd,
    interest: Interest,
    callback: WatchFn<C>,
}

struct Timer<C> {
    interval: Option<Duration>,
    callback: TimerFn<C>,
}

// ─── Activity ───────────────────────────────────────────────────────────────

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Activity {
    /// The wakeup pipe had bytes.
    pub woken: bool,
    pub watches_fired: usize,
    pub timers_fired: usize,
    pub tasks_run: usize,
    pub idle_run: usize,
}

impl Activity {
    /// Whether anything at all happened.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.woken
            && self.watches_fired == 0
            && self.timers_fired == 0
            && self.tasks_run == 0
            && self.idle_run == 0
    }
}

// ─── LoopHandle ─────────────────────────────────────────────────────────────

/// Cross-thread handle: wake the loop, or queue work for its thread.
pub struct LoopHandle<C> {
    wake: WakeHandle,
    tasks: Sender<Task<C>>,
}

impl<C> LoopHandle<C> {
    /// Interrupt a blocked `run_iteration`.
    ///
    /// # Errors
    ///
    /// The wakeup pipe is broken.
    pub fn wakeup(&self) -> io::Result<()> {
        self.wake.wakeup()
    }

    /// Run `task` on the loop thread during the next iteration.
    ///
    /// # Errors
    ///
    /// The loop no longer exists, or the wakeup pipe is broken.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        self.tasks
            .send(Box::new(task))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "event loop is gone"))?;
        self.wake.wakeup()?;
        Ok(())
    }

    /// The bare wakeup handle, without task posting.
    #[must_use]
    pub fn wake_handle(&self) -> WakeHandle {
        self.wake.clone()
    }
}

impl<C> Clone for LoopHandle<C> {
    fn clone(&self) -> Self {
        Self {
            wake: self.wake.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<C> fmt::Debug for LoopHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("wake", &self.wake)
            .finish_non_exhaustive()
    }
}

// ─── EventLoop ──────────────────────────────────────────────────────────────

/// Poll-based multiplexer over descriptors, timers, idle work and
/// cross-thread wakeups.
pub struct EventLoop<C> {
    clock: SharedClock,
    waker: Waker,
    watches: Vec<Watch<C>>,
    timers: BTreeMap<(Instant, Token), Timer<C>>,
    /// Token → current deadline, for removal.
    deadlines: HashMap<Token, Instant>,
    idle: VecDeque<IdleFn<C>>,
    tasks_rx: Receiver<Task<C>>,
    tasks_tx: Sender<Task<C>>,
    next_token: u64,
}

impl<C> EventLoop<C> {
    /// # Errors
    ///
    /// The wakeup pipe could not be created.
    pub fn new(clock: SharedClock) -> Result<Self> {
        let (tasks_tx, tasks_rx) = mpsc::channel();
        Ok(Self {
            clock,
            waker: Waker::new()?,
            watches: Vec::new(),
            timers: BTreeMap::new(),
            deadlines: HashMap::new(),
            idle: VecDeque::new(),
            tasks_rx,
            tasks_tx,
            next_token: 0,
        })
    }

    const fn token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }

    /// Handle for other threads.
    #[must_use]
    pub fn handle(&self) -> LoopHandle<C> {
        LoopHandle {
            wake: self.waker.handle(),
            tasks: self.tasks_tx.clone(),
        }
    }

    /// Wake the loop from its own thread (the next wait returns at once).
    ///
    /// # Errors
    ///
    /// The wakeup pipe is broken.
    pub fn wakeup(&self) -> io::Result<()> {
        self.waker.handle().wakeup()
    }

    // ── Watches ─────────────────────────────────────────────────────────

    /// Call `callback` whenever `fd` is ready for `interest`.
    pub fn add_watch<F>(&mut self, fd: RawFd, interest: Interest, callback: F) -> Token
    where
        F: FnMut(&mut C, Readiness) -> Result<bool> + 'static,
    {
        let token = self.token();
        self.watches.push(Watch {
            token,
            fd,
            interest,
            callback: Box::new(callback),
        });
        token
    }

    /// Returns whether the watch existed. Effective before the next poll.
    pub fn remove_watch(&mut self, token: Token) -> bool {
        let before = self.watches.len();
        self.watches.retain(|w| w.token != token);
        self.watches.len() != before
    }

    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    // ── Timers ──────────────────────────────────────────────────────────

    /// Fire once, `after` from now.
    pub fn add_timer<F>(&mut self, after: Duration, callback: F) -> Token
    where
        F: FnMut(&mut C) -> Result<()> + 'static,
    {
        let deadline = self.clock.now() + after;
        self.schedule(deadline, None, Box::new(callback))
    }

    /// Fire at a fixed instant.
    pub fn add_deadline<F>(&mut self, deadline: Instant, callback: F) -> Token
    where
        F: FnMut(&mut C) -> Result<()> + 'static,
    {
        self.schedule(deadline, None, Box::new(callback))
    }

    /// Fire every `interval`, first one `interval` from now. Intervals
    /// below [`MIN_TIMER_INTERVAL`] are raised to it.
    pub fn add_repeating_timer<F>(&mut self, interval: Duration, callback: F) -> Token
    where
        F: FnMut(&mut C) -> Result<()> + 'static,
    {
        let interval = interval.max(MIN_TIMER_INTERVAL);
        let deadline = self.clock.now() + interval;
        self.schedule(deadline, Some(interval), Box::new(callback))
    }

    fn schedule(
        &mut self,
        deadline: Instant,
        interval: Option<Duration>,
        callback: TimerFn<C>,
    ) -> Token {
        let token = self.token();
        self.timers
            .insert((deadline, token), Timer { interval, callback });
        self.deadlines.insert(token, deadline);
        token
    }

    /// Returns whether the timer was still scheduled.
    pub fn remove_timer(&mut self, token: Token) -> bool {
        self.deadlines
            .remove(&token)
            .is_some_and(|deadline| self.timers.remove(&(deadline, token)).is_some())
    }

    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.first_key_value().map(|(&(d, _), _)| d)
    }

    // ── Idle ────────────────────────────────────────────────────────────

    /// Run `callback` once, at the end of the next iteration. Queued idle
    /// work makes the next wait non-blocking.
    pub fn add_idle<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut C) -> Result<()> + 'static,
    {
        self.idle.push_back(Box::new(callback));
    }

    #[must_use]
    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    // ── Iteration ───────────────────────────────────────────────────────

    /// Run one iteration. With `wait` false the poll never blocks.
    ///
    /// # Errors
    ///
    /// A poll failure other than EINTR, or the first callback error.
    pub fn run_iteration(&mut self, ctx: &mut C, wait: bool) -> Result<Activity> {
        let mut activity = Activity::default();
        let timeout = self.poll_timeout(wait);

        let mut fds = Vec::with_capacity(self.watches.len() + 1);
        fds.push(libc::pollfd {
            fd: self.waker.fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        fds.extend(self.watches.iter().map(|w| libc::pollfd {
            fd: w.fd,
            events: w.interest.poll_events(),
            revents: 0,
        }));

        poll(&mut fds, timeout)?;

        if fds[0].revents != 0 {
            self.waker.drain()?;
            activity.woken = true;
        }

        // Watches: the poll set mirrors `self.watches` from index 1.
        let fired: Vec<(Token, Readiness)> = self
            .watches
            .iter()
            .zip(&fds[1..])
            .filter(|(_, pfd)| pfd.revents != 0)
            .map(|(w, pfd)| (w.token, Readiness::from_revents(pfd.revents)))
            .collect();
        for (token, readiness) in fired {
            let Some(idx) = self.watches.iter().position(|w| w.token == token) else {
                continue;
            };
            activity.watches_fired += 1;
            let keep = (self.watches[idx].callback)(ctx, readiness)?;
            if !keep {
                trace!(?token, "watch removed by its callback");
                self.watches.remove(idx);
            }
        }

        activity.timers_fired = self.run_timers(ctx)?;

        while let Ok(task) = self.tasks_rx.try_recv() {
            activity.tasks_run += 1;
            task(ctx)?;
        }

        while let Some(idle) = self.idle.pop_front() {
            activity.idle_run += 1;
            idle(ctx)?;
        }

        Ok(activity)
    }

    fn run_timers(&mut self, ctx: &mut C) -> Result<usize> {
        let now = self.clock.now();
        let mut fired = 0;
        while let Some(entry) = self.timers.first_entry() {
            let (deadline, token) = *entry.key();
            if deadline > now {
                break;
            }
            let mut timer = entry.remove();
            fired += 1;
            let result = (timer.callback)(ctx);
            match timer.interval {
                Some(interval) => {
                    let next = next_repeat(deadline, interval, now);
                    self.timers.insert((next, token), timer);
                    self.deadlines.insert(token, next);
                }
                None => {
                    self.deadlines.remove(&token);
                }
            }
            result?;
        }
        Ok(fired)
    }

    /// Milliseconds for poll(2): 0 when not waiting or idle work is queued,
    /// until the earliest deadline (rounded up, so a timer never fires
    /// early) when a timer exists, forever otherwise.
    fn poll_timeout(&self, wait: bool) -> libc::c_int {
        if !wait || !self.idle.is_empty() {
            return 0;
        }
        self.next_deadline().map_or(-1, |deadline| {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            let ms = remaining.as_nanos().div_ceil(1_000_000);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        })
    }
}

impl<C> fmt::Debug for EventLoop<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("watches", &self.watches.len())
            .field("timers", &self.timers.len())
            .field("idle", &self.idle.len())
            .finish_non_exhaustive()
    }
}

/// Deadline after a repeating timer due at `deadline` fired at `now`.
///
/// A loop that fell a few intervals behind fires the missed ones on the
/// following passes of `run_timers`. One that fell more than
/// [`MAX_CATCH_UP`] intervals behind (a suspended process, a long
/// callback) skips them and resumes at the next whole interval after
/// `now`.
fn next_repeat(deadline: Instant, interval: Duration, now: Instant) -> Instant {
    let step = interval.as_nanos().max(1);
    let late = now.saturating_duration_since(deadline).as_nanos();
    if late / step < u128::from(MAX_CATCH_UP) {
        return deadline + interval;
    }
    let ahead = step - late % step;
    now + Duration::from_nanos(u64::try_from(ahead).unwrap_or(u64::MAX))
}

/// poll(2), retrying on EINTR.
fn poll(fds: &mut [libc::pollfd], timeout: libc::c_int) -> Result<usize> {
    let nfds = libc::nfds_t::try_from(fds.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many descriptors"))?;
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, timeout) };
        if rc >= 0 {
            #[allow(clippy::cast_sign_loss)] // rc >= 0.
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Io(err));
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
