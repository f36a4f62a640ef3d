// SPDX-License-Identifier: MIT
//
// The event viewer application.
//
// Every decoded event is described on its own line, newest at the bottom.
// The header shows what the backend negotiated, and it also shows the two
// clocks that run beside the input: an uptime counter driven by a
// repeating loop timer, and a wakeup counter bumped by a background
// thread through the loop's wakeup pipe.
//
// The whole screen is repainted every iteration. The renderer diffs it
// against what the terminal shows, so a quiet iteration sends nothing.
//
// Layout:
//
//   ┌──────────────────────────────┐
//   │ title (INVERSE)              │  row 0
//   │ status                       │  row 1
//   ├──────────────────────────────┤  row 2
//   │ event log                    │  rows 3 .. h-1
//   ├──────────────────────────────┤
//   │ key help (DIM)               │  row h-1
//   └──────────────────────────────┘

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use n_term::backend::Backend;
use n_term::cell::{Attr, Attribute};
use n_term::color::CellColor;
use n_term::driver::{Action, App, Driver};
use n_term::event::InputEvent;
use n_term::keys::{KeyCode, Modifiers};
use n_term::session::Session;
use n_term::wakeup::WakeHandle;

/// Rows above the log.
const HEADER_ROWS: u16 = 3;
/// Period of the uptime timer.
const UPTIME_TICK: Duration = Duration::from_secs(1);
/// Period of the background wakeup thread.
pub const WAKE_TICK: Duration = Duration::from_millis(250);

const HELP: &str = "Ctrl-Q quit  Ctrl-P cursor report  Ctrl-R continuous press  Ctrl-L redraw";

const fn ctrl(ch: char) -> KeyCode {
    KeyCode::char(ch).with_modifiers(Modifiers::CTRL)
}

// ─── Viewer ─────────────────────────────────────────────────────────────────

pub struct Viewer {
    log: VecDeque<String>,
    seen: u64,
    uptime: Rc<Cell<u64>>,
    wakeups: Arc<AtomicU64>,
    continuous: bool,
}

impl Viewer {
    #[must_use]
    pub fn new(wakeups: Arc<AtomicU64>) -> Self {
        Self {
            log: VecDeque::new(),
            seen: 0,
            uptime: Rc::new(Cell::new(0)),
            wakeups,
            continuous: false,
        }
    }

    fn record(&mut self, line: String, capacity: usize) {
        self.seen += 1;
        self.log.push_back(line);
        while self.log.len() > capacity {
            self.log.pop_front();
        }
    }

    fn paint<B: Backend>(&self, session: &mut Session<B>) {
        let size = session.size();
        let title = Attribute::DEFAULT.with_style(Attr::INVERSE | Attr::BOLD);
        let status = Attribute::new(CellColor::Ansi256(6), CellColor::Default);
        let rule = Attribute::new(CellColor::Ansi256(8), CellColor::Default);
        let help = Attribute::DEFAULT.with_style(Attr::DIM);

        put_line(session, 0, " n-tui: terminal event viewer", title);
        let line = format!(
            " {size} | {} | up {}s | wakeups {} | events {} | continuous {}",
            session.capabilities(),
            self.uptime.get(),
            self.wakeups.load(Ordering::Relaxed),
            self.seen,
            if self.continuous { "on" } else { "off" },
        );
        put_line(session, 1, &line, status);
        put_line(session, 2, &"─".repeat(usize::from(size.cols)), rule);

        let log_rows = log_capacity(size.rows);
        let skip = self.log.len().saturating_sub(log_rows);
        let mut lines = self.log.iter().skip(skip);
        for row in HEADER_ROWS..size.rows.saturating_sub(1) {
            let text = lines.next().map_or("", String::as_str);
            put_line(session, row, text, Attribute::DEFAULT);
        }
        if size.rows > HEADER_ROWS {
            put_line(session, size.rows - 1, HELP, help);
        }
    }
}

impl<B: Backend + 'static> App<B> for Viewer {
    fn on_start(&mut self, driver: &mut Driver<B>) -> n_term::Result<()> {
        let uptime = Rc::clone(&self.uptime);
        driver.add_repeating_timer(UPTIME_TICK, move |_: &mut Session<B>| {
            uptime.set(uptime.get() + 1);
            Ok(())
        });
        self.paint(driver.session_mut());
        Ok(())
    }

    fn on_event(&mut self, event: InputEvent, session: &mut Session<B>) -> n_term::Result<Action> {
        if let Some(key) = event.as_key() {
            match key.code {
                c if c == ctrl('q') => return Ok(Action::Quit),
                c if c == ctrl('p') => session.query_cursor_position()?,
                c if c == ctrl('r') => {
                    self.continuous = !self.continuous;
                    session.set_continuous_press(self.continuous);
                }
                c if c == ctrl('l') => session.screen_mut().invalidate(),
                _ => {}
            }
        }
        let line = describe(&event);
        debug!(%line, "event");
        self.record(line, log_capacity(session.size().rows));
        Ok(Action::Continue)
    }

    fn on_iteration(&mut self, session: &mut Session<B>) -> n_term::Result<Action> {
        self.paint(session);
        Ok(Action::Continue)
    }
}

/// Rows available to the log.
fn log_capacity(rows: u16) -> usize {
    usize::from(rows.saturating_sub(HEADER_ROWS + 1)).max(1)
}

/// Write `text` on `row` and blank the rest of it.
fn put_line<B: Backend>(session: &mut Session<B>, row: u16, text: &str, attr: Attribute) {
    let cols = session.size().cols;
    let written = session.set_str(row, 0, text, attr);
    for col in written..cols {
        session.set_cell(row, col, ' ', attr);
    }
}

/// One-line description of an event.
#[must_use]
pub fn describe(event: &InputEvent) -> String {
    match event {
        InputEvent::Key(k) => format!("key      {}", k.code),
        InputEvent::Mouse(m) => format!("mouse    {:?} at {},{}", m.flags, m.x, m.y),
        InputEvent::Resize { cols, rows } => format!("resize   {cols}x{rows}"),
        InputEvent::DeviceResponse { raw } => format!("response {}", raw.escape_ascii()),
    }
}

// ─── Ticker ─────────────────────────────────────────────────────────────────

/// Background thread that wakes the loop periodically.
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// # Errors
    ///
    /// The thread could not be spawned.
    pub fn spawn(wake: WakeHandle, count: Arc<AtomicU64>, period: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("ticker".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    count.fetch_add(1, Ordering::Relaxed);
                    if wake.wakeup().is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop and join. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
