// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// TTY backend: the real terminal on stdin/stdout.
//
// `init` refuses anything that is not an interactive terminal, detects the
// colour depth from the environment, enters raw mode via termios, switches
// to the alternate screen, hides the cursor and turns on SGR any-event
// mouse reporting. `shutdown` undoes all of it in reverse. Both are also
// reached from `Drop`, and a panic hook restores the terminal even when
// nothing gets to unwind.
//
// The panic hook bypasses Rust's stdout lock and writes a pre-built
// restore sequence straight to fd 1: the panic may have happened while
// the lock was held mid-frame. Then it restores termios from a global
// backup and hands over to the previous hook, so the message prints to a
// working terminal.
//
// Input is a non-owning `FdSource` over stdin: poll(2) with the caller's
// timeout, then read(2) into a 4 KB buffer. Output accumulates in an
// `OutputBuffer` through a `CellWriter` and leaves in one write per
// frame, wrapped in synchronized-output markers.
//
// Safety: termios (tcgetattr/tcsetattr), ioctl(TIOCGWINSZ), isatty, poll,
// read and the emergency write are libc calls on the process's own
// standard descriptors. Each unsafe block is one of those calls.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::sync::{Mutex, Once};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ansi::{self, MouseMode};
use crate::backend::{Backend, Capabilities, CursorVisibility};
use crate::cell::Attr;
use crate::color::{CellColor, ColorDepth, PairId};
use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::event::Size;
use crate::output::{CellWriter, OutputBuffer, Pen};
use crate::source::ByteSource;

/// Sized for typical terminal input: a keypress is 1-6 bytes, a paste can
/// be kilobytes.
const READ_BUF_SIZE: usize = 4096;

// ─── Environment ────────────────────────────────────────────────────────────

/// Refuse terminals that cannot be driven.
///
/// # Errors
///
/// `Error::Unsupported` when not attached to a TTY or when `TERM` is unset,
/// empty or `dumb`.
pub fn check_supported(is_tty: bool, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if !is_tty {
        return Err(Error::Unsupported("stdin/stdout is not a terminal".into()));
    }
    match lookup("TERM").as_deref().map(str::trim) {
        None | Some("") => Err(Error::Unsupported("TERM is not set".into())),
        Some("dumb") => Err(Error::Unsupported("TERM=dumb".into())),
        Some(_) => Ok(()),
    }
}

/// Colour depth and mouse support from `COLORTERM`, `TERM` and `NO_COLOR`.
#[must_use]
pub fn detect_capabilities(lookup: impl Fn(&str) -> Option<String>) -> Capabilities {
    let term = lookup("TERM").unwrap_or_default();
    let colorterm = lookup("COLORTERM").unwrap_or_default().to_ascii_lowercase();

    let depth = if lookup("NO_COLOR").is_some_and(|v| !v.is_empty()) {
        ColorDepth::Mono
    } else if colorterm == "truecolor" || colorterm == "24bit" {
        ColorDepth::TrueColor
    } else if term.contains("256color") {
        ColorDepth::Ansi256
    } else {
        ColorDepth::Ansi16
    };
    let mouse = !term.starts_with("linux");
    debug!(term, colorterm, %depth, mouse, "detected capabilities");
    Capabilities::new(depth, mouse)
}

/// Query the size of stdout via `ioctl(TIOCGWINSZ)`.
///
/// # Errors
///
/// The ioctl failed or reported a zero dimension.
pub fn terminal_size() -> io::Result<Size> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &raw mut ws) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if ws.ws_col == 0 || ws.ws_row == 0 {
        return Err(io::Error::other("terminal reported a zero size"));
    }
    Ok(Size::new(ws.ws_col, ws.ws_row))
}

/// Whether both stdin and stdout are terminals.
#[must_use]
pub fn is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 && libc::isatty(libc::STDOUT_FILENO) != 0 }
}

// ─── Panic-Safe Restore ─────────────────────────────────────────────────────

/// Copy of the original termios for the panic hook, which cannot reach the
/// backend.
static TERMIOS_BACKUP: Mutex<Option<libc::termios>> = Mutex::new(None);

fn restore_termios_from_backup() {
    if let Ok(guard) = TERMIOS_BACKUP.lock() {
        if let Some(ref original) = *guard {
            unsafe {
                let _ = libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
            }
        }
    }
}

/// Everything `init` may have turned on, turned off. Leaving the alternate
/// screen goes last so the shell comes back clean.
#[rustfmt::skip]
const EMERGENCY_RESTORE: &[u8] = b"\
    \x1b[?2026l\
    \x1b[?1006l\x1b[?1003l\x1b[?1002l\x1b[?1000l\
    \x1b[0m\
    \x1b[?12l\
    \x1b[?25h\
    \x1b[?1049l";

static PANIC_HOOK_INSTALLED: Once = Once::new();

fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            emergency_restore();
            restore_termios_from_backup();
            original(info);
        }));
    });
}

fn emergency_restore() {
    unsafe {
        let _ = libc::write(
            libc::STDOUT_FILENO,
            EMERGENCY_RESTORE.as_ptr().cast::<libc::c_void>(),
            EMERGENCY_RESTORE.len(),
        );
    }
}

// ─── Raw Mode ───────────────────────────────────────────────────────────────

fn enable_raw_mode(fd: RawFd) -> io::Result<libc::termios> {
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &raw mut termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let original = termios;
    if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
        *guard = Some(original);
    }

    // cfmakeraw equivalent.
    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw const termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(original)
}

fn restore_raw_mode(fd: RawFd, original: &libc::termios) -> io::Result<()> {
    if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, original) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if let Ok(mut guard) = TERMIOS_BACKUP.lock() {
        *guard = None;
    }
    Ok(())
}

// ─── FdSource ───────────────────────────────────────────────────────────────

/// Buffered byte source over a descriptor it does not own.
pub struct FdSource {
    fd: RawFd,
    buf: Box<[u8; READ_BUF_SIZE]>,
    pos: usize,
    len: usize,
}

impl FdSource {
    #[must_use]
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            buf: Box::new([0; READ_BUF_SIZE]),
            pos: 0,
            len: 0,
        }
    }

    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bytes read from the descriptor but not yet handed out.
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.len - self.pos
    }

    /// Wait for readability. `Ok(false)` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ms = poll_timeout_ms(timeout);
        loop {
            let rc = unsafe { libc::poll(&raw mut pfd, 1, ms) };
            if rc >= 0 {
                return Ok(rc > 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        loop {
            let n = unsafe {
                libc::read(
                    self.fd,
                    self.buf.as_mut_ptr().cast::<libc::c_void>(),
                    READ_BUF_SIZE,
                )
            };
            if n > 0 {
                #[allow(clippy::cast_sign_loss)] // n > 0.
                {
                    self.len = n as usize;
                }
                self.pos = 0;
                return Ok(());
            }
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "terminal input closed",
                ));
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl ByteSource for FdSource {
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>> {
        if self.pos == self.len {
            if !self.wait(timeout)? {
                return Ok(None);
            }
            self.fill()?;
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }
}

impl fmt::Debug for FdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdSource")
            .field("fd", &self.fd)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// poll(2) timeout in milliseconds, rounded up so a short wait never
/// becomes a non-blocking check.
fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    timeout.map_or(-1, |d| {
        let ms = d.as_nanos().div_ceil(1_000_000);
        libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
    })
}

// ─── TtyBackend ─────────────────────────────────────────────────────────────

/// The controlling terminal.
///
/// ```no_run
/// use n_term::config::DriverConfig;
/// use n_term::tty::TtyBackend;
///
/// let backend = TtyBackend::new(&DriverConfig::from_env()?);
/// // Hand it to `Session::new` or `Driver::new`; the terminal is restored
/// // when it is dropped.
/// # Ok::<(), n_term::error::Error>(())
/// ```
pub struct TtyBackend {
    want_mouse: bool,
    caps: Capabilities,
    input: FdSource,
    out: OutputBuffer,
    writer: CellWriter,
    pairs: HashMap<PairId, (CellColor, CellColor)>,
    original_termios: Option<libc::termios>,
    active: bool,
}

impl TtyBackend {
    /// Does not touch the terminal until `init`.
    #[must_use]
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            want_mouse: config.mouse,
            caps: Capabilities::default(),
            input: FdSource::new(libc::STDIN_FILENO),
            out: OutputBuffer::new(),
            writer: CellWriter::new(),
            pairs: HashMap::new(),
            original_termios: None,
            active: false,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    fn enter(&mut self) -> io::Result<()> {
        install_panic_hook();
        self.original_termios = Some(enable_raw_mode(libc::STDIN_FILENO)?);

        let out = &mut self.out;
        ansi::enter_alt_screen(out)?;
        ansi::cursor_hide(out)?;
        ansi::reset(out)?;
        ansi::clear_screen(out)?;
        if self.caps.mouse {
            ansi::enable_mouse(out, MouseMode::Motion)?;
        }
        self.out.flush_to(&mut io::stdout().lock())
    }

    fn leave(&mut self) -> io::Result<()> {
        self.out.clear();
        let out = &mut self.out;
        ansi::end_sync(out)?;
        if self.caps.mouse {
            ansi::disable_mouse(out)?;
        }
        ansi::reset(out)?;
        ansi::cursor_blink(out, false)?;
        ansi::cursor_show(out)?;
        ansi::exit_alt_screen(out)?;
        let written = self.out.flush_to(&mut io::stdout().lock());

        let restored = match self.original_termios.take() {
            Some(original) => restore_raw_mode(libc::STDIN_FILENO, &original),
            None => Ok(()),
        };
        written.and(restored)
    }
}

impl Backend for TtyBackend {
    fn init(&mut self) -> Result<Capabilities> {
        if self.active {
            return Ok(self.caps.clone());
        }
        let lookup = |key: &str| std::env::var(key).ok();
        check_supported(is_tty(), lookup)?;

        let mut caps = detect_capabilities(lookup);
        caps.mouse &= self.want_mouse;
        self.caps = caps;

        if let Err(e) = self.enter() {
            let _ = self.leave();
            return Err(e.into());
        }
        self.active = true;
        info!(caps = %self.caps, "terminal entered");
        Ok(self.caps.clone())
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.leave()?;
        debug!("terminal restored");
        Ok(())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn input(&mut self) -> &mut dyn ByteSource {
        &mut self.input
    }

    fn input_fd(&self) -> Option<RawFd> {
        Some(self.input.fd())
    }

    fn size(&self) -> io::Result<Size> {
        terminal_size()
    }

    fn define_pair(&mut self, pair: PairId, fg: CellColor, bg: CellColor) -> io::Result<()> {
        self.pairs.insert(pair, (fg, bg));
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
        let (fg, bg) = self.pairs.get(&pair).copied().unwrap_or_else(|| {
            if pair != PairId::DEFAULT {
                warn!(?pair, "cell written with an undefined pair");
            }
            (CellColor::Default, CellColor::Default)
        });
        self.writer
            .put(&mut self.out, x, y, text, &Pen { fg, bg, style });
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        ansi::reset(&mut self.out)?;
        ansi::clear_screen(&mut self.out)?;
        self.writer.reset_state();
        Ok(())
    }

    fn set_cursor(&mut self, x: u16, y: u16) -> io::Result<()> {
        ansi::cursor_to(&mut self.out, x, y)?;
        self.writer.cursor_moved();
        Ok(())
    }

    fn set_cursor_visibility(&mut self, visibility: CursorVisibility) -> io::Result<()> {
        let out = &mut self.out;
        match visibility {
            CursorVisibility::Hidden => ansi::cursor_hide(out),
            CursorVisibility::Visible => {
                ansi::cursor_blink(out, false)?;
                ansi::cursor_show(out)
            }
            CursorVisibility::VeryVisible => {
                ansi::cursor_blink(out, true)?;
                ansi::cursor_show(out)
            }
        }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        ansi::end_sync(&mut self.out)?;
        let mut stdout = io::stdout().lock();
        ansi::begin_sync(&mut stdout)?;
        let written = self.out.flush_to(&mut stdout);
        if written.is_err() {
            self.out.clear();
        }
        written
    }
}

impl Drop for TtyBackend {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for TtyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtyBackend")
            .field("caps", &self.caps)
            .field("active", &self.active)
            .field("pairs", &self.pairs.len())
            .field("pending_output", &self.out.len())
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_owned())
        }
    }

    // ── Support check ───────────────────────────────────────────────────

    #[test]
    fn not_a_tty_is_unsupported() {
        let err = check_supported(false, env(&[("TERM", "xterm")])).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn dumb_or_missing_term_is_unsupported() {
        for lookup in [env(&[("TERM", "dumb")]), env(&[("TERM", " ")]), env(&[])] {
            assert!(matches!(
                check_supported(true, lookup),
                Err(Error::Unsupported(_))
            ));
        }
        assert!(check_supported(true, env(&[("TERM", "xterm-256color")])).is_ok());
    }

    // ── Capability detection ────────────────────────────────────────────

    #[test]
    fn colorterm_selects_truecolor() {
        for value in ["truecolor", "24bit", "TrueColor"] {
            let lookup = move |key: &str| match key {
                "TERM" => Some("xterm".to_owned()),
                "COLORTERM" => Some(value.to_owned()),
                _ => None,
            };
            assert_eq!(detect_capabilities(lookup).color_depth, ColorDepth::TrueColor);
        }
    }

    #[test]
    fn term_selects_256_or_16() {
        let caps = detect_capabilities(env(&[("TERM", "screen-256color")]));
        assert_eq!(caps.color_depth, ColorDepth::Ansi256);
        let caps = detect_capabilities(env(&[("TERM", "xterm")]));
        assert_eq!(caps.color_depth, ColorDepth::Ansi16);
    }

    #[test]
    fn no_color_wins() {
        let caps = detect_capabilities(env(&[
            ("TERM", "xterm-256color"),
            ("COLORTERM", "truecolor"),
            ("NO_COLOR", "1"),
        ]));
        assert_eq!(caps.color_depth, ColorDepth::Mono);
        // An empty NO_COLOR does not count.
        let caps = detect_capabilities(env(&[("TERM", "xterm"), ("NO_COLOR", "")]));
        assert_eq!(caps.color_depth, ColorDepth::Ansi16);
    }

    #[test]
    fn linux_console_has_no_mouse() {
        assert!(!detect_capabilities(env(&[("TERM", "linux")])).mouse);
        assert!(detect_capabilities(env(&[("TERM", "xterm-kitty")])).mouse);
    }

    #[test]
    fn version_is_unknown_until_asked() {
        assert_eq!(detect_capabilities(env(&[("TERM", "xterm")])).version, None);
    }

    // ── Restore sequence ────────────────────────────────────────────────

    #[test]
    fn emergency_restore_exits_alt_screen_last() {
        let s = std::str::from_utf8(EMERGENCY_RESTORE).unwrap();
        assert!(s.ends_with("\x1b[?1049l"));
        for seq in ["\x1b[?1006l", "\x1b[?1003l", "\x1b[?25h", "\x1b[0m"] {
            assert!(s.contains(seq), "missing {seq:?}");
        }
    }

    #[test]
    fn mouse_disable_precedes_alt_screen_exit() {
        let s = std::str::from_utf8(EMERGENCY_RESTORE).unwrap();
        assert!(s.find("\x1b[?1003l").unwrap() < s.find("\x1b[?1049l").unwrap());
    }

    // ── FdSource ────────────────────────────────────────────────────────

    #[test]
    fn fd_source_reads_buffered_bytes() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut src = FdSource::new(rx.as_raw_fd());
        tx.write_all(b"ab").unwrap();
        assert_eq!(src.read_byte(Some(Duration::from_secs(1))).unwrap(), Some(b'a'));
        assert_eq!(src.buffered(), 1);
        assert_eq!(src.read_byte(Some(Duration::ZERO)).unwrap(), Some(b'b'));
    }

    #[test]
    fn fd_source_times_out() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let mut src = FdSource::new(rx.as_raw_fd());
        assert_eq!(src.read_byte(Some(Duration::ZERO)).unwrap(), None);
        assert_eq!(src.read_byte(Some(Duration::from_millis(5))).unwrap(), None);
    }

    #[test]
    fn fd_source_eof_is_unexpected_eof() {
        let (tx, rx) = UnixStream::pair().unwrap();
        let mut src = FdSource::new(rx.as_raw_fd());
        drop(tx);
        let err = src.read_byte(Some(Duration::from_secs(1))).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(Error::from(err).is_eof());
    }

    #[test]
    fn poll_timeout_rounds_up() {
        assert_eq!(poll_timeout_ms(None), -1);
        assert_eq!(poll_timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(poll_timeout_ms(Some(Duration::from_millis(10))), 10);
    }

    // ── Backend without a terminal ──────────────────────────────────────

    #[test]
    fn new_backend_is_inactive_and_shutdown_is_noop() {
        let mut b = TtyBackend::new(&DriverConfig::default());
        assert!(!b.is_active());
        b.shutdown().unwrap();
        assert_eq!(b.input_fd(), Some(libc::STDIN_FILENO));
    }

    #[test]
    fn undefined_pair_falls_back_to_default_colours() {
        let mut b = TtyBackend::new(&DriverConfig::default());
        b.write_cell(0, 0, "x", PairId::DEFAULT, Attr::empty()).unwrap();
        let out = String::from_utf8(b.out.as_bytes().to_vec()).unwrap();
        assert!(out.ends_with("\x1b[39m\x1b[49mx"), "{out:?}");
        b.out.clear();
    }
}
