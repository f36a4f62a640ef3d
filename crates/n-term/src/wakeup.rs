// SPDX-License-Identifier: MIT
#![allow(unsafe_code)]
//
// Cross-thread wakeup via the self-pipe trick.
//
// The event loop blocks in poll(2). To interrupt it from another thread
// (or from a signal handler) we keep a pipe whose read end is always in
// the poll set: writing one byte to the write end makes poll return.
// Both ends are non-blocking, so a wakeup never stalls the sender (a full
// pipe already means a wakeup is pending) and draining never stalls the
// loop.
//
// `WakeHandle` is the only thing other threads get. It is a shared handle
// to the write end and nothing else: no access to the loop's state.
//
// Signals use the same pipe. `SignalWake` asks signal-hook to write into
// it when the signal arrives and sets a flag recording which signal it
// was, so a resize interrupts a blocked wait just like `wakeup()` does.
//
// Safety: pipe, fcntl, read and write are called through libc on
// descriptors this module owns (wrapped in `OwnedFd` as soon as they
// exist). Each unsafe block is a single syscall.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::SigId;

/// Bytes read per drain syscall. Any number of pending wakeups collapse
/// into one.
const DRAIN_CHUNK: usize = 64;

// ─── Pipe helpers ───────────────────────────────────────────────────────────

fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // Take ownership first so an fcntl failure below still closes both.
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    for fd in [&read, &write] {
        set_nonblocking_cloexec(fd.as_raw_fd())?;
    }
    Ok((read, write))
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// ─── Waker ──────────────────────────────────────────────────────────────────

/// The loop's end of the self-pipe.
pub struct Waker {
    read: OwnedFd,
    handle: WakeHandle,
}

impl Waker {
    /// # Errors
    ///
    /// The pipe could not be created.
    pub fn new() -> io::Result<Self> {
        let (read, write) = pipe()?;
        Ok(Self {
            read,
            handle: WakeHandle {
                write: Arc::new(write),
            },
        })
    }

    /// Descriptor to include in the poll set.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// A handle other threads can wake the loop with.
    #[must_use]
    pub fn handle(&self) -> WakeHandle {
        self.handle.clone()
    }

    /// Consume every pending wakeup byte. Returns how many there were.
    ///
    /// # Errors
    ///
    /// A read error other than "nothing left".
    pub fn drain(&self) -> io::Result<usize> {
        let mut total = 0;
        let mut buf = [0u8; DRAIN_CHUNK];
        loop {
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n > 0 {
                #[allow(clippy::cast_sign_loss)] // n > 0.
                {
                    total += n as usize;
                }
                continue;
            }
            if n == 0 {
                return Ok(total);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => return Ok(total),
                _ => return Err(err),
            }
        }
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker")
            .field("read", &self.read.as_raw_fd())
            .field("write", &self.handle.write.as_raw_fd())
            .finish()
    }
}

// ─── WakeHandle ─────────────────────────────────────────────────────────────

/// Thread-safe handle that interrupts the loop's blocking wait.
#[derive(Clone)]
pub struct WakeHandle {
    write: Arc<OwnedFd>,
}

impl WakeHandle {
    /// Wake the loop. Lock-free; callable from any thread.
    ///
    /// # Errors
    ///
    /// The pipe is broken (the loop is gone). A full pipe is not an
    /// error: a wakeup is already pending.
    pub fn wakeup(&self) -> io::Result<()> {
        let byte = 1u8;
        loop {
            let n = unsafe {
                libc::write(
                    self.write.as_raw_fd(),
                    (&raw const byte).cast::<libc::c_void>(),
                    1,
                )
            };
            if n >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }
}

impl fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WakeHandle")
            .field(&self.write.as_raw_fd())
            .finish()
    }
}

// ─── SignalWake ─────────────────────────────────────────────────────────────

/// Routes a signal into the self-pipe and remembers that it arrived.
/// Unregistered on drop.
pub struct SignalWake {
    signal: libc::c_int,
    flag: Arc<AtomicBool>,
    ids: [SigId; 2],
}

impl SignalWake {
    /// # Errors
    ///
    /// The signal cannot be handled (e.g. `SIGKILL`) or the pipe could
    /// not be duplicated.
    pub fn register(signal: libc::c_int, handle: &WakeHandle) -> io::Result<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        // Set the flag before the pipe write so the loop sees it once woken.
        let flag_id = signal_hook::flag::register(signal, Arc::clone(&flag))?;
        let write = match handle.write.try_clone() {
            Ok(fd) => fd,
            Err(e) => {
                signal_hook::low_level::unregister(flag_id);
                return Err(e);
            }
        };
        let pipe_id = match signal_hook::low_level::pipe::register(signal, write) {
            Ok(id) => id,
            Err(e) => {
                signal_hook::low_level::unregister(flag_id);
                return Err(e);
            }
        };
        Ok(Self {
            signal,
            flag,
            ids: [flag_id, pipe_id],
        })
    }

    #[must_use]
    pub const fn signal(&self) -> libc::c_int {
        self.signal
    }

    /// Whether the signal arrived since the last call.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

impl Drop for SignalWake {
    fn drop(&mut self) {
        for id in self.ids {
            signal_hook::low_level::unregister(id);
        }
    }
}

impl fmt::Debug for SignalWake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWake")
            .field("signal", &self.signal)
            .field("pending", &self.flag.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::*;

    fn readable(fd: RawFd, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        unsafe { libc::poll(&raw mut pfd, 1, timeout_ms) > 0 }
    }

    #[test]
    fn fresh_waker_is_quiet() {
        let w = Waker::new().unwrap();
        assert!(!readable(w.fd(), 0));
        assert_eq!(w.drain().unwrap(), 0);
    }

    #[test]
    fn wakeup_makes_fd_readable_until_drained() {
        let w = Waker::new().unwrap();
        let h = w.handle();
        h.wakeup().unwrap();
        h.wakeup().unwrap();
        assert!(readable(w.fd(), 0));
        assert_eq!(w.drain().unwrap(), 2);
        assert!(!readable(w.fd(), 0));
    }

    #[test]
    fn wakeup_from_another_thread() {
        let w = Waker::new().unwrap();
        let h = w.handle();
        let start = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            h.wakeup().unwrap();
        });
        assert!(readable(w.fd(), 5_000));
        assert!(start.elapsed() < Duration::from_secs(5));
        t.join().unwrap();
    }

    #[test]
    fn full_pipe_is_not_an_error() {
        let w = Waker::new().unwrap();
        let h = w.handle();
        // Far beyond any pipe buffer.
        for _ in 0..200_000 {
            h.wakeup().unwrap();
        }
        assert!(w.drain().unwrap() > 0);
    }

    #[test]
    fn signal_routes_into_pipe() {
        let w = Waker::new().unwrap();
        let sig = SignalWake::register(libc::SIGWINCH, &w.handle()).unwrap();
        assert_eq!(sig.signal(), libc::SIGWINCH);

        signal_hook::low_level::raise(libc::SIGWINCH).unwrap();
        assert!(readable(w.fd(), 1_000));
        assert!(sig.take());
        assert!(w.drain().unwrap() > 0);
    }

    #[test]
    fn forbidden_signal_is_rejected() {
        let w = Waker::new().unwrap();
        assert!(SignalWake::register(libc::SIGKILL, &w.handle()).is_err());
    }
}
