// SPDX-License-Identifier: MIT
//
// Crate-wide error type.
//
// Only environment-level failures become errors: a terminal that cannot
// be driven, a write that did not reach it, a malformed override in the
// environment, or an application callback reporting failure. Decoder
// ambiguity and malformed input sequences are resolved locally and never
// surface here.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while driving a terminal.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic OS failure (poll, pipe, termios, size probe).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The backend refused to initialize: not a TTY, `TERM=dumb`, or a
    /// required capability is missing. Fatal at startup.
    #[error("terminal not supported: {0}")]
    Unsupported(String),

    /// Output could not be delivered to the terminal (broken pipe,
    /// detached terminal). Fatal for the session, never retried.
    #[error("terminal write failed: {0}")]
    Write(#[source] io::Error),

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    Config {
        /// Environment variable name.
        key: &'static str,
        /// The offending raw value.
        value: String,
    },

    /// Application-level failure reported by an event loop callback.
    /// The loop propagates it untouched.
    #[error("{0}")]
    Callback(String),
}

impl Error {
    /// Whether this error ends the session (as opposed to a recoverable
    /// callback failure the application may choose to ignore).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::Write(_) | Self::Io(_))
    }

    /// The input stream ended (terminal closed).
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Crate result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn write_error_keeps_source() {
        use std::error::Error as _;
        let err = Error::Write(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "terminal write failed: pipe");
    }

    #[test]
    fn config_error_message_names_key() {
        let err = Error::Config {
            key: "N_TERM_ESC_TIMEOUT_MS",
            value: "abc".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"abc\" for N_TERM_ESC_TIMEOUT_MS"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn eof_is_recognised() {
        assert!(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)).is_eof());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_eof());
        assert!(!Error::Callback("x".into()).is_eof());
    }

    #[test]
    fn callback_error_is_not_fatal() {
        assert!(!Error::Callback("boom".into()).is_fatal());
    }
}
