//! Public error type and the internal panic carrier.
//!
//! Script panics are threaded through every instruction handler as the `Err`
//! arm of [`RunResult`]. They unwind through defers, can be cleared by
//! `recover`, and are reified into an [`Error`] only at the top frame.

use std::fmt;

use crate::value::Value;

/// Classification of errors surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed source, a type error, or an unresolved import. No program
    /// is produced.
    Build,
    /// `run` was called with a function name the program does not export.
    Lookup,
    /// An unrecovered script panic: explicit `panic`, division by zero, a
    /// failed type assertion, an out-of-range index, and the like.
    Runtime,
    /// The invocation deadline expired or the context was cancelled.
    Cancelled,
}

/// Error returned by the host-facing API.
///
/// For runtime errors the message is the formatted panic payload; for build
/// errors it carries the source line where the problem was found.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    line: Option<u32>,
}

impl Error {
    pub(crate) fn build(message: impl Into<String>, line: u32) -> Self {
        Self {
            kind: ErrorKind::Build,
            message: message.into(),
            line: Some(line),
        }
    }

    pub(crate) fn lookup(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Lookup,
            message: message.into(),
            line: None,
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            message: message.into(),
            line: None,
        }
    }

    pub(crate) fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: message.into(),
            line: None,
        }
    }

    /// The error's classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message. For runtime errors this is the formatted
    /// panic payload.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source line for build errors, 1-based.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.line) {
            (ErrorKind::Build, Some(line)) => write!(f, "{line}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Error {}

/// An in-flight script panic.
///
/// Carries the panic payload as a runtime value plus a marker for
/// cancellation panics, which map to [`ErrorKind::Cancelled`] at the top
/// frame instead of [`ErrorKind::Runtime`].
#[derive(Debug, Clone)]
pub(crate) struct Panic {
    pub value: Value,
    pub cancelled: bool,
}

impl Panic {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            cancelled: false,
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Value::str(message.into()))
    }

    pub fn cancelled(cause: impl Into<String>) -> Self {
        Self {
            value: Value::str(cause.into()),
            cancelled: true,
        }
    }

    /// Converts an unrecovered panic into the host-facing error.
    pub fn into_error(self) -> Error {
        let message = self.value.to_string();
        if self.cancelled {
            Error::cancelled(message)
        } else {
            Error::runtime(message)
        }
    }
}

/// Result alias used throughout the interpreter.
pub(crate) type RunResult<T> = Result<T, Panic>;
