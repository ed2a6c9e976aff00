//! Error type shared by the whole host surface.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The module reported a parse failure for this log. Not retried; the
    /// caller may skip the offending sub-log and continue with the rest.
    #[error("parse error: {0}")]
    Parse(String),

    /// Unrecognized event discriminant. Signals host/module version skew.
    #[error("invalid parser event kind: {0}")]
    InvalidEventKind(u8),

    /// Unrecognized firmware kind enum value.
    #[error("invalid firmware kind: {0}")]
    InvalidFirmwareKind(u32),

    /// The structured firmware date the module returned does not form a
    /// valid calendar date.
    #[error("invalid firmware date")]
    InvalidDate,

    /// A decoded field array disagrees with its frame definition.
    #[error("frame has {actual} fields, definition expects {expected}")]
    FieldCountMismatch { expected: usize, actual: usize },

    /// A string in module memory was not valid UTF-8.
    #[error("invalid UTF-8 in module memory: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Null pointer where a required string was expected.
    #[error("null string pointer")]
    NullString,

    /// A (offset,length) pair points outside the module's linear memory.
    #[error("out-of-bounds read at {offset:#x} (len {len})")]
    OutOfBounds { offset: u32, len: usize },

    /// The backing module allocation was already released.
    #[error("{0} has been freed")]
    UseAfterFree(&'static str),

    /// The module could not allocate room for the input data.
    #[error("module failed to allocate {0} bytes")]
    AllocationFailed(usize),

    /// The module does not expose a required export (or its signature does
    /// not match the pinned ABI).
    #[error("missing or mis-typed module export: {0}")]
    MissingExport(&'static str),

    /// Instantiation failure or a trap that did not originate from a typed
    /// host error.
    #[error("module runtime error: {0}")]
    Runtime(String),

    /// The mirror worker is gone; the call was abandoned.
    #[error("mirror worker disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Recover the typed error from a wasmtime trap. Host imports raise
    /// `Error` through `anyhow`; anything else (genuine traps, instantiation
    /// failures) is wrapped as `Runtime`.
    pub(crate) fn from_wasm(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => err
                .chain()
                .find_map(|cause| cause.downcast_ref::<Error>().cloned())
                .unwrap_or_else(|| Error::Runtime(format!("{err:#}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_survives_anyhow_roundtrip() {
        let err = anyhow::Error::new(Error::Parse("bad frame".into()));
        let err = err.context("while calling data_next");
        match Error::from_wasm(err) {
            Error::Parse(msg) => assert_eq!(msg, "bad frame"),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn foreign_error_becomes_runtime() {
        let err = anyhow::anyhow!("wasm trap: unreachable");
        match Error::from_wasm(err) {
            Error::Runtime(msg) => assert!(msg.contains("unreachable")),
            other => panic!("expected Runtime, got {other:?}"),
        }
    }
}
