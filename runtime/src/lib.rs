//! Host-side runtime for the blackbox log decoder WebAssembly module.
//!
//! The module does the byte-level parsing; this crate makes it usable from
//! Rust: it instantiates the module, decodes the wire structures it lays
//! out in linear memory (strings, slices, frame schemas, tagged events),
//! and owns every module-side allocation through typed handles with
//! deterministic release and cascade semantics.
//!
//! The synchronous surface here is single-threaded: one module
//! instance is not reentrant. For parallel, non-blocking parsing use the
//! `blackbox-mirror` crate, which runs one instance per worker thread
//! behind the same operation surface.

pub mod data;
pub mod error;
pub mod file;
pub mod frame;
pub mod headers;
pub mod loader;
pub mod units;

mod wasm;

pub use data::{
    DataParser, Events, FrameCounts, FrameFields, GpsFrame, MainFrame, ParserEvent, SlowFrame,
    Stats,
};
pub use error::{Error, Result};
pub use file::LogFile;
pub use frame::{FieldDef, FieldFilterSet, FrameDef, FrameKind};
pub use headers::{
    FirmwareDate, FirmwareKind, FirmwareVersion, LogHeaders, OptionalTextHeader, TextHeader,
    TextSetHeader,
};
pub use loader::Loader;
pub use units::Unit;
