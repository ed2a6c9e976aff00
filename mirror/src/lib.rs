//! Worker-thread mirror of the blackbox runtime surface.
//!
//! The synchronous runtime is deliberately single-threaded: one module
//! instance is not reentrant. This crate reproduces its entire operation
//! surface from a dedicated worker thread per log file: the worker owns
//! its own module instance and real handles, callers hold facades that
//! speak small integer ids over an mpsc channel. Every call becomes one
//! suspending round trip; requests are served strictly in arrival order.
//!
//! Distinct files get distinct workers (and module instances), so they
//! parse fully in parallel with no shared mutable state.
//!
//! ```no_run
//! # async fn demo(module_bytes: Vec<u8>, log: Vec<u8>) -> blackbox_runtime::Result<()> {
//! use blackbox_mirror::MirrorParser;
//!
//! let parser = MirrorParser::from_bytes(&module_bytes)?;
//! let file = parser.load_file(log).await?;
//! if let Some(headers) = file.parse_headers(0).await? {
//!     let data = headers.get_data_parser(None).await?;
//!     while let Some(event) = data.next().await? {
//!         // feed a plotter, an exporter, ...
//!         let _ = event;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod data;
mod file;
mod headers;
mod protocol;
mod worker;

pub use data::AsyncDataParser;
pub use file::AsyncLogFile;
pub use headers::AsyncLogHeaders;
pub use protocol::{DataParserId, HeadersId};

use tokio::sync::{mpsc, oneshot};

use blackbox_runtime::{Error, Loader, Result};

/// Spawns one mirror worker per loaded file.
#[derive(Clone)]
pub struct MirrorParser {
    loader: Loader,
}

impl MirrorParser {
    /// Compile the decoder module once; workers share the compilation.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        Ok(Self {
            loader: Loader::from_bytes(bytes)?,
        })
    }

    pub fn from_loader(loader: Loader) -> Self {
        Self { loader }
    }

    /// Move `data` into a fresh worker (own thread, own module instance)
    /// and return the calling-side facade once the file is loaded.
    ///
    /// Load failures, including [`Error::AllocationFailed`] and module
    /// parse aborts, surface here, before any facade exists.
    pub async fn load_file(&self, data: Vec<u8>) -> Result<AsyncLogFile> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let loader = self.loader.clone();
        std::thread::Builder::new()
            .name("blackbox-mirror".into())
            .spawn(move || worker::run(loader, data, rx, ready_tx))
            .map_err(|err| Error::Runtime(format!("failed to spawn mirror worker: {err}")))?;

        ready_rx.await.map_err(|_| Error::Disconnected)??;
        Ok(AsyncLogFile::new(tx))
    }
}
