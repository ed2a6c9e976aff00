//! Calling-side log file facade.

use tokio::sync::mpsc;

use blackbox_runtime::Result;

use crate::headers::AsyncLogHeaders;
use crate::protocol::{call, Request};

/// Mirror of [`blackbox_runtime::LogFile`]; every operation is one
/// suspending round trip to the worker.
pub struct AsyncLogFile {
    tx: mpsc::UnboundedSender<Request>,
}

impl AsyncLogFile {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>) -> Self {
        Self { tx }
    }

    pub async fn log_count(&self) -> Result<u32> {
        call(&self.tx, Request::LogCount).await
    }

    pub async fn memory_size(&self) -> Result<usize> {
        call(&self.tx, Request::MemorySize).await
    }

    /// Parse the headers of sub-log `index`. Out-of-range is `Ok(None)`.
    ///
    /// The worker table is idempotent: repeated requests for the same index
    /// yield the same id.
    pub async fn parse_headers(&self, index: u32) -> Result<Option<AsyncLogHeaders>> {
        let id = call(&self.tx, |reply| Request::ParseHeaders { index, reply }).await?;
        Ok(id.map(|id| AsyncLogHeaders::new(self.tx.clone(), id)))
    }

    /// Tear down the worker. Outstanding and later calls on any facade of
    /// this file resolve with [`blackbox_runtime::Error::Disconnected`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
    }
}
