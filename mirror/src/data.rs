//! Calling-side data parser facade.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use blackbox_runtime::{ParserEvent, Result, Stats};

use crate::protocol::{call, DataParserId, Request};

/// Mirror of [`blackbox_runtime::DataParser`]: one suspending round trip
/// per event. Single-consumer, like its synchronous counterpart.
pub struct AsyncDataParser {
    tx: mpsc::UnboundedSender<Request>,
    id: DataParserId,
    done: AtomicBool,
}

impl AsyncDataParser {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>, id: DataParserId) -> Self {
        Self {
            tx,
            id,
            done: AtomicBool::new(false),
        }
    }

    /// The worker-side id backing this facade.
    pub fn id(&self) -> DataParserId {
        self.id
    }

    /// Pull the next event. Once the stream is exhausted this returns
    /// `Ok(None)` locally, without another round trip.
    pub async fn next(&self) -> Result<Option<ParserEvent>> {
        if self.done.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let id = self.id;
        let event = call(&self.tx, |reply| Request::DataNext { id, reply }).await?;
        if event.is_none() {
            self.done.store(true, Ordering::Relaxed);
        }
        Ok(event)
    }

    pub async fn stats(&self) -> Result<Stats> {
        let id = self.id;
        call(&self.tx, |reply| Request::DataStats { id, reply }).await
    }

    pub fn done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}
