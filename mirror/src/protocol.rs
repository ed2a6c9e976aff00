//! Request messages crossing the worker boundary.
//!
//! Callers never see raw module handles; they hold small integer ids.
//! Headers ids are the log index itself (the worker table is idempotent),
//! parser ids index an append-only vector.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use blackbox_runtime::{
    Error, FieldFilterSet, FirmwareDate, FirmwareKind, FirmwareVersion, FrameDef, FrameKind,
    OptionalTextHeader, ParserEvent, Result, Stats, TextHeader, TextSetHeader,
};

/// Identifies one headers object inside a mirror worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadersId(pub(crate) u32);

/// Identifies one data parser inside a mirror worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataParserId(pub(crate) u32);

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Request {
    LogCount(Reply<u32>),
    MemorySize(Reply<usize>),
    ParseHeaders {
        index: u32,
        reply: Reply<Option<HeadersId>>,
    },
    FrameDef {
        id: HeadersId,
        kind: FrameKind,
        reply: Reply<Arc<FrameDef>>,
    },
    TextHeader {
        id: HeadersId,
        field: TextHeader,
        reply: Reply<String>,
    },
    OptionalTextHeader {
        id: HeadersId,
        field: OptionalTextHeader,
        reply: Reply<Option<String>>,
    },
    TextSetHeader {
        id: HeadersId,
        field: TextSetHeader,
        reply: Reply<HashSet<String>>,
    },
    FirmwareKind {
        id: HeadersId,
        reply: Reply<FirmwareKind>,
    },
    FirmwareDate {
        id: HeadersId,
        reply: Reply<Option<FirmwareDate>>,
    },
    FirmwareVersion {
        id: HeadersId,
        reply: Reply<FirmwareVersion>,
    },
    UnknownHeaders {
        id: HeadersId,
        reply: Reply<BTreeMap<String, String>>,
    },
    NewData {
        id: HeadersId,
        filter: Option<FieldFilterSet>,
        reply: Reply<DataParserId>,
    },
    DataStats {
        id: DataParserId,
        reply: Reply<Stats>,
    },
    DataNext {
        id: DataParserId,
        reply: Reply<Option<ParserEvent>>,
    },
    /// Tear the worker down; every outstanding and later call resolves
    /// with [`Error::Disconnected`].
    Shutdown,
}

/// One round trip: enqueue the request, suspend until the worker replies.
pub(crate) async fn call<T>(
    tx: &mpsc::UnboundedSender<Request>,
    make: impl FnOnce(Reply<T>) -> Request,
) -> Result<T> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(make(reply_tx)).map_err(|_| Error::Disconnected)?;
    reply_rx.await.map_err(|_| Error::Disconnected)?
}
