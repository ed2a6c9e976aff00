//! The worker side: owns the module instance and the real handles.

use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::{mpsc, oneshot};

use blackbox_runtime::{
    DataParser, Error, FrameKind, Loader, LogFile, LogHeaders, Result, TextHeader,
};

use crate::protocol::{DataParserId, HeadersId, Request};

/// Worker-thread entry point. Instantiates its own module, loads the
/// transferred buffer, then serves requests in arrival order until the
/// channel closes or a shutdown arrives.
pub(crate) fn run(
    loader: Loader,
    data: Vec<u8>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    ready: oneshot::Sender<Result<()>>,
) {
    let file = match loader.load_file(&data) {
        Ok(file) => file,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    // The input now lives in module memory; release the host copy.
    drop(data);
    let _ = ready.send(Ok(()));

    let mut state = State {
        file,
        headers: HashMap::new(),
        parsers: Vec::new(),
    };

    while let Some(request) = requests.blocking_recv() {
        if matches!(request, Request::Shutdown) {
            break;
        }
        state.handle(request);
    }

    tracing::debug!("mirror worker shutting down");
    // Dropping the state releases the whole handle tree; replies for any
    // still-queued requests are dropped with it, which the callers observe
    // as `Error::Disconnected`.
}

struct State {
    file: LogFile,
    headers: HashMap<u32, Rc<LogHeaders>>,
    parsers: Vec<Rc<DataParser>>,
}

impl State {
    fn handle(&mut self, request: Request) {
        match request {
            Request::LogCount(reply) => {
                let _ = reply.send(self.file.log_count());
            }
            Request::MemorySize(reply) => {
                let _ = reply.send(Ok(self.file.memory_size()));
            }
            Request::ParseHeaders { index, reply } => {
                let _ = reply.send(self.parse_headers(index));
            }
            Request::FrameDef { id, kind, reply } => {
                let _ = reply.send(self.headers(id).and_then(|headers| match kind {
                    FrameKind::Main => headers.main_frame_def(),
                    FrameKind::Slow => headers.slow_frame_def(),
                    FrameKind::Gps => headers.gps_frame_def(),
                }));
            }
            Request::TextHeader { id, field, reply } => {
                let _ = reply.send(self.headers(id).and_then(|headers| {
                    let text = match field {
                        TextHeader::FirmwareRevision => headers.firmware_revision()?,
                        TextHeader::DebugMode => headers.debug_mode()?,
                        TextHeader::PwmProtocol => headers.pwm_protocol()?,
                    };
                    Ok(text.to_owned())
                }));
            }
            Request::OptionalTextHeader { id, field, reply } => {
                use blackbox_runtime::OptionalTextHeader as Field;
                let _ = reply.send(self.headers(id).and_then(|headers| {
                    let text = match field {
                        Field::BoardInfo => headers.board_info()?,
                        Field::CraftName => headers.craft_name()?,
                    };
                    Ok(text.map(str::to_owned))
                }));
            }
            Request::TextSetHeader { id, field, reply } => {
                use blackbox_runtime::TextSetHeader as Field;
                let _ = reply.send(self.headers(id).and_then(|headers| {
                    let set = match field {
                        Field::DisabledFields => headers.disabled_fields()?,
                        Field::Features => headers.features()?,
                    };
                    Ok(set.clone())
                }));
            }
            Request::FirmwareKind { id, reply } => {
                let _ = reply.send(self.headers(id).and_then(|h| h.firmware_kind()));
            }
            Request::FirmwareDate { id, reply } => {
                let _ = reply.send(
                    self.headers(id)
                        .and_then(|h| Ok(h.firmware_date()?.cloned())),
                );
            }
            Request::FirmwareVersion { id, reply } => {
                let _ = reply.send(self.headers(id).and_then(|h| h.firmware_version()));
            }
            Request::UnknownHeaders { id, reply } => {
                let _ = reply.send(self.headers(id).and_then(|h| Ok(h.unknown()?.clone())));
            }
            Request::NewData { id, filter, reply } => {
                let _ = reply.send(self.new_data(id, filter));
            }
            Request::DataStats { id, reply } => {
                let _ = reply.send(self.parser(id).and_then(|p| p.stats()));
            }
            Request::DataNext { id, reply } => {
                let _ = reply.send(self.parser(id).and_then(|p| p.next()));
            }
            Request::Shutdown => unreachable!("handled by the worker loop"),
        }
    }

    /// Idempotent: the first request for an index materializes the headers
    /// and pins them in the table; repeats return the same id.
    fn parse_headers(&mut self, index: u32) -> Result<Option<HeadersId>> {
        if self.headers.contains_key(&index) {
            return Ok(Some(HeadersId(index)));
        }
        match self.file.parse_headers(index)? {
            Some(headers) => {
                self.headers.insert(index, headers);
                Ok(Some(HeadersId(index)))
            }
            None => Ok(None),
        }
    }

    fn new_data(
        &mut self,
        id: HeadersId,
        filter: Option<blackbox_runtime::FieldFilterSet>,
    ) -> Result<DataParserId> {
        let headers = Rc::clone(self.headers(id)?);
        let parser = headers.get_data_parser(filter)?;
        let parser_id = DataParserId(self.parsers.len() as u32);
        self.parsers.push(parser);
        Ok(parser_id)
    }

    fn headers(&self, id: HeadersId) -> Result<&Rc<LogHeaders>> {
        self.headers
            .get(&id.0)
            .ok_or_else(|| Error::Runtime(format!("headers id {} not initialized", id.0)))
    }

    fn parser(&self, id: DataParserId) -> Result<&Rc<DataParser>> {
        self.parsers
            .get(id.0 as usize)
            .ok_or_else(|| Error::Runtime(format!("data parser id {} not initialized", id.0)))
    }
}
