//! Streaming data parser and the decoded event types it yields.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::FrameDef;
use crate::headers::LogHeaders;
use crate::wasm::{DataTag, Handle, WasmModule};

/// Decoded field values of one frame, keyed by field name. Sized exactly
/// to the parser's frame definition; iteration order is not meaningful.
pub type FrameFields = HashMap<Arc<str>, i64>;

/// One decoded item from the data section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParserEvent {
    /// A log event without frame data (arming, disarming, sync beeps, ...).
    Event,
    Main(MainFrame),
    Slow(SlowFrame),
    Gps(GpsFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainFrame {
    /// Frame time in fractional seconds.
    pub time: f64,
    pub fields: FrameFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowFrame {
    pub fields: FrameFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFrame {
    /// Frame time in fractional seconds.
    pub time: f64,
    pub fields: FrameFields,
}

/// Number of valid frames seen so far, by kind.
///
/// `gps_home` counts home-position frames the module consumes internally;
/// they never surface as events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounts {
    pub event: u32,
    pub main: u32,
    pub slow: u32,
    pub gps: u32,
    pub gps_home: u32,
}

/// Running parse statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub counts: FrameCounts,
    /// Approximate fraction of the data section consumed, in `[0, 1]`.
    pub progress: f32,
}

/// The three frame definitions a parser interprets incoming frames with.
#[derive(Clone)]
pub(crate) struct ParserFrameDefs {
    pub main: Arc<FrameDef>,
    pub slow: Arc<FrameDef>,
    pub gps: Arc<FrameDef>,
}

/// Single-consumer streaming cursor over one sub-log's data section.
///
/// Each [`next`] call advances the module's cursor by exactly one event.
/// Once the end-of-stream sentinel has been seen the parser is done for
/// good and further calls return `Ok(None)` without touching the module.
///
/// [`next`]: DataParser::next
pub struct DataParser {
    wasm: Rc<RefCell<WasmModule>>,
    handle: Handle<DataTag>,
    headers: Rc<LogHeaders>,
    event_ptr: u32,
    defs: ParserFrameDefs,
    done: Cell<bool>,
}

impl DataParser {
    pub(crate) fn new(
        wasm: Rc<RefCell<WasmModule>>,
        handle: Handle<DataTag>,
        event_ptr: u32,
        defs: ParserFrameDefs,
        headers: Rc<LogHeaders>,
    ) -> Rc<Self> {
        Rc::new(Self {
            wasm,
            handle,
            headers,
            event_ptr,
            defs,
            done: Cell::new(false),
        })
    }

    /// Pull the next event, or `Ok(None)` once the data section is
    /// exhausted.
    pub fn next(&self) -> Result<Option<ParserEvent>> {
        if self.done.get() {
            return Ok(None);
        }

        let raw = self.handle.raw()?;
        let mut wasm = self.wasm.borrow_mut();
        wasm.data_next(raw)?;
        let event = wasm.read_event(self.event_ptr, &self.defs)?;
        if event.is_none() {
            self.done.set(true);
        }
        Ok(event)
    }

    /// Iterate the remaining events. Decode failures end the iteration
    /// after yielding the error.
    pub fn events(&self) -> Events<'_> {
        Events {
            parser: self,
            failed: false,
        }
    }

    /// Running counters; zero before the first pull, final totals once
    /// done. Never advances the cursor.
    pub fn stats(&self) -> Result<Stats> {
        let raw = self.handle.raw()?;
        self.wasm.borrow_mut().data_stats(raw)
    }

    pub fn done(&self) -> bool {
        self.done.get()
    }

    /// The headers this parser was created from.
    pub fn headers(&self) -> &Rc<LogHeaders> {
        &self.headers
    }

    pub fn main_frame_def(&self) -> &Arc<FrameDef> {
        &self.defs.main
    }

    pub fn slow_frame_def(&self) -> &Arc<FrameDef> {
        &self.defs.slow
    }

    pub fn gps_frame_def(&self) -> &Arc<FrameDef> {
        &self.defs.gps
    }

    pub fn free(&self) -> Result<()> {
        self.handle.free()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

/// Iterator adapter over [`DataParser::next`].
pub struct Events<'a> {
    parser: &'a DataParser,
    failed: bool,
}

impl Iterator for Events<'_> {
    type Item = Result<ParserEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.parser.next().transpose() {
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            item => item,
        }
    }
}
