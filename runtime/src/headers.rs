//! Parsed log headers: firmware metadata, frame definitions, and parser
//! creation.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use chrono::NaiveDateTime;
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::data::{DataParser, ParserFrameDefs};
use crate::error::Result;
use crate::frame::{FieldFilterSet, FrameDef, FrameKind};
use crate::wasm::{FileTag, Handle, HeadersTag, WasmModule};

/// Firmware family that produced the log. Closed set; anything else is a
/// protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirmwareKind {
    Betaflight,
    Inav,
}

impl fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Betaflight => "Betaflight",
            Self::Inav => "INAV",
        })
    }
}

/// Semantic firmware version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Firmware build date: structured when the module could parse the header,
/// otherwise the raw header text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FirmwareDate {
    Utc(NaiveDateTime),
    Raw(String),
}

/// Selector for the plain-string header exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextHeader {
    FirmwareRevision,
    DebugMode,
    PwmProtocol,
}

/// Selector for the optional-string header exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalTextHeader {
    BoardInfo,
    CraftName,
}

/// Selector for the string-set header exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSetHeader {
    DisabledFields,
    Features,
}

/// Headers of one sub-log.
///
/// Every accessor decodes on first access and caches the host-side copy
/// for the lifetime of this object; each decode is a single round trip
/// into the module. Cached values stay readable after [`free`]; only
/// first-time decodes fail once the handle is gone.
///
/// [`free`]: LogHeaders::free
pub struct LogHeaders {
    wasm: Rc<RefCell<WasmModule>>,
    handle: Handle<HeadersTag>,
    parsers: RefCell<Vec<Weak<DataParser>>>,

    main_def: OnceCell<Arc<FrameDef>>,
    slow_def: OnceCell<Arc<FrameDef>>,
    gps_def: OnceCell<Arc<FrameDef>>,

    firmware_revision: OnceCell<String>,
    firmware_kind: OnceCell<FirmwareKind>,
    firmware_date: OnceCell<Option<FirmwareDate>>,
    firmware_version: OnceCell<FirmwareVersion>,
    board_info: OnceCell<Option<String>>,
    craft_name: OnceCell<Option<String>>,
    debug_mode: OnceCell<String>,
    disabled_fields: OnceCell<HashSet<String>>,
    features: OnceCell<HashSet<String>>,
    pwm_protocol: OnceCell<String>,
    unknown: OnceCell<BTreeMap<String, String>>,
}

impl fmt::Debug for LogHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHeaders").finish_non_exhaustive()
    }
}

impl LogHeaders {
    pub(crate) fn new(
        wasm: Rc<RefCell<WasmModule>>,
        file: &Handle<FileTag>,
        index: u32,
    ) -> Result<Rc<Self>> {
        let file_raw = file.raw()?;
        let raw = wasm.borrow_mut().new_headers(file_raw, index)?;
        let handle = Handle::new(raw, Rc::clone(&wasm));

        Ok(Rc::new(Self {
            wasm,
            handle,
            parsers: RefCell::new(Vec::new()),
            main_def: OnceCell::new(),
            slow_def: OnceCell::new(),
            gps_def: OnceCell::new(),
            firmware_revision: OnceCell::new(),
            firmware_kind: OnceCell::new(),
            firmware_date: OnceCell::new(),
            firmware_version: OnceCell::new(),
            board_info: OnceCell::new(),
            craft_name: OnceCell::new(),
            debug_mode: OnceCell::new(),
            disabled_fields: OnceCell::new(),
            features: OnceCell::new(),
            pwm_protocol: OnceCell::new(),
            unknown: OnceCell::new(),
        }))
    }

    pub fn main_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.def(FrameKind::Main, &self.main_def)
    }

    pub fn slow_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.def(FrameKind::Slow, &self.slow_def)
    }

    pub fn gps_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.def(FrameKind::Gps, &self.gps_def)
    }

    pub fn firmware_revision(&self) -> Result<&str> {
        self.text(TextHeader::FirmwareRevision, &self.firmware_revision)
    }

    pub fn firmware_kind(&self) -> Result<FirmwareKind> {
        self.firmware_kind
            .get_or_try_init(|| {
                let raw = self.handle.raw()?;
                self.wasm.borrow_mut().firmware_kind(raw)
            })
            .copied()
    }

    pub fn firmware_date(&self) -> Result<Option<&FirmwareDate>> {
        self.firmware_date
            .get_or_try_init(|| {
                let raw = self.handle.raw()?;
                self.wasm.borrow_mut().firmware_date(raw)
            })
            .map(Option::as_ref)
    }

    pub fn firmware_version(&self) -> Result<FirmwareVersion> {
        self.firmware_version
            .get_or_try_init(|| {
                let raw = self.handle.raw()?;
                self.wasm.borrow_mut().firmware_version(raw)
            })
            .copied()
    }

    pub fn board_info(&self) -> Result<Option<&str>> {
        self.optional_text(OptionalTextHeader::BoardInfo, &self.board_info)
    }

    pub fn craft_name(&self) -> Result<Option<&str>> {
        self.optional_text(OptionalTextHeader::CraftName, &self.craft_name)
    }

    pub fn debug_mode(&self) -> Result<&str> {
        self.text(TextHeader::DebugMode, &self.debug_mode)
    }

    pub fn pwm_protocol(&self) -> Result<&str> {
        self.text(TextHeader::PwmProtocol, &self.pwm_protocol)
    }

    pub fn disabled_fields(&self) -> Result<&HashSet<String>> {
        self.text_set(TextSetHeader::DisabledFields, &self.disabled_fields)
    }

    pub fn features(&self) -> Result<&HashSet<String>> {
        self.text_set(TextSetHeader::Features, &self.features)
    }

    /// Headers the module did not recognize, keyed by header name.
    pub fn unknown(&self) -> Result<&BTreeMap<String, String>> {
        self.unknown.get_or_try_init(|| {
            let raw = self.handle.raw()?;
            self.wasm.borrow_mut().unknown_headers(raw)
        })
    }

    /// Create a streaming parser over this sub-log's data section,
    /// optionally constrained to a subset of fields per frame kind.
    ///
    /// Unfiltered parsers reuse this object's frame definitions unchanged;
    /// filtered parsers carry the narrowed definitions the module reports
    /// for them.
    pub fn get_data_parser(
        self: &Rc<Self>,
        filter: Option<FieldFilterSet>,
    ) -> Result<Rc<DataParser>> {
        let raw = self.handle.raw()?;

        let (data_raw, event_ptr) = self.wasm.borrow_mut().new_data(raw, filter.as_ref())?;
        let handle = Handle::new(data_raw, Rc::clone(&self.wasm));

        let defs = if filter.is_some() {
            let mut wasm = self.wasm.borrow_mut();
            ParserFrameDefs {
                main: Arc::new(wasm.parser_frame_def(data_raw, FrameKind::Main)?),
                slow: Arc::new(wasm.parser_frame_def(data_raw, FrameKind::Slow)?),
                gps: Arc::new(wasm.parser_frame_def(data_raw, FrameKind::Gps)?),
            }
        } else {
            ParserFrameDefs {
                main: self.main_frame_def()?,
                slow: self.slow_frame_def()?,
                gps: self.gps_frame_def()?,
            }
        };

        let parser = DataParser::new(
            Rc::clone(&self.wasm),
            handle,
            event_ptr,
            defs,
            Rc::clone(self),
        );
        self.parsers.borrow_mut().push(Rc::downgrade(&parser));
        Ok(parser)
    }

    /// Release the headers allocation and, first, every live parser
    /// derived from it.
    pub fn free(&self) -> Result<()> {
        for parser in self.parsers.borrow_mut().drain(..) {
            if let Some(parser) = parser.upgrade() {
                parser.free()?;
            }
        }
        self.handle.free()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    fn def(&self, kind: FrameKind, cell: &OnceCell<Arc<FrameDef>>) -> Result<Arc<FrameDef>> {
        cell.get_or_try_init(|| {
            let raw = self.handle.raw()?;
            Ok(Arc::new(self.wasm.borrow_mut().frame_def(raw, kind)?))
        })
        .map(Arc::clone)
    }

    fn text<'a>(&self, which: TextHeader, cell: &'a OnceCell<String>) -> Result<&'a str> {
        cell.get_or_try_init(|| {
            let raw = self.handle.raw()?;
            self.wasm.borrow_mut().text_header(raw, which)
        })
        .map(String::as_str)
    }

    fn optional_text<'a>(
        &self,
        which: OptionalTextHeader,
        cell: &'a OnceCell<Option<String>>,
    ) -> Result<Option<&'a str>> {
        cell.get_or_try_init(|| {
            let raw = self.handle.raw()?;
            self.wasm.borrow_mut().optional_text_header(raw, which)
        })
        .map(Option::as_deref)
    }

    fn text_set<'a>(
        &self,
        which: TextSetHeader,
        cell: &'a OnceCell<HashSet<String>>,
    ) -> Result<&'a HashSet<String>> {
        cell.get_or_try_init(|| {
            let raw = self.handle.raw()?;
            self.wasm.borrow_mut().text_set_header(raw, which)
        })
    }
}
