//! Decoders for the compound structures the module lays out in linear
//! memory: string slices, unknown-header pairs, frame definitions, field
//! arrays, and the tagged event record.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::data::{FrameFields, GpsFrame, MainFrame, ParserEvent, ParserFrameDefs, SlowFrame};
use crate::error::{Error, Result};
use crate::frame::{FieldDef, FieldFilterSet, FrameDef, FrameKind};
use crate::units::Unit;
use crate::wasm::WasmModule;

/// Stride of one field descriptor: name (len, ptr), signedness byte, unit
/// byte, two bytes of padding.
const FIELD_DEF_STRIDE: u32 = 12;

/// Event payloads start at this alignment past the discriminant byte.
const EVENT_DATA_ALIGN: u32 = 8;

impl WasmModule {
    /// Materialize a slice of string records (stride 8), then release the
    /// module-owned scratch slice exactly once.
    pub(crate) fn read_str_slice(&mut self, len: u32, ptr: u32) -> Result<HashSet<String>> {
        let mut out = HashSet::with_capacity(len as usize);
        if len == 0 || ptr == 0 {
            return Ok(out);
        }

        for i in 0..len {
            let record = ptr + i * 8;
            let str_len = self.read_u32(record)?;
            let str_ptr = self.read_u32(record + 4)?;
            out.insert(self.read_str(str_len, str_ptr)?);
        }

        self.exports
            .slice_str_free
            .call(&mut self.store, (len, ptr))
            .map_err(Error::from_wasm)?;
        Ok(out)
    }

    /// Headers the module did not recognize, as key/value pairs (stride 16).
    pub(crate) fn unknown_headers(&mut self, headers: u32) -> Result<BTreeMap<String, String>> {
        let (len, ptr) = self
            .exports
            .headers_unknown
            .call(&mut self.store, headers)
            .map_err(Error::from_wasm)?;

        let mut out = BTreeMap::new();
        if len == 0 || ptr == 0 {
            return Ok(out);
        }

        for i in 0..len {
            let record = ptr + i * 16;
            let key_len = self.read_u32(record)?;
            let key_ptr = self.read_u32(record + 4)?;
            let value_len = self.read_u32(record + 8)?;
            let value_ptr = self.read_u32(record + 12)?;
            out.insert(
                self.read_str(key_len, key_ptr)?,
                self.read_str(value_len, value_ptr)?,
            );
        }

        self.exports
            .unknown_headers_free
            .call(&mut self.store, (len, ptr))
            .map_err(Error::from_wasm)?;
        Ok(out)
    }

    /// Decode one frame definition from the headers.
    pub(crate) fn frame_def(&mut self, headers: u32, kind: FrameKind) -> Result<FrameDef> {
        let func = match kind {
            FrameKind::Main => self.exports.headers_main_def,
            FrameKind::Slow => self.exports.headers_slow_def,
            FrameKind::Gps => self.exports.headers_gps_def,
        };
        let record = func.call(&mut self.store, headers).map_err(Error::from_wasm)?;
        self.read_frame_def(record)
    }

    /// Decode one frame definition from a parser. Differs from the headers
    /// defs when the parser was created with a field filter.
    pub(crate) fn parser_frame_def(&mut self, parser: u32, kind: FrameKind) -> Result<FrameDef> {
        let func = match kind {
            FrameKind::Main => self.exports.data_main_def,
            FrameKind::Slow => self.exports.data_slow_def,
            FrameKind::Gps => self.exports.data_gps_def,
        };
        let record = func.call(&mut self.store, parser).map_err(Error::from_wasm)?;
        self.read_frame_def(record)
    }

    fn read_frame_def(&mut self, record: u32) -> Result<FrameDef> {
        let len = self.read_u32(record)?;
        let ptr = self.read_u32(record + 4)?;

        let mut fields = Vec::with_capacity(len as usize);
        if ptr != 0 {
            for i in 0..len {
                let descriptor = ptr + i * FIELD_DEF_STRIDE;
                let name_len = self.read_u32(descriptor)?;
                let name_ptr = self.read_u32(descriptor + 4)?;
                let name: Arc<str> = self.read_str(name_len, name_ptr)?.into();
                let signed = self.read_u8(descriptor + 8)? != 0;
                let unit = Unit::from_raw(self.read_u8(descriptor + 9)?);
                fields.push(FieldDef { name, signed, unit });
            }
        }

        self.exports
            .frame_def_free
            .call(&mut self.store, record)
            .map_err(Error::from_wasm)?;
        Ok(FrameDef::new(fields))
    }

    /// Create a parser cursor, optionally constrained by a field filter.
    /// Returns the parser handle and its fixed event-result offset.
    pub(crate) fn new_data(
        &mut self,
        headers: u32,
        filter: Option<&FieldFilterSet>,
    ) -> Result<(u32, u32)> {
        let builder = match filter {
            None => 0,
            Some(filter) => self.build_filter(filter)?,
        };
        self.exports
            .data_new
            .call(&mut self.store, (headers, builder))
            .map_err(Error::from_wasm)
    }

    /// Write the requested field names into a request-scoped scratch arena
    /// and register each with the filter builder. The builder is consumed
    /// by `data_new`; the host never retains arena offsets.
    fn build_filter(&mut self, filter: &FieldFilterSet) -> Result<u32> {
        fn count(names: &Option<Vec<String>>) -> i32 {
            names.as_ref().map_or(-1, |names| names.len() as i32)
        }

        let (builder, arena) = self
            .exports
            .filter_new
            .call(
                &mut self.store,
                (
                    filter.arena_size() as u32,
                    count(&filter.main),
                    count(&filter.slow),
                    count(&filter.gps),
                ),
            )
            .map_err(Error::from_wasm)?;

        let mut cursor = arena;
        let kinds = [
            (&filter.main, self.exports.filter_main),
            (&filter.slow, self.exports.filter_slow),
            (&filter.gps, self.exports.filter_gps),
        ];
        for (names, push) in kinds {
            let Some(names) = names else { continue };
            for name in names {
                let bytes = name.as_bytes();
                self.memory
                    .write(&mut self.store, cursor as usize, bytes)
                    .map_err(|_| Error::OutOfBounds {
                        offset: cursor,
                        len: bytes.len(),
                    })?;
                push.call(&mut self.store, (builder, bytes.len() as u32, cursor))
                    .map_err(Error::from_wasm)?;
                cursor += bytes.len() as u32;
            }
        }

        Ok(builder)
    }

    /// Decode the event record at the parser's fixed result offset.
    /// `None` is the end-of-stream sentinel.
    pub(crate) fn read_event(
        &self,
        event_ptr: u32,
        defs: &ParserFrameDefs,
    ) -> Result<Option<ParserEvent>> {
        let kind = self.read_u8(event_ptr)?;
        let start = event_ptr + EVENT_DATA_ALIGN;

        match kind {
            0 => Ok(None),
            1 => Ok(Some(ParserEvent::Event)),
            2 => {
                let time = self.read_f64(start)?;
                let fields = self.read_fields(start + 8, &defs.main)?;
                Ok(Some(ParserEvent::Main(MainFrame { time, fields })))
            }
            3 => {
                let fields = self.read_fields(start, &defs.slow)?;
                Ok(Some(ParserEvent::Slow(SlowFrame { fields })))
            }
            4 => {
                let time = self.read_f64(start)?;
                let fields = self.read_fields(start + 8, &defs.gps)?;
                Ok(Some(ParserEvent::Gps(GpsFrame { time, fields })))
            }
            other => Err(Error::InvalidEventKind(other)),
        }
    }

    /// Field array behind a `(count, ptr)` pair: one 4-byte integer per
    /// definition field, in definition order, sign per field.
    fn read_fields(&self, pair: u32, def: &FrameDef) -> Result<FrameFields> {
        let len = self.read_u32(pair)? as usize;
        let ptr = self.read_u32(pair + 4)?;

        // The module's "no fields" sentinel; also what zero-field defs
        // produce.
        if len == 0 || ptr == 0 {
            return Ok(FrameFields::new());
        }

        if len != def.len() {
            return Err(Error::FieldCountMismatch {
                expected: def.len(),
                actual: len,
            });
        }

        let mut fields = FrameFields::with_capacity(len);
        for (i, field) in def.iter().enumerate() {
            let raw = self.read_u32(ptr + (i as u32) * 4)?;
            let value = if field.signed {
                i64::from(raw as i32)
            } else {
                i64::from(raw)
            };
            fields.insert(Arc::clone(&field.name), value);
        }
        Ok(fields)
    }
}
