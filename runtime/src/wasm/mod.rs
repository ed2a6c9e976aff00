//! The module instance: export table, linear-memory access, host imports.
//!
//! Everything here speaks the pinned module ABI: compound values come back
//! as wasm multi-value tuples, strings and slices as `(len, ptr)` pairs
//! into linear memory, and the parser event as a tagged record at a fixed
//! result offset. See DESIGN.md for the full layout contract.

mod decode;
mod handle;

pub(crate) use handle::{DataTag, FileTag, Handle, HeadersTag};

use chrono::NaiveDate;
use wasmtime::{Caller, Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use crate::error::{Error, Result};
use crate::headers::{
    FirmwareDate, FirmwareKind, FirmwareVersion, OptionalTextHeader, TextHeader, TextSetHeader,
};

/// One instantiated decoder module: store, memory, and every export
/// resolved up front.
///
/// Not reentrant; every call requires `&mut self` and the whole struct is
/// single-threaded by construction.
pub(crate) struct WasmModule {
    store: Store<()>,
    memory: Memory,
    exports: Exports,
}

impl WasmModule {
    pub(crate) fn instantiate(engine: &Engine, module: &Module) -> Result<Self> {
        let mut store = Store::new(engine, ());

        let mut linker = Linker::new(engine);
        register_imports(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(Error::from_wasm)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(Error::MissingExport("memory"))?;
        let exports = Exports::resolve(&instance, &mut store)?;

        Ok(Self {
            store,
            memory,
            exports,
        })
    }

    /// Current size of the module's linear memory in bytes.
    pub(crate) fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Copy the raw log into module memory and materialize a file handle.
    pub(crate) fn new_file(&mut self, data: &[u8]) -> Result<u32> {
        let ptr = self
            .exports
            .data_alloc
            .call(&mut self.store, data.len() as u32)
            .map_err(Error::from_wasm)?;
        if ptr == 0 {
            return Err(Error::AllocationFailed(data.len()));
        }

        self.memory
            .write(&mut self.store, ptr as usize, data)
            .map_err(|_| Error::OutOfBounds {
                offset: ptr,
                len: data.len(),
            })?;

        self.exports
            .file_new
            .call(&mut self.store, (ptr, data.len() as u32))
            .map_err(Error::from_wasm)
    }

    pub(crate) fn log_count(&mut self, file: u32) -> Result<u32> {
        self.exports
            .file_log_count
            .call(&mut self.store, file)
            .map_err(Error::from_wasm)
    }

    pub(crate) fn new_headers(&mut self, file: u32, index: u32) -> Result<u32> {
        self.exports
            .file_get_headers
            .call(&mut self.store, (file, index))
            .map_err(Error::from_wasm)
    }

    pub(crate) fn free_file(&mut self, raw: u32) -> Result<()> {
        self.exports
            .file_free
            .call(&mut self.store, raw)
            .map_err(Error::from_wasm)
    }

    pub(crate) fn free_headers(&mut self, raw: u32) -> Result<()> {
        self.exports
            .headers_free
            .call(&mut self.store, raw)
            .map_err(Error::from_wasm)
    }

    pub(crate) fn free_data(&mut self, raw: u32) -> Result<()> {
        self.exports
            .data_free
            .call(&mut self.store, raw)
            .map_err(Error::from_wasm)
    }

    pub(crate) fn text_header(&mut self, headers: u32, which: TextHeader) -> Result<String> {
        let func = match which {
            TextHeader::FirmwareRevision => self.exports.headers_firmware_revision,
            TextHeader::DebugMode => self.exports.headers_debug_mode,
            TextHeader::PwmProtocol => self.exports.headers_pwm_protocol,
        };
        let (len, ptr) = func.call(&mut self.store, headers).map_err(Error::from_wasm)?;
        self.read_str(len, ptr)
    }

    pub(crate) fn optional_text_header(
        &mut self,
        headers: u32,
        which: OptionalTextHeader,
    ) -> Result<Option<String>> {
        let func = match which {
            OptionalTextHeader::BoardInfo => self.exports.headers_board_info,
            OptionalTextHeader::CraftName => self.exports.headers_craft_name,
        };
        let (len, ptr) = func.call(&mut self.store, headers).map_err(Error::from_wasm)?;
        if ptr == 0 {
            return Ok(None);
        }
        self.read_str(len, ptr).map(Some)
    }

    pub(crate) fn firmware_kind(&mut self, headers: u32) -> Result<FirmwareKind> {
        let raw = self
            .exports
            .headers_firmware_kind
            .call(&mut self.store, headers)
            .map_err(Error::from_wasm)?;
        match raw {
            0 => Ok(FirmwareKind::Betaflight),
            1 => Ok(FirmwareKind::Inav),
            other => Err(Error::InvalidFirmwareKind(other)),
        }
    }

    pub(crate) fn firmware_version(&mut self, headers: u32) -> Result<FirmwareVersion> {
        let (major, minor, patch) = self
            .exports
            .headers_firmware_version
            .call(&mut self.store, headers)
            .map_err(Error::from_wasm)?;
        Ok(FirmwareVersion {
            major,
            minor,
            patch,
        })
    }

    /// Decode the firmware build date record: absent, a structured
    /// date-time, or the raw header string when the module could not parse
    /// it.
    pub(crate) fn firmware_date(&mut self, headers: u32) -> Result<Option<FirmwareDate>> {
        let (discriminant, year, month, day, hour, minute, second, millisecond) = self
            .exports
            .headers_firmware_date
            .call(&mut self.store, headers)
            .map_err(Error::from_wasm)?;

        match discriminant {
            0 => Ok(None),
            1 => {
                let date = NaiveDate::from_ymd_opt(year, month, day)
                    .and_then(|d| d.and_hms_milli_opt(hour, minute, second, millisecond))
                    .ok_or(Error::InvalidDate)?;
                Ok(Some(FirmwareDate::Utc(date)))
            }
            // Raw fallback reuses the first two payload slots as (len, ptr).
            2 => {
                let raw = self.read_str(year as u32, month)?;
                Ok(Some(FirmwareDate::Raw(raw)))
            }
            other => Err(Error::Runtime(format!(
                "invalid firmware date discriminant: {other}"
            ))),
        }
    }

    pub(crate) fn text_set_header(
        &mut self,
        headers: u32,
        which: TextSetHeader,
    ) -> Result<std::collections::HashSet<String>> {
        let func = match which {
            TextSetHeader::DisabledFields => self.exports.headers_disabled_fields,
            TextSetHeader::Features => self.exports.headers_features,
        };
        let (len, ptr) = func.call(&mut self.store, headers).map_err(Error::from_wasm)?;
        self.read_str_slice(len, ptr)
    }

    pub(crate) fn data_stats(&mut self, parser: u32) -> Result<crate::data::Stats> {
        let (event, main, slow, gps, gps_home, progress) = self
            .exports
            .data_stats
            .call(&mut self.store, parser)
            .map_err(Error::from_wasm)?;
        Ok(crate::data::Stats {
            counts: crate::data::FrameCounts {
                event,
                main,
                slow,
                gps,
                gps_home,
            },
            progress,
        })
    }

    /// Advance the streaming cursor by one event. The result lands at the
    /// parser's fixed event offset and is decoded separately.
    pub(crate) fn data_next(&mut self, parser: u32) -> Result<()> {
        self.exports
            .data_next
            .call(&mut self.store, parser)
            .map_err(Error::from_wasm)
    }

    // -- raw memory primitives -------------------------------------------

    fn read_bytes(&self, offset: u32, len: usize) -> Result<&[u8]> {
        let start = offset as usize;
        self.memory
            .data(&self.store)
            .get(start..start + len)
            .ok_or(Error::OutOfBounds { offset, len })
    }

    fn read_u32(&self, offset: u32) -> Result<u32> {
        let bytes = self.read_bytes(offset, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_f64(&self, offset: u32) -> Result<f64> {
        let bytes = self.read_bytes(offset, 8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u8(&self, offset: u32) -> Result<u8> {
        Ok(self.read_bytes(offset, 1)?[0])
    }

    /// Strict UTF-8 string at `(len, ptr)`. A null pointer here is a
    /// protocol violation; optional strings short-circuit before calling.
    fn read_str(&self, len: u32, ptr: u32) -> Result<String> {
        if ptr == 0 {
            return Err(Error::NullString);
        }
        let bytes = self.read_bytes(ptr, len as usize)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }
}

/// Every export of the pinned ABI, resolved eagerly so a mismatched module
/// fails at instantiation instead of mid-parse.
struct Exports {
    data_alloc: TypedFunc<u32, u32>,
    slice_str_free: TypedFunc<(u32, u32), ()>,
    file_new: TypedFunc<(u32, u32), u32>,
    file_free: TypedFunc<u32, ()>,
    file_log_count: TypedFunc<u32, u32>,
    file_get_headers: TypedFunc<(u32, u32), u32>,
    headers_free: TypedFunc<u32, ()>,
    headers_main_def: TypedFunc<u32, u32>,
    headers_slow_def: TypedFunc<u32, u32>,
    headers_gps_def: TypedFunc<u32, u32>,
    headers_firmware_revision: TypedFunc<u32, (u32, u32)>,
    headers_firmware_kind: TypedFunc<u32, u32>,
    #[allow(clippy::type_complexity)]
    headers_firmware_date: TypedFunc<u32, (u32, i32, u32, u32, u32, u32, u32, u32)>,
    headers_firmware_version: TypedFunc<u32, (u32, u32, u32)>,
    headers_board_info: TypedFunc<u32, (u32, u32)>,
    headers_craft_name: TypedFunc<u32, (u32, u32)>,
    headers_debug_mode: TypedFunc<u32, (u32, u32)>,
    headers_disabled_fields: TypedFunc<u32, (u32, u32)>,
    headers_features: TypedFunc<u32, (u32, u32)>,
    headers_pwm_protocol: TypedFunc<u32, (u32, u32)>,
    headers_unknown: TypedFunc<u32, (u32, u32)>,
    frame_def_free: TypedFunc<u32, ()>,
    unknown_headers_free: TypedFunc<(u32, u32), ()>,
    filter_new: TypedFunc<(u32, i32, i32, i32), (u32, u32)>,
    filter_main: TypedFunc<(u32, u32, u32), ()>,
    filter_slow: TypedFunc<(u32, u32, u32), ()>,
    filter_gps: TypedFunc<(u32, u32, u32), ()>,
    data_new: TypedFunc<(u32, u32), (u32, u32)>,
    data_free: TypedFunc<u32, ()>,
    data_main_def: TypedFunc<u32, u32>,
    data_slow_def: TypedFunc<u32, u32>,
    data_gps_def: TypedFunc<u32, u32>,
    data_stats: TypedFunc<u32, (u32, u32, u32, u32, u32, f32)>,
    data_next: TypedFunc<u32, ()>,
}

impl Exports {
    fn resolve(instance: &Instance, store: &mut Store<()>) -> Result<Self> {
        fn typed<P, R>(
            instance: &Instance,
            store: &mut Store<()>,
            name: &'static str,
        ) -> Result<TypedFunc<P, R>>
        where
            P: wasmtime::WasmParams,
            R: wasmtime::WasmResults,
        {
            instance
                .get_typed_func::<P, R>(&mut *store, name)
                .map_err(|_| Error::MissingExport(name))
        }

        Ok(Self {
            data_alloc: typed(instance, store, "data_alloc")?,
            slice_str_free: typed(instance, store, "sliceStr_free")?,
            file_new: typed(instance, store, "file_new")?,
            file_free: typed(instance, store, "file_free")?,
            file_log_count: typed(instance, store, "file_logCount")?,
            file_get_headers: typed(instance, store, "file_getHeaders")?,
            headers_free: typed(instance, store, "headers_free")?,
            headers_main_def: typed(instance, store, "headers_mainDef")?,
            headers_slow_def: typed(instance, store, "headers_slowDef")?,
            headers_gps_def: typed(instance, store, "headers_gpsDef")?,
            headers_firmware_revision: typed(instance, store, "headers_firmwareRevision")?,
            headers_firmware_kind: typed(instance, store, "headers_firmwareKind")?,
            headers_firmware_date: typed(instance, store, "headers_firmwareDate")?,
            headers_firmware_version: typed(instance, store, "headers_firmwareVersion")?,
            headers_board_info: typed(instance, store, "headers_boardInfo")?,
            headers_craft_name: typed(instance, store, "headers_craftName")?,
            headers_debug_mode: typed(instance, store, "headers_debugMode")?,
            headers_disabled_fields: typed(instance, store, "headers_disabledFields")?,
            headers_features: typed(instance, store, "headers_features")?,
            headers_pwm_protocol: typed(instance, store, "headers_pwmProtocol")?,
            headers_unknown: typed(instance, store, "headers_unknown")?,
            frame_def_free: typed(instance, store, "frameDef_free")?,
            unknown_headers_free: typed(instance, store, "unknownHeaders_free")?,
            filter_new: typed(instance, store, "filter_new")?,
            filter_main: typed(instance, store, "filter_main")?,
            filter_slow: typed(instance, store, "filter_slow")?,
            filter_gps: typed(instance, store, "filter_gps")?,
            data_new: typed(instance, store, "data_new")?,
            data_free: typed(instance, store, "data_free")?,
            data_main_def: typed(instance, store, "data_mainDef")?,
            data_slow_def: typed(instance, store, "data_slowDef")?,
            data_gps_def: typed(instance, store, "data_gpsDef")?,
            data_stats: typed(instance, store, "data_stats")?,
            data_next: typed(instance, store, "data_next")?,
        })
    }
}

/// Host imports the module links against: a non-fatal diagnostic sink and
/// the fatal abort that becomes [`Error::Parse`] on the calling side.
fn register_imports(linker: &mut Linker<()>) -> Result<()> {
    linker
        .func_wrap(
            "main",
            "panic",
            |mut caller: Caller<'_, ()>, len: u32, ptr: u32| {
                let message = read_import_str(&mut caller, len, ptr);
                tracing::error!(target: "blackbox_runtime::module", "module panic: {message}");
            },
        )
        .map_err(Error::from_wasm)?;

    linker
        .func_wrap(
            "main",
            "throw",
            |mut caller: Caller<'_, ()>, len: u32, ptr: u32| -> anyhow::Result<()> {
                let message = read_import_str(&mut caller, len, ptr);

                // The message is an owned module allocation; release it
                // before unwinding the module call.
                if let Some(free) = caller.get_export("slice8_free").and_then(|e| e.into_func()) {
                    if let Ok(free) = free.typed::<(u32, u32), ()>(&caller) {
                        let _ = free.call(&mut caller, (len, ptr));
                    }
                }

                Err(Error::Parse(message).into())
            },
        )
        .map_err(Error::from_wasm)?;

    Ok(())
}

fn read_import_str(caller: &mut Caller<'_, ()>, len: u32, ptr: u32) -> String {
    let Some(memory) = caller.get_export("memory").and_then(|e| e.into_memory()) else {
        return "<module memory unavailable>".to_owned();
    };
    let mut buf = vec![0u8; len as usize];
    match memory.read(&mut *caller, ptr as usize, &mut buf) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => "<invalid message pointer>".to_owned(),
    }
}
