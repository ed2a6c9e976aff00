//! Compiles the decoder module once, instantiates it per log file.

use std::cell::RefCell;
use std::rc::Rc;

use wasmtime::{Config, Engine, Module};

use crate::error::{Error, Result};
use crate::file::LogFile;
use crate::wasm::WasmModule;

/// Shared compilation of the decoder module.
///
/// Compilation happens once; [`load_file`] instantiates a fresh, isolated
/// module instance per file so distinct files never share linear memory.
/// Cloning is cheap (engine and module are reference-counted) and the
/// loader is `Send + Sync`, which is how the mirror ships it to worker
/// threads.
///
/// [`load_file`]: Loader::load_file
#[derive(Clone)]
pub struct Loader {
    engine: Engine,
    module: Module,
}

impl Loader {
    /// Compile the decoder module from its binary (or WAT text) form.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let mut config = Config::new();
        config.wasm_bulk_memory(true);
        config.wasm_multi_value(true);

        let engine = Engine::new(&config).map_err(Error::from_wasm)?;
        let module = Module::new(&engine, bytes).map_err(Error::from_wasm)?;
        Ok(Self { engine, module })
    }

    /// Adopt an already-compiled module.
    pub fn from_module(engine: Engine, module: Module) -> Self {
        Self { engine, module }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Instantiate a fresh module instance and load `data` into it.
    ///
    /// Fails with [`Error::AllocationFailed`] if the module cannot accept
    /// the input, before any parsing starts.
    pub fn load_file(&self, data: &[u8]) -> Result<LogFile> {
        let mut wasm = WasmModule::instantiate(&self.engine, &self.module)?;
        let raw = wasm.new_file(data)?;
        Ok(LogFile::new(Rc::new(RefCell::new(wasm)), raw))
    }
}
