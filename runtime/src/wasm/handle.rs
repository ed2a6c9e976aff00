//! Owning wrappers around module-side allocations.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::wasm::WasmModule;

/// Binds a handle type to the module export that releases it.
pub(crate) trait HandleKind {
    /// Name reported by [`Error::UseAfterFree`].
    const NAME: &'static str;

    fn release(wasm: &mut WasmModule, raw: u32) -> Result<()>;
}

pub(crate) enum FileTag {}
pub(crate) enum HeadersTag {}
pub(crate) enum DataTag {}

impl HandleKind for FileTag {
    const NAME: &'static str = "LogFile";

    fn release(wasm: &mut WasmModule, raw: u32) -> Result<()> {
        wasm.free_file(raw)
    }
}

impl HandleKind for HeadersTag {
    const NAME: &'static str = "LogHeaders";

    fn release(wasm: &mut WasmModule, raw: u32) -> Result<()> {
        wasm.free_headers(raw)
    }
}

impl HandleKind for DataTag {
    const NAME: &'static str = "DataParser";

    fn release(wasm: &mut WasmModule, raw: u32) -> Result<()> {
        wasm.free_data(raw)
    }
}

/// Exclusive owner of one module-side allocation.
///
/// Release is deterministic: either the explicit, idempotent [`free`], or
/// `Drop` as a safety net for wrappers that were never freed. The slot is
/// cleared before the release export runs, so the two paths can never both
/// fire. Drop timing must only ever matter for leak mitigation; code that
/// needs ordering calls [`free`] itself.
///
/// [`free`]: Handle::free
pub(crate) struct Handle<K: HandleKind> {
    raw: Cell<Option<NonZeroU32>>,
    wasm: Rc<RefCell<WasmModule>>,
    _kind: PhantomData<K>,
}

impl<K: HandleKind> Handle<K> {
    pub(crate) fn new(raw: u32, wasm: Rc<RefCell<WasmModule>>) -> Self {
        debug_assert!(raw != 0, "module returned a null {} handle", K::NAME);
        Self {
            raw: Cell::new(NonZeroU32::new(raw)),
            wasm,
            _kind: PhantomData,
        }
    }

    /// The raw module pointer, or `UseAfterFree` once released.
    pub(crate) fn raw(&self) -> Result<u32> {
        self.raw
            .get()
            .map(NonZeroU32::get)
            .ok_or(Error::UseAfterFree(K::NAME))
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.raw.get().is_some()
    }

    /// Release the module-side allocation. Safe to call more than once;
    /// later calls are no-ops that never reach the module.
    pub(crate) fn free(&self) -> Result<()> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        K::release(&mut self.wasm.borrow_mut(), raw.get())
    }
}

impl<K: HandleKind> Drop for Handle<K> {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        if let Err(err) = K::release(&mut self.wasm.borrow_mut(), raw.get()) {
            tracing::warn!(kind = K::NAME, %err, "failed to release module allocation");
        }
    }
}
