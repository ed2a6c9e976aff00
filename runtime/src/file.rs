//! The log file facade: sub-log enumeration and headers caching.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::headers::LogHeaders;
use crate::wasm::{FileTag, Handle, WasmModule};

/// One loaded blackbox file, backed by its own module instance.
///
/// Headers are cached weakly per sub-log index: asking for the same live
/// sub-log twice returns the identical `Rc`; once all references are gone
/// a later request decodes a fresh one. The cache never keeps a headers
/// object alive.
pub struct LogFile {
    wasm: Rc<RefCell<WasmModule>>,
    handle: Handle<FileTag>,
    headers: RefCell<Vec<Option<Weak<LogHeaders>>>>,
}

impl LogFile {
    pub(crate) fn new(wasm: Rc<RefCell<WasmModule>>, raw: u32) -> Self {
        let handle = Handle::new(raw, Rc::clone(&wasm));
        Self {
            wasm,
            handle,
            headers: RefCell::new(Vec::new()),
        }
    }

    /// Number of sub-logs in the file.
    pub fn log_count(&self) -> Result<u32> {
        let raw = self.handle.raw()?;
        self.wasm.borrow_mut().log_count(raw)
    }

    /// Current size of the backing module's linear memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.wasm.borrow().memory_size()
    }

    /// Parse the headers of sub-log `index`.
    ///
    /// An out-of-range index is `Ok(None)`, not an error. A module-side
    /// parse failure for an in-range sub-log is `Err(Error::Parse)`; the
    /// caller may skip that sub-log and request others.
    pub fn parse_headers(&self, index: u32) -> Result<Option<Rc<LogHeaders>>> {
        if index >= self.log_count()? {
            return Ok(None);
        }

        let slot = index as usize;
        let cached = self
            .headers
            .borrow()
            .get(slot)
            .and_then(|weak| weak.as_ref())
            .and_then(Weak::upgrade)
            .filter(|headers| headers.is_alive());
        if let Some(live) = cached {
            return Ok(Some(live));
        }

        let headers = LogHeaders::new(Rc::clone(&self.wasm), &self.handle, index)?;
        let mut cache = self.headers.borrow_mut();
        if cache.len() <= slot {
            cache.resize(slot + 1, None);
        }
        cache[slot] = Some(Rc::downgrade(&headers));
        Ok(Some(headers))
    }

    /// Release the file and, first, every live headers object derived from
    /// it (which in turn releases their parsers).
    pub fn free(&self) -> Result<()> {
        for slot in self.headers.borrow_mut().drain(..) {
            if let Some(headers) = slot.and_then(|weak| weak.upgrade()) {
                headers.free()?;
            }
        }
        self.handle.free()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        if let Err(err) = self.free() {
            tracing::warn!(%err, "failed to release log file");
        }
    }
}
