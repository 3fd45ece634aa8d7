//! Indexed views over foreign value collections.

use std::ffi::CString;
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::api::ffi::{RawValue, RawValueCollection};
use crate::boundary::Engine;
use crate::common::error::{contract_violation, TrainError, TrainResult};
use crate::ledger::CleanupLedger;

use super::value::ValueRef;

/// A foreign value collection, either owned or borrowed.
///
/// Only collections built with [`ValueCollection::create`] own their handle
/// and release it when dropped. A collection from [`ValueCollection::wrap`]
/// is a view over memory the engine controls; dropping it does nothing.
///
/// Count and capacity are always queried, never cached: the engine may
/// change them between calls.
pub struct ValueCollection {
    engine: Engine,
    raw: NonNull<RawValueCollection>,
    owns: bool,
}

impl ValueCollection {
    /// Create a new, owned collection.
    pub fn create(engine: Engine) -> TrainResult<Self> {
        let mut out: *mut RawValueCollection = ptr::null_mut();
        engine.call("create_value_collection", |api| unsafe {
            (api.create_value_collection)(&mut out)
        })?;
        let raw = NonNull::new(out).ok_or_else(|| TrainError::protocol("value collection", "null"))?;
        debug!(handle = ?raw, "created value collection");
        Ok(Self {
            engine,
            raw,
            owns: true,
        })
    }

    /// Borrow a collection supplied by the engine.
    ///
    /// # Safety
    /// `raw` must stay valid for as long as the returned view is used. A null
    /// handle is a contract violation.
    pub unsafe fn wrap(engine: Engine, raw: *mut RawValueCollection) -> Self {
        let Some(raw) = NonNull::new(raw) else {
            contract_violation("wrap called with a null value collection handle")
        };
        Self {
            engine,
            raw,
            owns: false,
        }
    }

    /// True for collections from [`create`](Self::create).
    pub fn owns(&self) -> bool {
        self.owns
    }

    pub(crate) fn as_ptr(&self) -> *mut RawValueCollection {
        self.raw.as_ptr()
    }

    /// Number of entries currently set.
    pub fn count(&self) -> TrainResult<usize> {
        let mut out = 0usize;
        self.engine.call("value_collection_count", |api| unsafe {
            (api.value_collection_count)(self.raw.as_ptr(), &mut out)
        })?;
        Ok(out)
    }

    /// Number of entries the collection can hold.
    pub fn capacity(&self) -> TrainResult<usize> {
        let mut out = 0usize;
        self.engine.call("value_collection_capacity", |api| unsafe {
            (api.value_collection_capacity)(self.raw.as_ptr(), &mut out)
        })?;
        Ok(out)
    }

    /// Read the entry at `index`.
    ///
    /// The value stays owned by the collection and must be copied out before
    /// the engine call in progress returns. The name is copied; the engine's
    /// allocation for it is queued on `ledger` for release.
    pub fn get(&self, index: usize, ledger: &mut CleanupLedger) -> TrainResult<(ValueRef<'_>, String)> {
        let allocator = self.engine.allocator()?;
        let mut value: *const RawValue = ptr::null();
        let mut name = ptr::null_mut();
        self.engine.call("value_collection_get_at", |api| unsafe {
            (api.value_collection_get_at)(
                self.raw.as_ptr(),
                index,
                allocator.as_ptr(),
                &mut value,
                &mut name,
            )
        })?;

        let name = match unsafe { allocator.adopt_str(name) } {
            Some(text) => {
                let copy = text.to_string_lossy();
                ledger.push(text);
                copy
            }
            None => String::new(),
        };
        let value = unsafe { ValueRef::from_raw(value) }
            .ok_or_else(|| TrainError::protocol("collection entry", format!("null value at {index}")))?;
        Ok((value, name))
    }

    /// Write `value` under `name` at `index`.
    ///
    /// The collection does not take ownership of `value`; the caller keeps it
    /// alive until the engine is done with it. Range checking is the
    /// engine's, surfacing as a boundary error.
    pub fn set(&self, index: usize, value: ValueRef<'_>, name: &str) -> TrainResult<()> {
        let name = CString::new(name)
            .map_err(|_| TrainError::invalid(format!("value name {name:?} contains a nul byte")))?;
        self.engine.call("value_collection_set_at", |api| unsafe {
            (api.value_collection_set_at)(self.raw.as_ptr(), index, value.as_ptr(), name.as_ptr())
        })
    }

    /// Release the collection if owned; no-op for borrowed views.
    pub fn dispose(self) {
        drop(self)
    }
}

impl fmt::Debug for ValueCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCollection")
            .field("handle", &self.raw)
            .field("owns", &self.owns)
            .finish()
    }
}

impl Drop for ValueCollection {
    fn drop(&mut self) {
        if self.owns {
            debug!(handle = ?self.raw, "releasing value collection");
            unsafe { (self.engine.api().release_value_collection)(self.raw.as_ptr()) }
        }
    }
}
