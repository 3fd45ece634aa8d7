//! Safe entry point over the engine's function table.

use std::ffi::CStr;
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::api::ffi::{RawAllocator, RawStatus, StatusPtr, TrainingApi, API_VERSION};
use crate::common::error::{contract_violation, TrainError, TrainResult};

use super::alloc::Allocator;

/// Copyable reference to the engine's process-wide function table.
#[derive(Clone, Copy)]
pub struct Engine {
    api: &'static TrainingApi,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("api", &(self.api as *const TrainingApi))
            .field("version", &self.api.version)
            .finish()
    }
}

impl Engine {
    /// Wrap a function table, checking its ABI version.
    pub fn new(api: &'static TrainingApi) -> TrainResult<Self> {
        if api.version != API_VERSION {
            return Err(TrainError::protocol("api version", api.version));
        }
        Ok(Self { api })
    }

    /// Wrap a function table received from the host.
    ///
    /// # Safety
    /// `api` must point to a table that stays valid for the rest of the
    /// process. A null pointer is a contract violation.
    pub unsafe fn from_raw(api: *const TrainingApi) -> TrainResult<Self> {
        match api.as_ref() {
            Some(api) => Self::new(api),
            None => contract_violation("null training api table"),
        }
    }

    pub(crate) fn api(&self) -> &'static TrainingApi {
        self.api
    }

    /// Perform one boundary round trip and convert its status.
    pub(crate) fn call(
        &self,
        op: &'static str,
        f: impl FnOnce(&'static TrainingApi) -> StatusPtr,
    ) -> TrainResult<()> {
        debug!(op, "boundary call");
        let status = f(self.api);
        self.check(op, status)
    }

    /// Convert a returned status into a result, releasing it.
    pub(crate) fn check(&self, op: &'static str, status: StatusPtr) -> TrainResult<()> {
        let Some(raw) = NonNull::new(status) else {
            return Ok(());
        };
        let status = Status { api: self.api, raw };
        let code = status.code();
        let message = status.message();
        debug!(op, code, %message, "engine reported failure");
        Err(TrainError::boundary(op, code, message))
    }

    /// The engine's default allocator, used for strings it hands back.
    pub(crate) fn allocator(&self) -> TrainResult<Allocator> {
        let mut out: *mut RawAllocator = ptr::null_mut();
        self.call("default_allocator", |api| unsafe {
            (api.default_allocator)(&mut out)
        })?;
        NonNull::new(out)
            .map(Allocator::from_non_null)
            .ok_or_else(|| TrainError::protocol("allocator", "null"))
    }
}

/// Owned foreign status; released on drop.
struct Status {
    api: &'static TrainingApi,
    raw: NonNull<RawStatus>,
}

impl Status {
    fn code(&self) -> i32 {
        unsafe { (self.api.status_code)(self.raw.as_ptr()) }
    }

    fn message(&self) -> String {
        let ptr = unsafe { (self.api.status_message)(self.raw.as_ptr()) };
        if ptr.is_null() {
            return String::new();
        }
        // SAFETY: the engine keeps the message alive as long as the status.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

impl Drop for Status {
    fn drop(&mut self) {
        unsafe { (self.api.release_status)(self.raw.as_ptr()) }
    }
}
