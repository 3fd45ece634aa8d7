//! Buffers produced by the engine's allocator.
//!
//! Anything the engine allocates for us must be freed through the same
//! allocator's `free`, never through Rust's global allocator.

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::ptr::NonNull;

use crate::api::ffi::RawAllocator;

/// Handle to a foreign allocator.
#[derive(Clone, Copy, Debug)]
pub struct Allocator(NonNull<RawAllocator>);

impl Allocator {
    pub(crate) fn from_non_null(raw: NonNull<RawAllocator>) -> Self {
        Self(raw)
    }

    pub(crate) fn as_ptr(self) -> *mut RawAllocator {
        self.0.as_ptr()
    }

    /// Take ownership of a nul-terminated string produced by this allocator.
    ///
    /// # Safety
    /// `ptr` must be null or a live allocation from this allocator holding a
    /// nul-terminated string, not owned by anything else.
    pub(crate) unsafe fn adopt_str(self, ptr: *mut c_char) -> Option<AllocatedStr> {
        NonNull::new(ptr).map(|ptr| AllocatedStr {
            ptr,
            allocator: self,
        })
    }
}

/// Nul-terminated string owned through a foreign allocator.
pub struct AllocatedStr {
    ptr: NonNull<c_char>,
    allocator: Allocator,
}

impl AllocatedStr {
    /// Borrow the text without copying.
    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: established by `Allocator::adopt_str`.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Copy the text out, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> String {
        self.as_c_str().to_string_lossy().into_owned()
    }
}

impl fmt::Debug for AllocatedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AllocatedStr").field(&self.as_c_str()).finish()
    }
}

impl Drop for AllocatedStr {
    fn drop(&mut self) {
        let allocator = self.allocator.as_ptr();
        unsafe { ((*allocator).free)(allocator, self.ptr.as_ptr() as *mut c_void) }
    }
}
