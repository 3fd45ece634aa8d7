//! Opaque references to foreign resources.

use std::fmt;
use std::ptr::NonNull;

use crate::api::ffi::RawEnvironment;

/// Non-null reference to a foreign resource. Never interpreted locally.
///
/// Null is the "no resource" sentinel and is unrepresentable here; see
/// [`BoundaryHandle::from_raw`].
pub struct BoundaryHandle<T>(NonNull<T>);

/// Handle to the engine's training environment, passed to `initialize`.
pub type EngineHandle = BoundaryHandle<RawEnvironment>;

impl<T> BoundaryHandle<T> {
    /// Wrap a raw handle, mapping the null sentinel to `None`.
    ///
    /// # Safety
    /// A non-null `ptr` must be a live handle produced by the engine and
    /// must stay valid for as long as the returned value is used.
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Raw pointer for passing back to the engine.
    pub fn as_ptr(self) -> *mut T {
        self.0.as_ptr()
    }

    /// Address, for logs.
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl<T> Clone for BoundaryHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BoundaryHandle<T> {}

impl<T> PartialEq for BoundaryHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for BoundaryHandle<T> {}

impl<T> fmt::Debug for BoundaryHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundaryHandle({:#x})", self.addr())
    }
}
