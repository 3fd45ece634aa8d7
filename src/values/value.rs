//! Boundary values: owned, borrowed and the host memory pinned behind them.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::api::ffi::RawValue;
use crate::boundary::Engine;

use super::tensor::TensorData;

/// A boundary value this crate created and must release.
pub struct OwnedValue {
    engine: Engine,
    raw: NonNull<RawValue>,
}

impl OwnedValue {
    /// # Safety
    /// `raw` must be null or a value freshly created by `engine` and owned by
    /// nobody else.
    pub(crate) unsafe fn from_raw(engine: Engine, raw: *mut RawValue) -> Option<Self> {
        NonNull::new(raw).map(|raw| Self { engine, raw })
    }

    /// Borrow without giving up ownership.
    pub fn as_value_ref(&self) -> ValueRef<'_> {
        ValueRef {
            raw: self.raw,
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for OwnedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedValue({:p})", self.raw)
    }
}

impl Drop for OwnedValue {
    fn drop(&mut self) {
        unsafe { (self.engine.api().release_value)(self.raw.as_ptr()) }
    }
}

/// A value observed but not owned; valid while `'a` lasts.
#[derive(Clone, Copy)]
pub struct ValueRef<'a> {
    raw: NonNull<RawValue>,
    _marker: PhantomData<&'a RawValue>,
}

impl<'a> ValueRef<'a> {
    /// # Safety
    /// A non-null `raw` must stay valid for `'a`.
    pub(crate) unsafe fn from_raw(raw: *const RawValue) -> Option<Self> {
        NonNull::new(raw as *mut RawValue).map(|raw| Self {
            raw,
            _marker: PhantomData,
        })
    }

    pub(crate) fn as_ptr(&self) -> *const RawValue {
        self.raw.as_ptr()
    }
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueRef({:p})", self.raw)
    }
}

/// Host memory aliased by a boundary value.
///
/// The heap allocation behind the array never moves, so keeping this alive
/// keeps the engine's raw view valid. Dropping it is the unpin.
pub struct PinnedBuffer {
    data: TensorData,
}

impl PinnedBuffer {
    pub(crate) fn new(data: TensorData) -> Self {
        Self { data }
    }

    /// Size of the pinned memory in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.byte_len()
    }

    /// The pinned array.
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.data.as_mut_ptr()
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("element_type", &self.data.element_type())
            .field("shape", &self.data.shape())
            .finish()
    }
}
