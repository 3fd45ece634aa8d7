//! C-compatible surface of the foreign training engine.
//!
//! Everything in this file is raw: opaque handle types, callback signatures
//! and the function table the host hands over. Ownership rules:
//!
//! * Every fallible entry point returns a [`StatusPtr`]; null means success.
//!   A non-null status is owned by the caller and must go back through
//!   `release_status`.
//! * Strings returned through an allocator argument are owned by the caller
//!   and must be released with that allocator's `free`.
//! * `value_collection_get_at` hands out a value pointer that stays owned by
//!   the collection. `value_collection_set_at` does not take ownership of
//!   the value; the caller keeps it alive until the engine is done with it.
//! * `create_tensor` with non-null `data` aliases caller memory, which must
//!   outlive the returned value.
//!
//! Safe wrappers live in [`crate::boundary`].

use std::ffi::{c_char, c_int, c_void};
use std::marker::{PhantomData, PhantomPinned};

/// ABI version of [`TrainingApi`] this crate was built against.
pub const API_VERSION: u32 = 1;

macro_rules! opaque {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[repr(C)]
            pub struct $name {
                _data: [u8; 0],
                _marker: PhantomData<(*mut u8, PhantomPinned)>,
            }
        )*
    };
}

opaque!(
    /// Foreign status object.
    RawStatus,
    /// Foreign training environment (model graph, device selection).
    RawEnvironment,
    /// Foreign parameter set.
    RawParameters,
    /// Foreign indexed collection of named values.
    RawValueCollection,
    /// Foreign tensor value.
    RawValue,
);

/// Null on success.
pub type StatusPtr = *mut RawStatus;

/// Allocator used by the engine for buffers it hands back to us.
#[repr(C)]
pub struct RawAllocator {
    pub alloc: unsafe extern "C" fn(this: *mut RawAllocator, size: usize) -> *mut c_void,
    pub free: unsafe extern "C" fn(this: *mut RawAllocator, ptr: *mut c_void),
}

/// Training or testing batch request.
pub type BatchCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    batch_size: usize,
    destination: *mut RawValueCollection,
);

/// Error-function callback carrying computed error values.
pub type ErrorCallback =
    unsafe extern "C" fn(user_data: *mut c_void, values: *mut RawValueCollection);

/// Evaluation-function callback.
pub type EvaluationCallback =
    unsafe extern "C" fn(user_data: *mut c_void, num_samples: usize, step: usize);

/// Function table exported by the engine.
#[repr(C)]
pub struct TrainingApi {
    pub version: u32,

    pub status_code: unsafe extern "C" fn(status: *const RawStatus) -> c_int,
    pub status_message: unsafe extern "C" fn(status: *const RawStatus) -> *const c_char,
    pub release_status: unsafe extern "C" fn(status: StatusPtr),
    pub default_allocator: unsafe extern "C" fn(out: *mut *mut RawAllocator) -> StatusPtr,

    pub create_parameters: unsafe extern "C" fn(out: *mut *mut RawParameters) -> StatusPtr,
    pub release_parameters: unsafe extern "C" fn(params: *mut RawParameters),
    pub set_parameter_string: unsafe extern "C" fn(
        params: *mut RawParameters,
        key: c_int,
        value: *const c_char,
    ) -> StatusPtr,
    pub get_parameter_string: unsafe extern "C" fn(
        params: *mut RawParameters,
        key: c_int,
        allocator: *mut RawAllocator,
        out: *mut *mut c_char,
    ) -> StatusPtr,
    pub set_parameter_bool:
        unsafe extern "C" fn(params: *mut RawParameters, key: c_int, value: bool) -> StatusPtr,
    pub get_parameter_bool:
        unsafe extern "C" fn(params: *mut RawParameters, key: c_int, out: *mut bool) -> StatusPtr,
    pub set_parameter_int:
        unsafe extern "C" fn(params: *mut RawParameters, key: c_int, value: i64) -> StatusPtr,
    pub get_parameter_int:
        unsafe extern "C" fn(params: *mut RawParameters, key: c_int, out: *mut i64) -> StatusPtr,
    pub set_parameter_double:
        unsafe extern "C" fn(params: *mut RawParameters, key: c_int, value: f64) -> StatusPtr,
    /// The value comes back as decimal text in an allocator-owned buffer.
    pub get_parameter_double: unsafe extern "C" fn(
        params: *mut RawParameters,
        key: c_int,
        allocator: *mut RawAllocator,
        out: *mut *mut c_char,
    ) -> StatusPtr,
    pub set_optimizer: unsafe extern "C" fn(params: *mut RawParameters, kind: c_int) -> StatusPtr,
    pub get_optimizer:
        unsafe extern "C" fn(params: *mut RawParameters, out: *mut c_int) -> StatusPtr,
    pub set_loss_function:
        unsafe extern "C" fn(params: *mut RawParameters, kind: c_int) -> StatusPtr,
    pub get_loss_function:
        unsafe extern "C" fn(params: *mut RawParameters, out: *mut c_int) -> StatusPtr,
    pub setup_callbacks: unsafe extern "C" fn(
        params: *mut RawParameters,
        error: ErrorCallback,
        evaluation: EvaluationCallback,
        correlation: *const c_char,
        user_data: *mut c_void,
    ) -> StatusPtr,
    pub setup_data_feeds: unsafe extern "C" fn(
        params: *mut RawParameters,
        training: BatchCallback,
        testing: BatchCallback,
        feed_names: *const c_char,
        user_data: *mut c_void,
    ) -> StatusPtr,

    pub create_value_collection:
        unsafe extern "C" fn(out: *mut *mut RawValueCollection) -> StatusPtr,
    pub release_value_collection: unsafe extern "C" fn(collection: *mut RawValueCollection),
    pub value_collection_count: unsafe extern "C" fn(
        collection: *const RawValueCollection,
        out: *mut usize,
    ) -> StatusPtr,
    pub value_collection_capacity: unsafe extern "C" fn(
        collection: *const RawValueCollection,
        out: *mut usize,
    ) -> StatusPtr,
    pub value_collection_get_at: unsafe extern "C" fn(
        collection: *const RawValueCollection,
        index: usize,
        allocator: *mut RawAllocator,
        out_value: *mut *const RawValue,
        out_name: *mut *mut c_char,
    ) -> StatusPtr,
    pub value_collection_set_at: unsafe extern "C" fn(
        collection: *mut RawValueCollection,
        index: usize,
        value: *const RawValue,
        name: *const c_char,
    ) -> StatusPtr,

    pub create_tensor: unsafe extern "C" fn(
        data: *mut c_void,
        byte_len: usize,
        shape: *const i64,
        rank: usize,
        element_type: c_int,
        out: *mut *mut RawValue,
    ) -> StatusPtr,
    pub tensor_element_type:
        unsafe extern "C" fn(value: *const RawValue, out: *mut c_int) -> StatusPtr,
    pub tensor_rank: unsafe extern "C" fn(value: *const RawValue, out: *mut usize) -> StatusPtr,
    pub tensor_dimensions:
        unsafe extern "C" fn(value: *const RawValue, out: *mut i64, rank: usize) -> StatusPtr,
    pub tensor_data:
        unsafe extern "C" fn(value: *const RawValue, out: *mut *const c_void) -> StatusPtr,
    pub release_value: unsafe extern "C" fn(value: *mut RawValue),

    pub initialize_training: unsafe extern "C" fn(
        env: *mut RawEnvironment,
        params: *mut RawParameters,
        expected_inputs: *mut RawValueCollection,
        expected_outputs: *mut RawValueCollection,
    ) -> StatusPtr,
    pub run_training: unsafe extern "C" fn(params: *mut RawParameters) -> StatusPtr,
    pub end_training: unsafe extern "C" fn(params: *mut RawParameters) -> StatusPtr,
}

/// ABI version of the function table this library expects.
#[no_mangle]
pub extern "C" fn delta1_train_api_version() -> u32 {
    API_VERSION
}
