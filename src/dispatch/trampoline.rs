//! `extern "C"` entry points handed to the engine.
//!
//! `user_data` is the address of the store's [`DispatchContext`], which
//! outlives every registration made with it.

use std::ffi::c_void;

use crate::api::ffi::RawValueCollection;

use super::{DispatchContext, SlotKind};

unsafe fn context<'a>(user_data: *mut c_void) -> Option<&'a DispatchContext> {
    (user_data as *const DispatchContext).as_ref()
}

pub(crate) unsafe extern "C" fn training_batch(
    user_data: *mut c_void,
    batch_size: usize,
    destination: *mut RawValueCollection,
) {
    if let Some(ctx) = context(user_data) {
        ctx.service_batch(SlotKind::TrainingBatch, batch_size, destination);
    }
}

pub(crate) unsafe extern "C" fn testing_batch(
    user_data: *mut c_void,
    batch_size: usize,
    destination: *mut RawValueCollection,
) {
    if let Some(ctx) = context(user_data) {
        ctx.service_batch(SlotKind::TestingBatch, batch_size, destination);
    }
}

pub(crate) unsafe extern "C" fn error_function(user_data: *mut c_void, values: *mut RawValueCollection) {
    if let Some(ctx) = context(user_data) {
        ctx.service_error(values);
    }
}

pub(crate) unsafe extern "C" fn evaluation_function(user_data: *mut c_void, num_samples: usize, step: usize) {
    if let Some(ctx) = context(user_data) {
        ctx.service_evaluation(num_samples, step);
    }
}
