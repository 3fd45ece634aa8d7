//! Raw foreign function interface of the training engine.

pub mod ffi;
