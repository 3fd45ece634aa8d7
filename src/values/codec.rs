//! Named value codec: local arrays to boundary values and back.

use std::ffi::{c_int, c_void};
use std::ptr;
use std::slice;

use ndarray::{ArrayD, IxDyn};
use tracing::trace;

use crate::api::ffi::RawValue;
use crate::boundary::Engine;
use crate::common::error::{TrainError, TrainResult};

use super::tensor::{ElementType, NamedTensorDescriptor, TensorData};
use super::value::{OwnedValue, PinnedBuffer, ValueRef};

/// Converts between [`TensorData`] and boundary values.
#[derive(Clone, Copy, Debug)]
pub struct NamedValueCodec {
    engine: Engine,
}

impl NamedValueCodec {
    /// A codec creating and reading values through `engine`.
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Hand a local array to the engine.
    ///
    /// Non-empty arrays are passed zero-copy; the returned [`PinnedBuffer`]
    /// owns the memory the value aliases and must outlive every engine call
    /// that can observe the value. Empty arrays are allocated by the engine
    /// and need no pin.
    pub fn encode(&self, data: TensorData) -> TrainResult<(OwnedValue, Option<PinnedBuffer>)> {
        let element_type = data.element_type();
        let shape = data
            .shape()
            .iter()
            .map(|&dim| {
                i64::try_from(dim)
                    .map_err(|_| TrainError::codec(format!("dimension {dim} does not fit in i64")))
            })
            .collect::<TrainResult<Vec<i64>>>()?;

        if data.is_empty() {
            let value = self.create(ptr::null_mut(), 0, &shape, element_type)?;
            return Ok((value, None));
        }

        let mut pin = PinnedBuffer::new(data.into_standard_layout());
        let byte_len = pin.byte_len();
        let value = self.create(pin.as_mut_ptr(), byte_len, &shape, element_type)?;
        trace!(?element_type, ?shape, byte_len, "encoded pinned value");
        Ok((value, Some(pin)))
    }

    /// Copy a boundary value out into a local array.
    pub fn decode(&self, value: ValueRef<'_>) -> TrainResult<TensorData> {
        let raw = value.as_ptr();

        let mut code: c_int = 0;
        self.engine.call("tensor_element_type", |api| unsafe {
            (api.tensor_element_type)(raw, &mut code)
        })?;
        let element_type =
            ElementType::from_code(code).ok_or_else(|| TrainError::protocol("element type", code))?;

        let shape = self.dimensions(raw)?;
        let len = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| TrainError::codec(format!("element count of {shape:?} overflows")))?;

        let mut data: *const c_void = ptr::null();
        self.engine.call("tensor_data", |api| unsafe {
            (api.tensor_data)(raw, &mut data)
        })?;
        if len > 0 && data.is_null() {
            return Err(TrainError::codec("engine returned no data for a non-empty value"));
        }

        // SAFETY: the engine guarantees `len` aligned elements behind `data`
        // for as long as `value` is borrowed.
        let decoded = unsafe {
            match element_type {
                ElementType::Float32 => TensorData::Float32(copy_out(data, &shape, len)?),
                ElementType::Float64 => TensorData::Float64(copy_out(data, &shape, len)?),
                ElementType::Int32 => TensorData::Int32(copy_out(data, &shape, len)?),
                ElementType::Int64 => TensorData::Int64(copy_out(data, &shape, len)?),
                ElementType::Uint8 => TensorData::Uint8(copy_out(data, &shape, len)?),
            }
        };
        Ok(decoded)
    }

    /// Interpret a boundary value as a 1-D integer array of dimensions.
    pub fn decode_shape(
        &self,
        value: ValueRef<'_>,
        name: impl Into<String>,
    ) -> TrainResult<NamedTensorDescriptor> {
        let name = name.into();
        let dims: Vec<i64> = match self.decode(value)? {
            TensorData::Int64(array) if array.ndim() == 1 => array.iter().copied().collect(),
            TensorData::Int32(array) if array.ndim() == 1 => {
                array.iter().map(|&dim| i64::from(dim)).collect()
            }
            other => {
                return Err(TrainError::codec(format!(
                    "shape of `{name}` must be a 1-D integer array, got {:?} of rank {}",
                    other.element_type(),
                    other.shape().len()
                )))
            }
        };

        let shape = dims
            .into_iter()
            .map(|dim| {
                usize::try_from(dim)
                    .map_err(|_| TrainError::codec(format!("`{name}` has negative dimension {dim}")))
            })
            .collect::<TrainResult<Vec<usize>>>()?;
        let leading_dimension_is_batch = !shape.is_empty();
        Ok(NamedTensorDescriptor::new(name, shape, leading_dimension_is_batch))
    }

    fn create(
        &self,
        data: *mut c_void,
        byte_len: usize,
        shape: &[i64],
        element_type: ElementType,
    ) -> TrainResult<OwnedValue> {
        let mut out: *mut RawValue = ptr::null_mut();
        self.engine.call("create_tensor", |api| unsafe {
            (api.create_tensor)(
                data,
                byte_len,
                shape.as_ptr(),
                shape.len(),
                element_type.code(),
                &mut out,
            )
        })?;
        unsafe { OwnedValue::from_raw(self.engine, out) }
            .ok_or_else(|| TrainError::protocol("tensor value", "null"))
    }

    fn dimensions(&self, raw: *const RawValue) -> TrainResult<Vec<usize>> {
        let mut rank = 0usize;
        self.engine.call("tensor_rank", |api| unsafe {
            (api.tensor_rank)(raw, &mut rank)
        })?;
        let mut dims = vec![0i64; rank];
        self.engine.call("tensor_dimensions", |api| unsafe {
            (api.tensor_dimensions)(raw, dims.as_mut_ptr(), rank)
        })?;
        dims.into_iter()
            .map(|dim| {
                usize::try_from(dim).map_err(|_| TrainError::codec(format!("negative dimension {dim}")))
            })
            .collect()
    }
}

unsafe fn copy_out<T: Copy>(data: *const c_void, shape: &[usize], len: usize) -> TrainResult<ArrayD<T>> {
    let values = if len == 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(data as *const T, len).to_vec()
    };
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|err| TrainError::codec(err.to_string()))
}
