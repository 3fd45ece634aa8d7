//! Local tensor values and shape descriptors.

use std::ffi::{c_int, c_void};

use ndarray::{Array, ArrayD, Dimension};

/// Element types that cross the boundary, with their stable codes.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ElementType {
    Float32 = 1,
    Uint8 = 2,
    Int32 = 6,
    Int64 = 7,
    Float64 = 11,
}

impl ElementType {
    /// Code passed across the boundary.
    pub fn code(self) -> c_int {
        self as c_int
    }

    /// `None` for codes this crate does not handle.
    pub fn from_code(code: c_int) -> Option<Self> {
        match code {
            1 => Some(ElementType::Float32),
            2 => Some(ElementType::Uint8),
            6 => Some(ElementType::Int32),
            7 => Some(ElementType::Int64),
            11 => Some(ElementType::Float64),
            _ => None,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::Uint8 => 1,
            ElementType::Float32 | ElementType::Int32 => 4,
            ElementType::Int64 | ElementType::Float64 => 8,
        }
    }
}

/// Strongly typed n-dimensional array held on the local side.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
}

macro_rules! dispatch {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            TensorData::Float32($arr) => $body,
            TensorData::Float64($arr) => $body,
            TensorData::Int32($arr) => $body,
            TensorData::Int64($arr) => $body,
            TensorData::Uint8($arr) => $body,
        }
    };
}

macro_rules! rebuild {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            TensorData::Float32($arr) => TensorData::Float32($body),
            TensorData::Float64($arr) => TensorData::Float64($body),
            TensorData::Int32($arr) => TensorData::Int32($body),
            TensorData::Int64($arr) => TensorData::Int64($body),
            TensorData::Uint8($arr) => TensorData::Uint8($body),
        }
    };
}

macro_rules! typed_access {
    ($($variant:ident => $ty:ty, $getter:ident);* $(;)?) => {
        $(
            impl<D: Dimension> From<Array<$ty, D>> for TensorData {
                fn from(array: Array<$ty, D>) -> Self {
                    TensorData::$variant(array.into_dyn())
                }
            }
        )*

        impl TensorData {
            $(
                /// The typed array, if the element type matches.
                pub fn $getter(&self) -> Option<&ArrayD<$ty>> {
                    match self {
                        TensorData::$variant(array) => Some(array),
                        _ => None,
                    }
                }
            )*
        }
    };
}

typed_access! {
    Float32 => f32, as_f32;
    Float64 => f64, as_f64;
    Int32 => i32, as_i32;
    Int64 => i64, as_i64;
    Uint8 => u8, as_u8;
}

impl TensorData {
    /// Element type of the held array.
    pub fn element_type(&self) -> ElementType {
        match self {
            TensorData::Float32(_) => ElementType::Float32,
            TensorData::Float64(_) => ElementType::Float64,
            TensorData::Int32(_) => ElementType::Int32,
            TensorData::Int64(_) => ElementType::Int64,
            TensorData::Uint8(_) => ElementType::Uint8,
        }
    }

    /// Dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        dispatch!(self, array => array.shape())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, array => array.len())
    }

    /// True when any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the elements in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().size()
    }

    /// Row-major contiguous copy, or `self` if already contiguous.
    pub(crate) fn into_standard_layout(self) -> Self {
        rebuild!(self, array => if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        })
    }

    /// Pointer to the first element. Only meaningful in standard layout.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        dispatch!(self, array => array.as_mut_ptr() as *mut c_void)
    }
}

/// A local tensor paired with its feed name.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub data: TensorData,
}

impl NamedTensor {
    /// Pair a name with any array convertible to [`TensorData`].
    pub fn new(name: impl Into<String>, data: impl Into<TensorData>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Declared input or output of the model, as reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedTensorDescriptor {
    pub name: String,
    pub shape: Vec<usize>,
    pub leading_dimension_is_batch: bool,
}

impl NamedTensorDescriptor {
    /// Descriptor with an explicit batch flag.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, leading_dimension_is_batch: bool) -> Self {
        Self {
            name: name.into(),
            shape,
            leading_dimension_is_batch,
        }
    }

    /// Leading dimension, when it denotes the batch.
    pub fn batch_size(&self) -> Option<usize> {
        if self.leading_dimension_is_batch {
            self.shape.first().copied()
        } else {
            None
        }
    }

    /// Shape of a single sample: batch dimension dropped, trailing ones trimmed.
    pub fn per_sample_shape(&self) -> Vec<usize> {
        let dims = match self.shape.split_first() {
            Some((_, rest)) if self.leading_dimension_is_batch => rest,
            _ => &self.shape[..],
        };
        let end = dims.iter().rposition(|&dim| dim != 1).map_or(0, |idx| idx + 1);
        dims[..end].to_vec()
    }
}
