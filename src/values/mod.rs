//! Values crossing the boundary: collections, codec and local tensors.

pub mod codec;
pub mod collection;
pub mod tensor;
pub mod value;

pub use codec::NamedValueCodec;
pub use collection::ValueCollection;
pub use tensor::{ElementType, NamedTensor, NamedTensorDescriptor, TensorData};
pub use value::{OwnedValue, PinnedBuffer, ValueRef};
