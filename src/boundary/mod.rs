//! Safe, ownership-aware wrappers over the raw engine surface.

pub mod alloc;
pub mod engine;
pub mod handle;

pub use alloc::{AllocatedStr, Allocator};
pub use engine::Engine;
pub use handle::{BoundaryHandle, EngineHandle};
