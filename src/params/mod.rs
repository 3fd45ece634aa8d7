//! Parameter set ownership, typed accessors and callback registration.

pub mod keys;
pub mod plan;
pub mod store;

pub use keys::{BoolKey, FloatKey, IntKey, LossFunctionKind, OptimizerKind, StringKey};
pub use plan::TrainingPlan;
pub use store::ParameterStore;
