//! Host-side bridge to a foreign training engine.
//!
//! Owns the engine's parameter set, translates named tensors across the
//! boundary and dispatches the engine's synchronous callbacks to local
//! observers.
pub mod api;
pub mod boundary;
pub mod common;
pub mod dispatch;
pub mod ledger;
pub mod params;
pub mod session;
pub mod values;


pub use boundary::{Engine, EngineHandle};
pub use common::{TrainCode, TrainError, TrainResult};
pub use dispatch::{BatchRequest, Diagnostic, ErrorReport, EvaluationTick, SlotKind, SlotPhase};
pub use params::{ParameterStore, TrainingPlan};
pub use session::{SessionState, TrainingSession};
pub use values::{NamedTensor, NamedTensorDescriptor, TensorData};

/// Install the bridge's log subscriber with configuration from the
/// environment. Returns `false` if the host already installed one.
pub fn init_logging() -> bool {
    common::log::init(&common::config::BridgeCfg::load())
}
