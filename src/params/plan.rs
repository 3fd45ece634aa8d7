//! Training plan: a JSON document describing a full parameter set.
//!
//! ```json
//! {
//!   "strings": { "model_path": "mnist.onnx", "input_labels": "labels" },
//!   "ints": { "num_train_steps": 1000, "train_batch_size": 32 },
//!   "floats": { "learning_rate": 0.01 },
//!   "optimizer": "adam",
//!   "loss_function": "softmax_cross_entropy",
//!   "feeds": ["X", "labels"]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::error::{TrainError, TrainResult};

use super::keys::{BoolKey, FloatKey, IntKey, LossFunctionKind, OptimizerKind, StringKey};
use super::store::ParameterStore;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingPlan {
    #[serde(default)]
    pub strings: BTreeMap<StringKey, String>,
    #[serde(default)]
    pub bools: BTreeMap<BoolKey, bool>,
    #[serde(default)]
    pub ints: BTreeMap<IntKey, i64>,
    #[serde(default)]
    pub floats: BTreeMap<FloatKey, f64>,
    #[serde(default)]
    pub optimizer: Option<OptimizerKind>,
    #[serde(default)]
    pub loss_function: Option<LossFunctionKind>,
    /// Data feed names, in the order batches are written.
    #[serde(default)]
    pub feeds: Vec<String>,
}

impl TrainingPlan {
    /// Parse a plan; unknown keys are rejected.
    pub fn from_json(raw: &str) -> TrainResult<Self> {
        serde_json::from_str(raw).map_err(|err| TrainError::invalid(format!("training plan: {err}")))
    }

    /// Push every parameter of the plan to `store`, stopping at the first
    /// rejection. Feeds are not registered here.
    pub fn apply(&self, store: &ParameterStore) -> TrainResult<()> {
        for (key, value) in &self.strings {
            store.set_string(*key, value)?;
        }
        for (key, value) in &self.bools {
            store.set_bool(*key, *value)?;
        }
        for (key, value) in &self.ints {
            store.set_int(*key, *value)?;
        }
        for (key, value) in &self.floats {
            store.set_float(*key, *value)?;
        }
        if let Some(kind) = self.optimizer {
            store.set_optimizer(kind)?;
        }
        if let Some(kind) = self.loss_function {
            store.set_loss_function(kind)?;
        }
        debug!(
            parameters = self.strings.len() + self.bools.len() + self.ints.len() + self.floats.len(),
            "applied training plan"
        );
        Ok(())
    }
}
