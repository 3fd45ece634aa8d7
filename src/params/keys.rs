//! Parameter keys and enumerated configuration choices.
//!
//! Every enum here maps to a stable integer code on the engine side. Codes
//! coming back from the engine that are not listed are protocol errors;
//! they are never coerced to a default.

use std::ffi::c_int;

use serde::{Deserialize, Serialize};

use crate::common::error::{TrainError, TrainResult};

macro_rules! boundary_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i32)]
        #[derive(
            Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            /// Stable code passed across the boundary.
            pub fn code(self) -> c_int {
                self as c_int
            }

            /// Map a code read back from the engine; unknown codes are protocol errors.
            pub fn from_code(code: c_int) -> TrainResult<Self> {
                match code {
                    $($code => Ok($name::$variant),)*
                    other => Err(TrainError::protocol($what, other)),
                }
            }
        }
    };
}

boundary_enum! {
    /// String-valued training parameters.
    StringKey, "string parameter key" {
        ModelPath = 0,
        LogPath = 1,
        InputLabels = 2,
        OutputPredictions = 3,
        OutputLoss = 4,
    }
}

boundary_enum! {
    /// Boolean training parameters.
    BoolKey, "bool parameter key" {
        UseGist = 0,
        UseCuda = 1,
        UseProfiler = 2,
        UseTensorboard = 3,
        IsPerfTest = 4,
        ShuffleData = 5,
    }
}

boundary_enum! {
    /// 64-bit integer training parameters.
    IntKey, "int parameter key" {
        NumTrainSteps = 0,
        TrainBatchSize = 1,
        EvalBatchSize = 2,
        EvalPeriod = 3,
        DisplayLossSteps = 4,
    }
}

boundary_enum! {
    /// Double-precision training parameters.
    FloatKey, "float parameter key" {
        LearningRate = 0,
    }
}

boundary_enum! {
    /// Optimizer the engine should use.
    OptimizerKind, "optimizer" {
        Sgd = 0,
        Adam = 1,
        Lamb = 2,
    }
}

boundary_enum! {
    /// Loss function the engine should use.
    LossFunctionKind, "loss function" {
        SoftmaxCrossEntropy = 0,
        MeanSquaredError = 1,
    }
}
