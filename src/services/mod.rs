// Forense AI Core Services

pub mod config_store;
pub mod forensics;
pub mod providers;

pub use config_store::*;
pub use providers::*;

pub use forensics::{
    CancellationToken,
    ForensicsError,
    ForensicsPipeline,
    FusionEngine,
    GeometricAnomalyExpert,
    SemanticJudgeExpert,
    VisualClassifierExpert,
    Zone,
};
