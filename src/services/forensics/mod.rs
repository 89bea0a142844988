// Image Forensics Module
// Multi-expert synthetic image detection: backbone, experts, zones and fusion

pub mod backbone;
pub mod cancellation;
pub mod classifier;
pub mod error;
pub mod fusion;
pub mod geometric;
pub mod lid;
pub mod pipeline;
pub mod preprocess;
pub mod red_flags;
pub mod semantic;
pub mod zones;

#[cfg(test)]
pub(crate) mod test_support;

pub use backbone::{ClipOnnxBackbone, FeatureBackbone};
pub use cancellation::CancellationToken;
pub use classifier::{LinearWeights, VisualClassifierExpert, WeightLayout, WeightsStatus};
pub use error::ForensicsError;
pub use fusion::{BinaryPolicy, FusionEngine, FusionPolicy, TieredPolicy};
pub use geometric::GeometricAnomalyExpert;
pub use lid::{estimate_batch, estimate_single, LidError, LidEstimate};
pub use pipeline::ForensicsPipeline;
pub use red_flags::RedFlag;
pub use semantic::{JudgeOutcome, JudgeStatus, JudgeTransport, SemanticJudgeExpert};
pub use zones::Zone;

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
