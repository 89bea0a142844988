// Test Fixtures
// In-memory backbone, scripted judge transport and reference builders

use super::backbone::FeatureBackbone;
use super::error::ForensicsError;
use super::lid::estimate_single;
use super::semantic::JudgeTransport;
use crate::models::{layer_key, BackboneOutput, LayerEmbedding, LidReference, ReferenceStatistics};
use crate::services::config_store::JudgeConfig;
use crate::services::providers::ProviderError;
use image::DynamicImage;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const DIM: usize = 768;
pub const LAYERS: [usize; 4] = [6, 8, 10, 11];

// ============ Backbones ============

pub struct StaticBackbone {
    output: BackboneOutput,
    layers: Vec<usize>,
}

impl StaticBackbone {
    pub fn new(output: BackboneOutput) -> Self {
        let layers = output.intermediate.iter().map(|l| l.layer).collect();
        Self { output, layers }
    }
}

impl FeatureBackbone for StaticBackbone {
    fn embed(&self, _image: &DynamicImage) -> Result<BackboneOutput, ForensicsError> {
        Ok(self.output.clone())
    }

    fn layers(&self) -> &[usize] {
        &self.layers
    }

    fn name(&self) -> String {
        "static".to_string()
    }
}

pub struct MissingBackbone;

impl FeatureBackbone for MissingBackbone {
    fn embed(&self, _image: &DynamicImage) -> Result<BackboneOutput, ForensicsError> {
        Err(ForensicsError::backbone("weights not found"))
    }

    fn layers(&self) -> &[usize] {
        &LAYERS
    }

    fn name(&self) -> String {
        "missing".to_string()
    }
}

pub fn layer_embeddings() -> Vec<LayerEmbedding> {
    LAYERS
        .iter()
        .enumerate()
        .map(|(i, &layer)| LayerEmbedding {
            layer,
            values: (0..DIM)
                .map(|j| {
                    let phase = i as f64 * 0.9;
                    ((j as f64 * 0.31 + phase).sin() * (1.0 + (j % 6) as f64 * 0.15)) as f32
                })
                .collect(),
        })
        .collect()
}

pub fn backbone_output() -> BackboneOutput {
    let raw: Vec<f32> = (0..DIM).map(|j| ((j as f32) * 0.01).cos()).collect();
    BackboneOutput {
        final_embedding: super::backbone::l2_normalize(raw),
        intermediate: layer_embeddings(),
    }
}

/// References that put every layer exactly `z` standard deviations above its mean.
pub fn references_with_z(layers: &[LayerEmbedding], k: usize, z: f64) -> ReferenceStatistics {
    let map: BTreeMap<String, LidReference> = layers
        .iter()
        .map(|l| {
            let lid = estimate_single(&l.values, k).map(|e| e.mean).unwrap_or(10.0);
            (layer_key(l.layer), LidReference { mean: lid - z, std: 1.0 })
        })
        .collect();
    ReferenceStatistics::from_map(map).unwrap_or_default()
}

// ============ Judge ============

pub enum Step {
    Raw(String),
    Fail,
    Hang,
}

impl Step {
    pub fn reply(score: f64, reasoning: &str) -> Self {
        Step::Raw(format!(
            "<think>weighing the evidence</think>\n{{\"ai_probability_score\": {}, \"reasoning\": \"{}\"}}",
            score, reasoning
        ))
    }
}

/// Plays back a fixed sequence of responses; an exhausted script fails.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl JudgeTransport for ScriptedTransport {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            steps.pop_front()
        };
        match step.unwrap_or(Step::Fail) {
            Step::Raw(text) => Ok(text),
            Step::Fail => Err(ProviderError::ApiError {
                status: 503,
                message: "model loading".to_string(),
            }),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(ProviderError::MissingContent)
            }
        }
    }
}

pub fn fast_judge_config() -> JudgeConfig {
    JudgeConfig {
        timeout_ms: 40,
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        ..JudgeConfig::default()
    }
}
