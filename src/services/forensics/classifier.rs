// Visual Classifier Expert (UFD)
// Temperature-scaled linear probe over the final embedding, with weight-layout probing

use super::error::ForensicsError;
use super::sigmoid;
use crate::models::ExpertFinding;
use crate::services::config_store::ClassifierConfig;
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tracing::{info, warn};

pub const VISUAL_EXPERT: &str = "UFD";

/// Confidence multiplier while running without trained weights.
const UNCALIBRATED_PENALTY: f64 = 0.8;
const INIT_SEED: u64 = 42;

// ============ Weights ============

/// On-disk layouts probed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    FcPrefixed,
    Plain,
    ModelFcPrefixed,
    RawTensor,
}

impl WeightLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FcPrefixed => "fc.weight/fc.bias",
            Self::Plain => "weight/bias",
            Self::ModelFcPrefixed => "model.fc.weight/model.fc.bias",
            Self::RawTensor => "raw_tensor",
        }
    }
}

const KEYED_LAYOUTS: [(WeightLayout, &str, &str); 3] = [
    (WeightLayout::FcPrefixed, "fc.weight", "fc.bias"),
    (WeightLayout::Plain, "weight", "bias"),
    (WeightLayout::ModelFcPrefixed, "model.fc.weight", "model.fc.bias"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightsStatus {
    LoadedFromFile(WeightLayout),
    CalibratedInit,
}

impl WeightsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadedFromFile(_) => "loaded_from_file",
            Self::CalibratedInit => "calibrated_init",
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::LoadedFromFile(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearWeights {
    pub weight: Vec<f64>,
    pub bias: f64,
}

impl LinearWeights {
    pub fn new(weight: Vec<f64>, bias: f64) -> Self {
        Self { weight, bias }
    }

    pub fn dim(&self) -> usize {
        self.weight.len()
    }

    pub fn logit(&self, x: &[f32]) -> Result<f64, ForensicsError> {
        if x.len() != self.weight.len() {
            return Err(ForensicsError::ExpertComputation(format!(
                "embedding dimension {} does not match classifier dimension {}",
                x.len(),
                self.weight.len()
            )));
        }
        let logit = self
            .weight
            .iter()
            .zip(x)
            .map(|(w, &v)| w * v as f64)
            .sum::<f64>()
            + self.bias;
        if !logit.is_finite() {
            return Err(ForensicsError::ExpertComputation("non-finite logit".to_string()));
        }
        Ok(logit)
    }

    /// Xavier-normal weights from a fixed seed. The negative bias keeps a
    /// neutral embedding below 0.5.
    pub fn calibrated_init(dim: usize, gain: f64, bias: f64) -> Self {
        // fan_in = dim, fan_out = 1
        let std = gain * (2.0 / (dim as f64 + 1.0)).sqrt();
        let weight = (0..dim).map(|i| std * gaussian(i as u64, INIT_SEED)).collect();
        Self { weight, bias }
    }

    /// Probe a parsed state mapping for a usable layout.
    pub fn from_state(state: &Value, dim: usize) -> Option<(Self, WeightLayout)> {
        if let Value::Array(_) = state {
            return flatten(state)
                .filter(|w| w.len() == dim)
                .map(|w| (Self::new(w, 0.0), WeightLayout::RawTensor));
        }

        let map = state.as_object()?;
        for (layout, weight_key, bias_key) in KEYED_LAYOUTS {
            let (Some(weight), Some(bias)) = (map.get(weight_key), map.get(bias_key)) else {
                continue;
            };
            match (flatten(weight), scalar(bias)) {
                (Some(w), Some(b)) if w.len() == dim => {
                    return Some((Self::new(w, b), layout));
                }
                (Some(w), _) => {
                    warn!(
                        "[UFD] Layout {} present but unusable (weight len {}, expected {})",
                        layout.as_str(),
                        w.len(),
                        dim
                    );
                }
                _ => warn!("[UFD] Layout {} present but not numeric", layout.as_str()),
            }
        }

        if map.len() == 1 {
            if let Some(w) = map.values().next().and_then(flatten) {
                if w.len() == dim {
                    return Some((Self::new(w, 0.0), WeightLayout::RawTensor));
                }
            }
        }
        None
    }
}

/// Read a JSON weights file. A missing file is not an error.
pub fn load_weights(path: &Path, dim: usize) -> Result<Option<(LinearWeights, WeightLayout)>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read classifier weights: {}", e))?;
    let state: Value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse classifier weights: {}", e))?;
    Ok(LinearWeights::from_state(&state, dim))
}

/// Tensor as nested arrays, shape (dim) or (1, dim).
fn flatten(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => {
            if items.len() == 1 && items[0].is_array() {
                return flatten(&items[0]);
            }
            items.iter().map(Value::as_f64).collect()
        }
        _ => None,
    }
}

fn scalar(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) if items.len() == 1 => scalar(&items[0]),
        _ => None,
    }
}

/// Deterministic uniform in (0, 1) from a hash of index and seed.
fn deterministic_uniform(index: u64, seed: u64, salt: u64) -> f64 {
    let mut hasher = DefaultHasher::new();
    index.hash(&mut hasher);
    seed.hash(&mut hasher);
    salt.hash(&mut hasher);
    let hash = hasher.finish();
    ((hash >> 11) as f64 + 0.5) / (1u64 << 53) as f64
}

/// Standard normal sample via Box-Muller.
fn gaussian(index: u64, seed: u64) -> f64 {
    let u1 = deterministic_uniform(index, seed, 1);
    let u2 = deterministic_uniform(index, seed, 2);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

// ============ Expert ============

pub struct VisualClassifierExpert {
    weights: LinearWeights,
    status: WeightsStatus,
    temperature: f64,
}

impl VisualClassifierExpert {
    pub fn new(weights: LinearWeights, status: WeightsStatus, temperature: f64) -> Self {
        Self {
            weights,
            status,
            temperature,
        }
    }

    /// Load trained weights when available, otherwise fall back to the calibrated init.
    pub fn from_config(config: &ClassifierConfig, dim: usize) -> Self {
        let loaded = match load_weights(&config.weights_path, dim) {
            Ok(found) => found,
            Err(e) => {
                warn!("[UFD] {}", e);
                None
            }
        };

        match loaded {
            Some((weights, layout)) => {
                info!(
                    "[UFD] Loaded weights from {} (layout: {})",
                    config.weights_path.display(),
                    layout.as_str()
                );
                Self::new(weights, WeightsStatus::LoadedFromFile(layout), config.temperature)
            }
            None => {
                warn!(
                    "[UFD] No usable weights at {}, using calibrated initialization",
                    config.weights_path.display()
                );
                Self::new(
                    LinearWeights::calibrated_init(dim, config.init_gain, config.init_bias),
                    WeightsStatus::CalibratedInit,
                    config.temperature,
                )
            }
        }
    }

    pub fn status(&self) -> WeightsStatus {
        self.status
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Returns (probability, logit).
    pub fn score(&self, final_embedding: &[f32]) -> Result<(f64, f64), ForensicsError> {
        let logit = self.weights.logit(final_embedding)?;
        Ok((sigmoid(logit / self.temperature), logit))
    }

    pub fn analyze(&self, final_embedding: &[f32]) -> ExpertFinding {
        match self.try_analyze(final_embedding) {
            Ok(finding) => finding,
            Err(e) => {
                warn!("[UFD] Analysis degraded: {}", e);
                ExpertFinding::degraded(VISUAL_EXPERT, &e.to_string())
            }
        }
    }

    fn try_analyze(&self, final_embedding: &[f32]) -> Result<ExpertFinding, ForensicsError> {
        let (probability, logit) = self.score(final_embedding)?;
        let confidence = confidence_for(probability, logit, self.status.is_loaded());

        let mut evidence = vec![band_evidence(probability)];
        if !self.status.is_loaded() {
            evidence.push("⚠️ Visual classifier running with calibrated initialization (no trained weights)".to_string());
        }

        let mut raw_data = Map::new();
        raw_data.insert("logit".to_string(), Value::from(logit));
        raw_data.insert("probability".to_string(), Value::from(probability));
        raw_data.insert("temperature".to_string(), Value::from(self.temperature));
        raw_data.insert("weights_status".to_string(), Value::from(self.status.as_str()));
        if let WeightsStatus::LoadedFromFile(layout) = self.status {
            raw_data.insert("weights_layout".to_string(), Value::from(layout.as_str()));
        }

        info!(
            "[UFD] probability={:.3} logit={:+.3} confidence={:.2} weights={}",
            probability,
            logit,
            confidence,
            self.status.as_str()
        );

        Ok(ExpertFinding::new(VISUAL_EXPERT, probability, confidence, evidence, raw_data))
    }
}

/// Distance from 0.5 and logit magnitude, bounded to [0.1, 0.95] and
/// penalized when the weights are not trained.
pub fn confidence_for(probability: f64, logit: f64, loaded_from_file: bool) -> f64 {
    let separation = (probability - 0.5).abs() * 2.0;
    let magnitude = (logit.abs() / 2.0).min(1.0);
    let raw = (0.6 * separation + 0.4 * magnitude).clamp(0.1, 0.95);
    if loaded_from_file {
        raw
    } else {
        raw * UNCALIBRATED_PENALTY
    }
}

fn band_evidence(probability: f64) -> String {
    let pct = probability * 100.0;
    if probability > 0.70 {
        format!("🎨 High probability of generative visual artifacts (UFD: {:.1}%)", pct)
    } else if probability > 0.55 {
        format!("🎨 Moderate generative visual signal (UFD: {:.1}%)", pct)
    } else if probability > 0.45 {
        format!("🎨 Inconclusive visual signal (UFD: {:.1}%)", pct)
    } else if probability > 0.30 {
        format!("🎨 Low generative visual signal (UFD: {:.1}%)", pct)
    } else {
        format!("🎨 Very low generative visual signal (UFD: {:.1}%)", pct)
    }
}
