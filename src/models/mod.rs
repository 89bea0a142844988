// Forense AI Data Models
// Findings, reference statistics and the final verdict shared by every expert

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ============ Expert Findings ============

/// Output of a single expert. Scores run from 0 (authentic) to 1 (synthetic).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpertFinding {
    pub name: String,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub raw_data: Map<String, Value>,
}

impl ExpertFinding {
    pub fn new(
        name: impl Into<String>,
        score: f64,
        confidence: f64,
        evidence: Vec<String>,
        raw_data: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            score: clamp_unit(score),
            confidence: clamp_unit(confidence),
            evidence,
            raw_data,
        }
    }

    /// Neutral finding used when an expert fails mid-analysis.
    pub fn degraded(name: impl Into<String>, error: &str) -> Self {
        let mut raw_data = Map::new();
        raw_data.insert("error".to_string(), Value::String(error.to_string()));
        Self {
            name: name.into(),
            score: NEUTRAL_SCORE,
            confidence: DEGRADED_CONFIDENCE,
            evidence: vec![format!("⚠️ Analysis error: {}", error)],
            raw_data,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.raw_data.contains_key("error")
    }

    pub fn raw_str(&self, key: &str) -> Option<&str> {
        self.raw_data.get(key).and_then(Value::as_str)
    }
}

pub const NEUTRAL_SCORE: f64 = 0.5;
pub const DEGRADED_CONFIDENCE: f64 = 0.1;

/// Clamp into [0, 1]; NaN collapses to the neutral score.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL_SCORE
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============ Backbone Output ============

/// Class-token embedding taken at one transformer depth.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEmbedding {
    pub layer: usize,
    pub values: Vec<f32>,
}

impl LayerEmbedding {
    pub fn key(&self) -> String {
        layer_key(self.layer)
    }
}

pub fn layer_key(layer: usize) -> String {
    format!("layer_{}", layer)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackboneOutput {
    /// L2-normalized pooled embedding.
    pub final_embedding: Vec<f32>,
    pub intermediate: Vec<LayerEmbedding>,
}

// ============ Reference Statistics ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LidReference {
    pub mean: f64,
    pub std: f64,
}

/// Intrinsic-dimensionality statistics of authentic images, keyed by layer.
/// Built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceStatistics {
    layers: BTreeMap<String, LidReference>,
}

pub const FALLBACK_REFERENCE: LidReference = LidReference { mean: 10.0, std: 3.0 };

impl Default for ReferenceStatistics {
    fn default() -> Self {
        let layers = [
            (6, 15.2, 3.8),
            (8, 12.4, 3.2),
            (10, 9.8, 2.9),
            (11, 8.1, 2.5),
        ]
        .into_iter()
        .map(|(layer, mean, std)| (layer_key(layer), LidReference { mean, std }))
        .collect();
        Self { layers }
    }
}

impl ReferenceStatistics {
    pub fn from_map(layers: BTreeMap<String, LidReference>) -> Result<Self, String> {
        for (key, reference) in &layers {
            if !(reference.std > 0.0) || !reference.mean.is_finite() {
                return Err(format!(
                    "Invalid reference for {}: mean={} std={}",
                    key, reference.mean, reference.std
                ));
            }
        }
        Ok(Self { layers })
    }

    /// Load a `{"layer_6": {"mean": .., "std": ..}, ...}` table from disk.
    pub fn load(path: &std::path::Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read reference statistics: {}", e))?;
        let layers: BTreeMap<String, LidReference> = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse reference statistics: {}", e))?;
        Self::from_map(layers)
    }

    pub fn get(&self, layer_key: &str) -> LidReference {
        self.layers.get(layer_key).copied().unwrap_or(FALLBACK_REFERENCE)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

// ============ Verdict ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    IaConfirmed,
    IaProbable,
    Inconclusive,
    RealProbable,
    RealConfirmed,
    Error,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::IaConfirmed => "AI-GENERATED / SYNTHETIC",
            Self::IaProbable => "PROBABLY SYNTHETIC",
            Self::Inconclusive => "REQUIRES MANUAL VERIFICATION",
            Self::RealProbable => "PROBABLY REAL",
            Self::RealConfirmed => "COMPATIBLE WITH REAL PHOTOGRAPH",
            Self::Error => "ERROR — analysis could not be completed",
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::IaConfirmed | Self::IaProbable)
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Self::RealProbable | Self::RealConfirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl ConfidenceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::NotApplicable => "N/A",
        }
    }
}

/// Fused result of one analysis. `scores["unified"]` is the raw analytical
/// score; display-safe percentages are derived only in `VerdictPayload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForensicVerdict {
    pub analysis_id: String,
    pub verdict: Verdict,
    pub confidence: ConfidenceLabel,
    pub scores: BTreeMap<String, f64>,
    pub evidence: Vec<String>,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

pub const UNIFIED_KEY: &str = "unified";

impl ForensicVerdict {
    pub fn unified(&self) -> f64 {
        self.scores.get(UNIFIED_KEY).copied().unwrap_or(NEUTRAL_SCORE)
    }

    /// Terminal result when the pipeline cannot run at all.
    pub fn error(analysis_id: impl Into<String>, reason: &str) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            verdict: Verdict::Error,
            confidence: ConfidenceLabel::NotApplicable,
            scores: BTreeMap::new(),
            evidence: vec![format!("⚠️ Error during analysis: {}", reason)],
            notes: "The analysis could not be completed. Check that the image is valid and the models are available."
                .to_string(),
            zone: None,
            policy: None,
        }
    }
}

// ============ Serialized Result ============

/// Display bounds keeping the shown percentage consistent with the verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayBounds {
    #[serde(default = "default_synthetic_floor")]
    pub synthetic_floor: f64,
    #[serde(default = "default_synthetic_rescue")]
    pub synthetic_rescue: f64,
    #[serde(default = "default_real_ceiling")]
    pub real_ceiling: f64,
    #[serde(default = "default_inconclusive_pin")]
    pub inconclusive_pin: f64,
}

impl Default for DisplayBounds {
    fn default() -> Self {
        Self {
            synthetic_floor: default_synthetic_floor(),
            synthetic_rescue: default_synthetic_rescue(),
            real_ceiling: default_real_ceiling(),
            inconclusive_pin: default_inconclusive_pin(),
        }
    }
}

fn default_synthetic_floor() -> f64 { 0.85 }
fn default_synthetic_rescue() -> f64 { 0.95 }
fn default_real_ceiling() -> f64 { 0.20 }
fn default_inconclusive_pin() -> f64 { 0.50 }

impl DisplayBounds {
    pub fn display_score(&self, verdict: Verdict, raw: f64) -> f64 {
        let raw = clamp_unit(raw);
        if verdict.is_synthetic() {
            if raw < 0.5 {
                self.synthetic_rescue
            } else {
                raw.max(self.synthetic_floor)
            }
        } else if verdict.is_real() {
            raw.min(self.real_ceiling)
        } else {
            self.inconclusive_pin
        }
    }
}

/// Wire shape consumed by the API/UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictPayload {
    pub analysis_id: String,
    pub analyzed_at: String,
    pub verdict: String,
    pub verdict_code: Verdict,
    pub confidence: String,
    pub ai_probability: f64,
    pub real_probability: f64,
    pub raw_ai_probability: f64,
    pub scores: BTreeMap<String, f64>,
    pub evidence: Vec<String>,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl VerdictPayload {
    pub fn from_verdict(result: &ForensicVerdict, bounds: &DisplayBounds) -> Self {
        let raw = result.unified();
        let display = bounds.display_score(result.verdict, raw);
        let ai_probability = round1(display * 100.0);
        Self {
            analysis_id: result.analysis_id.clone(),
            analyzed_at: chrono::Utc::now().to_rfc3339(),
            verdict: result.verdict.label().to_string(),
            verdict_code: result.verdict,
            confidence: result.confidence.as_str().to_string(),
            ai_probability,
            real_probability: round1(100.0 - ai_probability),
            raw_ai_probability: round1(raw * 100.0),
            scores: result.scores.clone(),
            evidence: result.evidence.clone(),
            notes: result.notes.clone(),
            zone: result.zone.clone(),
            policy: result.policy.clone(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============ Component Info ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub version: String,
    pub backbone: String,
    pub layers: Vec<usize>,
    pub k_neighbors: usize,
    pub classifier_weights: String,
    pub classifier_temperature: f64,
    pub judge_model: Option<String>,
    pub fusion_policy: String,
    pub fusion_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict_with(verdict: Verdict, unified: f64) -> ForensicVerdict {
        let mut scores = BTreeMap::new();
        scores.insert(UNIFIED_KEY.to_string(), unified);
        ForensicVerdict {
            analysis_id: "test".to_string(),
            verdict,
            confidence: ConfidenceLabel::High,
            scores,
            evidence: vec![],
            notes: String::new(),
            zone: None,
            policy: None,
        }
    }

    #[test]
    fn test_finding_clamps_scores() {
        let finding = ExpertFinding::new("x", 1.7, f64::NAN, vec![], Map::new());
        assert_eq!(finding.score, 1.0);
        assert_eq!(finding.confidence, NEUTRAL_SCORE);
    }

    #[test]
    fn test_degraded_finding() {
        let finding = ExpertFinding::degraded("multiLID", "boom");
        assert_eq!(finding.score, 0.5);
        assert_eq!(finding.confidence, 0.1);
        assert!(finding.is_degraded());
        assert!(finding.evidence[0].contains("boom"));
    }

    #[test]
    fn test_reference_fallback_for_unknown_layer() {
        let stats = ReferenceStatistics::default();
        assert_eq!(stats.get("layer_6").mean, 15.2);
        assert_eq!(stats.get("layer_3"), FALLBACK_REFERENCE);
    }

    #[test]
    fn test_reference_rejects_zero_std() {
        let mut layers = BTreeMap::new();
        layers.insert("layer_6".to_string(), LidReference { mean: 1.0, std: 0.0 });
        assert!(ReferenceStatistics::from_map(layers).is_err());
    }

    #[test]
    fn test_payload_floors_synthetic() {
        let payload = VerdictPayload::from_verdict(
            &verdict_with(Verdict::IaProbable, 0.62),
            &DisplayBounds::default(),
        );
        assert_eq!(payload.ai_probability, 85.0);
        assert_eq!(payload.real_probability, 15.0);
        assert_eq!(payload.raw_ai_probability, 62.0);
    }

    #[test]
    fn test_payload_rescues_inconsistent_synthetic() {
        let payload = VerdictPayload::from_verdict(
            &verdict_with(Verdict::IaConfirmed, 0.3),
            &DisplayBounds::default(),
        );
        assert_eq!(payload.ai_probability, 95.0);
    }

    #[test]
    fn test_payload_caps_real_and_pins_inconclusive() {
        let bounds = DisplayBounds::default();
        let real = VerdictPayload::from_verdict(&verdict_with(Verdict::RealProbable, 0.41), &bounds);
        assert_eq!(real.ai_probability, 20.0);
        assert_eq!(real.real_probability, 80.0);

        let unsure = VerdictPayload::from_verdict(&verdict_with(Verdict::Inconclusive, 0.58), &bounds);
        assert_eq!(unsure.ai_probability, 50.0);
        assert_eq!(unsure.raw_ai_probability, 58.0);
    }

    #[test]
    fn test_error_verdict_shape() {
        let result = ForensicVerdict::error("id-1", "weights missing");
        let payload = VerdictPayload::from_verdict(&result, &DisplayBounds::default());
        assert_eq!(payload.confidence, "N/A");
        assert_eq!(payload.verdict, "ERROR — analysis could not be completed");
        assert_eq!(payload.ai_probability, 50.0);
    }
}
