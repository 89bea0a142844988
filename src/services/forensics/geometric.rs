// Geometric Anomaly Expert (multiLID)
// Compares per-layer intrinsic dimensionality against authentic-image references

use super::error::ForensicsError;
use super::lid::estimate_single;
use super::sigmoid;
use crate::models::{ExpertFinding, LayerEmbedding, ReferenceStatistics};
use crate::services::config_store::GeometricConfig;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const GEOMETRIC_EXPERT: &str = "multiLID";

#[derive(Debug, Clone, PartialEq)]
struct LayerScore {
    key: String,
    lid: f64,
    ref_mean: f64,
    ref_std: f64,
    z: f64,
}

pub struct GeometricAnomalyExpert {
    config: GeometricConfig,
    references: Arc<ReferenceStatistics>,
}

impl GeometricAnomalyExpert {
    pub fn new(config: GeometricConfig, references: Arc<ReferenceStatistics>) -> Self {
        Self { config, references }
    }

    /// Built-in reference table, replaced by the configured file when present.
    pub fn from_config(config: &GeometricConfig) -> Result<Self, ForensicsError> {
        let references = match &config.reference_stats_path {
            Some(path) => {
                let stats = ReferenceStatistics::load(path).map_err(ForensicsError::Config)?;
                info!("[MULTILID] Loaded {} reference layers from {}", stats.len(), path.display());
                stats
            }
            None => ReferenceStatistics::default(),
        };
        Ok(Self::new(config.clone(), Arc::new(references)))
    }

    pub fn k_neighbors(&self) -> usize {
        self.config.k_neighbors
    }

    /// Never fails: numerical problems come back as a degraded finding.
    pub fn analyze(&self, intermediate: &[LayerEmbedding]) -> ExpertFinding {
        match self.try_analyze(intermediate) {
            Ok(finding) => finding,
            Err(e) => {
                warn!("[MULTILID] Analysis degraded: {}", e);
                ExpertFinding::degraded(GEOMETRIC_EXPERT, &e.to_string())
            }
        }
    }

    fn try_analyze(&self, intermediate: &[LayerEmbedding]) -> Result<ExpertFinding, ForensicsError> {
        if intermediate.is_empty() {
            return Err(ForensicsError::ExpertComputation(
                "no intermediate embeddings".to_string(),
            ));
        }

        let mut layers = Vec::with_capacity(intermediate.len());
        for embedding in intermediate {
            let key = embedding.key();
            let estimate = estimate_single(&embedding.values, self.config.k_neighbors)
                .map_err(|e| ForensicsError::ExpertComputation(format!("{}: {}", key, e)))?;
            let reference = self.references.get(&key);
            let z = (estimate.mean - reference.mean) / reference.std;
            if !z.is_finite() {
                return Err(ForensicsError::ExpertComputation(format!(
                    "{}: non-finite z-score",
                    key
                )));
            }
            layers.push(LayerScore {
                key,
                lid: estimate.mean,
                ref_mean: reference.mean,
                ref_std: reference.std,
                z,
            });
        }

        let n = layers.len() as f64;
        let mean_z = layers.iter().map(|l| l.z).sum::<f64>() / n;
        let max_abs_z = layers.iter().map(|l| l.z.abs()).fold(0.0, f64::max);
        let z_std = (layers.iter().map(|l| (l.z - mean_z).powi(2)).sum::<f64>() / n).sqrt();

        let base_score = sigmoid(-mean_z - 1.0);
        let score = if max_abs_z > self.config.high_confidence_z {
            base_score.max(0.75)
        } else if max_abs_z > self.config.anomalous_z {
            base_score.max(0.5)
        } else {
            base_score
        };

        let confidence = if z_std < 1.0 {
            0.9
        } else if z_std < 2.0 {
            0.7
        } else {
            0.5
        };

        let n_anomalous = layers
            .iter()
            .filter(|l| l.z.abs() > self.config.anomalous_z)
            .count();

        let mut evidence = Vec::with_capacity(layers.len() + 1);
        evidence.push(if n_anomalous > 0 {
            format!(
                "🔬 Dimensional analysis: {}/{} layers anomalous (|z| > {:.1})",
                n_anomalous,
                layers.len(),
                self.config.anomalous_z
            )
        } else {
            format!(
                "🔬 Dimensional analysis: all {} layers within the authentic range",
                layers.len()
            )
        });
        for layer in &layers {
            let marker = if layer.z.abs() > self.config.anomalous_z { " ⚠️" } else { "" };
            evidence.push(format!(
                "{}: LID={:.2} (ref {:.2}), z={:+.2}{}",
                layer.key, layer.lid, layer.ref_mean, layer.z, marker
            ));
        }

        let mut per_layer = Map::new();
        for layer in &layers {
            per_layer.insert(
                layer.key.clone(),
                json!({
                    "lid": layer.lid,
                    "ref_mean": layer.ref_mean,
                    "ref_std": layer.ref_std,
                    "z_score": layer.z,
                    "anomalous": layer.z.abs() > self.config.anomalous_z,
                }),
            );
        }
        let mut raw_data = Map::new();
        raw_data.insert("per_layer".to_string(), Value::Object(per_layer));
        raw_data.insert(
            "summary".to_string(),
            json!({
                "mean_z": mean_z,
                "max_abs_z": max_abs_z,
                "z_std": z_std,
                "n_anomalous": n_anomalous,
                "base_score": base_score,
                "k_neighbors": self.config.k_neighbors,
            }),
        );

        info!(
            "[MULTILID] score={:.3} confidence={:.2} mean_z={:+.2} anomalous={}/{}",
            score,
            confidence,
            mean_z,
            n_anomalous,
            layers.len()
        );

        Ok(ExpertFinding::new(GEOMETRIC_EXPERT, score, confidence, evidence, raw_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{layer_key, LidReference};
    use crate::services::forensics::lid::estimate_single;
    use std::collections::BTreeMap;

    fn embedding(layer: usize, phase: f64) -> LayerEmbedding {
        let values = (0..768)
            .map(|i| ((i as f64 * 0.29 + phase).sin() * (1.0 + (i % 5) as f64 * 0.2)) as f32)
            .collect();
        LayerEmbedding { layer, values }
    }

    fn layers() -> Vec<LayerEmbedding> {
        vec![embedding(6, 0.1), embedding(8, 0.7), embedding(10, 1.9), embedding(11, 2.3)]
    }

    /// References centered on each layer's own LID, shifted by `z` standard deviations.
    fn centered_references(layers: &[LayerEmbedding], z: f64) -> ReferenceStatistics {
        let map: BTreeMap<String, LidReference> = layers
            .iter()
            .map(|l| {
                let lid = estimate_single(&l.values, 20).unwrap().mean;
                (layer_key(l.layer), LidReference { mean: lid - z, std: 1.0 })
            })
            .collect();
        ReferenceStatistics::from_map(map).unwrap()
    }

    fn expert(references: ReferenceStatistics) -> GeometricAnomalyExpert {
        GeometricAnomalyExpert::new(GeometricConfig::default(), Arc::new(references))
    }

    #[test]
    fn test_centered_layers_score_low() {
        let input = layers();
        let finding = expert(centered_references(&input, 0.0)).analyze(&input);
        assert!((finding.score - sigmoid(-1.0)).abs() < 1e-9);
        assert_eq!(finding.confidence, 0.9);
        assert!(!finding.is_degraded());
        assert_eq!(finding.evidence.len(), 5);
        assert!(finding.evidence[0].contains("within the authentic range"));
    }

    #[test]
    fn test_deterministic() {
        let input = layers();
        let e = expert(ReferenceStatistics::default());
        assert_eq!(e.analyze(&input), e.analyze(&input));
    }

    #[test]
    fn test_bounds_with_default_references() {
        let finding = expert(ReferenceStatistics::default()).analyze(&layers());
        assert!((0.0..=1.0).contains(&finding.score));
        assert!((0.0..=1.0).contains(&finding.confidence));
        assert!(finding.raw_data.contains_key("per_layer"));
        assert!(finding.raw_data.contains_key("summary"));
    }

    #[test]
    fn test_strong_anomaly_raises_floor() {
        // Large positive z pushes the sigmoid down; the |z| > 3 floor lifts it back.
        let input = layers();
        let finding = expert(centered_references(&input, 4.0)).analyze(&input);
        assert_eq!(finding.score, 0.75);
        assert!(finding.evidence[0].contains("4/4 layers anomalous"));
    }

    #[test]
    fn test_moderate_anomaly_floor() {
        let input = layers();
        let finding = expert(centered_references(&input, 2.5)).analyze(&input);
        assert_eq!(finding.score, 0.5);
    }

    #[test]
    fn test_degenerate_layer_degrades() {
        let input = vec![LayerEmbedding { layer: 6, values: vec![0.5; 768] }];
        let finding = expert(ReferenceStatistics::default()).analyze(&input);
        assert_eq!(finding.score, 0.5);
        assert_eq!(finding.confidence, 0.1);
        assert!(finding.is_degraded());
    }

    #[test]
    fn test_empty_input_degrades() {
        let finding = expert(ReferenceStatistics::default()).analyze(&[]);
        assert!(finding.is_degraded());
    }

    #[test]
    fn test_from_config_loads_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(&path, r#"{"layer_6": {"mean": 11.0, "std": 2.0}}"#).unwrap();
        let config = GeometricConfig {
            reference_stats_path: Some(path),
            ..GeometricConfig::default()
        };
        let expert = GeometricAnomalyExpert::from_config(&config).unwrap();
        assert_eq!(expert.references.get("layer_6").mean, 11.0);
    }
}
