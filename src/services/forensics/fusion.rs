// Fusion Engine
// Reconciles the three expert findings into one verdict under a named policy

use super::error::ForensicsError;
use super::red_flags;
use super::semantic::is_available;
use super::zones::{self, Zone};
use crate::models::{ConfidenceLabel, ExpertFinding, ForensicVerdict, Verdict, UNIFIED_KEY};
use crate::services::config_store::{FusionConfig, ZoneConfig};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

// ============ Policies ============

/// Maps a unified score to a verdict. Policies are versioned so threshold
/// schemes can be swapped without touching the engine.
pub trait FusionPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn decide(&self, unified: f64) -> (Verdict, ConfidenceLabel);
}

/// Five-way scheme with an explicit inconclusive band. Every decided tier is
/// HIGH; only the inconclusive band reports LOW.
#[derive(Debug, Clone, PartialEq)]
pub struct TieredPolicy {
    pub confirmed_synthetic: f64,
    pub synthetic: f64,
    pub real: f64,
    pub confirmed_real: f64,
}

impl TieredPolicy {
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            confirmed_synthetic: config.confirmed_synthetic,
            synthetic: config.synthetic,
            real: config.real,
            confirmed_real: config.confirmed_real,
        }
    }
}

impl FusionPolicy for TieredPolicy {
    fn name(&self) -> &'static str {
        "tiered"
    }

    fn version(&self) -> &'static str {
        "v11"
    }

    fn decide(&self, unified: f64) -> (Verdict, ConfidenceLabel) {
        if unified >= self.confirmed_synthetic {
            (Verdict::IaConfirmed, ConfidenceLabel::High)
        } else if unified > self.synthetic {
            (Verdict::IaProbable, ConfidenceLabel::High)
        } else if unified >= self.real {
            (Verdict::Inconclusive, ConfidenceLabel::Low)
        } else if unified > self.confirmed_real {
            (Verdict::RealProbable, ConfidenceLabel::High)
        } else {
            (Verdict::RealConfirmed, ConfidenceLabel::High)
        }
    }
}

/// Single cut: above is synthetic, at or below is real.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryPolicy {
    pub threshold: f64,
}

impl FusionPolicy for BinaryPolicy {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn version(&self) -> &'static str {
        "v10"
    }

    fn decide(&self, unified: f64) -> (Verdict, ConfidenceLabel) {
        if unified > self.threshold {
            (Verdict::IaConfirmed, ConfidenceLabel::High)
        } else {
            (Verdict::RealConfirmed, ConfidenceLabel::High)
        }
    }
}

pub fn policy_from_config(config: &FusionConfig) -> Result<Box<dyn FusionPolicy>, ForensicsError> {
    match config.policy.trim().to_ascii_lowercase().as_str() {
        "tiered" | "v11" => Ok(Box::new(TieredPolicy::from_config(config))),
        "binary" | "v10" => Ok(Box::new(BinaryPolicy {
            threshold: config.binary_threshold,
        })),
        other => Err(ForensicsError::Config(format!("unknown fusion policy: {}", other))),
    }
}

// ============ Engine ============

pub struct FusionEngine {
    policy: Box<dyn FusionPolicy>,
    zones: ZoneConfig,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(policy: Box<dyn FusionPolicy>, zones: ZoneConfig, config: FusionConfig) -> Self {
        Self {
            policy,
            zones,
            config,
        }
    }

    pub fn from_config(config: &FusionConfig, zones: &ZoneConfig) -> Result<Self, ForensicsError> {
        Ok(Self::new(policy_from_config(config)?, zones.clone(), config.clone()))
    }

    pub fn policy(&self) -> &dyn FusionPolicy {
        self.policy.as_ref()
    }

    pub fn policy_tag(&self) -> String {
        format!("{}/{}", self.policy.name(), self.policy.version())
    }

    /// Zone of the numeric findings. Degraded findings hold placeholder
    /// scores and cannot place the image.
    pub fn zone_of(&self, geometric: &ExpertFinding, visual: &ExpertFinding) -> Zone {
        if geometric.is_degraded() || visual.is_degraded() {
            Zone::Ambiguous
        } else {
            zones::classify(geometric.score, visual.score, &self.zones)
        }
    }

    pub fn fuse(
        &self,
        analysis_id: &str,
        geometric: &ExpertFinding,
        visual: &ExpertFinding,
        semantic: Option<&ExpertFinding>,
    ) -> ForensicVerdict {
        let zone = self.zone_of(geometric, visual);
        let judged = semantic.filter(|s| is_available(s));

        let mut evidence = vec![format!(
            "🧭 Zone: {} (geometric {:.1}%, visual {:.1}%)",
            zone.label(),
            geometric.score * 100.0,
            visual.score * 100.0
        )];

        let unified = match judged {
            Some(s) => {
                let adjustment = zones::enforce(zone, s.score, &self.zones);
                if adjustment.adjusted() {
                    evidence.push(format!(
                        "⚖️ Zone {} moved the semantic score from {:.1}% to {:.1}%",
                        zone.label(),
                        adjustment.original * 100.0,
                        adjustment.score * 100.0
                    ));
                }
                adjustment.score
            }
            None => (geometric.score + visual.score) / 2.0,
        };

        let (verdict, confidence) = self.policy.decide(unified);

        let mut scores = BTreeMap::new();
        scores.insert(geometric.name.clone(), geometric.score);
        scores.insert(visual.name.clone(), visual.score);
        if let Some(s) = semantic {
            scores.insert(s.name.clone(), s.score);
        }
        scores.insert(UNIFIED_KEY.to_string(), unified);

        for finding in semantic.into_iter().chain([geometric, visual]) {
            evidence.extend(finding.evidence.iter().cloned());
        }
        let flags = red_flags::detect(geometric, visual, semantic, &self.config);
        evidence.extend(flags.iter().map(|f| f.evidence()));
        let evidence = dedupe(evidence);

        let notes = self.notes(verdict, unified, zone, judged.is_some());

        info!(
            "[FUSION] analysis_id={} verdict={:?} unified={:.3} zone={} policy={} judged={} flags={}",
            analysis_id,
            verdict,
            unified,
            zone.as_str(),
            self.policy_tag(),
            judged.is_some(),
            flags.len()
        );

        ForensicVerdict {
            analysis_id: analysis_id.to_string(),
            verdict,
            confidence,
            scores,
            evidence,
            notes,
            zone: Some(zone.as_str().to_string()),
            policy: Some(self.policy_tag()),
        }
    }

    fn notes(&self, verdict: Verdict, unified: f64, zone: Zone, judged: bool) -> String {
        let basis = if judged {
            format!("Semantic judge held to the {} zone", zone.label())
        } else {
            "Semantic judge unavailable; mean of the numeric experts".to_string()
        };
        let mut notes = format!(
            "{}. Unified score {:.1}% under policy {}.",
            basis,
            unified * 100.0,
            self.policy_tag()
        );
        if verdict == Verdict::Inconclusive {
            notes.push_str(" Manual verification recommended.");
        }
        notes
    }
}

/// Keep the first occurrence of each line.
fn dedupe(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisplayBounds, VerdictPayload};
    use crate::services::forensics::semantic::{JudgeOutcome, JudgeStatus, UNAVAILABLE_REASONING};
    use serde_json::Map;

    fn finding(name: &str, score: f64) -> ExpertFinding {
        ExpertFinding::new(name, score, 0.9, vec![format!("{} evidence", name)], Map::new())
    }

    fn semantic(score: f64, status: JudgeStatus) -> ExpertFinding {
        JudgeOutcome {
            score,
            raw_score: Some(score),
            reasoning: "anime-style illustration".to_string(),
            status,
            zone: Zone::Ambiguous,
            attempts: 1,
        }
        .into_finding("m")
    }

    fn engine(policy: &str) -> FusionEngine {
        let config = FusionConfig {
            policy: policy.to_string(),
            ..FusionConfig::default()
        };
        FusionEngine::from_config(&config, &ZoneConfig::default()).unwrap()
    }

    #[test]
    fn test_tiered_thresholds() {
        let p = TieredPolicy::from_config(&FusionConfig::default());
        assert_eq!(p.decide(0.85).0, Verdict::IaConfirmed);
        assert_eq!(p.decide(0.61).0, Verdict::IaProbable);
        assert_eq!(p.decide(0.60).0, Verdict::Inconclusive);
        assert_eq!(p.decide(0.45).0, Verdict::Inconclusive);
        assert_eq!(p.decide(0.44).0, Verdict::RealProbable);
        assert_eq!(p.decide(0.20), (Verdict::RealConfirmed, ConfidenceLabel::High));
    }

    #[test]
    fn test_only_the_ambiguity_band_lowers_confidence() {
        let p = TieredPolicy::from_config(&FusionConfig::default());
        for score in [0.95, 0.70, 0.30, 0.05] {
            assert_eq!(p.decide(score).1, ConfidenceLabel::High, "score {}", score);
        }
        assert_eq!(p.decide(0.50), (Verdict::Inconclusive, ConfidenceLabel::Low));
    }

    #[test]
    fn test_binary_threshold() {
        let p = BinaryPolicy { threshold: 0.60 };
        assert_eq!(p.decide(0.60).0, Verdict::RealConfirmed);
        assert_eq!(p.decide(0.6001).0, Verdict::IaConfirmed);
    }

    #[test]
    fn test_unknown_policy_is_config_error() {
        let config = FusionConfig {
            policy: "v3".to_string(),
            ..FusionConfig::default()
        };
        assert!(matches!(policy_from_config(&config), Err(ForensicsError::Config(_))));
    }

    #[test]
    fn test_falls_back_to_numeric_mean() {
        let result = engine("tiered").fuse("a", &finding("multiLID", 0.3), &finding("UFD", 0.06), None);
        assert!((result.unified() - 0.18).abs() < 1e-12);
        assert_eq!(result.verdict, Verdict::RealConfirmed);
        assert!(result.evidence.iter().any(|e| e.contains(red_flags::JUDGE_UNAVAILABLE)));
        assert!(result.notes.contains("mean of the numeric experts"));
    }

    #[test]
    fn test_unavailable_semantic_uses_mean_without_zone_snap() {
        let unavailable = JudgeOutcome {
            score: 0.5,
            raw_score: None,
            reasoning: UNAVAILABLE_REASONING.to_string(),
            status: JudgeStatus::Unavailable,
            zone: Zone::DiffusionLike,
            attempts: 3,
        }
        .into_finding("m");
        let result = engine("tiered").fuse("a", &finding("multiLID", 0.25), &finding("UFD", 0.1), Some(&unavailable));
        assert!((result.unified() - 0.175).abs() < 1e-12);
        assert_eq!(result.scores["semantic"], 0.5);
    }

    #[test]
    fn test_zone_override_on_semantic() {
        let result = engine("tiered").fuse(
            "a",
            &finding("multiLID", 0.25),
            &finding("UFD", 0.10),
            Some(&semantic(0.2, JudgeStatus::Answered)),
        );
        assert_eq!(result.unified(), 0.85);
        assert_eq!(result.verdict, Verdict::IaConfirmed);
        assert_eq!(result.zone.as_deref(), Some("diffusion_like"));
        assert!(result.evidence[0].starts_with("🧭 Zone: diffusion-like"));
    }

    #[test]
    fn test_evidence_is_merged_and_deduplicated() {
        let mut g = finding("multiLID", 0.3);
        g.evidence.push("shared line".to_string());
        let mut v = finding("UFD", 0.3);
        v.evidence.push("shared line".to_string());
        let s = semantic(0.95, JudgeStatus::Answered);
        let result = engine("tiered").fuse("a", &g, &v, Some(&s));
        assert_eq!(result.evidence.iter().filter(|e| *e == "shared line").count(), 1);
        assert!(result.evidence.iter().any(|e| e.contains("anime-style illustration")));
        assert!(result.evidence.iter().any(|e| e == "multiLID evidence"));
        assert!(result.evidence.iter().any(|e| e == "UFD evidence"));
    }

    #[test]
    fn test_degraded_numeric_expert_does_not_place_zone() {
        let degraded = ExpertFinding::degraded("UFD", "dimension mismatch");
        let result = engine("tiered").fuse(
            "a",
            &finding("multiLID", 0.3),
            &degraded,
            Some(&semantic(0.3, JudgeStatus::Answered)),
        );
        assert_eq!(result.zone.as_deref(), Some("ambiguous"));
        assert_eq!(result.unified(), 0.3);
    }

    #[test]
    fn test_display_never_contradicts_verdict() {
        let bounds = DisplayBounds::default();
        for policy in ["tiered", "binary"] {
            let engine = engine(policy);
            for i in 0..=100 {
                let score = i as f64 / 100.0;
                let result = engine.fuse(
                    "a",
                    &finding("multiLID", 0.3),
                    &finding("UFD", 0.3),
                    Some(&semantic(score, JudgeStatus::Answered)),
                );
                let payload = VerdictPayload::from_verdict(&result, &bounds);
                if result.verdict.is_synthetic() {
                    assert!(payload.ai_probability >= 85.0, "{} {}", policy, score);
                } else if result.verdict.is_real() {
                    assert!(payload.ai_probability <= 20.0, "{} {}", policy, score);
                } else {
                    assert_eq!(payload.ai_probability, 50.0);
                }
                assert_eq!(payload.raw_ai_probability, (score * 1000.0).round() / 10.0);
            }
        }
    }
}
