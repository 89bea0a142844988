// Red Flags
// Warnings attached to a verdict; they never change it

use super::semantic::is_available;
use crate::models::ExpertFinding;
use crate::services::config_store::FusionConfig;
use serde::Serialize;

pub const DISCORDANT_EXPERTS: &str = "EXPERTOS_DISCORDANTES";
pub const UNRELIABLE_VISUAL: &str = "UFD_POCO_CONFIABLE";
pub const SEMANTIC_DANGER_ZONE: &str = "ZONA_PELIGRO_SEMANTIC";
pub const JUDGE_UNAVAILABLE: &str = "JUEZ_NO_DISPONIBLE";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedFlag {
    pub code: &'static str,
    pub message: String,
}

impl RedFlag {
    pub fn evidence(&self) -> String {
        format!("🚩 {}: {}", self.code, self.message)
    }
}

pub fn detect(
    geometric: &ExpertFinding,
    visual: &ExpertFinding,
    semantic: Option<&ExpertFinding>,
    config: &FusionConfig,
) -> Vec<RedFlag> {
    let mut flags = Vec::new();

    if !geometric.is_degraded() && !visual.is_degraded() {
        let gap = (geometric.score - visual.score).abs();
        if gap >= config.discord_gap {
            flags.push(RedFlag {
                code: DISCORDANT_EXPERTS,
                message: format!(
                    "numeric experts disagree by {:.0} points (geometric {:.1}%, visual {:.1}%)",
                    gap * 100.0,
                    geometric.score * 100.0,
                    visual.score * 100.0
                ),
            });
        }
    }

    if visual.confidence < config.low_visual_confidence {
        flags.push(RedFlag {
            code: UNRELIABLE_VISUAL,
            message: format!("visual classifier confidence {:.2} is low", visual.confidence),
        });
    }

    match semantic.filter(|s| is_available(s)) {
        Some(s) if (config.real..=config.synthetic).contains(&s.score) => {
            flags.push(RedFlag {
                code: SEMANTIC_DANGER_ZONE,
                message: format!(
                    "semantic score {:.1}% sits in the ambiguity band [{:.0}%, {:.0}%]",
                    s.score * 100.0,
                    config.real * 100.0,
                    config.synthetic * 100.0
                ),
            });
        }
        Some(_) => {}
        None => flags.push(RedFlag {
            code: JUDGE_UNAVAILABLE,
            message: "semantic judge did not weigh in; verdict rests on numeric experts".to_string(),
        }),
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::forensics::semantic::{JudgeOutcome, JudgeStatus};
    use crate::services::forensics::zones::Zone;
    use serde_json::Map;

    fn finding(score: f64, confidence: f64) -> ExpertFinding {
        ExpertFinding::new("x", score, confidence, vec![], Map::new())
    }

    fn semantic(score: f64) -> ExpertFinding {
        JudgeOutcome {
            score,
            raw_score: Some(score),
            reasoning: "r".to_string(),
            status: JudgeStatus::Answered,
            zone: Zone::Ambiguous,
            attempts: 1,
        }
        .into_finding("m")
    }

    fn codes(flags: &[RedFlag]) -> Vec<&'static str> {
        flags.iter().map(|f| f.code).collect()
    }

    #[test]
    fn test_quiet_case_has_no_flags() {
        let flags = detect(&finding(0.3, 0.9), &finding(0.25, 0.8), Some(&semantic(0.9)), &FusionConfig::default());
        assert!(flags.is_empty());
    }

    #[test]
    fn test_discord_and_low_confidence() {
        let flags = detect(&finding(0.9, 0.9), &finding(0.1, 0.2), Some(&semantic(0.1)), &FusionConfig::default());
        assert_eq!(codes(&flags), vec![DISCORDANT_EXPERTS, UNRELIABLE_VISUAL]);
    }

    #[test]
    fn test_semantic_danger_zone() {
        let flags = detect(&finding(0.3, 0.9), &finding(0.3, 0.9), Some(&semantic(0.5)), &FusionConfig::default());
        assert_eq!(codes(&flags), vec![SEMANTIC_DANGER_ZONE]);
    }

    #[test]
    fn test_missing_judge() {
        let flags = detect(&finding(0.3, 0.9), &finding(0.3, 0.9), None, &FusionConfig::default());
        assert_eq!(codes(&flags), vec![JUDGE_UNAVAILABLE]);
        assert!(flags[0].evidence().starts_with("🚩 JUEZ_NO_DISPONIBLE"));
    }

    #[test]
    fn test_degraded_expert_is_not_discordant() {
        let degraded = ExpertFinding::degraded("multiLID", "nan");
        let flags = detect(&degraded, &finding(0.0, 0.9), Some(&semantic(0.9)), &FusionConfig::default());
        assert!(!codes(&flags).contains(&DISCORDANT_EXPERTS));
    }
}
