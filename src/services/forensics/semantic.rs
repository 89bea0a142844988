// Semantic Judge Expert
// Asks an external language model for a score, then holds it to the zone rules

use super::cancellation::CancellationToken;
use super::error::ForensicsError;
use super::zones::{self, Zone};
use crate::models::{ExpertFinding, DEGRADED_CONFIDENCE, NEUTRAL_SCORE};
use crate::services::config_store::{JudgeConfig, ZoneConfig};
use crate::services::providers::ProviderError;
use regex::Regex;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

pub const SEMANTIC_EXPERT: &str = "semantic";
pub const UNPARSEABLE_REASONING: &str = "unparseable response";
pub const UNAVAILABLE_REASONING: &str = "service unavailable";
pub const CANCELLED_REASONING: &str = "judge call cancelled";

/// Confidence of a judgment the service actually produced.
const ANSWERED_CONFIDENCE: f64 = 1.0;

/// Text-generation backend of the judge.
pub trait JudgeTransport: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeStatus {
    Answered,
    Unparseable,
    Unavailable,
    Cancelled,
}

impl JudgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Unparseable => "unparseable",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeOutcome {
    pub score: f64,
    /// Score exactly as the service returned it, before zone enforcement.
    pub raw_score: Option<f64>,
    pub reasoning: String,
    pub status: JudgeStatus,
    pub zone: Zone,
    pub attempts: usize,
}

impl JudgeOutcome {
    fn fallback(status: JudgeStatus, reasoning: &str, zone: Zone, attempts: usize) -> Self {
        Self {
            score: NEUTRAL_SCORE,
            raw_score: None,
            reasoning: reasoning.to_string(),
            status,
            zone,
            attempts,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.status == JudgeStatus::Answered
    }

    pub fn into_finding(self, model: &str) -> ExpertFinding {
        let answered = self.is_answered();
        let mut evidence = Vec::with_capacity(2);
        let mut raw_data = Map::new();

        if answered {
            evidence.push(format!("💬 Semantic judge: {}", self.reasoning));
            if let Some(raw) = self.raw_score.filter(|r| (r - self.score).abs() > f64::EPSILON) {
                evidence.push(format!(
                    "⚖️ Zone {} moved the judge score from {:.1}% to {:.1}%",
                    self.zone.label(),
                    raw * 100.0,
                    self.score * 100.0
                ));
            }
        } else {
            evidence.push(format!("⚠️ Semantic judge: {}", self.reasoning));
            raw_data.insert("error".to_string(), Value::from(self.reasoning.clone()));
        }

        raw_data.insert("available".to_string(), Value::from(answered));
        raw_data.insert("status".to_string(), Value::from(self.status.as_str()));
        raw_data.insert("reasoning".to_string(), Value::from(self.reasoning.clone()));
        raw_data.insert("zone".to_string(), Value::from(self.zone.as_str()));
        raw_data.insert("attempts".to_string(), Value::from(self.attempts));
        raw_data.insert("model".to_string(), Value::from(model));
        if let Some(raw) = self.raw_score {
            raw_data.insert("raw_score".to_string(), Value::from(raw));
        }

        let confidence = if answered { ANSWERED_CONFIDENCE } else { DEGRADED_CONFIDENCE };
        ExpertFinding::new(SEMANTIC_EXPERT, self.score, confidence, evidence, raw_data)
    }
}

/// Whether a semantic finding carries a real judgment.
pub fn is_available(finding: &ExpertFinding) -> bool {
    finding
        .raw_data
        .get("available")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub struct SemanticJudgeExpert<T> {
    transport: T,
    config: JudgeConfig,
    zones: ZoneConfig,
}

impl<T: JudgeTransport> SemanticJudgeExpert<T> {
    pub fn new(transport: T, config: JudgeConfig, zones: ZoneConfig) -> Self {
        Self {
            transport,
            config,
            zones,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn render_prompt(&self, description: &str, geometric: f64, visual: f64) -> String {
        format!(
            "You are a forensic analyst deciding whether an image is AI-generated or an authentic photograph.\n\n\
             Image description:\n\"{description}\"\n\n\
             Numeric evidence (0 = authentic, 1 = synthetic):\n\
             - Geometric anomaly score (intrinsic dimensionality): {geometric:.3}\n\
             - Visual artifact score (linear probe): {visual:.3}\n\n\
             Decision zones, checked in this order:\n{taxonomy}\n\n\
             Use the description for anything the numbers cannot see: illustration or anime style, \
             impossible anatomy, unreadable text, physically inconsistent lighting.\n\n\
             Reply with exactly one JSON object and nothing else:\n\
             {{\"ai_probability_score\": <number between 0 and 1>, \"reasoning\": \"<one or two sentences>\"}}",
            description = description.trim(),
            geometric = geometric,
            visual = visual,
            taxonomy = zones::taxonomy(&self.zones),
        )
    }

    /// Judge with trusted numeric scores.
    pub async fn judge(&self, description: &str, geometric: f64, visual: f64) -> JudgeOutcome {
        let zone = zones::classify(geometric, visual, &self.zones);
        self.run(description, geometric, visual, zone).await
    }

    /// Judge from the two numeric findings. A degraded finding carries a
    /// placeholder score, so no zone rule is applied in that case.
    pub async fn judge_findings(
        &self,
        description: &str,
        geometric: &ExpertFinding,
        visual: &ExpertFinding,
        cancel: &CancellationToken,
    ) -> JudgeOutcome {
        let zone = if geometric.is_degraded() || visual.is_degraded() {
            Zone::Ambiguous
        } else {
            zones::classify(geometric.score, visual.score, &self.zones)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("[JUDGE] Call cancelled");
                JudgeOutcome::fallback(JudgeStatus::Cancelled, CANCELLED_REASONING, zone, 0)
            }
            outcome = self.run(description, geometric.score, visual.score, zone) => outcome,
        }
    }

    pub async fn analyze(
        &self,
        description: &str,
        geometric: &ExpertFinding,
        visual: &ExpertFinding,
        cancel: &CancellationToken,
    ) -> ExpertFinding {
        self.judge_findings(description, geometric, visual, cancel)
            .await
            .into_finding(&self.config.model)
    }

    async fn run(&self, description: &str, geometric: f64, visual: f64, zone: Zone) -> JudgeOutcome {
        let prompt = self.render_prompt(description, geometric, visual);

        let (text, attempts) = match self.call_with_retry(&prompt).await {
            Ok(ok) => ok,
            Err(attempts) => {
                return JudgeOutcome::fallback(JudgeStatus::Unavailable, UNAVAILABLE_REASONING, zone, attempts);
            }
        };

        let (raw_score, reasoning) = match parse_response(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("[JUDGE] {}", e);
                return JudgeOutcome::fallback(JudgeStatus::Unparseable, UNPARSEABLE_REASONING, zone, attempts);
            }
        };

        let adjustment = zones::enforce(zone, raw_score, &self.zones);
        if adjustment.adjusted() {
            info!(
                "[JUDGE] Zone {} snapped score {:.3} -> {:.3}",
                zone.as_str(),
                raw_score,
                adjustment.score
            );
        }
        info!(
            "[JUDGE] score={:.3} zone={} attempts={}",
            adjustment.score,
            zone.as_str(),
            attempts
        );

        JudgeOutcome {
            score: adjustment.score,
            raw_score: Some(raw_score),
            reasoning,
            status: JudgeStatus::Answered,
            zone,
            attempts,
        }
    }

    /// Retries transport errors and timeouts with capped exponential backoff.
    /// On exhaustion returns the number of attempts made.
    async fn call_with_retry(&self, prompt: &str) -> Result<(String, usize), usize> {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = Duration::from_millis(self.config.timeout_ms);

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(timeout, self.transport.generate(prompt)).await {
                Ok(Ok(text)) => return Ok((text, attempt)),
                Ok(Err(e)) => {
                    let err = ForensicsError::ExternalService(e.to_string());
                    warn!(
                        "[JUDGE] error model={} attempt={}/{} : {}",
                        self.config.model, attempt, max_attempts, err
                    );
                }
                Err(_) => {
                    warn!(
                        "[JUDGE] {} model={} attempt={}/{}",
                        ProviderError::Timeout(self.config.timeout_ms),
                        self.config.model,
                        attempt,
                        max_attempts
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        warn!("[JUDGE] Service unavailable after {} attempts", max_attempts);
        Err(max_attempts)
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = (attempt.saturating_sub(1)).min(16) as u32;
        let ms = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Pull `ai_probability_score` and `reasoning` out of free text, skipping any
/// leading reasoning block closed by `</think>`.
pub fn parse_response(text: &str) -> Result<(f64, String), ForensicsError> {
    let body = match think_re().and_then(|re| re.find(text)) {
        Some(m) => &text[m.end()..],
        None => text,
    };
    let value = extract_json(body)?;

    let score = value
        .get("ai_probability_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            ForensicsError::ContractViolation("ai_probability_score missing or not a number".to_string())
        })?;
    if !(0.0..=1.0).contains(&score) {
        return Err(ForensicsError::ContractViolation(format!(
            "ai_probability_score {} outside [0, 1]",
            score
        )));
    }

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .ok_or_else(|| ForensicsError::ContractViolation("reasoning missing or not a string".to_string()))?
        .trim()
        .to_string();

    Ok((score, reasoning))
}

// Greedy, so everything up to the last closing tag is dropped.
fn think_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^.*</think>").ok()).as_ref()
}

/// First complete JSON object in `content`. Parsing stops at the end of that
/// object, so trailing prose (braces included) is ignored.
fn extract_json(content: &str) -> Result<Value, ForensicsError> {
    let mut last_error = None;
    for (start, _) in content.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&content[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => return Ok(value),
            Some(Err(e)) => last_error = Some(e),
            _ => {}
        }
    }
    Err(ForensicsError::ContractViolation(match last_error {
        Some(e) => format!("invalid JSON: {}", e),
        None => "no JSON object in response".to_string(),
    }))
}
