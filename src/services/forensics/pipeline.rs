// Forensics Pipeline
// Backbone -> numeric experts -> semantic judge -> fusion, one analysis per call

use super::backbone::{ClipOnnxBackbone, FeatureBackbone};
use super::cancellation::CancellationToken;
use super::classifier::{VisualClassifierExpert, VISUAL_EXPERT};
use super::error::ForensicsError;
use super::fusion::FusionEngine;
use super::geometric::{GeometricAnomalyExpert, GEOMETRIC_EXPERT};
use super::semantic::{JudgeTransport, SemanticJudgeExpert};
use crate::models::{
    BackboneOutput, DisplayBounds, ExpertFinding, ForensicVerdict, ModelInfo, VerdictPayload,
};
use crate::services::config_store::AppConfig;
use crate::services::providers::JudgeClient;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Components are built once and shared read-only across analyses.
pub struct ForensicsPipeline<T> {
    backbone: Arc<dyn FeatureBackbone>,
    geometric: Arc<GeometricAnomalyExpert>,
    classifier: Arc<VisualClassifierExpert>,
    judge: Option<SemanticJudgeExpert<T>>,
    fusion: FusionEngine,
    display: DisplayBounds,
}

impl ForensicsPipeline<JudgeClient> {
    /// Backbone weights are loaded lazily on the first image.
    pub fn from_config(config: &AppConfig) -> Result<Self, ForensicsError> {
        config.validate().map_err(ForensicsError::Config)?;

        let backbone: Arc<dyn FeatureBackbone> =
            Arc::new(ClipOnnxBackbone::new(config.backbone.clone()));
        let geometric = GeometricAnomalyExpert::from_config(&config.geometric)?;
        let classifier =
            VisualClassifierExpert::from_config(&config.classifier, config.backbone.embedding_dim);
        let judge = if config.judge.enabled {
            Some(SemanticJudgeExpert::new(
                JudgeClient::new(&config.judge),
                config.judge.clone(),
                config.zones.clone(),
            ))
        } else {
            info!("[PIPELINE] Semantic judge disabled");
            None
        };
        let fusion = FusionEngine::from_config(&config.fusion, &config.zones)?;

        Ok(Self::new(
            backbone,
            geometric,
            classifier,
            judge,
            fusion,
            config.display,
        ))
    }
}

impl<T: JudgeTransport> ForensicsPipeline<T> {
    pub fn new(
        backbone: Arc<dyn FeatureBackbone>,
        geometric: GeometricAnomalyExpert,
        classifier: VisualClassifierExpert,
        judge: Option<SemanticJudgeExpert<T>>,
        fusion: FusionEngine,
        display: DisplayBounds,
    ) -> Self {
        Self {
            backbone,
            geometric: Arc::new(geometric),
            classifier: Arc::new(classifier),
            judge,
            fusion,
            display,
        }
    }

    pub fn judge(&self) -> Option<&SemanticJudgeExpert<T>> {
        self.judge.as_ref()
    }

    pub async fn analyze(&self, image: DynamicImage, description: Option<&str>) -> ForensicVerdict {
        self.analyze_with_cancel(image, description, &CancellationToken::new())
            .await
    }

    /// Always returns a verdict; a missing backbone becomes an error verdict.
    pub async fn analyze_with_cancel(
        &self,
        image: DynamicImage,
        description: Option<&str>,
        cancel: &CancellationToken,
    ) -> ForensicVerdict {
        let analysis_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        info!("[PIPELINE] analysis_id={} started", analysis_id);

        if cancel.is_cancelled() {
            warn!("[PIPELINE] analysis_id={} cancelled before start", analysis_id);
            return ForensicVerdict::error(analysis_id, "analysis cancelled");
        }

        let output = match self.embed(image).await {
            Ok(output) => output,
            Err(e) => {
                error!("[PIPELINE] analysis_id={} failed: {}", analysis_id, e);
                return ForensicVerdict::error(analysis_id, &e.to_string());
            }
        };

        let (geometric, visual) = self.run_numeric_experts(output).await;

        let description = description.map(str::trim).filter(|d| !d.is_empty());
        let semantic = match (&self.judge, description) {
            (Some(judge), Some(description)) => {
                Some(judge.analyze(description, &geometric, &visual, cancel).await)
            }
            (Some(_), None) => {
                info!("[PIPELINE] analysis_id={} no description, judge skipped", analysis_id);
                None
            }
            (None, _) => None,
        };

        let verdict = self
            .fusion
            .fuse(&analysis_id, &geometric, &visual, semantic.as_ref());
        info!(
            "[PIPELINE] analysis_id={} verdict={:?} confidence={} elapsed_ms={}",
            analysis_id,
            verdict.verdict,
            verdict.confidence.as_str(),
            start.elapsed().as_millis()
        );
        verdict
    }

    pub async fn analyze_path(&self, path: &Path, description: Option<&str>) -> ForensicVerdict {
        let owned = path.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || image::open(&owned)).await;
        match decoded {
            Ok(Ok(image)) => self.analyze(image, description).await,
            Ok(Err(e)) => {
                let err = ForensicsError::InvalidImage(format!("{}: {}", path.display(), e));
                error!("[PIPELINE] {}", err);
                ForensicVerdict::error(uuid::Uuid::new_v4().to_string(), &err.to_string())
            }
            Err(e) => ForensicVerdict::error(uuid::Uuid::new_v4().to_string(), &e.to_string()),
        }
    }

    pub fn payload(&self, verdict: &ForensicVerdict) -> VerdictPayload {
        VerdictPayload::from_verdict(verdict, &self.display)
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            backbone: self.backbone.name(),
            layers: self.backbone.layers().to_vec(),
            k_neighbors: self.geometric.k_neighbors(),
            classifier_weights: self.classifier.status().as_str().to_string(),
            classifier_temperature: self.classifier.temperature(),
            judge_model: self.judge.as_ref().map(|j| j.model().to_string()),
            fusion_policy: self.fusion.policy().name().to_string(),
            fusion_version: self.fusion.policy().version().to_string(),
        }
    }

    async fn embed(&self, image: DynamicImage) -> Result<BackboneOutput, ForensicsError> {
        let backbone = Arc::clone(&self.backbone);
        tokio::task::spawn_blocking(move || backbone.embed(&image))
            .await
            .map_err(|e| ForensicsError::backbone(format!("embedding task failed: {}", e)))?
    }

    /// The two numeric experts are independent once the embedding exists.
    async fn run_numeric_experts(&self, output: BackboneOutput) -> (ExpertFinding, ExpertFinding) {
        let BackboneOutput {
            final_embedding,
            intermediate,
        } = output;
        let geometric = Arc::clone(&self.geometric);
        let classifier = Arc::clone(&self.classifier);

        let (g, v) = tokio::join!(
            tokio::task::spawn_blocking(move || geometric.analyze(&intermediate)),
            tokio::task::spawn_blocking(move || classifier.analyze(&final_embedding)),
        );

        (
            g.unwrap_or_else(|e| ExpertFinding::degraded(GEOMETRIC_EXPERT, &e.to_string())),
            v.unwrap_or_else(|e| ExpertFinding::degraded(VISUAL_EXPERT, &e.to_string())),
        )
    }
}
