// Feature Backbone
// CLIP vision tower exported to ONNX: pooled embedding plus per-layer class tokens

use super::error::ForensicsError;
use super::preprocess::clip_tensor;
use crate::models::{BackboneOutput, LayerEmbedding};
use crate::services::config_store::BackboneConfig;
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

/// Embedding source shared by the numeric experts.
pub trait FeatureBackbone: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<BackboneOutput, ForensicsError>;

    /// Transformer blocks whose class token is returned, in order.
    fn layers(&self) -> &[usize];

    fn name(&self) -> String;
}

/// The session is created on first use. Concurrent first callers wait on
/// `init_lock` so the model is only loaded once.
pub struct ClipOnnxBackbone {
    config: BackboneConfig,
    session: OnceLock<Mutex<Session>>,
    init_lock: Mutex<()>,
}

impl ClipOnnxBackbone {
    pub fn new(config: BackboneConfig) -> Self {
        Self {
            config,
            session: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Force the model load now instead of on the first image.
    pub fn warm_up(&self) -> Result<(), ForensicsError> {
        self.session().map(|_| ())
    }

    fn session(&self) -> Result<&Mutex<Session>, ForensicsError> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|e| ForensicsError::backbone(format!("init lock poisoned: {}", e)))?;
        if let Some(session) = self.session.get() {
            return Ok(session);
        }

        let session = self.load_session()?;
        let _ = self.session.set(Mutex::new(session));
        self.session
            .get()
            .ok_or_else(|| ForensicsError::backbone("session was not stored"))
    }

    fn load_session(&self) -> Result<Session, ForensicsError> {
        let path = &self.config.model_path;
        if !path.exists() {
            return Err(ForensicsError::backbone(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        info!("[BACKBONE] Loading ONNX model from {}", path.display());
        let session = Session::builder()
            .map_err(|e| ForensicsError::backbone(e.to_string()))?
            .with_intra_threads(self.config.intra_threads)
            .map_err(|e| ForensicsError::backbone(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| ForensicsError::backbone(e.to_string()))?;
        info!("[BACKBONE] Model ready (layers {:?})", self.config.layers);
        Ok(session)
    }

    fn inference_error(reason: impl std::fmt::Display) -> ForensicsError {
        ForensicsError::ExpertComputation(format!("backbone inference: {}", reason))
    }
}

impl FeatureBackbone for ClipOnnxBackbone {
    fn embed(&self, image: &DynamicImage) -> Result<BackboneOutput, ForensicsError> {
        // Load before touching the runtime for tensor allocation.
        let session = self.session()?;

        let size = self.config.input_size;
        let pixels = clip_tensor(image, size);
        let input = Tensor::from_array((vec![1i64, 3, size as i64, size as i64], pixels))
            .map_err(|e| Self::inference_error(format!("tensor creation error: {}", e)))?;

        let mut session = session
            .lock()
            .map_err(|e| Self::inference_error(format!("session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(Self::inference_error)?;

        let pooled = outputs
            .get(self.config.final_output.as_str())
            .ok_or_else(|| Self::inference_error(format!("missing output {}", self.config.final_output)))?;
        let (_shape, data) = pooled
            .try_extract_tensor::<f32>()
            .map_err(|e| Self::inference_error(format!("tensor extraction failed: {}", e)))?;
        if data.len() < self.config.embedding_dim {
            return Err(Self::inference_error(format!(
                "pooled output has {} values, expected {}",
                data.len(),
                self.config.embedding_dim
            )));
        }
        let final_embedding = l2_normalize(data[..self.config.embedding_dim].to_vec());

        let hidden = outputs
            .get(self.config.hidden_states_output.as_str())
            .ok_or_else(|| {
                Self::inference_error(format!("missing output {}", self.config.hidden_states_output))
            })?;
        let (shape, data) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| Self::inference_error(format!("tensor extraction failed: {}", e)))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let intermediate = class_tokens(&dims, data, &self.config.layers)?;

        debug!(
            "[BACKBONE] final_dim={} layers={} hidden_shape={:?}",
            final_embedding.len(),
            intermediate.len(),
            dims
        );

        Ok(BackboneOutput {
            final_embedding,
            intermediate,
        })
    }

    fn layers(&self) -> &[usize] {
        &self.config.layers
    }

    fn name(&self) -> String {
        self.config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("clip-onnx")
            .to_string()
    }
}

/// Class token of each requested block from stacked hidden states shaped
/// `[blocks + 1, (batch,) tokens, width]`. Entry 0 is the patch embedding,
/// so block `l` lives at index `l + 1`.
pub fn class_tokens(
    shape: &[usize],
    data: &[f32],
    layers: &[usize],
) -> Result<Vec<LayerEmbedding>, ForensicsError> {
    if shape.len() < 3 {
        return Err(ForensicsError::ExpertComputation(format!(
            "hidden states have rank {}, expected at least 3",
            shape.len()
        )));
    }
    let states = shape[0];
    let width = shape[shape.len() - 1];
    if states == 0 || width == 0 || data.len() % states != 0 {
        return Err(ForensicsError::ExpertComputation(format!(
            "hidden states shape {:?} does not match {} values",
            shape,
            data.len()
        )));
    }
    let stride = data.len() / states;

    layers
        .iter()
        .map(|&layer| {
            let index = layer + 1;
            if index >= states {
                return Err(ForensicsError::ExpertComputation(format!(
                    "layer {} out of range ({} hidden states)",
                    layer, states
                )));
            }
            let start = index * stride;
            Ok(LayerEmbedding {
                layer,
                values: data[start..start + width].to_vec(),
            })
        })
        .collect()
}

pub fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut values {
            *v /= norm;
        }
    }
    values
}
