// Configuration Storage Service
// Handles config file read/write, version backup and environment overrides

use crate::models::DisplayBounds;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub backbone: BackboneConfig,
    #[serde(default)]
    pub geometric: GeometricConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub zones: ZoneConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub display: DisplayBounds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackboneConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_layers")]
    pub layers: Vec<usize>,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
    #[serde(default = "default_final_output")]
    pub final_output: String,
    #[serde(default = "default_hidden_states_output")]
    pub hidden_states_output: String,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            layers: default_layers(),
            embedding_dim: default_embedding_dim(),
            input_size: default_input_size(),
            intra_threads: default_intra_threads(),
            final_output: default_final_output(),
            hidden_states_output: default_hidden_states_output(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeometricConfig {
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,
    #[serde(default = "default_anomalous_z")]
    pub anomalous_z: f64,
    #[serde(default = "default_high_confidence_z")]
    pub high_confidence_z: f64,
    #[serde(default)]
    pub reference_stats_path: Option<PathBuf>,
}

impl Default for GeometricConfig {
    fn default() -> Self {
        Self {
            k_neighbors: default_k_neighbors(),
            anomalous_z: default_anomalous_z(),
            high_confidence_z: default_high_confidence_z(),
            reference_stats_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_init_gain")]
    pub init_gain: f64,
    #[serde(default = "default_init_bias")]
    pub init_bias: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
            temperature: default_temperature(),
            init_gain: default_init_gain(),
            init_bias: default_init_bias(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_judge_url")]
    pub url: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default = "default_judge_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_judge_url(),
            model: default_judge_model(),
            timeout_ms: default_judge_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            health_timeout_ms: default_health_timeout_ms(),
        }
    }
}

/// Boundaries of the (geometric, visual) decision plane and the band each
/// unambiguous zone snaps the semantic score into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    #[serde(default = "default_diffusion_geometric_min")]
    pub diffusion_geometric_min: f64,
    #[serde(default = "default_clean_visual_max")]
    pub clean_visual_max: f64,
    #[serde(default = "default_gan_visual_min")]
    pub gan_visual_min: f64,
    #[serde(default = "default_diffusion_floor")]
    pub diffusion_floor: f64,
    #[serde(default = "default_gan_floor")]
    pub gan_floor: f64,
    #[serde(default = "default_filtered_ceiling")]
    pub filtered_ceiling: Option<f64>,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            diffusion_geometric_min: default_diffusion_geometric_min(),
            clean_visual_max: default_clean_visual_max(),
            gan_visual_min: default_gan_visual_min(),
            diffusion_floor: default_diffusion_floor(),
            gan_floor: default_gan_floor(),
            filtered_ceiling: default_filtered_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FusionConfig {
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default = "default_binary_threshold")]
    pub binary_threshold: f64,
    #[serde(default = "default_confirmed_synthetic")]
    pub confirmed_synthetic: f64,
    #[serde(default = "default_binary_threshold")]
    pub synthetic: f64,
    #[serde(default = "default_real")]
    pub real: f64,
    #[serde(default = "default_confirmed_real")]
    pub confirmed_real: f64,
    #[serde(default = "default_discord_gap")]
    pub discord_gap: f64,
    #[serde(default = "default_low_visual_confidence")]
    pub low_visual_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            binary_threshold: default_binary_threshold(),
            confirmed_synthetic: default_confirmed_synthetic(),
            synthetic: default_binary_threshold(),
            real: default_real(),
            confirmed_real: default_confirmed_real(),
            discord_gap: default_discord_gap(),
            low_visual_confidence: default_low_visual_confidence(),
        }
    }
}

fn default_true() -> bool { true }
fn default_model_path() -> PathBuf { PathBuf::from("weights/clip_vit_l14_visual.onnx") }
fn default_layers() -> Vec<usize> { vec![6, 8, 10, 11] }
fn default_embedding_dim() -> usize { 768 }
fn default_input_size() -> u32 { 224 }
fn default_intra_threads() -> usize { 2 }
fn default_final_output() -> String { "image_embeds".to_string() }
fn default_hidden_states_output() -> String { "hidden_states".to_string() }
fn default_k_neighbors() -> usize { 20 }
fn default_anomalous_z() -> f64 { 2.0 }
fn default_high_confidence_z() -> f64 { 3.0 }
fn default_weights_path() -> PathBuf { PathBuf::from("weights/ufd_classifier.json") }
fn default_temperature() -> f64 { 1.5 }
fn default_init_gain() -> f64 { 1.5 }
fn default_init_bias() -> f64 { -0.2 }
fn default_judge_url() -> String { "http://localhost:11434/api/generate".to_string() }
fn default_judge_model() -> String { "deepseek-r1:7b".to_string() }
fn default_judge_timeout_ms() -> u64 { 30_000 }
fn default_max_attempts() -> usize { 3 }
fn default_backoff_base_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 10_000 }
fn default_health_timeout_ms() -> u64 { 5_000 }
fn default_diffusion_geometric_min() -> f64 { 0.20 }
fn default_clean_visual_max() -> f64 { 0.20 }
fn default_gan_visual_min() -> f64 { 0.40 }
fn default_diffusion_floor() -> f64 { 0.85 }
fn default_gan_floor() -> f64 { 0.80 }
fn default_filtered_ceiling() -> Option<f64> { Some(0.45) }
fn default_policy() -> String { "tiered".to_string() }
fn default_binary_threshold() -> f64 { 0.60 }
fn default_confirmed_synthetic() -> f64 { 0.85 }
fn default_real() -> f64 { 0.45 }
fn default_confirmed_real() -> f64 { 0.20 }
fn default_discord_gap() -> f64 { 0.5 }
fn default_low_visual_confidence() -> f64 { 0.3 }

impl AppConfig {
    /// Apply `FORENSE_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_value("FORENSE_JUDGE_URL") {
            self.judge.url = url;
        }
        if let Some(model) = env_value("FORENSE_JUDGE_MODEL") {
            self.judge.model = model;
        }
        if let Some(ms) = env_value("FORENSE_JUDGE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.judge.timeout_ms = ms;
        }
        if let Some(flag) = env_value("FORENSE_JUDGE_ENABLED") {
            self.judge.enabled = matches!(flag.as_str(), "1" | "true" | "TRUE");
        }
        if let Some(path) = env_value("FORENSE_BACKBONE_MODEL") {
            self.backbone.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_value("FORENSE_UFD_WEIGHTS") {
            self.classifier.weights_path = PathBuf::from(path);
        }
        if let Some(t) = env_value("FORENSE_UFD_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.classifier.temperature = t;
        }
        if let Some(policy) = env_value("FORENSE_FUSION_POLICY") {
            self.fusion.policy = policy;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backbone.layers.is_empty() {
            return Err("backbone.layers must not be empty".to_string());
        }
        if self.geometric.k_neighbors < 2 {
            return Err("geometric.kNeighbors must be at least 2".to_string());
        }
        if !(self.classifier.temperature > 0.0) {
            return Err("classifier.temperature must be positive".to_string());
        }
        if self.judge.max_attempts == 0 {
            return Err("judge.maxAttempts must be at least 1".to_string());
        }
        let f = &self.fusion;
        if !(f.confirmed_real <= f.real && f.real <= f.synthetic && f.synthetic <= f.confirmed_synthetic) {
            return Err(format!(
                "fusion thresholds out of order: {} <= {} <= {} <= {} expected",
                f.confirmed_real, f.real, f.synthetic, f.confirmed_synthetic
            ));
        }

        let z = &self.zones;
        check_unit("zones.diffusionGeometricMin", z.diffusion_geometric_min)?;
        check_unit("zones.cleanVisualMax", z.clean_visual_max)?;
        check_unit("zones.ganVisualMin", z.gan_visual_min)?;
        check_unit("zones.diffusionFloor", z.diffusion_floor)?;
        check_unit("zones.ganFloor", z.gan_floor)?;
        if let Some(ceiling) = z.filtered_ceiling {
            check_unit("zones.filteredCeiling", ceiling)?;
        }
        if z.clean_visual_max > z.gan_visual_min {
            return Err(format!(
                "zones.cleanVisualMax {} must not exceed zones.ganVisualMin {}",
                z.clean_visual_max, z.gan_visual_min
            ));
        }

        let d = &self.display;
        check_unit("display.syntheticFloor", d.synthetic_floor)?;
        check_unit("display.syntheticRescue", d.synthetic_rescue)?;
        check_unit("display.realCeiling", d.real_ceiling)?;
        check_unit("display.inconclusivePin", d.inconclusive_pin)?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be within [0, 1], got {}", name, value))
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("forense-ai"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), String> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| format!("Failed to create config dir: {}", e))
    }

    /// Load configuration from file
    pub fn load(&self) -> Result<AppConfig, String> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Load file config, then environment overrides, then validate.
    pub fn load_effective(&self) -> Result<AppConfig, String> {
        let mut config = self.load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &AppConfig) -> Result<(), String> {
        self.ensure_dir()?;

        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(&self.config_file, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }

    fn create_backup(&self) -> Result<(), String> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir)
            .map_err(|e| format!("Failed to create backup dir: {}", e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file)
            .map_err(|e| format!("Failed to create backup: {}", e))?;

        self.cleanup_old_backups(&backup_dir, 10)?;

        Ok(())
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), String> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(|e| format!("Failed to read backup dir: {}", e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // Oldest first
        entries.sort_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        for entry in entries.iter().take(entries.len() - keep) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.backbone.layers, vec![6, 8, 10, 11]);
        assert_eq!(config.geometric.k_neighbors, 20);
        assert_eq!(config.classifier.temperature, 1.5);
        assert_eq!(config.judge.max_attempts, 3);
        assert_eq!(config.fusion.policy, "tiered");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"version":"1.0.0","zones":{"diffusionGeometricMin":0.3},"judge":{"enabled":false}}"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.zones.diffusion_geometric_min, 0.3);
        assert_eq!(parsed.zones.gan_visual_min, 0.40);
        assert!(!parsed.judge.enabled);
        assert_eq!(parsed.judge.timeout_ms, 30_000);
    }

    #[test]
    fn test_filtered_ceiling_can_be_disabled() {
        let parsed: AppConfig = serde_json::from_str(r#"{"zones":{"filteredCeiling":null}}"#).unwrap();
        assert_eq!(parsed.zones.filtered_ceiling, None);
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let mut config = AppConfig::default();
        config.fusion.real = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_zone_bands() {
        let mut config = AppConfig::default();
        config.zones.gan_floor = 1.2;
        assert!(config.validate().unwrap_err().contains("zones.ganFloor"));

        let mut config = AppConfig::default();
        config.zones.filtered_ceiling = Some(-0.1);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.zones.diffusion_floor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.zones.clean_visual_max = 0.5;
        assert!(config.validate().unwrap_err().contains("cleanVisualMax"));

        let mut config = AppConfig::default();
        config.display.real_ceiling = 20.0;
        assert!(config.validate().unwrap_err().contains("display.realCeiling"));

        let mut config = AppConfig::default();
        config.zones.filtered_ceiling = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_roundtrip_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        assert_eq!(store.load().unwrap(), AppConfig::default());

        let mut config = AppConfig::default();
        config.version = "1.0.0".to_string();
        store.save(&config).unwrap();
        config.fusion.policy = "binary".to_string();
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.fusion.policy, "binary");
        let backups = fs::read_dir(dir.path().join("backups")).unwrap().count();
        assert_eq!(backups, 1);
    }
}
