// Decision Zones
// Places an image in the (geometric, visual) plane and snaps semantic scores into the zone band

use crate::services::config_store::ZoneConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Strong visual artifacts, typical of GAN upsampling.
    GanLike,
    /// Dimensional anomaly with a clean visual signal.
    DiffusionLike,
    /// Both signals low: an authentic photo, possibly filtered or compressed.
    FilteredReal,
    Ambiguous,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GanLike => "gan_like",
            Self::DiffusionLike => "diffusion_like",
            Self::FilteredReal => "filtered_real",
            Self::Ambiguous => "ambiguous",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::GanLike => "GAN-like",
            Self::DiffusionLike => "diffusion-like",
            Self::FilteredReal => "filtered-real",
            Self::Ambiguous => "ambiguous",
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous)
    }

    /// Closed score band a semantic judgment must fall in for this zone.
    /// Always a non-empty sub-range of [0, 1].
    pub fn band(&self, config: &ZoneConfig) -> (f64, f64) {
        let (low, high) = match self {
            Self::GanLike => (config.gan_floor, 1.0),
            Self::DiffusionLike => (config.diffusion_floor, 1.0),
            Self::FilteredReal => (0.0, config.filtered_ceiling.unwrap_or(1.0)),
            Self::Ambiguous => (0.0, 1.0),
        };
        let low = bound(low, 0.0);
        let high = bound(high, 1.0);
        (low.min(high), high)
    }
}

fn bound(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Zones are checked in order GAN-like, diffusion-like, filtered-real.
/// Every boundary is inclusive on the `>=` side.
pub fn classify(geometric: f64, visual: f64, config: &ZoneConfig) -> Zone {
    if visual >= config.gan_visual_min {
        Zone::GanLike
    } else if visual < config.clean_visual_max {
        if geometric >= config.diffusion_geometric_min {
            Zone::DiffusionLike
        } else {
            Zone::FilteredReal
        }
    } else {
        Zone::Ambiguous
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneAdjustment {
    pub zone: Zone,
    pub original: f64,
    pub score: f64,
}

impl ZoneAdjustment {
    pub fn adjusted(&self) -> bool {
        (self.score - self.original).abs() > f64::EPSILON
    }
}

/// Snap `score` into the zone band. Ambiguous zones leave it untouched.
pub fn enforce(zone: Zone, score: f64, config: &ZoneConfig) -> ZoneAdjustment {
    let (low, high) = zone.band(config);
    ZoneAdjustment {
        zone,
        original: score,
        score: score.clamp(low, high),
    }
}

/// Human-readable taxonomy embedded in the judge prompt.
pub fn taxonomy(config: &ZoneConfig) -> String {
    let ceiling = config
        .filtered_ceiling
        .map(|c| format!("at most {:.2}", c))
        .unwrap_or_else(|| "unrestricted".to_string());
    format!(
        "- GAN-like: visual score >= {gan_v:.2}. Score must be at least {gan_floor:.2}.\n\
         - Diffusion-like: geometric score >= {diff_g:.2} and visual score < {clean_v:.2}. \
         Score must be at least {diff_floor:.2}.\n\
         - Filtered-real: geometric score < {diff_g:.2} and visual score < {clean_v:.2}. \
         Score {ceiling}.\n\
         - Ambiguous: anything else. Use the description to decide, any score in [0, 1].",
        gan_v = config.gan_visual_min,
        gan_floor = config.gan_floor,
        diff_g = config.diffusion_geometric_min,
        clean_v = config.clean_visual_max,
        diff_floor = config.diffusion_floor,
        ceiling = ceiling,
    )
}
