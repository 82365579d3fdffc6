//! Audio filter graph for the denoise pass.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// arnndn only runs at 48 kHz.
pub const DENOISE_SAMPLE_RATE: u32 = 48_000;
/// Expansion factor for the optional speechnorm stage.
const SPEECHNORM_EXPANSION: u32 = 6;
pub const DEFAULT_MIX: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DenoiseProfile {
    /// Denoise strength passed to arnndn as `mix`.
    pub mix: f64,
    pub highpass_hz: Option<u32>,
    pub lowpass_hz: Option<u32>,
    pub speech_norm: bool,
}

impl Default for DenoiseProfile {
    fn default() -> Self {
        Self {
            mix: DEFAULT_MIX,
            highpass_hz: None,
            lowpass_hz: None,
            speech_norm: false,
        }
    }
}

/// Escape a model path for the filtergraph mini-language: forward slashes,
/// `\:` for colons, and `'\''` for embedded single quotes.
pub fn escape_model_path(path: &str) -> String {
    path.replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

/// Build the `-af` value: highpass, lowpass, aresample, arnndn, speechnorm.
pub fn build_filter_chain(profile: &DenoiseProfile, model_path: &str) -> Result<String, AppError> {
    let model_path = model_path.trim();
    if model_path.is_empty() {
        return Err(AppError::invalid_config("model path is empty"));
    }

    let mut filters = Vec::with_capacity(5);
    if let Some(hz) = profile.highpass_hz {
        filters.push(format!("highpass=f={}", hz));
    }
    if let Some(hz) = profile.lowpass_hz {
        filters.push(format!("lowpass=f={}", hz));
    }
    filters.push(format!("aresample={}", DENOISE_SAMPLE_RATE));
    // f64 Display never uses a locale decimal separator.
    filters.push(format!(
        "arnndn=m='{}':mix={}",
        escape_model_path(model_path),
        profile.mix
    ));
    if profile.speech_norm {
        filters.push(format!("speechnorm=e={}", SPEECHNORM_EXPANSION));
    }

    let chain = filters.join(",");
    log::trace!(target: "denoiser::ffmpeg::filter", "filter chain: {}", chain);
    Ok(chain)
}
