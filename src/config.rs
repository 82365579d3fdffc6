//! Run configuration snapshot. Front-ends own loading and saving; the engine
//! only validates what it is handed at the start of each run.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ffmpeg::discovery::{ToolPaths, resolve_tool_paths};
use crate::ffmpeg::ffprobe::DEFAULT_PROBE_TIMEOUT;
use crate::ffmpeg::{
    DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_CODEC, DenoiseProfile, build_filter_chain, path_to_string,
};

pub const DEFAULT_OUTPUT_SUFFIX: &str = "_clean";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Folder holding ffmpeg and ffprobe. Empty falls back to env, then PATH.
    pub ffmpeg_bin_dir: Option<PathBuf>,
    pub model_path: PathBuf,
    pub output_folder: PathBuf,
    pub profile: DenoiseProfile,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub copy_video: bool,
    pub output_suffix: String,
    pub probe_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin_dir: None,
            model_path: PathBuf::new(),
            output_folder: PathBuf::new(),
            profile: DenoiseProfile::default(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            copy_video: true,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
        }
    }
}

/// Validated snapshot a batch runs against.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub tools: ToolPaths,
    pub model_path: PathBuf,
    pub output_folder: PathBuf,
    pub filter_chain: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub copy_video: bool,
    pub output_suffix: String,
    pub probe_timeout: Duration,
}

impl RunConfig {
    /// Check tools, model and output folder. Any failure is `InvalidConfiguration`.
    pub fn resolve(&self) -> Result<ResolvedConfig, AppError> {
        let tools = resolve_tool_paths(self.ffmpeg_bin_dir.as_deref())?;

        if self.model_path.as_os_str().is_empty() {
            return Err(AppError::invalid_config("model path is empty"));
        }
        if !self.model_path.is_file() {
            return Err(AppError::invalid_config(format!(
                "model file not found: {}",
                self.model_path.display()
            )));
        }
        let filter_chain = build_filter_chain(&self.profile, &path_to_string(&self.model_path))?;

        if self.output_folder.as_os_str().is_empty() {
            return Err(AppError::invalid_config("output folder is empty"));
        }
        if self.output_folder.exists() {
            if !self.output_folder.is_dir() {
                return Err(AppError::invalid_config(format!(
                    "output folder is not a directory: {}",
                    self.output_folder.display()
                )));
            }
        } else {
            fs::create_dir_all(&self.output_folder).map_err(|e| {
                AppError::invalid_config(format!(
                    "cannot create output folder {}: {}",
                    self.output_folder.display(),
                    e
                ))
            })?;
            log::info!(
                target: "denoiser::config",
                "Created output folder {}",
                self.output_folder.display()
            );
        }

        // An empty suffix would let an output overwrite its own input.
        let output_suffix = if self.output_suffix.trim().is_empty() {
            DEFAULT_OUTPUT_SUFFIX.to_string()
        } else {
            self.output_suffix.trim().to_string()
        };

        Ok(ResolvedConfig {
            tools,
            model_path: self.model_path.clone(),
            output_folder: self.output_folder.clone(),
            filter_chain,
            audio_codec: self.audio_codec.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
            copy_video: self.copy_video,
            output_suffix,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::discovery::executable_name;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: RunConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        fs::write(bin.join(executable_name("ffmpeg")), b"").unwrap();
        fs::write(bin.join(executable_name("ffprobe")), b"").unwrap();
        let model = dir.path().join("sh.rnnn");
        fs::write(&model, b"model").unwrap();
        let config = RunConfig {
            ffmpeg_bin_dir: Some(bin),
            model_path: model,
            output_folder: dir.path().join("out"),
            ..Default::default()
        };
        Fixture { _dir: dir, config }
    }

    #[test]
    fn resolves_and_creates_output_folder() {
        let f = fixture();
        let resolved = f.config.resolve().unwrap();
        assert!(resolved.output_folder.is_dir());
        assert!(resolved.filter_chain.contains("arnndn=m='"));
        assert_eq!(resolved.output_suffix, DEFAULT_OUTPUT_SUFFIX);
        assert_eq!(resolved.probe_timeout, DEFAULT_PROBE_TIMEOUT);
    }

    #[test]
    fn missing_model_blocks_run() {
        let mut f = fixture();
        f.config.model_path = Path::new("/nonexistent/model.rnnn").to_path_buf();
        let err = f.config.resolve().unwrap_err();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));

        f.config.model_path = PathBuf::new();
        let err = f.config.resolve().unwrap_err();
        assert!(err.to_string().contains("model path is empty"));
    }

    #[test]
    fn missing_tools_block_run() {
        let mut f = fixture();
        let empty = tempfile::tempdir().unwrap();
        f.config.ffmpeg_bin_dir = Some(empty.path().to_path_buf());
        assert!(matches!(
            f.config.resolve(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn output_folder_that_is_a_file_is_rejected() {
        let mut f = fixture();
        let file = f.config.model_path.clone();
        f.config.output_folder = file;
        assert!(matches!(
            f.config.resolve(),
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn empty_suffix_falls_back_to_default() {
        let mut f = fixture();
        f.config.output_suffix = "  ".into();
        assert_eq!(f.config.resolve().unwrap().output_suffix, DEFAULT_OUTPUT_SUFFIX);
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"modelPath": "/m.rnnn", "outputFolder": "/out", "copyVideo": false,
                "profile": {"mix": 0.6, "speechNorm": true}}"#,
        )
        .unwrap();
        assert_eq!(cfg.audio_codec, DEFAULT_AUDIO_CODEC);
        assert_eq!(cfg.audio_bitrate, DEFAULT_AUDIO_BITRATE);
        assert!(!cfg.copy_video);
        assert!(cfg.profile.speech_norm);
        assert_eq!(cfg.profile.mix, 0.6);
    }
}
