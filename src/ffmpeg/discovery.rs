use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;

use super::runner::{CancelToken, ProcessRunner};
use crate::error::AppError;

/// Fallback bin directory when the run configuration leaves it empty.
pub const FFMPEG_DIR_ENV: &str = "DENOISER_FFMPEG_DIR";
/// Filter name the environment self-check looks for.
pub const DENOISE_FILTER: &str = "arnndn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Platform executable name for a tool base name.
pub fn executable_name(base: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

impl ToolPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ffmpeg: dir.join(executable_name("ffmpeg")),
            ffprobe: dir.join(executable_name("ffprobe")),
        }
    }

    /// Both binaries must exist on disk before a run is allowed.
    pub fn validate(&self) -> Result<(), AppError> {
        let missing: Vec<String> = [&self.ffmpeg, &self.ffprobe]
            .into_iter()
            .filter(|p| !p.is_file())
            .map(|p| p.display().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_config(format!(
                "FFmpeg tools not found: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(target_os = "windows")]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("where").arg("ffmpeg").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

#[cfg(not(target_os = "windows"))]
fn find_in_path() -> Option<PathBuf> {
    let output = Command::new("which").arg("ffmpeg").output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

/// Resolve ffmpeg/ffprobe from a configured bin directory, then the
/// `DENOISER_FFMPEG_DIR` env var, then PATH.
pub fn resolve_tool_paths(bin_dir: Option<&Path>) -> Result<ToolPaths, AppError> {
    if let Some(dir) = bin_dir.filter(|d| !d.as_os_str().is_empty()) {
        let tools = ToolPaths::in_dir(dir);
        tools.validate()?;
        log::debug!(
            target: "denoiser::ffmpeg::discovery",
            "FFmpeg tools from configured dir: {}",
            dir.display()
        );
        return Ok(tools);
    }

    if let Ok(env_dir) = std::env::var(FFMPEG_DIR_ENV)
        && !env_dir.trim().is_empty()
    {
        let tools = ToolPaths::in_dir(Path::new(env_dir.trim()));
        tools.validate()?;
        log::debug!(
            target: "denoiser::ffmpeg::discovery",
            "FFmpeg tools from {} env: {}",
            FFMPEG_DIR_ENV,
            env_dir
        );
        return Ok(tools);
    }

    if let Some(dir) = find_in_path().and_then(|p| p.parent().map(Path::to_path_buf)) {
        let tools = ToolPaths::in_dir(&dir);
        if tools.validate().is_ok() {
            log::debug!(
                target: "denoiser::ffmpeg::discovery",
                "FFmpeg tools found in PATH: {}",
                dir.display()
            );
            return Ok(tools);
        }
    }

    log::error!(
        target: "denoiser::ffmpeg::discovery",
        "FFmpeg not found in configured dir, {} or PATH",
        FFMPEG_DIR_ENV
    );
    Err(AppError::invalid_config(
        "FFmpeg not found. Point the bin directory at a folder containing ffmpeg and ffprobe.",
    ))
}

pub fn filter_list_args() -> Vec<String> {
    vec!["-hide_banner".to_string(), "-filters".to_string()]
}

/// True if `ffmpeg -filters` output lists `name`. Rows look like
/// ` ... arnndn            A->A       Reduce noise from speech ...`.
pub fn filters_contain(filters_output: &str, name: &str) -> bool {
    filters_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Pre-flight: does the installed ffmpeg build ship the denoise filter?
pub fn check_denoise_filter(
    runner: &dyn ProcessRunner,
    ffmpeg: &Path,
    timeout: Duration,
) -> Result<bool, AppError> {
    let output = runner.capture(ffmpeg, &filter_list_args(), timeout, &CancelToken::new())?;
    if output.exit_code != 0 {
        return Err(AppError::tool_exit(output.exit_code, output.stderr.trim()));
    }
    let available = filters_contain(&output.stdout, DENOISE_FILTER);
    log::info!(
        target: "denoiser::ffmpeg::discovery",
        "{} filter available: {}",
        DENOISE_FILTER,
        available
    );
    Ok(available)
}
