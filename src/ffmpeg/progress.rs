use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d*)?)").expect("invalid time regex")
});

/// Elapsed/percent/remaining for one recognized progress line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub elapsed_secs: f64,
    /// Only present when the total duration is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<f64>,
}

impl ProgressSnapshot {
    pub fn compute(elapsed_secs: f64, duration_secs: Option<f64>) -> Self {
        match duration_secs.filter(|d| *d > 0.0) {
            Some(duration) => Self {
                elapsed_secs,
                percent: Some((elapsed_secs / duration * 100.0).clamp(0.0, 100.0)),
                remaining_secs: Some((duration - elapsed_secs).max(0.0)),
            },
            None => Self {
                elapsed_secs,
                percent: None,
                remaining_secs: None,
            },
        }
    }
}

/// Parse `time=HH:MM:SS.ms` anywhere in an ffmpeg stderr line into seconds.
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let caps = TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a stderr line into a snapshot. Unrelated lines yield None.
pub fn parse_progress(line: &str, duration_secs: Option<f64>) -> Option<ProgressSnapshot> {
    parse_elapsed(line).map(|elapsed| ProgressSnapshot::compute(elapsed, duration_secs))
}
