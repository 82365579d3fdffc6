//! Map FFmpeg exit codes and stderr text to user-facing summaries.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded),
//! 123 (hard exit), 255 (signal). Launch failures never get here.
//! Stderr is kept as detail for debugging.

use serde::Serialize;

/// Payload for error reporting. Front-ends show summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegErrorPayload {
    pub summary: String,
    pub detail: String,
}

/// Best-effort classification of a failed run from its captured stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticHint {
    FilterNotFound,
    ModelUnreadable,
    InvalidFilterArguments,
    InputUnreadable,
    OutputUnwritable,
}

/// Needles are matched against lowercased stderr, first match wins.
const HINT_PATTERNS: &[(DiagnosticHint, &[&str])] = &[
    (
        DiagnosticHint::FilterNotFound,
        &["no such filter", "filter not found"],
    ),
    (
        DiagnosticHint::ModelUnreadable,
        &[
            "error opening model",
            "could not open model",
            "failed to open model",
            "error reading model",
        ],
    ),
    (
        DiagnosticHint::InvalidFilterArguments,
        &[
            "error parsing options",
            "unable to parse option value",
            "error initializing filter",
            "error applying option",
            "invalid argument",
        ],
    ),
    (
        DiagnosticHint::InputUnreadable,
        &[
            "invalid data found when processing input",
            "no such file or directory",
        ],
    ),
    (
        DiagnosticHint::OutputUnwritable,
        &["permission denied", "could not open file", "read-only file system"],
    ),
];

impl DiagnosticHint {
    pub fn classify(stderr: &str) -> Option<Self> {
        let lower = stderr.to_lowercase();
        HINT_PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(hint, _)| *hint)
    }

    pub fn summary(self) -> &'static str {
        match self {
            DiagnosticHint::FilterNotFound => {
                "This FFmpeg build has no arnndn filter. Install a build with arnndn support."
            }
            DiagnosticHint::ModelUnreadable => "The denoise model file could not be read.",
            DiagnosticHint::InvalidFilterArguments => {
                "FFmpeg rejected the audio filter arguments."
            }
            DiagnosticHint::InputUnreadable => "The input file could not be read.",
            DiagnosticHint::OutputUnwritable => "The output file could not be written.",
        }
    }
}

/// Builds summary (hint, then exit code) and detail (trimmed stderr).
pub fn parse_ffmpeg_error(stderr: &str, exit_code: i32) -> FfmpegErrorPayload {
    let summary = match DiagnosticHint::classify(stderr) {
        Some(hint) => hint.summary().to_string(),
        None => known_exit_code_summary(exit_code)
            .unwrap_or_else(|| format!("FFmpeg failed (exit code {}).", exit_code)),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// Same as `parse_ffmpeg_error` for a process that never exited on its own.
pub fn parse_ffmpeg_signal(stderr: &str, signal: i32) -> FfmpegErrorPayload {
    let summary = match DiagnosticHint::classify(stderr) {
        Some(hint) => hint.summary().to_string(),
        None => format!("FFmpeg was terminated by signal {}.", signal),
    };
    FfmpegErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        1 => Some("FFmpeg failed.".into()),
        69 => Some("Encoding rate limit exceeded.".into()),
        123 | 255 => Some("Encoding was stopped.".into()),
        _ => None,
    }
}
