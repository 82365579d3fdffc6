//! App error type for the batch engine. Implements Display and Serialize for front-ends.

use crate::ffmpeg::{DiagnosticHint, FfmpegErrorPayload, parse_ffmpeg_error, parse_ffmpeg_signal};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Tool exited with code {code}: {stderr_tail}")]
    ToolExit {
        code: i32,
        stderr_tail: String,
        hint: Option<DiagnosticHint>,
    },

    #[error("Tool terminated by signal {signal}: {stderr_tail}")]
    ToolTerminated {
        signal: i32,
        stderr_tail: String,
        hint: Option<DiagnosticHint>,
    },

    #[error("Probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("A batch is already running")]
    AlreadyRunning,

    #[error("Unknown queue item: {0}")]
    UnknownItem(u64),

    #[error("Queue item {0} is being processed")]
    ItemBusy(u64),

    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn tool_exit(code: i32, stderr_tail: impl Into<String>) -> Self {
        let stderr_tail = stderr_tail.into();
        let hint = DiagnosticHint::classify(&stderr_tail);
        Self::ToolExit {
            code,
            stderr_tail,
            hint,
        }
    }

    pub fn tool_terminated(signal: i32, stderr_tail: impl Into<String>) -> Self {
        let stderr_tail = stderr_tail.into();
        let hint = DiagnosticHint::classify(&stderr_tail);
        Self::ToolTerminated {
            signal,
            stderr_tail,
            hint,
        }
    }

    /// Invariant, localization-independent error code.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Io(_) => "io",
            AppError::InvalidConfiguration(_) => "invalidConfiguration",
            AppError::ToolNotFound(_) => "toolNotFound",
            AppError::LaunchFailed { .. } => "launchFailed",
            AppError::ToolExit { .. } => "toolExit",
            AppError::ToolTerminated { .. } => "toolTerminated",
            AppError::ProbeUnavailable(_) => "probeUnavailable",
            AppError::AlreadyRunning => "alreadyRunning",
            AppError::UnknownItem(_) => "unknownItem",
            AppError::ItemBusy(_) => "itemBusy",
            AppError::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Summary and detail for errors that came from a tool's own output.
    fn tool_payload(&self) -> Option<FfmpegErrorPayload> {
        match self {
            AppError::ToolExit {
                code, stderr_tail, ..
            } => Some(parse_ffmpeg_error(stderr_tail, *code)),
            AppError::ToolTerminated {
                signal,
                stderr_tail,
                ..
            } => Some(parse_ffmpeg_signal(stderr_tail, *signal)),
            _ => None,
        }
    }

    /// Text stored on a failed queue item: hint first, then the raw stderr tail.
    pub fn item_detail(&self) -> String {
        match self.tool_payload() {
            Some(payload) if payload.detail.is_empty() => payload.summary,
            Some(payload) => format!("{}\n{}", payload.summary, payload.detail),
            None => self.to_string(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AppError::ToolExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let (summary, detail) = match self.tool_payload() {
            Some(payload) => (payload.summary, payload.detail),
            None => (self.to_string(), self.to_string()),
        };
        let mut state = serializer.serialize_struct("AppError", 3)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("summary", &summary)?;
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}
