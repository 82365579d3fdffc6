mod builder;
pub mod discovery;
mod error;
pub mod ffprobe;
mod filter;
mod progress;
pub mod runner;

pub use builder::{
    AudioEncoding, DEFAULT_AUDIO_BITRATE, DEFAULT_AUDIO_CODEC, DenoiseCommand, PCM_CODEC,
    build_denoise_args, format_args_for_display_multiline, lowercase_extension,
    resolve_audio_encoding,
};
pub use error::{DiagnosticHint, FfmpegErrorPayload, parse_ffmpeg_error, parse_ffmpeg_signal};
pub use filter::{DEFAULT_MIX, DENOISE_SAMPLE_RATE, DenoiseProfile, build_filter_chain, escape_model_path};
pub use progress::{ProgressSnapshot, parse_elapsed, parse_progress};
pub use runner::{CancelToken, CapturedOutput, ProcessOutcome, ProcessRunner, SystemRunner};

/// Path to string for FFmpeg args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
