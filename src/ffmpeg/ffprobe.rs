//! ffprobe queries used before each denoise run: container duration and
//! whether the input carries a video stream. Both degrade instead of failing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::path_to_string;
use super::runner::{CancelToken, CapturedOutput, ProcessRunner};
use crate::error::AppError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn duration_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=nokey=1:noprint_wrappers=1".to_string(),
        path_to_string(input),
    ]
}

pub fn video_stream_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=codec_type".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        path_to_string(input),
    ]
}

/// Parse ffprobe's bare duration output. `N/A` and garbage yield None.
pub fn parse_duration_output(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Any non-empty output line means ffprobe selected a video stream.
pub fn parse_has_video_output(stdout: &str) -> bool {
    stdout.lines().any(|l| !l.trim().is_empty())
}

pub struct MediaProbe<'a> {
    runner: &'a dyn ProcessRunner,
    ffprobe: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
}

impl<'a> MediaProbe<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            ffprobe: ffprobe.into(),
            timeout,
            cancel: CancelToken::new(),
        }
    }

    /// Tie probe processes to a batch's cancellation.
    pub fn with_cancel(mut self, cancel: &CancelToken) -> Self {
        self.cancel = cancel.clone();
        self
    }

    fn log_failure(&self, what: &str, input: &Path, e: &AppError) {
        if e.is_cancelled() {
            log::debug!(target: "denoiser::ffmpeg::ffprobe", "{} probe cancelled", what);
        } else {
            log::warn!(
                target: "denoiser::ffmpeg::ffprobe",
                "{} probe failed for {}: {}",
                what,
                input.display(),
                e
            );
        }
    }

    fn query(&self, args: Vec<String>) -> Result<CapturedOutput, AppError> {
        let output = self
            .runner
            .capture(&self.ffprobe, &args, self.timeout, &self.cancel)?;
        if output.exit_code != 0 {
            return Err(AppError::ProbeUnavailable(format!(
                "ffprobe exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    /// Container duration in seconds, or None when it cannot be determined.
    pub fn duration(&self, input: &Path) -> Option<f64> {
        match self.query(duration_args(input)) {
            Ok(output) => {
                let duration = parse_duration_output(&output.stdout);
                if duration.is_none() {
                    log::debug!(
                        target: "denoiser::ffmpeg::ffprobe",
                        "No usable duration for {}: {:?}",
                        input.display(),
                        output.stdout.trim()
                    );
                }
                duration
            }
            Err(e) => {
                self.log_failure("Duration", input, &e);
                None
            }
        }
    }

    pub fn has_video_stream(&self, input: &Path) -> bool {
        match self.query(video_stream_args(input)) {
            Ok(output) => parse_has_video_output(&output.stdout),
            Err(e) => {
                self.log_failure("Video stream", input, &e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::runner::{CancelToken, ProcessOutcome};

    struct CannedRunner {
        output: Result<CapturedOutput, fn() -> AppError>,
    }

    impl ProcessRunner for CannedRunner {
        fn run(
            &self,
            _program: &Path,
            _args: &[String],
            _on_stderr_line: &mut dyn FnMut(&str),
            _cancel: &CancelToken,
        ) -> Result<ProcessOutcome, AppError> {
            unreachable!("probes never stream")
        }

        fn capture(
            &self,
            _program: &Path,
            _args: &[String],
            _timeout: Duration,
            cancel: &CancelToken,
        ) -> Result<CapturedOutput, AppError> {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            match &self.output {
                Ok(out) => Ok(out.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn ok(stdout: &str, exit_code: i32) -> CannedRunner {
        CannedRunner {
            output: Ok(CapturedOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        }
    }

    #[test]
    fn duration_output_parsed_invariantly() {
        assert_eq!(parse_duration_output("120.500000\n"), Some(120.5));
        assert_eq!(parse_duration_output("N/A\n"), None);
        assert_eq!(parse_duration_output("120,5"), None);
        assert_eq!(parse_duration_output(""), None);
    }

    #[test]
    fn has_video_from_output() {
        assert!(parse_has_video_output("video\n"));
        assert!(!parse_has_video_output("\n  \n"));
    }

    #[test]
    fn probe_duration_success() {
        let runner = ok("42.0\n", 0);
        let probe = MediaProbe::new(&runner, "ffprobe", DEFAULT_PROBE_TIMEOUT);
        assert_eq!(probe.duration(Path::new("/in.wav")), Some(42.0));
    }

    #[test]
    fn probe_nonzero_exit_degrades() {
        let runner = ok("42.0\n", 1);
        let probe = MediaProbe::new(&runner, "ffprobe", DEFAULT_PROBE_TIMEOUT);
        assert_eq!(probe.duration(Path::new("/in.wav")), None);
        assert!(!probe.has_video_stream(Path::new("/in.wav")));
    }

    #[test]
    fn probe_timeout_degrades() {
        let runner = CannedRunner {
            output: Err(|| AppError::ProbeUnavailable("timed out".into())),
        };
        let probe = MediaProbe::new(&runner, "ffprobe", DEFAULT_PROBE_TIMEOUT);
        assert_eq!(probe.duration(Path::new("/in.mp4")), None);
        assert!(!probe.has_video_stream(Path::new("/in.mp4")));
    }

    #[test]
    fn probe_uses_batch_cancellation() {
        let runner = ok("42.0\n", 0);
        let token = CancelToken::new();
        let probe = MediaProbe::new(&runner, "ffprobe", DEFAULT_PROBE_TIMEOUT).with_cancel(&token);
        assert_eq!(probe.duration(Path::new("/in.wav")), Some(42.0));
        token.cancel();
        assert_eq!(probe.duration(Path::new("/in.wav")), None);
    }

    #[test]
    fn args_end_with_input() {
        let args = video_stream_args(Path::new("/media/a b.mkv"));
        assert_eq!(args.last().unwrap(), "/media/a b.mkv");
        assert!(args.windows(2).any(|w| w[0] == "-select_streams" && w[1] == "v:0"));
    }
}
