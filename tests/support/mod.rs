#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use denoiser_core::error::AppError;
use denoiser_core::ffmpeg::discovery::executable_name;
use denoiser_core::ffmpeg::{CancelToken, CapturedOutput, ProcessOutcome, ProcessRunner};
use denoiser_core::processor::{BatchEvent, EventSink};
use denoiser_core::RunConfig;
use parking_lot::Mutex;
use tempfile::TempDir;

/// What the fake ffmpeg does for one input file name.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed { stderr: Vec<String> },
    Fail { code: i32, stderr: String },
    BlockUntilCancelled,
    LaunchFailure,
    KilledBySignal(i32),
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn input_name(&self) -> Option<String> {
        let pos = self.args.iter().position(|a| a == "-i")?;
        input_file_name(self.args.get(pos + 1)?)
    }

    pub fn has_pair(&self, flag: &str, value: &str) -> bool {
        self.args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

fn input_file_name(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, Copy)]
pub struct MediaInfo {
    pub duration: Option<f64>,
    pub has_video: bool,
}

/// `ProcessRunner` that never spawns anything. Behaviour is keyed by input file name.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, Script>>,
    media: Mutex<HashMap<String, MediaInfo>>,
    runs: Mutex<Vec<Invocation>>,
    probes: Mutex<Vec<Invocation>>,
    killed: Mutex<Vec<String>>,
    hung_probes: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, script: Script) {
        self.scripts.lock().insert(name.to_string(), script);
    }

    pub fn media(&self, name: &str, duration: Option<f64>, has_video: bool) {
        self.media
            .lock()
            .insert(name.to_string(), MediaInfo { duration, has_video });
    }

    /// ffprobe for `name` never answers; it only returns once the run is cancelled.
    pub fn hang_probe(&self, name: &str) {
        self.hung_probes.lock().push(name.to_string());
    }

    pub fn runs(&self) -> Vec<Invocation> {
        self.runs.lock().clone()
    }

    pub fn run_for(&self, name: &str) -> Option<Invocation> {
        self.runs()
            .into_iter()
            .find(|inv| inv.input_name().as_deref() == Some(name))
    }

    pub fn probed(&self, name: &str) -> bool {
        self.probes
            .lock()
            .iter()
            .any(|inv| inv.args.last().and_then(|a| input_file_name(a)).as_deref() == Some(name))
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        on_stderr_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> Result<ProcessOutcome, AppError> {
        let invocation = Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
        };
        let name = invocation.input_name().unwrap_or_default();
        self.runs.lock().push(invocation);
        let script = self
            .scripts
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or(Script::Succeed { stderr: Vec::new() });

        match script {
            Script::Succeed { stderr } => {
                for line in &stderr {
                    on_stderr_line(line);
                }
                if let Some(output) = args.last() {
                    fs::write(output, b"denoised").map_err(AppError::Io)?;
                }
                Ok(ProcessOutcome::exited(0, stderr.join("\n")))
            }
            Script::Fail { code, stderr } => {
                on_stderr_line(&stderr);
                Ok(ProcessOutcome::exited(code, stderr))
            }
            Script::BlockUntilCancelled => {
                on_stderr_line("size=       0kB time=00:00:01.00 bitrate=   0.0kbits/s");
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                self.killed.lock().push(name);
                Err(AppError::Cancelled)
            }
            Script::LaunchFailure => Err(AppError::LaunchFailed {
                program: program.display().to_string(),
                reason: "permission denied".to_string(),
            }),
            Script::KilledBySignal(signal) => {
                on_stderr_line("size=       0kB time=00:00:01.00 bitrate=   0.0kbits/s");
                Ok(ProcessOutcome::killed(
                    signal,
                    "size=       0kB time=00:00:01.00 bitrate=   0.0kbits/s".to_string(),
                ))
            }
        }
    }

    fn capture(
        &self,
        program: &Path,
        args: &[String],
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<CapturedOutput, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let invocation = Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
        };
        let name = args
            .last()
            .and_then(|a| input_file_name(a))
            .unwrap_or_default();
        self.probes.lock().push(invocation);
        if self.hung_probes.lock().contains(&name) {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            self.killed.lock().push(name);
            return Err(AppError::Cancelled);
        }
        let info = self.media.lock().get(&name).copied().unwrap_or(MediaInfo {
            duration: None,
            has_video: false,
        });

        let stdout = if args.iter().any(|a| a == "format=duration") {
            info.duration.map(|d| format!("{}\n", d)).unwrap_or_else(|| "N/A\n".to_string())
        } else if info.has_video {
            "video\n".to_string()
        } else {
            String::new()
        };
        Ok(CapturedOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

/// Scratch layout: fake tool binaries, a model file, an input folder and an output folder.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).expect("create bin");
        fs::write(bin.join(executable_name("ffmpeg")), b"").expect("write ffmpeg");
        fs::write(bin.join(executable_name("ffprobe")), b"").expect("write ffprobe");
        fs::write(dir.path().join("sh.rnnn"), b"model").expect("write model");
        fs::create_dir_all(dir.path().join("in")).expect("create in");
        Self { dir }
    }

    pub fn input(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("in").join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create input parent");
        }
        fs::write(&path, b"media").expect("write input");
        path
    }

    pub fn output_folder(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn config(&self) -> RunConfig {
        RunConfig {
            ffmpeg_bin_dir: Some(self.dir.path().join("bin")),
            model_path: self.dir.path().join("sh.rnnn"),
            output_folder: self.output_folder(),
            ..RunConfig::default()
        }
    }
}

/// Sink that forwards every event to a channel.
pub fn channel_sink() -> (EventSink, Receiver<BatchEvent>) {
    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.lock().send(event);
    });
    (sink, rx)
}
