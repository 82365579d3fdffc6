//! Batch engine: walks the queue sequentially, one ffmpeg process at a time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{ResolvedConfig, RunConfig};
use crate::error::AppError;
use crate::ffmpeg::ffprobe::MediaProbe;
use crate::ffmpeg::{
    CancelToken, DenoiseCommand, ProcessRunner, ProgressSnapshot, SystemRunner,
    build_denoise_args, format_args_for_display_multiline, parse_progress, path_to_string,
    resolve_audio_encoding,
};
use crate::queue::{ItemId, ItemStatus, QueueItem, SharedQueue};

const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(150);
const PROGRESS_EMIT_MIN_DELTA: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Per-run counts. `not_started` is included items a cancel left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub not_started: usize,
}

impl RunSummary {
    fn new(skipped: usize) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            done: 0,
            failed: 0,
            cancelled: 0,
            skipped,
            not_started: 0,
        }
    }
}

/// Notifications for front-ends. Item payloads are snapshots taken under the queue lock.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { queued: usize },
    ItemStatus(QueueItem),
    ItemProgress { id: ItemId, progress: ProgressSnapshot },
    Finished(RunSummary),
}

pub type EventSink = Arc<dyn Fn(BatchEvent) + Send + Sync>;

fn emit(sink: Option<&EventSink>, event: BatchEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}

/// `<stem><suffix>.<ext>` in `folder`, extension kept as given.
pub fn output_path_for(input: &Path, folder: &Path, suffix: &str) -> PathBuf {
    output_path_numbered(input, folder, suffix, None)
}

fn output_path_numbered(input: &Path, folder: &Path, suffix: &str, n: Option<u32>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{}{}", stem, suffix);
    if let Some(n) = n {
        name.push_str(&format!("_{}", n));
    }
    if let Some(ext) = input.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    folder.join(name)
}

/// First free output name for `input`. Names held by other queue items get
/// `_2`, `_3`... so one item never overwrites another's output.
fn claim_output_path(
    input: &Path,
    folder: &Path,
    suffix: &str,
    reserved: &HashSet<PathBuf>,
) -> PathBuf {
    let mut candidate = output_path_for(input, folder, suffix);
    let mut n = 2;
    while reserved.contains(&candidate) || candidate == input {
        candidate = output_path_numbered(input, folder, suffix, Some(n));
        n += 1;
    }
    candidate
}

enum ItemResult {
    Done,
    Cancelled,
    Failed(AppError),
}

/// Clears the active run slot on every exit path.
struct ActiveRunGuard<'a> {
    slot: &'a Mutex<Option<CancelToken>>,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

pub struct BatchProcessor<R: ProcessRunner = SystemRunner> {
    runner: R,
    active: Mutex<Option<CancelToken>>,
    /// Set by `shutdown`; only read or written under the `active` lock.
    closed: AtomicBool,
}

impl Default for BatchProcessor<SystemRunner> {
    fn default() -> Self {
        Self::new(SystemRunner)
    }
}

impl<R: ProcessRunner> BatchProcessor<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn state(&self) -> BatchState {
        if self.active.lock().is_some() {
            BatchState::Running
        } else {
            BatchState::Idle
        }
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let token = self.active.lock().clone();
        match token {
            Some(token) => {
                log::info!(target: "denoiser::processor", "Cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel any active run and refuse every later one.
    pub fn shutdown(&self) {
        let token = {
            let slot = self.active.lock();
            self.closed.store(true, Ordering::SeqCst);
            slot.clone()
        };
        if let Some(token) = token {
            log::info!(target: "denoiser::processor", "Shutdown, cancelling active run");
            token.cancel();
        }
    }

    fn begin(&self) -> Result<CancelToken, AppError> {
        let mut slot = self.active.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Cancelled);
        }
        if slot.is_some() {
            return Err(AppError::AlreadyRunning);
        }
        let token = CancelToken::new();
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Process every included item in queue order. Blocks until the run ends.
    /// Configuration errors abort before any item changes.
    pub fn run(
        &self,
        queue: &SharedQueue,
        config: &RunConfig,
        sink: Option<&EventSink>,
    ) -> Result<RunSummary, AppError> {
        let token = self.begin()?;
        let _guard = ActiveRunGuard { slot: &self.active };
        let resolved = config.resolve()?;
        Ok(self.run_resolved(queue, &resolved, &token, sink))
    }

    fn run_resolved(
        &self,
        queue: &SharedQueue,
        config: &ResolvedConfig,
        token: &CancelToken,
        sink: Option<&EventSink>,
    ) -> RunSummary {
        let (queued, skipped) = {
            let q = queue.lock();
            let queued = q.items().iter().filter(|i| i.included).count();
            (queued, q.len() - queued)
        };
        log::info!(
            target: "denoiser::processor",
            "Batch started: {} included, {} skipped",
            queued,
            skipped
        );
        emit(sink, BatchEvent::Started { queued });

        let mut summary = RunSummary::new(skipped);
        let mut visited = HashSet::new();

        loop {
            if token.is_cancelled() {
                summary.outcome = RunOutcome::Cancelled;
                break;
            }
            let claimed_item = {
                let mut q = queue.lock();
                let next = q.next_included(&visited);
                next.and_then(|id| {
                    let item = q.get_mut(id)?;
                    item.begin_attempt();
                    let snapshot = (item.input.clone(), item.clone());
                    q.set_busy(Some(id));
                    Some((id, snapshot))
                })
            };
            let Some((id, (input, snapshot))) = claimed_item else {
                break;
            };
            visited.insert(id);
            emit(sink, BatchEvent::ItemStatus(snapshot));

            let started = Instant::now();
            let result = self.process_item(id, &input, config, token, queue, sink);
            let wall = started.elapsed().as_secs_f64();

            let snapshot = {
                let mut q = queue.lock();
                q.set_busy(None);
                q.get_mut(id).map(|item| {
                    match &result {
                        ItemResult::Done => item.mark_done(wall),
                        ItemResult::Cancelled => item.mark_cancelled(wall),
                        ItemResult::Failed(err) => item.mark_error(err, wall),
                    }
                    item.clone()
                })
            };
            match &result {
                ItemResult::Done => {
                    summary.done += 1;
                    log::info!(target: "denoiser::processor", "Done: {} ({:.1}s)", input.display(), wall);
                }
                ItemResult::Cancelled => {
                    summary.cancelled += 1;
                    log::info!(target: "denoiser::processor", "Cancelled: {}", input.display());
                }
                ItemResult::Failed(err) => {
                    summary.failed += 1;
                    log::warn!(
                        target: "denoiser::processor",
                        "Failed: {}: {}",
                        input.display(),
                        err
                    );
                }
            }
            if let Some(snapshot) = snapshot {
                emit(sink, BatchEvent::ItemStatus(snapshot));
            }
            if matches!(result, ItemResult::Cancelled) {
                summary.outcome = RunOutcome::Cancelled;
                break;
            }
        }

        if summary.outcome == RunOutcome::Cancelled {
            let q = queue.lock();
            summary.not_started = q
                .items()
                .iter()
                .filter(|i| i.included && !visited.contains(&i.id))
                .count();
        }
        log::info!(
            target: "denoiser::processor",
            "Batch finished ({:?}): {} done, {} failed, {} cancelled",
            summary.outcome,
            summary.done,
            summary.failed,
            summary.cancelled
        );
        emit(sink, BatchEvent::Finished(summary.clone()));
        summary
    }

    fn process_item(
        &self,
        id: ItemId,
        input: &Path,
        config: &ResolvedConfig,
        token: &CancelToken,
        queue: &SharedQueue,
        sink: Option<&EventSink>,
    ) -> ItemResult {
        let probe = MediaProbe::new(&self.runner, &config.tools.ffprobe, config.probe_timeout)
            .with_cancel(token);
        let duration = probe.duration(input);
        if token.is_cancelled() {
            return ItemResult::Cancelled;
        }
        let has_video = probe.has_video_stream(input);
        if token.is_cancelled() {
            return ItemResult::Cancelled;
        }

        let (output, snapshot) = {
            let mut q = queue.lock();
            let reserved: HashSet<PathBuf> = q
                .items()
                .iter()
                .filter(|i| i.id != id)
                .filter_map(|i| i.output.clone())
                .collect();
            let output =
                claim_output_path(input, &config.output_folder, &config.output_suffix, &reserved);
            let snapshot = q.get_mut(id).map(|item| {
                item.output = Some(output.clone());
                item.status = ItemStatus::Running;
                item.clone()
            });
            (output, snapshot)
        };
        if let Some(snapshot) = snapshot {
            emit(sink, BatchEvent::ItemStatus(snapshot));
        }

        let audio = resolve_audio_encoding(input, &config.audio_codec, &config.audio_bitrate);
        let args = build_denoise_args(&DenoiseCommand {
            input,
            output: &output,
            filter_chain: &config.filter_chain,
            has_video,
            copy_video: config.copy_video,
            audio: &audio,
        });
        log::debug!(
            target: "denoiser::processor",
            "{} {}",
            path_to_string(&config.tools.ffmpeg),
            format_args_for_display_multiline(&args)
        );

        let mut last_emit: Option<(Instant, f64)> = None;
        let mut on_line = |line: &str| {
            let Some(parsed) = parse_progress(line, duration) else {
                return;
            };
            let Some(progress) = queue
                .lock()
                .get_mut(id)
                .map(|item| item.apply_progress(&parsed))
            else {
                return;
            };
            let percent = progress.percent.unwrap_or(0.0);
            let due = match last_emit {
                None => true,
                Some((at, last_percent)) => {
                    at.elapsed() >= PROGRESS_EMIT_INTERVAL
                        || (percent - last_percent).abs() >= PROGRESS_EMIT_MIN_DELTA
                }
            };
            if due {
                last_emit = Some((Instant::now(), percent));
                emit(sink, BatchEvent::ItemProgress { id, progress });
            }
        };

        match self.runner.run(&config.tools.ffmpeg, &args, &mut on_line, token) {
            Ok(outcome) if outcome.success() => ItemResult::Done,
            Ok(outcome) => ItemResult::Failed(outcome.into_error()),
            Err(e) if e.is_cancelled() => ItemResult::Cancelled,
            Err(e) => ItemResult::Failed(e),
        }
    }
}
