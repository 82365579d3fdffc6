//! Process-wide queue and batch engine behind the sidecar protocol.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::AppError;
use crate::ffmpeg::discovery::{DENOISE_FILTER, ToolPaths, check_denoise_filter, resolve_tool_paths};
use crate::ffmpeg::ffprobe::DEFAULT_PROBE_TIMEOUT;
use crate::ffmpeg::{DenoiseProfile, build_filter_chain, path_to_string};
use crate::processor::{BatchProcessor, BatchState, EventSink, RunSummary};
use crate::queue::{ItemId, Queue, QueueItem, SUPPORTED_EXTENSIONS, SharedQueue};

pub const PROTOCOL_VERSION: u8 = 1;

static QUEUE: LazyLock<SharedQueue> = LazyLock::new(Queue::shared);
static PROCESSOR: LazyLock<BatchProcessor> = LazyLock::new(BatchProcessor::default);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub denoise_filter: &'static str,
    pub supported_extensions: &'static [&'static str],
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        denoise_filter: DENOISE_FILTER,
        supported_extensions: SUPPORTED_EXTENSIONS,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvCheckResult {
    pub tools: ToolPaths,
    pub arnndn_available: bool,
}

pub fn env_check(ffmpeg_bin_dir: Option<PathBuf>) -> Result<EnvCheckResult, AppError> {
    let tools = resolve_tool_paths(ffmpeg_bin_dir.as_deref())?;
    let arnndn_available =
        check_denoise_filter(PROCESSOR.runner(), &tools.ffmpeg, DEFAULT_PROBE_TIMEOUT)?;
    Ok(EnvCheckResult {
        tools,
        arnndn_available,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPreviewParams {
    #[serde(default)]
    pub profile: DenoiseProfile,
    pub model_path: PathBuf,
}

pub fn filter_preview(params: FilterPreviewParams) -> Result<String, AppError> {
    build_filter_chain(&params.profile, &path_to_string(&params.model_path))
}

fn snapshot_items(queue: &Queue, ids: &[ItemId]) -> Vec<QueueItem> {
    ids.iter().filter_map(|id| queue.get(*id).cloned()).collect()
}

/// Add files and folders; returns only the newly queued items.
pub fn queue_add(paths: Vec<PathBuf>) -> Result<Vec<QueueItem>, AppError> {
    let mut queue = QUEUE.lock();
    let added = queue.enqueue_paths(&paths)?;
    Ok(snapshot_items(&queue, &added))
}

pub fn queue_list() -> Vec<QueueItem> {
    QUEUE.lock().items().to_vec()
}

pub fn queue_set_included(id: ItemId, included: bool) -> Result<QueueItem, AppError> {
    let mut queue = QUEUE.lock();
    queue.set_included(id, included)?;
    queue.get(id).cloned().ok_or(AppError::UnknownItem(id))
}

pub fn queue_remove(id: ItemId) -> Result<QueueItem, AppError> {
    QUEUE.lock().remove(id)
}

/// Clears everything except the item being processed; returns how many went.
pub fn queue_clear() -> usize {
    QUEUE.lock().clear()
}

pub fn batch_state() -> BatchState {
    PROCESSOR.state()
}

/// Blocks for the whole run; callers put it on a worker thread.
pub fn batch_start(config: RunConfig, sink: Option<EventSink>) -> Result<RunSummary, AppError> {
    let queue = Arc::clone(&QUEUE);
    PROCESSOR.run(&queue, &config, sink.as_ref())
}

pub fn batch_cancel() -> bool {
    PROCESSOR.cancel()
}

/// Stop the active run and refuse new ones. Called when the host goes away.
pub fn shutdown() {
    PROCESSOR.shutdown();
}
