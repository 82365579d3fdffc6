//! Checklist queue of media files and the per-item state the batch engine updates.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::AppError;
use crate::ffmpeg::{ProgressSnapshot, lowercase_extension};

/// Extensions picked up when a folder is expanded.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "wav", "mp3", "m4a", "aac", "flac", "ogg", "mp4", "mov", "mkv", "m4v", "avi", "webm",
];

pub fn is_supported_media(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&lowercase_extension(path).as_str())
}

pub type ItemId = u64;

/// Invariant item status; display strings belong to front-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Preparing,
    Running,
    Done,
    Cancelled,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Cancelled | ItemStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: ItemId,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    /// Whether the item takes part in the next run.
    pub included: bool,
    pub status: ItemStatus,
    pub progress_percent: f64,
    /// Media position reached, from ffmpeg's `time=` stats.
    pub elapsed_secs: Option<f64>,
    pub remaining_secs: Option<f64>,
    /// Wall-clock processing time of the last attempt.
    pub wall_time_secs: Option<f64>,
    pub error_detail: Option<String>,
    pub error_code: Option<i32>,
}

impl QueueItem {
    fn new(id: ItemId, input: PathBuf) -> Self {
        Self {
            id,
            input,
            output: None,
            included: true,
            status: ItemStatus::Queued,
            progress_percent: 0.0,
            elapsed_secs: None,
            remaining_secs: None,
            wall_time_secs: None,
            error_detail: None,
            error_code: None,
        }
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.status = ItemStatus::Preparing;
        self.output = None;
        self.progress_percent = 0.0;
        self.elapsed_secs = None;
        self.remaining_secs = None;
        self.wall_time_secs = None;
        self.error_detail = None;
        self.error_code = None;
    }

    /// Percent never moves backwards within an attempt. A stats line behind
    /// the stored position leaves the item as it was. Returns what the item now holds.
    pub(crate) fn apply_progress(&mut self, snapshot: &ProgressSnapshot) -> ProgressSnapshot {
        match snapshot.percent {
            Some(percent) if percent < self.progress_percent => {}
            Some(percent) => {
                self.progress_percent = percent;
                self.elapsed_secs = Some(snapshot.elapsed_secs);
                self.remaining_secs = snapshot.remaining_secs;
            }
            None => {
                self.elapsed_secs = Some(snapshot.elapsed_secs);
                self.remaining_secs = None;
            }
        }
        ProgressSnapshot {
            elapsed_secs: self.elapsed_secs.unwrap_or(snapshot.elapsed_secs),
            percent: snapshot.percent.map(|_| self.progress_percent),
            remaining_secs: self.remaining_secs,
        }
    }

    pub(crate) fn mark_done(&mut self, wall_time_secs: f64) {
        self.status = ItemStatus::Done;
        self.progress_percent = 100.0;
        self.remaining_secs = Some(0.0);
        self.wall_time_secs = Some(wall_time_secs);
        self.included = false;
    }

    pub(crate) fn mark_cancelled(&mut self, wall_time_secs: f64) {
        self.status = ItemStatus::Cancelled;
        self.wall_time_secs = Some(wall_time_secs);
    }

    pub(crate) fn mark_error(&mut self, err: &AppError, wall_time_secs: f64) {
        self.status = ItemStatus::Error;
        self.error_detail = Some(err.item_detail());
        self.error_code = err.exit_code();
        self.wall_time_secs = Some(wall_time_secs);
    }
}

#[derive(Debug, Default)]
pub struct Queue {
    items: Vec<QueueItem>,
    next_id: ItemId,
    /// Item the batch engine is working on; front-end edits to it are refused.
    busy: Option<ItemId>,
}

pub type SharedQueue = Arc<Mutex<Queue>>;

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedQueue {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn busy(&self) -> Option<ItemId> {
        self.busy
    }

    pub(crate) fn set_busy(&mut self, id: Option<ItemId>) {
        self.busy = id;
    }

    fn contains_input(&self, input: &Path) -> bool {
        self.items.iter().any(|i| i.input == input)
    }

    /// Add one existing file. Returns None when the same path is already queued.
    pub fn enqueue_file(&mut self, path: &Path) -> Result<Option<ItemId>, AppError> {
        if !path.is_file() {
            return Err(AppError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a file: {}", path.display()),
            )));
        }
        let input = std::path::absolute(path)?;
        if self.contains_input(&input) {
            log::debug!(target: "denoiser::queue", "Already queued: {}", input.display());
            return Ok(None);
        }
        let id = self.next_id;
        self.next_id += 1;
        log::debug!(target: "denoiser::queue", "Queued #{}: {}", id, input.display());
        self.items.push(QueueItem::new(id, input));
        Ok(Some(id))
    }

    /// Recursively add supported media under `dir`, in file-name order.
    pub fn enqueue_folder(&mut self, dir: &Path) -> Result<Vec<ItemId>, AppError> {
        if !dir.is_dir() {
            return Err(AppError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            )));
        }
        let mut added = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(target: "denoiser::queue", "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file()
                && is_supported_media(entry.path())
                && let Some(id) = self.enqueue_file(entry.path())?
            {
                added.push(id);
            }
        }
        log::info!(
            target: "denoiser::queue",
            "Expanded {}: {} file(s) added",
            dir.display(),
            added.len()
        );
        Ok(added)
    }

    /// Files are added as given, directories are expanded; missing paths are skipped.
    pub fn enqueue_paths(&mut self, paths: &[PathBuf]) -> Result<Vec<ItemId>, AppError> {
        let mut added = Vec::new();
        let mut seen = HashSet::new();
        for path in paths {
            if !seen.insert(path.clone()) {
                continue;
            }
            if path.is_dir() {
                added.extend(self.enqueue_folder(path)?);
            } else if path.is_file() {
                added.extend(self.enqueue_file(path)?);
            } else {
                log::warn!(target: "denoiser::queue", "Path does not exist: {}", path.display());
            }
        }
        Ok(added)
    }

    fn ensure_editable(&self, id: ItemId) -> Result<(), AppError> {
        if self.busy == Some(id) {
            return Err(AppError::ItemBusy(id));
        }
        if self.get(id).is_none() {
            return Err(AppError::UnknownItem(id));
        }
        Ok(())
    }

    pub fn set_included(&mut self, id: ItemId, included: bool) -> Result<(), AppError> {
        self.ensure_editable(id)?;
        if let Some(item) = self.get_mut(id) {
            item.included = included;
        }
        Ok(())
    }

    pub fn remove(&mut self, id: ItemId) -> Result<QueueItem, AppError> {
        self.ensure_editable(id)?;
        let pos = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or(AppError::UnknownItem(id))?;
        Ok(self.items.remove(pos))
    }

    /// Remove everything except the item being processed. Returns how many went.
    pub fn clear(&mut self) -> usize {
        let before = self.items.len();
        let busy = self.busy;
        self.items.retain(|i| Some(i.id) == busy);
        before - self.items.len()
    }

    /// First included item in display order not yet visited in this run.
    pub(crate) fn next_included(&self, visited: &HashSet<ItemId>) -> Option<ItemId> {
        self.items
            .iter()
            .find(|i| i.included && !visited.contains(&i.id))
            .map(|i| i.id)
    }
}
