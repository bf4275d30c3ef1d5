//! Bounded-concurrency merge execution
//!
//! [`MergeWorkerPool`] runs [`MergeTask`]s on a fixed set of worker threads.
//! Tasks are handed over through a zero-capacity channel, so
//! [`submit`](MergeWorkerPool::submit) returns as soon as a worker takes the
//! task and blocks while every worker is busy.

mod toolchain;

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::ImageFormat;
use serde::Serialize;

use crate::bundle::DecodedImage;
use crate::error::{Error, Result};
use crate::progress::{ExtractPhase, ExtractProgress, ProgressCallback};

pub use toolchain::{ImageToolchain, MagickToolchain};

/// Source of a task's alpha mask
#[derive(Debug, Clone)]
pub enum MaskInput {
    /// Decoded mask texture
    Image(Arc<DecodedImage>),
    /// Image file on disk, usually an earlier output
    File(PathBuf),
}

/// One output image to produce
#[derive(Debug, Clone)]
pub struct MergeTask {
    /// Directory relative to the output root
    pub output_dir: String,
    /// File stem of the output
    pub output_name: String,
    pub color: Arc<DecodedImage>,
    /// `None` writes the color image unchanged
    pub alpha: Option<MaskInput>,
    /// Result keys served by this output
    pub keys: Vec<String>,
}

impl MergeTask {
    /// Output path relative to the output root, `/`-separated
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}.png", self.output_dir, self.output_name)
    }
}

/// Pool settings
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub output_root: PathBuf,
    /// Rewrite outputs that already exist
    pub force: bool,
    pub quantize: bool,
}

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    /// Output written by this run
    Written,
    /// Output already existed; nothing was done
    Cached,
    Failed(String),
    /// Still running when the drain deadline passed
    TimedOut,
}

impl TaskStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Written | Self::Cached)
    }
}

/// Result of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    /// Output path relative to the output root
    pub output: String,
    pub keys: Vec<String>,
    pub status: TaskStatus,
}

/// Everything a drained pool produced
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    pub outcomes: Vec<TaskOutcome>,
    /// Most tasks observed running at once
    pub peak_concurrency: usize,
}

impl DrainReport {
    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.count(|s| *s == TaskStatus::Written)
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.count(|s| *s == TaskStatus::Cached)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| !s.is_success())
    }
}

struct Job {
    id: usize,
    task: MergeTask,
}

struct Shared {
    toolchain: Arc<dyn ImageToolchain>,
    options: MergeOptions,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Releases the worker's slot and reports the task outcome when dropped
struct SlotGuard<'a> {
    shared: &'a Shared,
    outcomes: &'a Sender<(usize, TaskOutcome)>,
    id: usize,
    output: String,
    keys: Vec<String>,
    status: Option<TaskStatus>,
}

impl<'a> SlotGuard<'a> {
    fn acquire(shared: &'a Shared, outcomes: &'a Sender<(usize, TaskOutcome)>, id: usize, task: &MergeTask) -> Self {
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            shared,
            outcomes,
            id,
            output: task.relative_path(),
            keys: task.keys.clone(),
            status: None,
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        let status = self
            .status
            .take()
            .unwrap_or_else(|| TaskStatus::Failed("worker stopped before reporting".to_string()));
        // The receiver is gone only if the pool stopped waiting
        let _ = self.outcomes.send((
            self.id,
            TaskOutcome {
                output: std::mem::take(&mut self.output),
                keys: std::mem::take(&mut self.keys),
                status,
            },
        ));
    }
}

/// Fixed-size pool of merge workers
pub struct MergeWorkerPool {
    sender: Option<SyncSender<Job>>,
    outcomes: Receiver<(usize, TaskOutcome)>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    submitted: BTreeMap<usize, (String, Vec<String>)>,
}

impl MergeWorkerPool {
    /// Start `workers` threads (at least one)
    ///
    /// # Errors
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(workers: usize, toolchain: Arc<dyn ImageToolchain>, options: MergeOptions) -> Result<Self> {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            toolchain,
            options,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let (job_tx, job_rx) = mpsc::sync_channel::<Job>(0);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let jobs = Arc::clone(&job_rx);
            let outcomes = outcome_tx.clone();
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("gfunpack-merge-{n}"))
                .spawn(move || worker_loop(&jobs, &outcomes, &shared))?;
            handles.push(handle);
        }
        tracing::debug!("Started {workers} merge workers");

        Ok(Self {
            sender: Some(job_tx),
            outcomes: outcome_rx,
            workers: handles,
            shared,
            submitted: BTreeMap::new(),
        })
    }

    /// Hand a task to the next free worker, blocking while all are busy
    ///
    /// # Errors
    /// Returns [`Error::TaskPanicked`] if every worker has exited.
    pub fn submit(&mut self, task: MergeTask) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::TaskPanicked("merge pool already drained".to_string()))?;
        let id = self.submitted.len();
        let meta = (task.relative_path(), task.keys.clone());
        sender
            .send(Job { id, task })
            .map_err(|_| Error::TaskPanicked("all merge workers have exited".to_string()))?;
        self.submitted.insert(id, meta);
        Ok(())
    }

    /// Number of tasks submitted so far
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.submitted.len()
    }

    /// Most tasks observed running at once
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Close submission and wait up to `timeout` for every outcome.
    ///
    /// Tasks that have not reported by the deadline come back as
    /// [`TaskStatus::TimedOut`]; their threads are left to finish on their own.
    pub fn drain(mut self, timeout: Duration, progress: ProgressCallback) -> DrainReport {
        self.sender = None;

        let total = self.submitted.len();
        let deadline = Instant::now() + timeout;
        let mut received: BTreeMap<usize, TaskOutcome> = BTreeMap::new();

        while received.len() < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.outcomes.recv_timeout(remaining) {
                Ok((id, outcome)) => {
                    progress(&ExtractProgress::with_item(
                        ExtractPhase::Merging,
                        received.len() + 1,
                        total,
                        outcome.output.clone(),
                    ));
                    received.insert(id, outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "Merge drain timed out after {:?} with {} of {total} tasks outstanding",
                        timeout,
                        total - received.len()
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let timed_out = received.len() < total;
        let outcomes = std::mem::take(&mut self.submitted)
            .into_iter()
            .map(|(id, (output, keys))| {
                received.remove(&id).unwrap_or(TaskOutcome {
                    output,
                    keys,
                    status: TaskStatus::TimedOut,
                })
            })
            .collect();

        if !timed_out {
            for handle in self.workers.drain(..) {
                if handle.join().is_err() {
                    tracing::warn!("Merge worker exited with a panic");
                }
            }
        }

        DrainReport {
            outcomes,
            peak_concurrency: self.peak_concurrency(),
        }
    }
}

fn worker_loop(jobs: &Mutex<Receiver<Job>>, outcomes: &Sender<(usize, TaskOutcome)>, shared: &Shared) {
    loop {
        let job = {
            let Ok(rx) = jobs.lock() else {
                return;
            };
            rx.recv()
        };
        let Ok(Job { id, task }) = job else {
            return;
        };

        let mut guard = SlotGuard::acquire(shared, outcomes, id, &task);
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_task(&task, shared.toolchain.as_ref(), &shared.options)
        }));
        guard.status = Some(match result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => TaskStatus::Failed(e.to_string()),
            Err(payload) => TaskStatus::Failed(Error::TaskPanicked(panic_message(payload.as_ref())).to_string()),
        });
        tracing::debug!("{}: {:?}", guard.output, guard.status);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn save_png(image: &DecodedImage, path: &Path) -> Result<()> {
    image
        .pixels
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| Error::ImageEncode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Produce one output. Runs on a worker thread.
fn run_task(task: &MergeTask, toolchain: &dyn ImageToolchain, options: &MergeOptions) -> Result<TaskStatus> {
    let dest = options
        .output_root
        .join(&task.output_dir)
        .join(format!("{}.png", task.output_name));
    if dest.exists() && !options.force {
        return Ok(TaskStatus::Cached);
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Intermediates live in the temp dir and vanish with it
    let scratch = tempfile::tempdir()?;
    let staged = scratch.path().join("out.png");

    match &task.alpha {
        None => save_png(&task.color, &staged)?,
        Some(mask) => {
            let color_path = scratch.path().join("color.png");
            save_png(&task.color, &color_path)?;

            let (mask_path, mask_dims) = match mask {
                MaskInput::Image(img) => {
                    let path = scratch.path().join("mask.png");
                    save_png(img, &path)?;
                    (path, (img.width(), img.height()))
                }
                MaskInput::File(path) => {
                    let dims = image::image_dimensions(path).map_err(|e| Error::ImageEncode {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                    (path.clone(), dims)
                }
            };

            let (width, height) = (task.color.width(), task.color.height());
            let mask_path = if mask_dims == (width, height) {
                mask_path
            } else {
                let resized = scratch.path().join("mask_resized.png");
                toolchain.resize_to_match(&mask_path, width, height, &resized)?;
                resized
            };

            toolchain.copy_alpha(&color_path, &mask_path, &staged)?;
        }
    }

    if options.quantize && toolchain.can_quantize() {
        toolchain.quantize(&staged)?;
    }

    std::fs::copy(&staged, &dest)?;
    Ok(TaskStatus::Written)
}
