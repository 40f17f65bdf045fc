//! Resumable download orchestration
//!
//! A bounded pool of workers drains a shared task queue. Each transfer
//! streams to disk at the task's resume offset using HTTP range requests,
//! then verifies the result against the catalog metadata before the record
//! is marked `complete`. Failures are contained per task: verification
//! mismatches discard local bytes and retry from zero, transport errors
//! retry with exponential backoff, and a task that exhausts its attempts
//! is reported `failed` without stopping the rest of the run.
//!
//! Cancellation checkpoints: an in-flight transfer flushes what it has,
//! records the partial state, and stops; queued tasks stay `pending` so a
//! later run resumes exactly where this one left off.

use crate::catalog::CatalogStore;
use crate::config::{PipelineConfig, USER_AGENT};
use crate::error::{PipelineError, Result};
use crate::progress::{NullObserver, ProgressObserver, Stage};
use crate::types::{DownloadStatus, DownloadTask, EntryKey, LocalFileDescriptor, VerifyToken};
use argosy_common::checksum::compute_file_checksum_async;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Declared retry behavior, testable without any I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per task before it is reported failed
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the given 1-based attempt has failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Terminal state of one download task
#[derive(Debug)]
pub enum TaskOutcome {
    Completed(LocalFileDescriptor),
    Failed { key: EntryKey, reason: String },
    Cancelled { key: EntryKey },
}

/// Aggregated result of a download stage
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub completed: Vec<LocalFileDescriptor>,
    pub failed: Vec<(EntryKey, String)>,
    /// Tasks interrupted mid-transfer by cancellation (state checkpointed)
    pub cancelled: u64,
    /// Tasks never started because the run was cancelled first
    pub unstarted: u64,
    /// Highest number of simultaneous transfers observed
    pub peak_in_flight: usize,
}

impl DownloadReport {
    pub fn failure_count(&self) -> u64 {
        self.failed.len() as u64
    }

    fn absorb(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed(descriptor) => self.completed.push(descriptor),
            TaskOutcome::Failed { key, reason } => self.failed.push((key, reason)),
            TaskOutcome::Cancelled { .. } => self.cancelled += 1,
        }
    }
}

/// Tracks current and peak simultaneous transfers
#[derive(Default)]
struct InflightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InflightGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// What a single transfer attempt observed
enum TransferResult {
    /// Body fully streamed; final local length
    Complete(u64),
    /// Cancellation fired; bytes flushed up to this length
    Cancelled(u64),
    /// Remote rejected the requested range (HTTP 416)
    RangeNotSatisfiable,
    /// No point retrying (e.g. HTTP 404)
    Permanent(String),
}

/// Bounded-concurrency download orchestrator
#[derive(Clone)]
pub struct Downloader {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    concurrency: usize,
    observer: Arc<dyn ProgressObserver>,
}

impl Downloader {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        config.validate().map_err(PipelineError::Validation)?;

        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.data_base_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::new(config.max_attempts, config.retry_base_delay()),
            concurrency: config.download_concurrency,
            observer: Arc::new(NullObserver),
        })
    }

    /// Replace the progress observer (silent by default)
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run every task to a terminal state (or checkpoint on cancellation)
    ///
    /// Store failures are fatal and abort the stage; everything else is
    /// contained in the report.
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        store: Arc<dyn CatalogStore>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport::default();
        if tasks.is_empty() {
            return Ok(report);
        }

        let total = tasks.len();
        let workers = self.concurrency.min(total).max(1);
        info!(tasks = total, workers, "starting download stage");
        self.observer.stage_started(Stage::Download, total as u64);

        // Child token: a fatal store error stops this stage without
        // cancelling the caller's token.
        let stage_cancel = cancel.child_token();
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let gauge = Arc::new(InflightGauge::default());

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let downloader = self.clone();
            let queue = Arc::clone(&queue);
            let store = Arc::clone(&store);
            let stage_cancel = stage_cancel.clone();
            let gauge = Arc::clone(&gauge);

            handles.push(tokio::spawn(async move {
                downloader
                    .worker_loop(queue, store, stage_cancel, gauge)
                    .await
            }));
        }

        let mut fatal: Option<PipelineError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(outcomes)) => {
                    for outcome in outcomes {
                        report.absorb(outcome);
                    }
                }
                Ok(Err(e)) => fatal = Some(e),
                Err(e) => {
                    fatal = Some(PipelineError::Io(std::io::Error::other(format!(
                        "download worker panicked: {}",
                        e
                    ))))
                }
            }
        }

        report.peak_in_flight = gauge.peak();
        if let Some(e) = fatal {
            return Err(e);
        }

        report.unstarted = queue.lock().await.len() as u64;
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            unstarted = report.unstarted,
            peak_in_flight = report.peak_in_flight,
            "download stage complete"
        );
        self.observer
            .stage_finished(Stage::Download, report.completed.len() as u64);

        Ok(report)
    }

    async fn worker_loop(
        &self,
        queue: Arc<Mutex<VecDeque<DownloadTask>>>,
        store: Arc<dyn CatalogStore>,
        cancel: CancellationToken,
        gauge: Arc<InflightGauge>,
    ) -> Result<Vec<TaskOutcome>> {
        let mut outcomes = Vec::new();

        loop {
            if cancel.is_cancelled() {
                // Unstarted tasks stay queued and their records `pending`
                break;
            }
            let Some(task) = queue.lock().await.pop_front() else {
                break;
            };

            gauge.enter();
            let result = self.run_task(&task, store.as_ref(), &cancel).await;
            gauge.exit();

            match result {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    self.observer.item_finished(Stage::Download);
                }
                Err(e) if e.is_fatal() => {
                    // Nothing downstream is correct without the store;
                    // stop the whole stage.
                    cancel.cancel();
                    return Err(e);
                }
                Err(e) => {
                    outcomes.push(TaskOutcome::Failed {
                        key: task.key.clone(),
                        reason: e.to_string(),
                    });
                    self.observer.item_finished(Stage::Download);
                }
            }
        }

        Ok(outcomes)
    }

    /// Drive one task to a terminal state within the retry budget
    async fn run_task(
        &self,
        task: &DownloadTask,
        store: &dyn CatalogStore,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let url = format!("{}/{}", self.base_url, task.remote_path);
        let mut attempt = task.attempt;
        let mut last_reason = String::from("no attempts made");
        let mut first_attempt = true;

        while attempt < self.policy.max_attempts {
            attempt += 1;

            // The local file length is the checkpoint; the audit offset
            // only caps the very first attempt.
            let local = local_len(&task.dest).await;
            let offset = if first_attempt {
                task.resume_offset.min(local)
            } else {
                local
            };
            first_attempt = false;

            // Resume target already fully present: verify without a request
            if offset > 0 && task.size_bytes.map(|len| len.max(0) as u64) == Some(offset) {
                match self.verify(task, offset).await {
                    Ok(descriptor) => {
                        store.mark(&task.key, DownloadStatus::Complete).await?;
                        return Ok(TaskOutcome::Completed(descriptor));
                    }
                    Err(reason) => {
                        warn!(key = %task.key, reason = %reason, "local bytes failed verification");
                        let _ = tokio::fs::remove_file(&task.dest).await;
                        last_reason = reason;
                        continue;
                    }
                }
            }

            match self.attempt_transfer(task, &url, offset, cancel).await {
                Ok(TransferResult::Complete(len)) => match self.verify(task, len).await {
                    Ok(descriptor) => {
                        store.mark(&task.key, DownloadStatus::Complete).await?;
                        debug!(key = %task.key, len, attempt, "download verified");
                        return Ok(TaskOutcome::Completed(descriptor));
                    }
                    Err(reason) => {
                        // Discard and requeue from zero within the same budget
                        warn!(key = %task.key, attempt, reason = %reason, "verification mismatch; restarting from zero");
                        let _ = tokio::fs::remove_file(&task.dest).await;
                        last_reason = reason;
                    }
                },
                Ok(TransferResult::Cancelled(len)) => {
                    if len > 0 {
                        store.mark(&task.key, DownloadStatus::Partial).await?;
                    }
                    info!(key = %task.key, checkpoint = len, "download cancelled; state checkpointed");
                    return Ok(TaskOutcome::Cancelled {
                        key: task.key.clone(),
                    });
                }
                Ok(TransferResult::RangeNotSatisfiable) => {
                    // Local offset means nothing to the remote; scrap it
                    warn!(key = %task.key, offset, "remote rejected resume range; restarting from zero");
                    let _ = tokio::fs::remove_file(&task.dest).await;
                    last_reason = format!("range from offset {} not satisfiable", offset);
                    continue;
                }
                Ok(TransferResult::Permanent(reason)) => {
                    warn!(key = %task.key, reason = %reason, "permanent download failure");
                    store.mark(&task.key, DownloadStatus::Failed).await?;
                    return Ok(TaskOutcome::Failed {
                        key: task.key.clone(),
                        reason,
                    });
                }
                Err(reason) => {
                    warn!(
                        key = %task.key,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        reason = %reason,
                        "download attempt failed"
                    );
                    last_reason = reason;
                }
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                debug!(key = %task.key, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let len = local_len(&task.dest).await;
                        if len > 0 {
                            store.mark(&task.key, DownloadStatus::Partial).await?;
                        }
                        return Ok(TaskOutcome::Cancelled { key: task.key.clone() });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        store.mark(&task.key, DownloadStatus::Failed).await?;
        Ok(TaskOutcome::Failed {
            key: task.key.clone(),
            reason: last_reason,
        })
    }

    /// One streamed transfer; transport problems come back as retryable
    /// `Err(reason)` strings
    async fn attempt_transfer(
        &self,
        task: &DownloadTask,
        url: &str,
        offset: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<TransferResult, String> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(TransferResult::Cancelled(local_len(&task.dest).await)),
            response = request.send() => response.map_err(|e| format!("{}: {}", url, e))?,
        };

        let status = response.status();
        let effective_offset = if status == StatusCode::PARTIAL_CONTENT && offset > 0 {
            offset
        } else if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(TransferResult::RangeNotSatisfiable);
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(TransferResult::Permanent(format!("HTTP {}", status)));
        } else if status.is_success() {
            if offset > 0 {
                debug!(key = %task.key, "remote ignored range request; taking full body");
            }
            0
        } else {
            return Err(format!("HTTP {} from {}", status, url));
        };

        if let Some(parent) = task.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("create {}: {}", parent.display(), e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&task.dest)
            .await
            .map_err(|e| format!("open {}: {}", task.dest.display(), e))?;

        // Drop any bytes past the verified prefix, then append after it
        file.set_len(effective_offset)
            .await
            .map_err(|e| format!("truncate {}: {}", task.dest.display(), e))?;
        file.seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| format!("seek {}: {}", task.dest.display(), e))?;

        let mut written = effective_offset;
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    file.flush().await.map_err(|e| e.to_string())?;
                    return Ok(TransferResult::Cancelled(written));
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes)
                            .await
                            .map_err(|e| format!("write {}: {}", task.dest.display(), e))?;
                        written += bytes.len() as u64;
                    }
                    Some(Err(e)) => return Err(format!("{}: {}", url, e)),
                    None => break,
                },
            }
        }

        file.flush().await.map_err(|e| e.to_string())?;
        Ok(TransferResult::Complete(written))
    }

    /// Check the finished file against the strongest catalog metadata
    async fn verify(
        &self,
        task: &DownloadTask,
        len: u64,
    ) -> std::result::Result<LocalFileDescriptor, String> {
        let token = task.verify_token();

        match &token {
            VerifyToken::Checksum(expected) => {
                let actual = compute_file_checksum_async(&task.dest)
                    .await
                    .map_err(|e| format!("hash {}: {}", task.dest.display(), e))?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(format!(
                        "checksum mismatch: expected {}, got {}",
                        expected, actual
                    ));
                }
            }
            VerifyToken::Length(expected) => {
                if len != *expected {
                    return Err(format!("length mismatch: expected {}, got {}", expected, len));
                }
            }
            VerifyToken::Unverified => {}
        }

        Ok(LocalFileDescriptor {
            key: task.key.clone(),
            path: task.dest.clone(),
            len,
            token,
        })
    }
}

async fn local_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}
