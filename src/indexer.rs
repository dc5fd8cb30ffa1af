//! Build coordinator: owns the single build slot and drives the indexing
//! lifecycle.
//!
//! A [`Build`](IndexService::build) call records an initial request status
//! and hands the request to a long-lived worker through a rendezvous
//! channel. The handoff is non-blocking: if the worker is busy with another
//! build, the call fails immediately with [`Error::BuildInProgress`] rather
//! than queueing. On success the call returns at once and the caller polls
//! [`GetStatus`](IndexService::get_status) for progress.
//!
//! The worker runs the build in stages, updating the persisted status as it
//! goes:
//!
//! ```text
//! 0 ──discovery──▶ 10 ──deletion reconciliation──▶ 20 ──▶ … ──▶ 100
//!      │                        │                          │
//!      ▼                        ▼                          ▼
//!    Failed                   Failed              Failed (timeout/shutdown)
//! ```
//!
//! 1. **Discovery** walks the root and diffs it against recorded per-file
//!    metadata.
//! 2. **Deletion reconciliation** removes vanished files from both the
//!    search index and the *files* namespace.
//! 3. **Extraction and indexing** shards the modified files across a pool
//!    of extractor tasks, each writing document batches to the index and
//!    reporting successfully indexed files down a bounded channel.
//! 4. **Metadata commit** runs concurrently: a single writer task records
//!    `last_indexed` for each reported file and interpolates the progress
//!    status after every thousand writes.
//!
//! `100` (complete) and `-1` (failed) are terminal: once either is written
//! it is never replaced by a later stage value. Builds are cancelled by the
//! shutdown token or by the two-hour wall-clock cap; cancelled builds drain
//! their workers and record a failed status.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::extract::extract_content;
use crate::kvstore::{FileMetadata, MetadataStore, Namespace};
use crate::models::FileInfo;
use crate::searchdb::{SearchDb, INDEXING_BATCH_SIZE};
use crate::walker::discover_modified_files;

pub const PROGRESS_STATUS_STEP1: i64 = 10;
pub const PROGRESS_STATUS_STEP2: i64 = 20;
pub const PROGRESS_STATUS_COMPLETE: i64 = 100;
pub const PROGRESS_STATUS_FAILED: i64 = -1;

const MAX_CONCURRENT_EXTRACTORS: usize = 50;
const MAX_INDEX_BUILD_TIME: Duration = Duration::from_secs(2 * 60 * 60);
const METADATA_PROGRESS_INTERVAL: usize = 1000;

struct BuildRequest {
    root_path: String,
    exclude_folders: Vec<String>,
    request_id: String,
}

/// The indexing service: accepts build requests and reports their progress.
pub struct IndexService {
    store: MetadataStore,
    build_tx: flume::Sender<BuildRequest>,
}

impl IndexService {
    /// Spawns the long-lived build worker and returns the service handle
    /// once the worker is parked at the rendezvous, ready to accept.
    ///
    /// Cancelling `shutdown` stops the worker after any in-flight build has
    /// drained (the build itself is cancelled through a child token and
    /// records a failed status).
    pub async fn new(
        store: MetadataStore,
        index: Arc<SearchDb>,
        shutdown: CancellationToken,
    ) -> Self {
        // Rendezvous channel: a send succeeds only while the worker is
        // parked in recv, which is exactly "the build slot is free".
        let (build_tx, build_rx) = flume::bounded(0);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let worker = BuildWorker {
            store: store.clone(),
            index,
            shutdown,
        };
        tokio::spawn(worker.run(build_rx, ready_tx));

        // An immediate build must find the worker waiting, not spuriously
        // collide with its startup.
        let _ = ready_rx.await;

        Self { store, build_tx }
    }

    /// Builds the index for `root_path`, or incrementally updates it if it
    /// already exists. Returns as soon as the request is handed to the
    /// worker; progress is reported through [`get_status`](Self::get_status).
    ///
    /// # Errors
    ///
    /// [`Error::BuildInProgress`] if another build is executing.
    pub async fn build(
        &self,
        root_path: &str,
        exclude_folders: Vec<String>,
        request_id: &str,
    ) -> Result<()> {
        set_request_status(&self.store, request_id, 0).await;

        let request = BuildRequest {
            root_path: root_path.to_string(),
            exclude_folders,
            request_id: request_id.to_string(),
        };

        self.build_tx.try_send(request).map_err(|_| {
            warn!("request to index while indexing is already in progress");
            Error::BuildInProgress
        })
    }

    /// Retrieves the progress status previously written for this request id.
    pub async fn get_status(&self, request_id: &str) -> Result<i64> {
        request_status(&self.store, request_id).await
    }
}

/// Reads and parses the persisted status integer for a request id.
pub async fn request_status(store: &MetadataStore, request_id: &str) -> Result<i64> {
    let value = store.get(Namespace::Requests, request_id).await?;
    value.parse::<i64>().map_err(|_| Error::InvalidStatus(value))
}

struct BuildWorker {
    store: MetadataStore,
    index: Arc<SearchDb>,
    shutdown: CancellationToken,
}

impl BuildWorker {
    async fn run(
        self,
        build_rx: flume::Receiver<BuildRequest>,
        ready_tx: tokio::sync::oneshot::Sender<()>,
    ) {
        use std::future::Future;

        let mut ready_tx = Some(ready_tx);
        loop {
            let recv = build_rx.recv_async();
            tokio::pin!(recv);
            let recv_parked = std::future::poll_fn(|cx| {
                let polled = recv.as_mut().poll(cx);
                // The first poll registers this worker at the rendezvous;
                // only then may the service hand out the sender.
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
                polled
            });

            tokio::select! {
                request = recv_parked => {
                    let Ok(request) = request else { break };

                    let cancel = self.shutdown.child_token();
                    let finished = CancellationToken::new();
                    // Stops the watchdog when this scope exits, however it
                    // exits.
                    let _finished_guard = finished.clone().drop_guard();
                    {
                        let cancel = cancel.clone();
                        let finished = finished.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = tokio::time::sleep(MAX_INDEX_BUILD_TIME) => {
                                    warn!("build exceeded the maximum allowed time");
                                    cancel.cancel();
                                }
                                _ = finished.cancelled() => {}
                            }
                        });
                    }

                    self.build_index(&cancel, &request).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("index service stopped");
                    break;
                }
            }
        }
    }

    async fn build_index(&self, cancel: &CancellationToken, request: &BuildRequest) {
        let request_id = request.request_id.as_str();

        let files = match discover_modified_files(
            &self.store,
            &request.root_path,
            &request.exclude_folders,
        )
        .await
        {
            Ok(files) => files,
            Err(err) => {
                error!(request_id, err = %err, "failed to create index");
                set_terminal_status(&self.store, request_id, PROGRESS_STATUS_FAILED).await;
                return;
            }
        };
        info!(num_of_files = files.len(), "discovered modified files");
        set_request_status(&self.store, request_id, PROGRESS_STATUS_STEP1).await;

        // Identify and remove deleted files before indexing new/modified ones.
        let deleted_files = match self.deleted_files().await {
            Ok(deleted) => deleted,
            Err(err) => {
                error!(request_id, err = %err, "failed to create index");
                set_terminal_status(&self.store, request_id, PROGRESS_STATUS_FAILED).await;
                return;
            }
        };
        if let Err(err) = self.remove_deleted_files(&deleted_files).await {
            error!(request_id, err = %err, "failed to create index");
            set_terminal_status(&self.store, request_id, PROGRESS_STATUS_FAILED).await;
            return;
        }
        set_request_status(&self.store, request_id, PROGRESS_STATUS_STEP2).await;

        self.run_pipeline(cancel, files, request_id).await;
    }

    /// Every *files*-namespace key whose path no longer exists on disk.
    async fn deleted_files(&self) -> Result<Vec<String>> {
        let all_keys = self.store.keys(Namespace::Files).await.map_err(|err| {
            error!(err = %err, "failed to get all keys from database");
            err
        })?;

        // Only confirmed-missing paths count as deleted; a stat error (for
        // example permission denied) leaves the entry alone.
        Ok(all_keys
            .into_iter()
            .filter(|key| matches!(Path::new(key).try_exists(), Ok(false)))
            .collect())
    }

    async fn remove_deleted_files(&self, deleted_files: &[String]) -> Result<()> {
        if deleted_files.is_empty() {
            return Ok(());
        }
        info!(deleted_files = deleted_files.len(), "removing deleted files from index");

        // Index deletion failure is fatal to the build; per-key metadata
        // deletion failures are not (the next run re-detects them).
        self.index.delete_documents(deleted_files).map_err(|err| {
            error!(err = %err, "failed to delete documents from search index");
            err
        })?;

        for file_path in deleted_files {
            if let Err(err) = self.store.delete(Namespace::Files, file_path).await {
                error!(path = file_path, err = %err, "failed to delete file metadata");
            }
        }
        Ok(())
    }

    async fn run_pipeline(&self, cancel: &CancellationToken, files: Vec<FileInfo>, request_id: &str) {
        info!("building index of files...");
        let index_time = Utc::now();

        if files.is_empty() {
            set_terminal_status(&self.store, request_id, PROGRESS_STATUS_COMPLETE).await;
            info!("no files to index");
            return;
        }

        let total_files = files.len();
        let num_workers = MAX_CONCURRENT_EXTRACTORS.min(total_files);
        let portions = split_portions(files, num_workers);

        info!(
            workers = portions.len(),
            total_files, "starting parallel indexing"
        );

        let (processed_tx, processed_rx) = mpsc::channel(num_workers);

        let mut workers = JoinSet::new();
        for (worker_id, portion) in portions.into_iter().enumerate() {
            workers.spawn(index_portion(
                self.index.clone(),
                cancel.clone(),
                portion,
                worker_id,
                processed_tx.clone(),
            ));
        }
        // The metadata writer drains until every worker has dropped its sender.
        drop(processed_tx);

        let metadata_writer = tokio::spawn(update_metadata(
            self.store.clone(),
            cancel.clone(),
            index_time,
            request_id.to_string(),
            total_files,
            processed_rx,
        ));

        while workers.join_next().await.is_some() {}
        if let Err(err) = metadata_writer.await {
            error!(request_id, err = %err, "metadata writer task failed");
        }

        if cancel.is_cancelled() {
            error!(request_id, "indexing cancelled");
            set_terminal_status(&self.store, request_id, PROGRESS_STATUS_FAILED).await;
            return;
        }

        set_terminal_status(&self.store, request_id, PROGRESS_STATUS_COMPLETE).await;
    }
}

/// Shards `files` into up to `num_workers` portions of equal size, folding
/// the remainder into the last portion so no file is missed.
fn split_portions(mut files: Vec<FileInfo>, num_workers: usize) -> Vec<Vec<FileInfo>> {
    let files_per_worker = (files.len() / num_workers).max(1);

    let mut portions = Vec::with_capacity(num_workers);
    for i in 0..num_workers {
        if files.is_empty() {
            break;
        }
        let take = if i == num_workers - 1 {
            files.len()
        } else {
            files_per_worker.min(files.len())
        };
        portions.push(files.drain(..take).collect());
    }
    portions
}

/// One extractor-pool worker: indexes its portion in batches, reporting each
/// batch's successfully indexed files to the metadata writer.
async fn index_portion(
    index: Arc<SearchDb>,
    cancel: CancellationToken,
    portion: Vec<FileInfo>,
    worker_id: usize,
    processed_tx: mpsc::Sender<Vec<FileInfo>>,
) {
    let num_files = portion.len();
    let mut processed_count = 0usize;

    for batch in portion.chunks(INDEXING_BATCH_SIZE) {
        if cancel.is_cancelled() {
            info!(worker_id, "extractor worker cancelled");
            return;
        }

        let processed = index_batch(&index, &cancel, batch, worker_id).await;
        processed_count += processed.len();
        if processed_tx.send(processed).await.is_err() {
            // Metadata writer is gone; nothing left to report to.
            return;
        }
        debug!(worker_id, processed = processed_count, total = num_files, "worker progress");
    }

    info!(worker_id, num_files, "completed indexing for worker");
}

/// Extracts and indexes one batch. Per-file extraction errors skip the file;
/// a batch write error discards the whole batch's processed-file report so
/// metadata is never committed for documents that failed to index.
/// Cancellation is checked between files, never mid-read; a cancelled batch
/// is discarded without touching the index.
async fn index_batch(
    index: &SearchDb,
    cancel: &CancellationToken,
    batch: &[FileInfo],
    worker_id: usize,
) -> Vec<FileInfo> {
    let mut documents = Vec::with_capacity(batch.len());
    let mut processed_files = Vec::with_capacity(batch.len());

    for file in batch {
        if cancel.is_cancelled() {
            debug!(worker_id, "extraction cancelled mid-batch");
            return Vec::new();
        }
        match extract_content(file).await {
            Ok(doc) => {
                documents.push(doc);
                processed_files.push(file.clone());
            }
            Err(Error::Io(err)) if err.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %file.path, worker_id, "skipping unreadable file");
            }
            Err(err) => {
                warn!(path = %file.path, err = %err, worker_id, "error processing file");
            }
        }
    }

    if let Err(err) = index.upsert_documents(&documents) {
        error!(worker_id, err = %err, "failed to build index for worker");
        return Vec::new();
    }

    processed_files
}

/// The single metadata-writer task. Consumes batch reports and records
/// `last_indexed` for each file, interpolating the request status after
/// every [`METADATA_PROGRESS_INTERVAL`] successful writes.
async fn update_metadata(
    store: MetadataStore,
    cancel: CancellationToken,
    index_time: DateTime<Utc>,
    request_id: String,
    total_files: usize,
    mut processed_rx: mpsc::Receiver<Vec<FileInfo>>,
) {
    info!("updating file metadata...");
    let mut updated_count = 0usize;
    let mut reported_count = 0usize;

    while let Some(processed_files) = processed_rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }

        for file in &processed_files {
            if set_file_metadata(&store, &file.path, index_time).await.is_ok() {
                updated_count += 1;
            }
        }

        if updated_count / METADATA_PROGRESS_INTERVAL > reported_count / METADATA_PROGRESS_INTERVAL
        {
            reported_count = updated_count;
            info!(count = updated_count, total = total_files, "updated metadata for files");
            let status = progress_percentage(
                updated_count,
                total_files,
                PROGRESS_STATUS_STEP2,
                PROGRESS_STATUS_COMPLETE,
            );
            set_request_status(&store, &request_id, status).await;
        }
    }

    if cancel.is_cancelled() {
        error!(request_id, "metadata update cancelled");
        return;
    }
    info!(count = updated_count, total = total_files, "finished updating file metadata");
}

async fn set_file_metadata(
    store: &MetadataStore,
    file_path: &str,
    last_indexed: DateTime<Utc>,
) -> Result<()> {
    if file_path.is_empty() {
        error!("file path cannot be empty");
        return Err(Error::InvalidKey("file path cannot be empty".to_string()));
    }

    let data = serde_json::to_string(&FileMetadata { last_indexed })?;

    if let Err(err) = store.set(Namespace::Files, file_path, &data).await {
        error!(path = file_path, err = %err, "failed to set file metadata");
        return Err(err);
    }

    Ok(())
}

async fn set_request_status(store: &MetadataStore, request_id: &str, status: i64) {
    if let Err(err) = store
        .set(Namespace::Requests, request_id, &status.to_string())
        .await
    {
        error!(request_id, status, err = %err, "failed to update request status");
    }
}

/// Writes a terminal status unless one has already been recorded. Complete
/// and Failed must never replace each other or be replaced by stage values.
async fn set_terminal_status(store: &MetadataStore, request_id: &str, status: i64) {
    if let Ok(value) = store.get(Namespace::Requests, request_id).await {
        if let Ok(current) = value.parse::<i64>() {
            if current == PROGRESS_STATUS_COMPLETE || current == PROGRESS_STATUS_FAILED {
                debug!(request_id, current, "request already in a terminal state");
                return;
            }
        }
    }
    set_request_status(store, request_id, status).await;
}

fn progress_percentage(done: usize, total: usize, initial: i64, target: i64) -> i64 {
    if done == 0 || total == 0 {
        return initial;
    }
    if done >= total {
        return target;
    }

    let progress = done as f64 / total as f64;
    (initial as f64 + progress * (target - initial) as f64) as i64
}
