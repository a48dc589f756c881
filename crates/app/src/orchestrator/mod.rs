//! Drives report files through normalize, aggregate, correlate and complete.
//!
//! Every stage opens its own tenant connection on the blocking pool and runs
//! under the configured deadline. A file's committed stage is persisted, so
//! a retry picks up after the last stage that committed.
//!
//! A stage that misses its deadline is abandoned, not stopped: its blocking
//! work keeps the file's in-flight claim until it returns, and then records
//! the file as failed.

mod queue;
mod retry;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashSet;
use ingest::{NormalizeRequest, remove_processed_file};
use ledger_core::{FileState, Manifest, Provider, TenantSchema};
use ledger_db::{Db, TenantStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::correlator::correlate_range;
use crate::error::PipelineError;

pub use queue::WorkQueue;
pub use retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Normalize,
    Aggregate,
    Correlate,
    Complete,
    Rollup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Normalize => "normalize",
            Self::Aggregate => "aggregate",
            Self::Correlate => "correlate",
            Self::Complete => "complete",
            Self::Rollup => "rollup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest file of one tenant; also the in-flight key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileTask {
    pub schema: TenantSchema,
    pub manifest_id: i64,
    pub report_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Completed { manifest_complete: bool, attempts: u32 },
    AlreadyCompleted,
    /// Another run holds the same file; nothing was done.
    InFlight,
    Failed { attempts: u32, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManifestOutcome {
    pub manifest_id: i64,
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub num_processed_files: u32,
    pub num_total_files: u32,
    pub manifest_complete: bool,
    pub aggregate_rows: Option<usize>,
}

struct Shared {
    store: TenantStore,
    config: PipelineConfig,
    backoff: Backoff,
    in_flight: DashSet<FileTask>,
    cancel: CancellationToken,
}

struct InFlightGuard {
    shared: Arc<Shared>,
    key: FileTask,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.remove(&self.key);
    }
}

const STAGE_RUNNING: u8 = 0;
const STAGE_FINISHED: u8 = 1;
const STAGE_ABANDONED: u8 = 2;

struct Prepared {
    manifest: Manifest,
    provider: Provider,
    committed: FileState,
}

#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(store: TenantStore, config: PipelineConfig) -> Self {
        let backoff = config.backoff();
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                backoff,
                in_flight: DashSet::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &TenantStore {
        &self.shared.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Stop starting new stages; running stages finish on their own.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_in_flight(&self, task: &FileTask) -> bool {
        self.shared.in_flight.contains(task)
    }

    fn claim(&self, task: &FileTask) -> Option<InFlightGuard> {
        self.shared
            .in_flight
            .insert(task.clone())
            .then(|| InFlightGuard {
                shared: Arc::clone(&self.shared),
                key: task.clone(),
            })
    }

    /// Run one file through the pipeline, retrying transient failures.
    ///
    /// A second call for a file that is already being processed returns
    /// [`FileOutcome::InFlight`] without touching anything.
    pub async fn process_file(&self, task: FileTask) -> FileOutcome {
        let Some(guard) = self.claim(&task) else {
            tracing::debug!(
                schema = task.schema.as_str(),
                manifest_id = task.manifest_id,
                file = task.report_name.as_str(),
                "file already in flight"
            );
            return FileOutcome::InFlight;
        };
        let guard = Arc::new(guard);
        let max_attempts = self.shared.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_file(&task, &guard, attempt).await {
                Ok(outcome) => return outcome,
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.shared.backoff.delay_for(attempt);
                    tracing::warn!(
                        schema = task.schema.as_str(),
                        manifest_id = task.manifest_id,
                        file = task.report_name.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => {
                            return self.fail(&guard, attempt, PipelineError::Cancelled).await;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return self.fail(&guard, attempt, err).await,
            }
        }
    }

    async fn fail(&self, guard: &Arc<InFlightGuard>, attempts: u32, err: PipelineError) -> FileOutcome {
        let task = &guard.key;
        let error = err.to_string();
        tracing::error!(
            schema = task.schema.as_str(),
            manifest_id = task.manifest_id,
            file = task.report_name.as_str(),
            attempts,
            error = error.as_str(),
            "file failed"
        );
        // The abandoned stage records its own failure once it returns.
        if matches!(err, PipelineError::StageTimeout { .. }) {
            return FileOutcome::Failed { attempts, error };
        }
        let max_attempts = self.shared.config.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let manifest_id = task.manifest_id;
            let report_name = task.report_name.clone();
            let message = error.clone();
            let recorded = self
                .run_stage(&task.schema, Stage::Complete, Some(guard), move |db| {
                    Ok(db.record_file_failure(manifest_id, &report_name, &message)?)
                })
                .await;
            match recorded {
                Ok(()) => break,
                Err(record_err) if record_err.is_transient() && attempt < max_attempts => {
                    tokio::time::sleep(self.shared.backoff.delay_for(attempt)).await;
                }
                Err(record_err) => {
                    tracing::warn!(
                        manifest_id = task.manifest_id,
                        file = task.report_name.as_str(),
                        error = %record_err,
                        "could not record file failure"
                    );
                    break;
                }
            }
        }
        FileOutcome::Failed { attempts, error }
    }

    async fn run_file(
        &self,
        task: &FileTask,
        guard: &Arc<InFlightGuard>,
        attempt: u32,
    ) -> Result<FileOutcome, PipelineError> {
        let hold = Some(guard);
        let manifest_id = task.manifest_id;
        let name = task.report_name.clone();
        let prepared = self
            .run_stage(&task.schema, Stage::Prepare, hold, move |db| {
                prepare(db, manifest_id, &name)
            })
            .await?;
        let Some(Prepared {
            manifest,
            provider,
            committed,
        }) = prepared
        else {
            return Ok(FileOutcome::AlreadyCompleted);
        };
        let report_path = Path::new(&manifest.report_dir).join(&task.report_name);
        let manifest = Arc::new(manifest);
        let provider = Arc::new(provider);
        tracing::info!(
            schema = task.schema.as_str(),
            provider_uuid = %provider.uuid,
            manifest_id,
            file = task.report_name.as_str(),
            committed = committed.as_str(),
            "processing file"
        );

        if committed < FileState::Normalized {
            let request = NormalizeRequest {
                schema: task.schema.clone(),
                provider: (*provider).clone(),
                manifest_id,
                report_name: task.report_name.clone(),
                report_path: report_path.clone(),
                compression: manifest.compression,
            };
            let result = self
                .run_stage(&task.schema, Stage::Normalize, hold, move |db| {
                    Ok(ingest::normalize(db, &request)?)
                })
                .await?;
            self.log_stage(task, Stage::Normalize, result.rows_loaded);
        }

        if committed < FileState::Aggregated {
            let (manifest, provider, name) = (manifest.clone(), provider.clone(), task.report_name.clone());
            let rows = self
                .run_stage(&task.schema, Stage::Aggregate, hold, move |db| {
                    match file_range(db, &provider, &manifest, &name)? {
                        Some((start, end)) => {
                            let rebuild = db.rebuild_daily(&provider, manifest.id, &name, start, end)?;
                            Ok(rebuild.daily_rows)
                        }
                        None => {
                            db.set_file_status(manifest.id, &name, FileState::Aggregated)?;
                            Ok(0)
                        }
                    }
                })
                .await?;
            self.log_stage(task, Stage::Aggregate, rows);
        }

        if committed < FileState::Correlated {
            let (manifest, provider, name) = (manifest.clone(), provider.clone(), task.report_name.clone());
            let matched = self
                .run_stage(&task.schema, Stage::Correlate, hold, move |db| {
                    let Some((start, end)) = file_range(db, &provider, &manifest, &name)? else {
                        return Ok(0);
                    };
                    let summary = correlate_range(db, &provider, start, end)?;
                    if summary.groups > 0 {
                        db.set_file_status(manifest.id, &name, FileState::Correlated)?;
                    }
                    Ok(summary.matched_items)
                })
                .await?;
            self.log_stage(task, Stage::Correlate, matched);
        }

        let name = task.report_name.clone();
        let provider_uuid = provider.uuid;
        let updated = self
            .run_stage(&task.schema, Stage::Complete, hold, move |db| {
                let updated = db.complete_file(manifest_id, &name)?;
                if updated.is_complete() {
                    db.set_setup_complete(provider_uuid)?;
                }
                Ok(updated)
            })
            .await?;
        release_report(&report_path);
        tracing::info!(
            schema = task.schema.as_str(),
            manifest_id,
            file = task.report_name.as_str(),
            processed = updated.num_processed_files,
            total = updated.num_total_files,
            "file completed"
        );
        Ok(FileOutcome::Completed {
            manifest_complete: updated.is_complete(),
            attempts: attempt,
        })
    }

    fn log_stage(&self, task: &FileTask, stage: Stage, rows: usize) {
        tracing::info!(
            schema = task.schema.as_str(),
            manifest_id = task.manifest_id,
            file = task.report_name.as_str(),
            stage = stage.as_str(),
            rows,
            "stage committed"
        );
    }

    /// Process every file of a manifest that has not completed yet, then
    /// refresh the rollups when anything new completed.
    pub async fn process_manifest(
        &self,
        schema: &TenantSchema,
        manifest_id: i64,
    ) -> Result<ManifestOutcome, PipelineError> {
        let (manifest, stats) = self
            .run_stage(schema, Stage::Prepare, None, move |db| {
                Ok((db.require_manifest(manifest_id)?, db.file_stats(manifest_id)?))
            })
            .await?;
        let mut outcome = ManifestOutcome {
            manifest_id,
            ..ManifestOutcome::default()
        };

        let queue = WorkQueue::start(self.clone(), self.shared.config.workers);
        let mut pending = Vec::new();
        for name in &manifest.report_files {
            let done = stats
                .iter()
                .any(|stat| &stat.report_name == name && stat.status == FileState::Completed);
            if done {
                outcome.skipped.push(name.clone());
                continue;
            }
            let task = FileTask {
                schema: schema.clone(),
                manifest_id,
                report_name: name.clone(),
            };
            pending.push((name.clone(), queue.submit(task).await?));
        }
        for (name, receiver) in pending {
            match receiver.await {
                Ok(FileOutcome::Completed { .. }) => outcome.completed.push(name),
                Ok(FileOutcome::AlreadyCompleted | FileOutcome::InFlight) => {
                    outcome.skipped.push(name)
                }
                Ok(FileOutcome::Failed { error, .. }) => outcome.failed.push((name, error)),
                Err(_) => outcome
                    .failed
                    .push((name, PipelineError::Cancelled.to_string())),
            }
        }
        queue.shutdown().await;

        if !outcome.completed.is_empty() {
            match self.build_aggregates(schema).await {
                Ok(rows) => outcome.aggregate_rows = Some(rows),
                Err(err) => {
                    tracing::error!(schema = schema.as_str(), error = %err, "rollup refresh failed");
                }
            }
        }

        let manifest = self
            .run_stage(schema, Stage::Complete, None, move |db| {
                Ok(db.require_manifest(manifest_id)?)
            })
            .await?;
        outcome.num_processed_files = manifest.num_processed_files;
        outcome.num_total_files = manifest.num_total_files;
        outcome.manifest_complete = manifest.is_complete();
        tracing::info!(
            schema = schema.as_str(),
            manifest_id,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            manifest_complete = outcome.manifest_complete,
            "manifest processed"
        );
        Ok(outcome)
    }

    /// Rebuild the time-scoped rollups of a tenant.
    pub async fn build_aggregates(&self, schema: &TenantSchema) -> Result<usize, PipelineError> {
        self.run_stage(schema, Stage::Rollup, None, |db| Ok(db.build_aggregates()?))
            .await
    }

    /// Run `work` on the blocking pool under the stage deadline.
    ///
    /// `hold` ties the work to a file's in-flight claim: the claim lasts
    /// until the work returns, even when the deadline abandoned it first.
    async fn run_stage<T, F>(
        &self,
        schema: &TenantSchema,
        stage: Stage,
        hold: Option<&Arc<InFlightGuard>>,
        work: F,
    ) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Db) -> Result<T, PipelineError> + Send + 'static,
    {
        if self.shared.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let store = self.shared.store.clone();
        let tenant = schema.clone();
        let deadline = self.shared.config.stage_timeout();
        let late_error = PipelineError::StageTimeout {
            stage,
            timeout_secs: deadline.as_secs(),
        }
        .to_string();
        let hold = hold.cloned();
        let state = Arc::new(AtomicU8::new(STAGE_RUNNING));
        let worker_state = Arc::clone(&state);
        let started = Instant::now();
        let mut handle = tokio::task::spawn_blocking(move || {
            let result = store
                .open(&tenant)
                .map_err(PipelineError::from)
                .and_then(|mut db| work(&mut db));
            let abandoned = worker_state
                .compare_exchange(STAGE_RUNNING, STAGE_FINISHED, Ordering::AcqRel, Ordering::Acquire)
                .is_err();
            if let Some(guard) = hold.as_deref().filter(|_| abandoned) {
                record_late_failure(&store, &guard.key, stage, &late_error);
            }
            result
        });
        let waited = tokio::time::timeout(deadline, &mut handle).await;
        let joined = match waited {
            Ok(joined) => Some(joined),
            Err(_) => {
                let abandoned = state
                    .compare_exchange(STAGE_RUNNING, STAGE_ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if abandoned { None } else { Some(handle.await) }
            }
        };
        let result = match joined {
            Some(Ok(result)) => result,
            Some(Err(err)) => Err(PipelineError::Worker {
                stage,
                message: err.to_string(),
            }),
            None => Err(PipelineError::StageTimeout {
                stage,
                timeout_secs: deadline.as_secs(),
            }),
        };
        tracing::debug!(
            schema = schema.as_str(),
            stage = stage.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "stage finished"
        );
        result
    }
}

/// Called from an abandoned stage once its work has returned.
fn record_late_failure(store: &TenantStore, task: &FileTask, stage: Stage, error: &str) {
    let recorded = store
        .open(&task.schema)
        .and_then(|db| db.record_file_failure(task.manifest_id, &task.report_name, error));
    match recorded {
        Ok(()) => tracing::warn!(
            schema = task.schema.as_str(),
            manifest_id = task.manifest_id,
            file = task.report_name.as_str(),
            stage = stage.as_str(),
            "abandoned stage returned, file marked failed"
        ),
        Err(err) => tracing::warn!(
            schema = task.schema.as_str(),
            manifest_id = task.manifest_id,
            file = task.report_name.as_str(),
            stage = stage.as_str(),
            error = %err,
            "could not record failure of abandoned stage"
        ),
    }
}

fn prepare(db: &Db, manifest_id: i64, report_name: &str) -> Result<Option<Prepared>, PipelineError> {
    let manifest = db.require_manifest(manifest_id)?;
    if !manifest.report_files.iter().any(|file| file == report_name) {
        return Err(PipelineError::UnknownFile(report_name.to_string()));
    }
    if db.file_stat(manifest_id, report_name)?.status == FileState::Completed {
        return Ok(None);
    }
    let provider = db.require_provider(manifest.provider_uuid)?;
    let stats = db.mark_file_started(manifest_id, report_name)?;
    Ok(Some(Prepared {
        manifest,
        provider,
        committed: stats.committed_state,
    }))
}

/// Days a file's rows cover, kept inside the manifest's billing period.
fn file_range(
    db: &Db,
    provider: &Provider,
    manifest: &Manifest,
    report_name: &str,
) -> Result<Option<(NaiveDate, NaiveDate)>, PipelineError> {
    let Some((start, end)) =
        db.file_usage_bounds(provider.provider_type, manifest.id, report_name)?
    else {
        return Ok(None);
    };
    let start = start.max(manifest.billing_period_start);
    let end = end.min(manifest.billing_period_end);
    Ok((start <= end).then_some((start, end)))
}

fn release_report(report_path: &Path) {
    match remove_processed_file(report_path) {
        Ok(true) => tracing::debug!(path = %report_path.display(), "processed report removed"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %report_path.display(), error = %err, "could not remove processed report")
        }
    }
}
