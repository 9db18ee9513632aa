//! Job registry: the single owner of extraction attempt state.
//!
//! Every durable write goes through [`JobRegistry::update`], which validates
//! the attempt number and the status transition, writes through to SQLite
//! when a database is attached, and only then updates the in-memory cache.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::job_repo::{self, AttemptFilter, AttemptRow};
use crate::db::{Database, DatabaseError};
use crate::error::RegistryError;
use crate::job::{ExtractionJob, JobPhase, JobStatus, JobUpdate, RetryMode};

// ─── Row conversion ─────────────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn job_to_row(job: &ExtractionJob) -> AttemptRow {
    AttemptRow {
        job_id: job.id.clone(),
        attempt: job.attempt,
        source_ref: job.source_ref.clone(),
        status: job.status.as_str().to_string(),
        phase: job.phase.as_str().to_string(),
        progress: job.progress,
        message: job.message.clone(),
        extracted_text: job.extracted_text.clone(),
        partial_text: job.partial_text.clone(),
        has_extracted_text: job.has_extracted_text,
        failed_batches: job.failed_batches as u32,
        page_count: job.page_count.map(|c| c as u32),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
    }
}

fn row_to_job(row: &AttemptRow) -> Result<ExtractionJob, DatabaseError> {
    let status = JobStatus::parse(&row.status).ok_or_else(|| DatabaseError::CorruptRow {
        id: format!("{}#{}", row.job_id, row.attempt),
        reason: format!("unknown status '{}'", row.status),
    })?;
    let phase = JobPhase::parse(&row.phase).unwrap_or_else(|| {
        log::warn!(
            "Unknown phase '{}' for job {}, defaulting to Queued",
            row.phase,
            row.job_id
        );
        JobPhase::Queued
    });

    Ok(ExtractionJob {
        id: row.job_id.clone(),
        attempt: row.attempt,
        source_ref: row.source_ref.clone(),
        status,
        phase,
        progress: row.progress.min(100),
        message: row.message.clone(),
        extracted_text: row.extracted_text.clone(),
        partial_text: row.partial_text.clone(),
        has_extracted_text: row.has_extracted_text,
        failed_batches: row.failed_batches as usize,
        page_count: row.page_count.map(|c| c as usize),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
    })
}

// ─── JobRegistry ────────────────────────────────────────────────────────────

/// Current attempt plus every attempt it superseded.
#[derive(Debug, Clone)]
struct JobEntry {
    current: ExtractionJob,
    history: Vec<ExtractionJob>,
}

impl JobEntry {
    fn attempts(&self) -> Vec<ExtractionJob> {
        let mut all = self.history.clone();
        all.push(self.current.clone());
        all
    }
}

/// Arena of extraction jobs keyed by id, with optional SQLite persistence.
///
/// Writes are serialized across all jobs: each one holds the cache lock for
/// its database round trip, so the cache never runs ahead of the database.
pub struct JobRegistry {
    db: Option<Database>,
    jobs: RwLock<HashMap<String, JobEntry>>,
    leases: Mutex<HashSet<String>>,
}

/// Exclusive right to run the current attempt of one job in this process.
/// Released on drop.
pub struct RunLease<'a> {
    registry: &'a JobRegistry,
    job_id: String,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        self.registry.lock_leases().remove(&self.job_id);
    }
}

impl JobRegistry {
    /// Creates a registry that keeps state in memory only.
    pub fn in_memory() -> Self {
        Self {
            db: None,
            jobs: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a registry that writes through to `db`.
    pub fn with_database(db: Database) -> Self {
        Self {
            db: Some(db),
            jobs: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashSet::new()),
        }
    }

    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_leases(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.leases.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job lease lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Reserves a job for one run. A second lease on the same job fails with
    /// `AttemptInFlight` until the first is dropped.
    pub fn lease(&self, job_id: &str) -> Result<RunLease<'_>, RegistryError> {
        let current = self.get(job_id)?;
        if !self.lock_leases().insert(job_id.to_string()) {
            return Err(RegistryError::AttemptInFlight {
                job_id: job_id.to_string(),
                attempt: current.attempt,
            });
        }
        Ok(RunLease {
            registry: self,
            job_id: job_id.to_string(),
        })
    }

    pub fn is_leased(&self, job_id: &str) -> bool {
        self.lock_leases().contains(job_id)
    }

    /// Registers a new document and returns its first, pending attempt.
    pub fn submit(&self, source_ref: &str) -> Result<ExtractionJob, RegistryError> {
        let job = ExtractionJob::new(source_ref);

        if let Some(db) = &self.db {
            job_repo::insert(db, &job_to_row(&job))?;
        }

        self.write_jobs().insert(
            job.id.clone(),
            JobEntry {
                current: job.clone(),
                history: Vec::new(),
            },
        );

        log::info!("Submitted job {} for {}", job.id, source_ref);
        Ok(job)
    }

    /// Returns the current attempt of a job.
    pub fn get(&self, job_id: &str) -> Result<ExtractionJob, RegistryError> {
        if let Some(entry) = self.read_jobs().get(job_id) {
            return Ok(entry.current.clone());
        }
        self.load_entry(job_id).map(|entry| entry.current)
    }

    /// Returns every attempt of a job, oldest first.
    pub fn get_attempts(&self, job_id: &str) -> Result<Vec<ExtractionJob>, RegistryError> {
        if let Some(entry) = self.read_jobs().get(job_id) {
            return Ok(entry.attempts());
        }
        self.load_entry(job_id).map(|entry| entry.attempts())
    }

    /// Lists current attempts, newest first. Falls back to the cache when no
    /// database is attached.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: Option<u64>,
    ) -> Result<Vec<ExtractionJob>, RegistryError> {
        if let Some(db) = &self.db {
            let filter = AttemptFilter {
                status: status.map(|s| s.as_str().to_string()),
                current_only: true,
                limit,
                offset: None,
            };
            let (rows, _) = job_repo::query(db, &filter)?;
            return rows
                .iter()
                .map(|row| row_to_job(row).map_err(RegistryError::from))
                .collect();
        }

        let mut jobs: Vec<ExtractionJob> = self
            .read_jobs()
            .values()
            .map(|entry| entry.current.clone())
            .filter(|job| status.is_none() || status == Some(job.status))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            jobs.truncate(limit as usize);
        }
        Ok(jobs)
    }

    /// Starts a new attempt for a finished job.
    ///
    /// The new attempt is `Pending` with no text; the previous attempt is
    /// kept as history and any further write addressed to it is rejected.
    pub fn retry(&self, job_id: &str, mode: RetryMode) -> Result<ExtractionJob, RegistryError> {
        self.ensure_cached(job_id)?;
        let mut jobs = self.write_jobs();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        match (entry.current.status, mode) {
            (JobStatus::Pending | JobStatus::Processing, _) => {
                return Err(RegistryError::AttemptInFlight {
                    job_id: job_id.to_string(),
                    attempt: entry.current.attempt,
                });
            }
            (JobStatus::Completed, RetryMode::Retry) => {
                return Err(RegistryError::AlreadyCompleted(job_id.to_string()));
            }
            (JobStatus::Failed, _) | (JobStatus::Completed, RetryMode::Reextract) => {}
        }

        let next = entry.current.next_attempt();
        if let Some(db) = &self.db {
            job_repo::insert(db, &job_to_row(&next))?;
        }

        let previous = std::mem::replace(&mut entry.current, next.clone());
        entry.history.push(previous);

        log::info!(
            "Job {} superseded attempt {} with attempt {} ({:?})",
            job_id,
            next.attempt - 1,
            next.attempt,
            mode
        );
        Ok(next)
    }

    /// Applies one write to the given attempt of a job.
    ///
    /// Rejects writes to superseded attempts and status changes outside the
    /// forward-only table. The database is written before the cache so a
    /// failed write leaves the visible state unchanged.
    pub fn update(
        &self,
        job_id: &str,
        attempt: u32,
        update: JobUpdate,
    ) -> Result<ExtractionJob, RegistryError> {
        self.write(job_id, attempt, update, false)
    }

    /// Applies `update` only if the attempt is still `Pending`.
    ///
    /// This is the write that starts processing; of several callers racing
    /// on one attempt exactly one wins; the others get `AttemptInFlight`.
    pub fn claim(
        &self,
        job_id: &str,
        attempt: u32,
        update: JobUpdate,
    ) -> Result<ExtractionJob, RegistryError> {
        self.write(job_id, attempt, update, true)
    }

    fn write(
        &self,
        job_id: &str,
        attempt: u32,
        update: JobUpdate,
        claim: bool,
    ) -> Result<ExtractionJob, RegistryError> {
        self.ensure_cached(job_id)?;
        let mut jobs = self.write_jobs();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        if entry.current.attempt != attempt {
            return Err(RegistryError::StaleAttempt {
                job_id: job_id.to_string(),
                attempt,
                current: entry.current.attempt,
            });
        }

        let from = entry.current.status;
        if claim && from == JobStatus::Processing {
            return Err(RegistryError::AttemptInFlight {
                job_id: job_id.to_string(),
                attempt,
            });
        }
        if (claim && from != JobStatus::Pending) || !from.can_transition_to(update.status) {
            return Err(RegistryError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to: update.status,
            });
        }

        let mut next = entry.current.clone();
        next.apply(update, Utc::now());

        if let Some(db) = &self.db {
            job_repo::update(db, &job_to_row(&next))?;
        }

        if from != next.status {
            log::debug!(
                "Job {} attempt {}: {} -> {}",
                job_id,
                attempt,
                from,
                next.status
            );
        }

        entry.current = next.clone();
        Ok(next)
    }

    /// Fails current attempts left `Processing` by a run that no longer
    /// exists. Checkpointed partial text is kept.
    ///
    /// Only attempts with no write for at least `stale_after` are touched.
    pub fn recover_interrupted(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<ExtractionJob>, RegistryError> {
        let now = Utc::now();
        let stuck: Vec<ExtractionJob> = self
            .list(Some(JobStatus::Processing), None)?
            .into_iter()
            .filter(|job| !self.is_leased(&job.id))
            .filter(|job| {
                (now - job.updated_at)
                    .to_std()
                    .is_ok_and(|idle| idle >= stale_after)
            })
            .collect();

        let mut recovered = Vec::with_capacity(stuck.len());
        for job in stuck {
            let diagnostic = format!("Extraction interrupted during {}", job.message);
            let update = JobUpdate::new(JobStatus::Failed, JobPhase::Failed, 0, &diagnostic)
                .with_extracted_text(&diagnostic);

            match self.update(&job.id, job.attempt, update) {
                Ok(failed) => {
                    log::warn!(
                        "Recovered job {} attempt {}: {}",
                        job.id,
                        job.attempt,
                        diagnostic
                    );
                    recovered.push(failed);
                }
                Err(RegistryError::StaleAttempt { .. } | RegistryError::InvalidTransition { .. }) => {
                    log::debug!("Job {} moved on before recovery, skipping", job.id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(recovered)
    }

    fn ensure_cached(&self, job_id: &str) -> Result<(), RegistryError> {
        if self.read_jobs().contains_key(job_id) {
            return Ok(());
        }
        self.load_entry(job_id).map(|_| ())
    }

    /// Loads a job's attempts from the database into the cache.
    fn load_entry(&self, job_id: &str) -> Result<JobEntry, RegistryError> {
        let db = self
            .db
            .as_ref()
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        let mut attempts = job_repo::find_attempts(db, job_id)?
            .iter()
            .map(row_to_job)
            .collect::<Result<Vec<_>, _>>()?;
        let current = attempts
            .pop()
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        let entry = JobEntry {
            current,
            history: attempts,
        };

        // Another thread may have loaded it in the meantime; keep theirs.
        let mut jobs = self.write_jobs();
        let cached = jobs.entry(job_id.to_string()).or_insert(entry);
        Ok(cached.clone())
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}
