// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Worker pool and job registry.
//!
//! One registry keyed by job id holds every live job; each group keeps a
//! FIFO of ids as a secondary index. Only the head of a group may run, so
//! a group never has two jobs in flight and completes in submission order.
//! A retried job stays at the head of its group with a `not_before`
//! deadline instead of being re-entered in place.
//!
//! State machine: `Queued -> Running -> {Done, Cancelled, Failed}`, and
//! `Running -> Queued` on a retryable failure. A job submitted again while
//! it runs is queued once more when the run ends, unless it was cancelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::cancel::CancellationToken;
use super::runner::{JobContext, JobRunner};
use super::{Job, JobKind};
use crate::config::JobConfig;
use crate::error::{CourierError, CourierResult};
use crate::storage::{Storage, StoredJob};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Cancelled,
    /// Ended with a non-retryable error.
    Failed,
}

const FINISHED_HISTORY: usize = 256;

struct Entry {
    job: Job,
    state: JobState,
    token: CancellationToken,
    not_before: Instant,
    /// Runs so far.
    runs: u32,
    /// Consecutive generic server errors.
    server_errors: u32,
    seq: u64,
    /// Submitted again while running; queued once this run ends.
    rerun: Option<Job>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    groups: HashMap<String, VecDeque<String>>,
    running_groups: HashSet<String>,
    /// Recent terminal states, newest last.
    finished: VecDeque<(String, JobState)>,
    next_seq: u64,
    shutdown: bool,
}

impl Registry {
    /// Next runnable job, or the earliest instant one becomes runnable.
    fn next_ready(&self, now: Instant) -> Result<String, Option<Instant>> {
        let mut best: Option<(u64, &str)> = None;
        let mut earliest: Option<Instant> = None;
        for (group, queue) in &self.groups {
            if self.running_groups.contains(group) {
                continue;
            }
            let Some(entry) = queue.front().and_then(|id| self.entries.get(id)) else {
                continue;
            };
            if entry.state != JobState::Queued {
                continue;
            }
            if entry.not_before > now {
                earliest = Some(earliest.map_or(entry.not_before, |e| e.min(entry.not_before)));
                continue;
            }
            if best.map_or(true, |(seq, _)| entry.seq < seq) {
                best = Some((entry.seq, entry.job.job_id.as_str()));
            }
        }
        match best {
            Some((_, id)) => Ok(id.to_string()),
            None => Err(earliest),
        }
    }

    fn remove(&mut self, job_id: &str) -> Option<Entry> {
        let entry = self.entries.remove(job_id)?;
        if let Some(queue) = self.groups.get_mut(&entry.job.group) {
            queue.retain(|id| id != job_id);
            if queue.is_empty() {
                self.groups.remove(&entry.job.group);
            }
        }
        Some(entry)
    }

    fn record(&mut self, job_id: &str, state: JobState) {
        if self.finished.len() >= FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((job_id.to_string(), state));
    }
}

struct Shared {
    registry: Mutex<Registry>,
    changed: Condvar,
    runner: Arc<dyn JobRunner>,
    storage: Option<Arc<Storage>>,
    config: JobConfig,
}

/// Persistent, deduplicated, cancellable job queue.
pub struct JobEngine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobEngine {
    /// Starts `config.workers` worker threads. With `storage`, persistent
    /// jobs are saved on submit and removed once finished.
    pub fn new(
        runner: Arc<dyn JobRunner>,
        config: JobConfig,
        storage: Option<Arc<Storage>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            changed: Condvar::new(),
            runner,
            storage,
            config,
        });

        let mut workers = Vec::new();
        for index in 0..shared.config.workers.max(1) {
            let worker = shared.clone();
            match thread::Builder::new()
                .name(format!("job-worker-{index}"))
                .spawn(move || worker_loop(worker))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => error!(index, error = %e, "failed to spawn job worker"),
            }
        }

        JobEngine {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueues a job.
    ///
    /// A queued job with the same id is replaced in place, keeping its
    /// position and group. A running one runs again after the current run.
    pub fn submit(&self, job: Job) -> CourierResult<()> {
        if self.shared.registry.lock().shutdown {
            return Err(CourierError::Cancelled);
        }
        enqueue(&self.shared, job)
    }

    /// Cancels a job by id. Returns whether a live job was found.
    ///
    /// A queued job is dropped before it ever runs; a running one has its
    /// token cancelled and ends `Cancelled` at its next poll.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut reg = self.shared.registry.lock();
        let Some(entry) = reg.entries.get_mut(job_id) else {
            drop(reg);
            unpersist(&self.shared, job_id);
            return false;
        };

        entry.rerun = None;
        let token = entry.token.clone();
        let removed = if entry.state == JobState::Queued {
            reg.record(job_id, JobState::Cancelled);
            reg.remove(job_id)
        } else {
            None
        };
        drop(reg);

        info!(job_id, "job cancelled");
        token.cancel();
        if let Some(entry) = removed {
            unpersist(&self.shared, job_id);
            self.shared.runner.on_cancelled(&entry.job);
        }
        self.shared.changed.notify_all();
        true
    }

    /// Cancels every tracked job and forgets all persisted ones.
    pub fn cancel_all(&self) {
        let mut reg = self.shared.registry.lock();
        let queued: Vec<String> = reg
            .entries
            .values()
            .filter(|e| e.state == JobState::Queued)
            .map(|e| e.job.job_id.clone())
            .collect();
        let removed: Vec<Entry> = queued.iter().filter_map(|id| reg.remove(id)).collect();
        reg.finished.clear();
        for entry in &removed {
            reg.record(&entry.job.job_id, JobState::Cancelled);
        }
        let running: Vec<CancellationToken> = reg
            .entries
            .values_mut()
            .map(|e| {
                e.rerun = None;
                e.token.clone()
            })
            .collect();
        drop(reg);

        info!(queued = removed.len(), running = running.len(), "cancelling all jobs");
        for token in running {
            token.cancel();
        }
        for entry in &removed {
            entry.token.cancel();
            self.shared.runner.on_cancelled(&entry.job);
        }
        if let Some(storage) = &self.shared.storage {
            if let Err(e) = storage.clear_jobs() {
                warn!(error = %e, "failed to clear persisted jobs");
            }
        }
        self.shared.changed.notify_all();
    }

    /// Re-submits every persisted job. Returns how many were restored.
    pub fn restore(&self) -> CourierResult<usize> {
        let Some(storage) = &self.shared.storage else {
            return Ok(0);
        };
        let mut restored = 0;
        for stored in storage.load_jobs()? {
            match serde_json::from_str::<JobKind>(&stored.payload) {
                Ok(kind) => {
                    self.submit(Job::new(&stored.job_id, &stored.group, true, kind))?;
                    restored += 1;
                }
                Err(e) => {
                    warn!(job_id = %stored.job_id, error = %e, "dropping unreadable persisted job");
                    storage.delete_job(&stored.job_id)?;
                }
            }
        }
        if restored > 0 {
            info!(restored, "persisted jobs restored");
        }
        Ok(restored)
    }

    /// State of a live job, or the terminal state of a recently finished
    /// one. `None` for unknown ids.
    pub fn state(&self, job_id: &str) -> Option<JobState> {
        let reg = self.shared.registry.lock();
        if let Some(entry) = reg.entries.get(job_id) {
            return Some(entry.state);
        }
        reg.finished
            .iter()
            .rev()
            .find(|(id, _)| id == job_id)
            .map(|(_, state)| *state)
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.shared.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until no job is live or `timeout` elapses. Returns whether
    /// the engine went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut reg = self.shared.registry.lock();
        while !reg.entries.is_empty() {
            if self
                .shared
                .changed
                .wait_until(&mut reg, deadline)
                .timed_out()
            {
                return reg.entries.is_empty();
            }
        }
        true
    }

    /// Stops the workers after their current job. Queued jobs stay
    /// persisted for the next [`Self::restore`].
    pub fn shutdown(&self) {
        self.shared.registry.lock().shutdown = true;
        self.shared.changed.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                error!("job worker panicked");
            }
        }
    }
}

impl Drop for JobEngine {
    fn drop(&mut self) {
        self.shared.registry.lock().shutdown = true;
        self.shared.changed.notify_all();
    }
}

fn unpersist(shared: &Shared, job_id: &str) {
    if let Some(storage) = &shared.storage {
        if let Err(e) = storage.delete_job(job_id) {
            warn!(job_id, error = %e, "failed to delete persisted job");
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut reg = shared.registry.lock();
        let job_id = loop {
            if reg.shutdown {
                return;
            }
            match reg.next_ready(Instant::now()) {
                Ok(id) => break id,
                Err(Some(at)) => {
                    shared.changed.wait_until(&mut reg, at);
                }
                Err(None) => shared.changed.wait(&mut reg),
            }
        };

        let Some(entry) = reg.entries.get_mut(&job_id) else {
            continue;
        };
        entry.state = JobState::Running;
        entry.runs += 1;
        let job = entry.job.clone();
        let ctx = JobContext::new(entry.token.clone(), entry.runs);
        reg.running_groups.insert(job.group.clone());
        drop(reg);

        debug!(job_id = %job.job_id, attempt = ctx.attempt(), "job running");
        let result = shared.runner.run(&job, &ctx);
        finish(&shared, &job, &ctx, result);
    }
}

/// What to do with a job after a run.
enum Outcome {
    Done,
    Cancelled,
    Retry(Duration),
    Failed(CourierError),
}

fn finish(shared: &Shared, job: &Job, ctx: &JobContext, result: CourierResult<()>) {
    let mut reg = shared.registry.lock();
    reg.running_groups.remove(&job.group);

    // A run that finished its work is done even if a cancel came late.
    let cancelled = ctx.cancel_token().is_cancelled();
    let outcome = match result {
        Ok(()) => Outcome::Done,
        Err(_) if cancelled => Outcome::Cancelled,
        Err(CourierError::Cancelled) => Outcome::Cancelled,
        Err(e) if e.is_terminal_success() => Outcome::Done,
        Err(e) if e.is_retryable() => match reg.entries.get_mut(&job.job_id) {
            Some(entry) => retry_outcome(&shared.config, entry, e),
            None => Outcome::Cancelled,
        },
        Err(e) => Outcome::Failed(e),
    };

    match outcome {
        Outcome::Retry(delay) => {
            if let Some(entry) = reg.entries.get_mut(&job.job_id) {
                entry.state = JobState::Queued;
                entry.not_before = Instant::now() + delay;
                // The retry already covers a submit that arrived meanwhile.
                if let Some(next) = entry.rerun.take() {
                    entry.job = next;
                }
            }
            drop(reg);
        }
        Outcome::Done => {
            reg.record(&job.job_id, JobState::Done);
            let rerun = reg.remove(&job.job_id).and_then(|entry| entry.rerun);
            // Follow-ups join the registry before waiters can observe it idle.
            for followup in ctx.take_followups() {
                if let Err(e) = enqueue_locked(shared, &mut reg, followup) {
                    warn!(error = %e, "failed to submit follow-up job");
                }
            }
            let requeued = requeue(shared, &mut reg, rerun);
            drop(reg);
            if !requeued {
                unpersist(shared, &job.job_id);
            }
            debug!(job_id = %job.job_id, requeued, "job done");
        }
        Outcome::Cancelled => {
            reg.record(&job.job_id, JobState::Cancelled);
            reg.remove(&job.job_id);
            drop(reg);
            unpersist(shared, &job.job_id);
            info!(job_id = %job.job_id, "job ended cancelled");
            shared.runner.on_cancelled(job);
        }
        Outcome::Failed(e) => {
            reg.record(&job.job_id, JobState::Failed);
            let rerun = reg.remove(&job.job_id).and_then(|entry| entry.rerun);
            let requeued = requeue(shared, &mut reg, rerun);
            drop(reg);
            if !requeued {
                unpersist(shared, &job.job_id);
            }
            error!(job_id = %job.job_id, error = %e, "job failed");
            shared.runner.on_failed(job, &e);
        }
    }
    shared.changed.notify_all();
}

/// Queues a job that was submitted again while it ran. Returns whether it
/// is live again, in which case its persisted row stays.
fn requeue(shared: &Shared, reg: &mut Registry, rerun: Option<Job>) -> bool {
    let Some(job) = rerun else {
        return false;
    };
    let job_id = job.job_id.clone();
    match enqueue_locked(shared, reg, job) {
        // After shutdown the row stays for the next restore.
        Ok(()) => true,
        Err(e) => {
            warn!(job_id = %job_id, error = %e, "failed to queue job again");
            false
        }
    }
}

fn retry_outcome(config: &JobConfig, entry: &mut Entry, error: CourierError) -> Outcome {
    match error {
        CourierError::Server { code, .. } => {
            entry.server_errors += 1;
            if entry.server_errors >= config.max_server_error_attempts {
                return Outcome::Failed(error);
            }
            let delay = config.server_error_backoff(entry.server_errors);
            warn!(job_id = %entry.job.job_id, code, attempt = entry.server_errors, "server error, job will retry");
            Outcome::Retry(delay)
        }
        other => {
            entry.server_errors = 0;
            debug!(job_id = %entry.job.job_id, error = %other, "job will retry");
            Outcome::Retry(config.retry_delay())
        }
    }
}

fn persist(shared: &Shared, job: &Job) -> CourierResult<()> {
    if !job.persistent {
        return Ok(());
    }
    if let Some(storage) = &shared.storage {
        storage.save_job(&StoredJob {
            job_id: job.job_id.clone(),
            group: job.group.clone(),
            payload: serde_json::to_string(&job.kind)?,
        })?;
    }
    Ok(())
}

fn enqueue(shared: &Shared, job: Job) -> CourierResult<()> {
    let mut reg = shared.registry.lock();
    enqueue_locked(shared, &mut reg, job)?;
    drop(reg);
    shared.changed.notify_all();
    Ok(())
}

fn enqueue_locked(shared: &Shared, reg: &mut Registry, job: Job) -> CourierResult<()> {
    if reg.shutdown {
        return Ok(());
    }

    if let Some(entry) = reg.entries.get_mut(&job.job_id) {
        // A live job keeps the group it was first queued under.
        let job = Job {
            group: entry.job.group.clone(),
            ..job
        };
        persist(shared, &job)?;
        if entry.state == JobState::Running {
            debug!(job_id = %job.job_id, "job running, will run again");
            entry.rerun = Some(job);
        } else {
            debug!(job_id = %job.job_id, "queued job replaced");
            entry.job = job;
        }
    } else {
        persist(shared, &job)?;
        let seq = reg.next_seq;
        reg.next_seq += 1;
        reg.groups
            .entry(job.group.clone())
            .or_default()
            .push_back(job.job_id.clone());
        debug!(job_id = %job.job_id, group = %job.group, "job queued");
        reg.entries.insert(
            job.job_id.clone(),
            Entry {
                job,
                state: JobState::Queued,
                token: CancellationToken::new(),
                not_before: Instant::now(),
                runs: 0,
                server_errors: 0,
                seq,
                rerun: None,
            },
        );
    }
    Ok(())
}
