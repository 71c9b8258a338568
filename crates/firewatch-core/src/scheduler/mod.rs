//! Background job scheduler.
//!
//! Jobs are registered by name with a [`Trigger`] and [`JobOptions`], then
//! driven by one tokio task each. A handler failure or panic is counted
//! and logged against the job; it never takes the scheduler down. `stop`
//! cancels all job tasks and optionally waits (bounded) for running
//! handlers to finish.

mod trigger;

pub use trigger::Trigger;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::CoreError;

/// Per-job execution options, mirroring the defaults the fleet runs with:
/// coalesce missed runs, never overlap, 5-minute misfire grace.
#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    /// Combine multiple missed runs into one.
    pub coalesce: bool,
    /// Skip a fire while the previous run of the same job is active.
    pub single_instance: bool,
    /// A fire later than this past its scheduled time is discarded.
    pub misfire_grace: StdDuration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            coalesce: true,
            single_instance: true,
            misfire_grace: StdDuration::from_secs(300),
        }
    }
}

type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

/// Mutable per-job state, shared between the job loop and `stats()`.
#[derive(Debug, Default)]
struct JobState {
    runs: AtomicU64,
    errors: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
    last_status: Mutex<Option<String>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

struct JobEntry {
    trigger: Trigger,
    options: JobOptions,
    handler: JobHandler,
    state: Arc<JobState>,
    cancel: CancellationToken,
}

/// One line of the recent-execution history in the stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job: String,
    pub at: DateTime<Utc>,
    pub status: String,
}

/// Point-in-time stats for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub runs: u64,
    pub errors: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// The scheduler's self-report snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub state: String,
    pub total_executions: u64,
    pub total_errors: u64,
    pub uptime_seconds: i64,
    pub jobs: HashMap<String, JobStats>,
    pub recent_executions: Vec<ExecutionRecord>,
}

const RECENT_EXECUTIONS_KEPT: usize = 50;

struct SchedulerInner {
    offset: FixedOffset,
    stop_deadline: StdDuration,
    jobs: DashMap<String, JobEntry>,
    running: std::sync::atomic::AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    total_executions: AtomicU64,
    total_errors: AtomicU64,
    recent: Mutex<VecDeque<ExecutionRecord>>,
    cancel: Mutex<CancellationToken>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable scheduler handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.inner.jobs.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(offset: FixedOffset, stop_deadline: StdDuration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                offset,
                stop_deadline,
                jobs: DashMap::new(),
                running: std::sync::atomic::AtomicBool::new(false),
                started_at: Mutex::new(None),
                total_executions: AtomicU64::new(0),
                total_errors: AtomicU64::new(0),
                recent: Mutex::new(VecDeque::new()),
                cancel: Mutex::new(CancellationToken::new()),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a job. If the scheduler is already running, the job's loop
    /// starts immediately; an existing job with the same id is replaced.
    pub async fn register<F, Fut>(&self, job_id: &str, trigger: Trigger, options: JobOptions, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move || Box::pin(f()));
        self.register_boxed(job_id, trigger, options, handler).await;
    }

    async fn register_boxed(
        &self,
        job_id: &str,
        trigger: Trigger,
        options: JobOptions,
        handler: JobHandler,
    ) {
        // Replace any previous job under this id.
        self.remove(job_id).await;

        let root = self.inner.cancel.lock().await.clone();
        let entry = JobEntry {
            trigger: trigger.clone(),
            options,
            handler: Arc::clone(&handler),
            state: Arc::new(JobState::default()),
            cancel: root.child_token(),
        };
        let state = Arc::clone(&entry.state);
        let cancel = entry.cancel.clone();
        self.inner.jobs.insert(job_id.to_owned(), entry);
        debug!(job = job_id, "job registered");

        if self.inner.running.load(Ordering::SeqCst) {
            let handle = tokio::spawn(Self::job_loop(
                Arc::clone(&self.inner),
                job_id.to_owned(),
                trigger,
                options,
                handler,
                state,
                cancel,
            ));
            self.inner.handles.lock().await.push(handle);
        }
    }

    /// Remove a job, cancelling its loop if running.
    pub async fn remove(&self, job_id: &str) -> bool {
        if let Some((_, entry)) = self.inner.jobs.remove(job_id) {
            entry.cancel.cancel();
            debug!(job = job_id, "job removed");
            true
        } else {
            false
        }
    }

    /// Start every registered job.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, ignoring start");
            return;
        }
        *self.inner.started_at.lock().await = Some(Utc::now());

        let root = self.inner.cancel.lock().await.clone();
        let mut handles = self.inner.handles.lock().await;
        for mut item in self.inner.jobs.iter_mut() {
            let job_id = item.key().clone();
            // Fresh child token per start so a stop/start cycle reuses jobs.
            let cancel = root.child_token();
            item.value_mut().cancel = cancel.clone();
            let entry = item.value();
            handles.push(tokio::spawn(Self::job_loop(
                Arc::clone(&self.inner),
                job_id,
                entry.trigger.clone(),
                entry.options,
                Arc::clone(&entry.handler),
                Arc::clone(&entry.state),
                cancel,
            )));
        }
        info!(jobs = self.inner.jobs.len(), "scheduler started");
    }

    /// Stop all jobs. With `wait_for_running`, running handlers get up to
    /// the configured deadline to finish.
    pub async fn stop(&self, wait_for_running: bool) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            warn!("scheduler not running, ignoring stop");
            return;
        }

        {
            let mut cancel = self.inner.cancel.lock().await;
            cancel.cancel();
            // Fresh token so a later start() gets uncancelled children.
            *cancel = CancellationToken::new();
        }

        let mut handles = self.inner.handles.lock().await;
        if wait_for_running {
            let deadline = tokio::time::sleep(self.inner.stop_deadline);
            tokio::pin!(deadline);
            for handle in handles.drain(..) {
                tokio::select! {
                    () = &mut deadline => {
                        warn!("stop deadline reached, abandoning remaining jobs");
                        break;
                    }
                    _ = handle => {}
                }
            }
        }
        handles.clear();
        info!("scheduler stopped");
    }

    /// Point-in-time stats snapshot.
    pub async fn stats(&self) -> SchedulerStats {
        let mut jobs = HashMap::new();
        for item in &self.inner.jobs {
            let state = &item.value().state;
            jobs.insert(
                item.key().clone(),
                JobStats {
                    runs: state.runs.load(Ordering::Relaxed),
                    errors: state.errors.load(Ordering::Relaxed),
                    last_run: *state.last_run.lock().await,
                    last_status: state.last_status.lock().await.clone(),
                    next_run: *state.next_run.lock().await,
                },
            );
        }

        let uptime_seconds = match *self.inner.started_at.lock().await {
            Some(at) if self.inner.running.load(Ordering::SeqCst) => {
                (Utc::now() - at).num_seconds()
            }
            _ => 0,
        };

        SchedulerStats {
            state: if self.inner.running.load(Ordering::SeqCst) {
                "running".into()
            } else {
                "stopped".into()
            },
            total_executions: self.inner.total_executions.load(Ordering::Relaxed),
            total_errors: self.inner.total_errors.load(Ordering::Relaxed),
            uptime_seconds,
            jobs,
            recent_executions: self.inner.recent.lock().await.iter().cloned().collect(),
        }
    }

    // ── Job loop ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    async fn job_loop(
        inner: Arc<SchedulerInner>,
        job_id: String,
        trigger: Trigger,
        options: JobOptions,
        handler: JobHandler,
        state: Arc<JobState>,
        cancel: CancellationToken,
    ) {
        let mut after = Utc::now();

        loop {
            let Some(next) = trigger.next_fire(after, inner.offset) else {
                warn!(job = %job_id, "trigger yields no further fire times, job loop ending");
                break;
            };
            *state.next_run.lock().await = Some(next);

            let delay = (next - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let now = Utc::now();
            let lateness = (now - next).to_std().unwrap_or(StdDuration::ZERO);
            if lateness > options.misfire_grace {
                // Too late to be meaningful. With coalescing, all missed
                // fires collapse into the next scheduled one.
                warn!(job = %job_id, late_secs = lateness.as_secs(), "misfire, skipping run");
                after = if options.coalesce { now } else { next };
                continue;
            }

            Self::execute(&inner, &job_id, &handler, &state, options.single_instance).await;
            after = if options.coalesce { Utc::now().max(next) } else { next };
        }
    }

    async fn execute(
        inner: &Arc<SchedulerInner>,
        job_id: &str,
        handler: &JobHandler,
        state: &Arc<JobState>,
        wait_for_completion: bool,
    ) {
        let started = Utc::now();
        let future = (handler)();
        let join = tokio::spawn(future);

        let outcome = if wait_for_completion {
            match join.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) if e.is_panic() => Err(format!("handler panicked: {e}")),
                Err(e) => Err(format!("handler cancelled: {e}")),
            }
        } else {
            // Fire-and-forget: the spawned task keeps running; only spawn
            // failure is observable here.
            Ok(())
        };

        inner.total_executions.fetch_add(1, Ordering::Relaxed);
        state.runs.fetch_add(1, Ordering::Relaxed);
        *state.last_run.lock().await = Some(started);

        let status = match outcome {
            Ok(()) => "ok".to_owned(),
            Err(reason) => {
                inner.total_errors.fetch_add(1, Ordering::Relaxed);
                state.errors.fetch_add(1, Ordering::Relaxed);
                error!(job = job_id, error = %reason, "job execution failed");
                format!("error: {reason}")
            }
        };
        *state.last_status.lock().await = Some(status.clone());

        let mut recent = inner.recent.lock().await;
        recent.push_back(ExecutionRecord {
            job: job_id.to_owned(),
            at: started,
            status,
        });
        while recent.len() > RECENT_EXECUTIONS_KEPT {
            recent.pop_front();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_scheduler() -> Scheduler {
        Scheduler::new(
            FixedOffset::east_opt(0).unwrap(),
            StdDuration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn interval_job_runs_repeatedly() {
        let scheduler = test_scheduler();
        let count = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&count);
        scheduler
            .register(
                "tick",
                Trigger::Interval(StdDuration::from_millis(40)),
                JobOptions::default(),
                move || {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await;

        scheduler.start().await;
        tokio::time::sleep(StdDuration::from_millis(250)).await;
        scheduler.stop(true).await;

        assert!(count.load(Ordering::SeqCst) >= 3, "expected >= 3 runs");
    }

    #[tokio::test]
    async fn failing_job_counts_errors_but_scheduler_survives() {
        let scheduler = test_scheduler();

        scheduler
            .register(
                "bad",
                Trigger::Interval(StdDuration::from_millis(40)),
                JobOptions::default(),
                || async {
                    Err(CoreError::Scan("boom".into()))
                },
            )
            .await;
        let ok_runs = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&ok_runs);
        scheduler
            .register(
                "good",
                Trigger::Interval(StdDuration::from_millis(40)),
                JobOptions::default(),
                move || {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await;

        scheduler.start().await;
        tokio::time::sleep(StdDuration::from_millis(250)).await;
        let stats = scheduler.stats().await;
        scheduler.stop(true).await;

        assert!(stats.total_errors >= 2);
        assert!(ok_runs.load(Ordering::SeqCst) >= 2);
        assert!(stats.jobs["bad"].errors >= 2);
        assert_eq!(stats.jobs["good"].errors, 0);
    }

    #[tokio::test]
    async fn panicking_job_is_isolated() {
        let scheduler = test_scheduler();
        scheduler
            .register(
                "panics",
                Trigger::Interval(StdDuration::from_millis(40)),
                JobOptions::default(),
                || async {
                    panic!("handler exploded");
                },
            )
            .await;

        scheduler.start().await;
        tokio::time::sleep(StdDuration::from_millis(120)).await;
        let stats = scheduler.stats().await;
        scheduler.stop(true).await;

        assert!(stats.total_errors >= 1);
        assert!(
            stats.jobs["panics"]
                .last_status
                .as_deref()
                .is_some_and(|s| s.contains("panicked"))
        );
    }

    #[tokio::test]
    async fn removed_job_stops_firing() {
        let scheduler = test_scheduler();
        let count = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&count);
        scheduler
            .register(
                "tick",
                Trigger::Interval(StdDuration::from_millis(30)),
                JobOptions::default(),
                move || {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await;

        scheduler.start().await;
        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert!(scheduler.remove("tick").await);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let after_removal = count.load(Ordering::SeqCst);

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        scheduler.stop(true).await;
        assert_eq!(count.load(Ordering::SeqCst), after_removal);
    }

    #[tokio::test]
    async fn stats_track_next_run() {
        let scheduler = test_scheduler();
        scheduler
            .register(
                "tick",
                Trigger::Interval(StdDuration::from_secs(30)),
                JobOptions::default(),
                || async { Ok(()) },
            )
            .await;
        scheduler.start().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let stats = scheduler.stats().await;
        assert_eq!(stats.state, "running");
        assert!(stats.jobs["tick"].next_run.is_some());
        scheduler.stop(true).await;
    }
}
