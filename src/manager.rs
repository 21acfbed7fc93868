//! Optimization job manager
//!
//! Each job runs as its own tokio task. Its live state sits behind a lock
//! shared between the task (through a [`SearchObserver`]) and the manager,
//! which hands out cloned snapshots. Once a job is terminal its state is
//! frozen: a stopped job can never be flipped back to completed by the task
//! finishing late.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backtest::{BacktestResult, BacktestSettings, Backtester};
use crate::config::OptimizationConfig;
use crate::data::MarketDataProvider;
use crate::error::{OptimizerError, Result};
use crate::optimizer::{run_search, total_iterations, Evaluator, SearchObserver};
use crate::store::{ResultStore, StoredResult};

pub const STOPPED_BY_USER: &str = "Optimization stopped by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Fraction of `total_iterations` evaluated, 0.0 to 1.0
    pub progress: f64,
    pub current_iteration: u64,
    pub total_iterations: u64,
    pub best_result: Option<BacktestResult>,
    pub error: Option<String>,
    /// Store id of the persisted best result, once completed
    pub result_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Mutable state of one job
#[derive(Debug)]
struct JobState {
    status: OptimizationStatus,
}

impl JobState {
    fn new(job_id: Uuid, total_iterations: u64) -> Self {
        JobState {
            status: OptimizationStatus {
                job_id,
                status: JobStatus::Running,
                progress: 0.0,
                current_iteration: 0,
                total_iterations,
                best_result: None,
                error: None,
                result_id: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        }
    }

    fn is_terminal(&self) -> bool {
        self.status.status.is_terminal()
    }

    fn record_iteration(&mut self, iteration: u64) {
        if self.is_terminal() {
            return;
        }
        let s = &mut self.status;
        s.current_iteration = iteration.min(s.total_iterations);
        s.progress = if s.total_iterations == 0 {
            0.0
        } else {
            s.current_iteration as f64 / s.total_iterations as f64
        };
    }

    fn record_best(&mut self, result: &BacktestResult) {
        if !self.is_terminal() {
            self.status.best_result = Some(result.clone());
        }
    }

    /// False if the job had already ended
    fn complete(&mut self, result_id: Option<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status.status = JobStatus::Completed;
        self.status.progress = 1.0;
        self.status.result_id = result_id;
        self.status.finished_at = Some(Utc::now());
        true
    }

    /// False if the job had already ended
    fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status.status = JobStatus::Failed;
        self.status.error = Some(message.into());
        self.status.finished_at = Some(Utc::now());
        true
    }
}

type SharedState = Arc<Mutex<JobState>>;

/// A panicking holder never leaves the state half-written, so poisoning is
/// ignored.
fn lock(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Job {
    state: SharedState,
    handle: Mutex<Option<JoinHandle<()>>>,
    abort: Mutex<Option<AbortHandle>>,
}

/// Feeds search progress into the job state
struct StateObserver {
    state: SharedState,
}

impl SearchObserver for StateObserver {
    fn on_evaluation(&mut self, iteration: u64, _result: &BacktestResult) {
        lock(&self.state).record_iteration(iteration);
    }

    fn on_new_best(&mut self, result: &BacktestResult) {
        lock(&self.state).record_best(result);
    }
}

/// Everything a spawned job owns
struct JobTask {
    id: Uuid,
    config: OptimizationConfig,
    provider: Arc<dyn MarketDataProvider>,
    store: ResultStore,
    backtester: Backtester,
    state: SharedState,
}

impl JobTask {
    async fn run(self) {
        match self.search().await {
            Ok(best) => self.finish(best),
            Err(e) => {
                if lock(&self.state).fail(e.to_string()) {
                    error!(job_id = %self.id, "Optimization failed: {}", e);
                }
            }
        }
    }

    async fn search(&self) -> Result<Option<BacktestResult>> {
        let cfg = &self.config;

        let symbols = self
            .provider
            .get_symbols()
            .await
            .map_err(|e| OptimizerError::DataFetch(format!("{:#}", e)))?;
        let symbol = symbols
            .iter()
            .find(|s| s.eq_ignore_ascii_case(cfg.symbol.trim()))
            .cloned()
            .ok_or_else(|| {
                OptimizerError::DataFetch(format!("symbol {} is not available", cfg.symbol))
            })?;

        let candles = self
            .provider
            .get_historical_data(&symbol, &cfg.timeframe, cfg.start, cfg.end)
            .await
            .map_err(|e| OptimizerError::DataFetch(format!("{:#}", e)))?;
        info!(job_id = %self.id, candles = candles.len(), "Market data loaded");

        let mut observer = StateObserver {
            state: self.state.clone(),
        };
        let evaluator = Evaluator::new(cfg, &candles, self.backtester, &mut observer);
        run_search(cfg, evaluator).await
    }

    /// Persist `best` and mark the job completed. The state lock is held
    /// throughout so a concurrent `stop` either lands first (nothing is
    /// written) or after completion (and is refused).
    fn finish(&self, best: Option<BacktestResult>) {
        let mut state = lock(&self.state);
        if state.is_terminal() {
            return;
        }

        let saved = match best {
            Some(best) => {
                let stored = StoredResult::new(self.id, self.config.clone(), best);
                self.store.save(&stored).map(|_| Some(stored.id))
            }
            None => Ok(None),
        };

        match saved {
            Ok(result_id) => {
                state.complete(result_id.clone());
                info!(job_id = %self.id, result_id = ?result_id, "Optimization completed");
            }
            Err(e) => {
                let e = OptimizerError::from(e);
                state.fail(e.to_string());
                error!(job_id = %self.id, "Optimization failed: {}", e);
            }
        }
    }
}

/// Starts, tracks and stops optimization jobs
pub struct OptimizationManager {
    provider: Arc<dyn MarketDataProvider>,
    store: ResultStore,
    settings: BacktestSettings,
    jobs: RwLock<HashMap<Uuid, Arc<Job>>>,
}

impl OptimizationManager {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: ResultStore,
        settings: BacktestSettings,
    ) -> Self {
        OptimizationManager {
            provider,
            store,
            settings,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    fn job(&self, id: Uuid) -> Option<Arc<Job>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Validate `config` and launch it in the background. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, config: OptimizationConfig) -> Result<Uuid> {
        config.validate()?;

        let id = Uuid::new_v4();
        let total = total_iterations(&config);
        let state: SharedState = Arc::new(Mutex::new(JobState::new(id, total)));
        let job = Arc::new(Job {
            state: state.clone(),
            handle: Mutex::new(None),
            abort: Mutex::new(None),
        });
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job.clone());

        info!(
            job_id = %id,
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            method = %config.method,
            total_iterations = total,
            "Starting optimization"
        );

        let task = JobTask {
            id,
            config,
            provider: self.provider.clone(),
            store: self.store.clone(),
            backtester: Backtester::new(self.settings),
            state,
        };
        let handle = tokio::spawn(task.run());
        *job.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.abort_handle());
        *job.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Option<OptimizationStatus> {
        self.job(id).map(|job| lock(&job.state).status.clone())
    }

    /// Snapshots of every known job, oldest first
    pub fn jobs(&self) -> Vec<OptimizationStatus> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<OptimizationStatus> = jobs
            .values()
            .map(|job| lock(&job.state).status.clone())
            .collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Fail a running job and cancel its task. False for unknown or
    /// already finished jobs.
    pub fn stop(&self, id: Uuid) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        if !lock(&job.state).fail(STOPPED_BY_USER) {
            return false;
        }
        if let Some(abort) = job.abort.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            abort.abort();
        }
        warn!(job_id = %id, "Optimization stopped by user");
        true
    }

    /// Wait for a job's task to end and return its final status
    pub async fn wait(&self, id: Uuid) -> Option<OptimizationStatus> {
        let job = self.job(id)?;
        let handle = job
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        lock(&job.state).fail("optimization task panicked");
                    }
                }
            }
            // Someone else holds the handle
            None => {
                while !lock(&job.state).is_terminal() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        self.status(id)
    }

    pub fn list_results(&self) -> Result<Vec<StoredResult>> {
        Ok(self.store.list()?)
    }

    pub fn get_result(&self, id: &str) -> Result<Option<StoredResult>> {
        Ok(self.store.get(id)?)
    }

    pub fn delete_result(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(id)?)
    }
}
