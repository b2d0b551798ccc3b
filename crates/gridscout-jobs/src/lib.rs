//! Asynchronous batch execution of GridScout simulations.
//!
//! A job is a batch of independent runs (one policy benchmarked over many
//! seeds, or several policies compared on shared seeds) executed on a bounded
//! worker pool. The registry tracks progress for polling clients; per-run
//! failures are recorded and never abort the batch.

use gridscout_core::{RunRecord, SimError, Simulation, SimulationConfig};
use gridscout_policy::PolicyKind;
use gridscout_storage::{RunStore, SummaryRow};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on runs per job.
const MAX_RUNS_PER_JOB: u32 = 500;

/// Errors raised when submitting a job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("num_runs must be within 1..=500")]
    InvalidRunCount,
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    progress: usize,
    total: usize,
    result: Option<Value>,
    error: Option<String>,
}

/// Snapshot of a job returned to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared registry of submitted jobs.
///
/// The registry is the only cross-simulation state in the system: workers
/// bump progress counters, the scheduler writes the terminal result once.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(&self, id: Uuid, apply: impl FnOnce(&mut JobRecord) -> T) -> Option<T> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get_mut(&id).map(apply)
    }

    fn create(&self, total: usize) -> Uuid {
        let id = Uuid::new_v4();
        let record = JobRecord {
            status: JobStatus::Pending,
            progress: 0,
            total,
            result: None,
            error: None,
        };
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(id, record);
        id
    }

    fn set_running(&self, id: Uuid) {
        self.with_record(id, |record| record.status = JobStatus::Running);
    }

    fn inc_progress(&self, id: Uuid) {
        self.with_record(id, |record| record.progress += 1);
    }

    fn complete(&self, id: Uuid, result: Value) {
        self.with_record(id, |record| {
            record.status = JobStatus::Completed;
            record.progress = record.total;
            record.result = Some(result);
        });
    }

    fn fail(&self, id: Uuid, error: String) {
        self.with_record(id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(error);
        });
    }

    /// Current state of a job, if it exists.
    #[must_use]
    pub fn snapshot(&self, id: Uuid) -> Option<JobSnapshot> {
        self.with_record(id, |record| JobSnapshot {
            status: record.status,
            progress: record.progress,
            total: record.total,
            result: record.result.clone(),
            error: record.error.clone(),
        })
    }
}

/// One run's terminal state inside a batch.
#[derive(Debug)]
pub struct FinishedRun {
    pub id: Uuid,
    pub seed: u64,
    pub policy: String,
    pub record: Result<RunRecord, String>,
}

/// Listing entry for one run inside a job result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDigest {
    pub id: Uuid,
    pub seed: u64,
    pub policy: String,
    pub success: bool,
    pub steps: u32,
    pub coverage: f64,
    pub efficiency: f64,
    pub turns: u64,
    pub collisions: u64,
    pub targets_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated view of one policy across a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySummary {
    pub policy: String,
    pub total: usize,
    pub successes: usize,
    pub failed_runs: usize,
    pub success_rate: f64,
    /// Averaged over successful runs only.
    pub avg_steps: f64,
    pub avg_coverage: f64,
    pub avg_efficiency: f64,
    pub avg_turns: f64,
    pub avg_collisions: f64,
    pub avg_distance: f64,
    pub avg_idle_steps: f64,
    pub avg_backtracks: f64,
    pub avg_frontier: f64,
    pub avg_exploration_rate: f64,
    pub avg_connectivity: f64,
    pub max_frontier: usize,
    pub max_partitions: usize,
    pub runs: Vec<RunDigest>,
}

/// Aggregate one policy's finished runs.
///
/// `success_rate` divides by every attempted run; `avg_steps` averages over
/// successful runs only; the remaining averages cover all runs that completed
/// structurally, whether or not they succeeded.
#[must_use]
pub fn summarize(policy: &str, runs: &[FinishedRun]) -> PolicySummary {
    let total = runs.len();
    let completed: Vec<&RunRecord> = runs.iter().filter_map(|r| r.record.as_ref().ok()).collect();
    let successes: Vec<&RunRecord> = completed
        .iter()
        .copied()
        .filter(|r| r.stats.success)
        .collect();

    let avg_over = |extract: &dyn Fn(&RunRecord) -> f64| -> f64 {
        if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|r| extract(r)).sum::<f64>() / completed.len() as f64
        }
    };
    let avg_steps = if successes.is_empty() {
        0.0
    } else {
        successes.iter().map(|r| f64::from(r.stats.steps)).sum::<f64>() / successes.len() as f64
    };

    let digests = runs
        .iter()
        .map(|run| match &run.record {
            Ok(record) => RunDigest {
                id: run.id,
                seed: run.seed,
                policy: run.policy.clone(),
                success: record.stats.success,
                steps: record.stats.steps,
                coverage: record.stats.coverage,
                efficiency: record.stats.efficiency,
                turns: record.stats.turns,
                collisions: record.stats.collisions,
                targets_found: record.stats.targets_found,
                error: None,
            },
            Err(message) => RunDigest {
                id: run.id,
                seed: run.seed,
                policy: run.policy.clone(),
                success: false,
                steps: 0,
                coverage: 0.0,
                efficiency: 0.0,
                turns: 0,
                collisions: 0,
                targets_found: 0,
                error: Some(message.clone()),
            },
        })
        .collect();

    PolicySummary {
        policy: policy.to_string(),
        total,
        successes: successes.len(),
        failed_runs: total - completed.len(),
        success_rate: if total == 0 {
            0.0
        } else {
            successes.len() as f64 / total as f64
        },
        avg_steps,
        avg_coverage: avg_over(&|r| r.stats.coverage),
        avg_efficiency: avg_over(&|r| r.stats.efficiency),
        avg_turns: avg_over(&|r| r.stats.turns as f64),
        avg_collisions: avg_over(&|r| r.stats.collisions as f64),
        avg_distance: avg_over(&|r| r.stats.distance),
        avg_idle_steps: avg_over(&|r| r.stats.idle_steps as f64),
        avg_backtracks: avg_over(&|r| r.stats.backtracks as f64),
        avg_frontier: avg_over(&|r| r.stats.avg_frontier),
        avg_exploration_rate: avg_over(&|r| r.stats.exploration_rate),
        avg_connectivity: avg_over(&|r| r.stats.connectivity),
        max_frontier: completed.iter().map(|r| r.stats.max_frontier).max().unwrap_or(0),
        max_partitions: completed
            .iter()
            .map(|r| r.stats.max_partitions)
            .max()
            .unwrap_or(0),
        runs: digests,
    }
}

/// Execute a single run, translating panics into per-run failures.
fn execute_run(
    template: &SimulationConfig,
    policy: PolicyKind,
    seed: u64,
) -> Result<RunRecord, String> {
    let mut config = template.clone();
    config.seed = Some(seed);
    let num_agents = config.num_drones as usize;
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        Simulation::new(config, policy.build(num_agents)).map(Simulation::run)
    }));
    match outcome {
        Ok(Ok(record)) => Ok(record),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("worker crashed".to_string()),
    }
}

fn worker_count(runs: usize) -> usize {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    runs.clamp(1, cores)
}

fn batch_config_json(
    template: &SimulationConfig,
    kind: &str,
    num_runs: u32,
    policies: &[PolicyKind],
) -> Value {
    let names: Vec<&str> = policies.iter().map(|p| p.as_str()).collect();
    json!({
        "type": kind,
        "num_runs": num_runs,
        "policies": names,
        "simulation": template,
    })
}

/// Submit a benchmark job: `num_runs` runs of one policy with consecutive
/// seeds. Returns immediately with the job id.
pub fn spawn_benchmark(
    registry: &JobRegistry,
    store: Option<RunStore>,
    template: SimulationConfig,
    policy: PolicyKind,
    num_runs: u32,
) -> Result<Uuid, JobError> {
    template.validate()?;
    if !(1..=MAX_RUNS_PER_JOB).contains(&num_runs) {
        return Err(JobError::InvalidRunCount);
    }
    let base_seed = template.resolve_seed();
    let mut template = template;
    template.seed = Some(base_seed);
    let pairs: Vec<(PolicyKind, u64)> = (0..num_runs)
        .map(|i| (policy, base_seed + u64::from(i)))
        .collect();
    let job_id = registry.create(pairs.len());
    let registry = registry.clone();
    let config = batch_config_json(&template, "benchmark", num_runs, &[policy]);
    thread::spawn(move || {
        run_batch(
            &registry,
            job_id,
            store,
            "benchmark",
            policy.as_str(),
            config,
            template,
            pairs,
        );
    });
    Ok(job_id)
}

/// Submit a compare job: every requested policy runs the same seed list, so a
/// given seed produces an identical map for all policies.
pub fn spawn_compare(
    registry: &JobRegistry,
    store: Option<RunStore>,
    template: SimulationConfig,
    policies: Vec<PolicyKind>,
    num_runs: u32,
) -> Result<Uuid, JobError> {
    template.validate()?;
    if !(1..=MAX_RUNS_PER_JOB).contains(&num_runs) {
        return Err(JobError::InvalidRunCount);
    }
    let policies = if policies.is_empty() {
        PolicyKind::ALL.to_vec()
    } else {
        policies
    };
    let base_seed = template.resolve_seed();
    let mut template = template;
    template.seed = Some(base_seed);
    let mut pairs = Vec::with_capacity(policies.len() * num_runs as usize);
    for i in 0..num_runs {
        for &policy in &policies {
            pairs.push((policy, base_seed + u64::from(i)));
        }
    }
    let job_id = registry.create(pairs.len());
    let registry = registry.clone();
    let config = batch_config_json(&template, "compare", num_runs, &policies);
    thread::spawn(move || {
        run_batch(
            &registry,
            job_id,
            store,
            "compare",
            "custom",
            config,
            template,
            pairs,
        );
    });
    Ok(job_id)
}

#[allow(clippy::too_many_arguments)]
fn run_batch(
    registry: &JobRegistry,
    job_id: Uuid,
    store: Option<RunStore>,
    kind: &str,
    label: &str,
    config: Value,
    template: SimulationConfig,
    pairs: Vec<(PolicyKind, u64)>,
) {
    registry.set_running(job_id);
    info!(%job_id, kind, runs = pairs.len(), "job started");

    let batch = store.as_ref().and_then(|s| match s.create_batch(kind, label) {
        Ok(batch) => Some(batch),
        Err(err) => {
            warn!(%job_id, %err, "failed to create batch folder; running in-memory only");
            None
        }
    });
    if let Some(batch) = &batch {
        if let Err(err) = batch.write_config(&config) {
            warn!(%job_id, %err, "failed to persist batch config");
        }
    }

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count(pairs.len()))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            registry.fail(job_id, format!("failed to build worker pool: {err}"));
            return;
        }
    };

    let finished: Vec<FinishedRun> = pool.install(|| {
        pairs
            .par_iter()
            .map(|&(policy, seed)| {
                let id = Uuid::new_v4();
                let record = execute_run(&template, policy, seed);
                match (&batch, &record) {
                    (Some(batch), Ok(run)) => {
                        if let Err(err) = batch.write_run(id, run) {
                            warn!(%job_id, run = %id, %err, "failed to persist run");
                        }
                    }
                    (_, Err(err)) => {
                        warn!(%job_id, seed, policy = policy.as_str(), %err, "run failed");
                    }
                    _ => {}
                }
                registry.inc_progress(job_id);
                FinishedRun {
                    id,
                    seed,
                    policy: policy.as_str().to_string(),
                    record,
                }
            })
            .collect()
    });

    if let Some(batch) = &batch {
        let rows: Vec<SummaryRow> = finished
            .iter()
            .filter_map(|run| run.record.as_ref().ok().map(SummaryRow::from_record))
            .collect();
        if let Err(err) = batch.write_summary(&rows) {
            warn!(%job_id, %err, "failed to persist summary csv");
        }
    }

    if finished.iter().all(|run| run.record.is_err()) {
        let detail = finished
            .iter()
            .filter_map(|run| run.record.as_ref().err().cloned())
            .next()
            .unwrap_or_else(|| "all runs failed".to_string());
        registry.fail(job_id, format!("all runs failed: {detail}"));
        return;
    }

    // Group per policy, preserving first-seen policy order.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<FinishedRun>> = HashMap::new();
    for run in finished {
        if !grouped.contains_key(&run.policy) {
            order.push(run.policy.clone());
        }
        grouped.entry(run.policy.clone()).or_default().push(run);
    }
    let summaries: Vec<PolicySummary> = order
        .iter()
        .map(|policy| summarize(policy, &grouped[policy]))
        .collect();

    let result = json!({
        "batch": batch.as_ref().map(|b| b.name().to_string()),
        "summaries": summaries,
    });
    registry.complete(job_id, result);
    info!(%job_id, "job completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscout_core::MapKind;

    fn tiny_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            width: 12,
            height: 12,
            map_kind: MapKind::Random,
            complexity: 0.0,
            num_targets: 1,
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    fn wait_for_terminal(registry: &JobRegistry, id: Uuid) -> JobSnapshot {
        for _ in 0..600 {
            let snapshot = registry.snapshot(id).expect("job exists");
            if matches!(snapshot.status, JobStatus::Completed | JobStatus::Failed) {
                return snapshot;
            }
            thread::sleep(std::time::Duration::from_millis(50));
        }
        panic!("job {id} never reached a terminal state");
    }

    #[test]
    fn benchmark_job_reaches_full_progress() {
        let registry = JobRegistry::new();
        let job_id = spawn_benchmark(
            &registry,
            None,
            tiny_config(100),
            PolicyKind::Frontier,
            4,
        )
        .expect("spawn");
        let snapshot = wait_for_terminal(&registry, job_id);
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 4);
        assert_eq!(snapshot.total, 4);
        let result = snapshot.result.expect("result");
        let summaries = result["summaries"].as_array().expect("summaries");
        assert_eq!(summaries.len(), 1);
        let rate = summaries[0]["success_rate"].as_f64().expect("rate");
        assert!((0.0..=1.0).contains(&rate));
    }

    #[test]
    fn invalid_run_count_is_rejected() {
        let registry = JobRegistry::new();
        assert!(matches!(
            spawn_benchmark(&registry, None, tiny_config(1), PolicyKind::Random, 0),
            Err(JobError::InvalidRunCount)
        ));
    }

    #[test]
    fn unknown_job_snapshot_is_none() {
        let registry = JobRegistry::new();
        assert!(registry.snapshot(Uuid::new_v4()).is_none());
    }

    #[test]
    fn summarize_averages_steps_over_successes_only() {
        let template = tiny_config(7);
        let ok_a = execute_run(&template, PolicyKind::Frontier, 7).expect("run a");
        let runs = vec![
            FinishedRun {
                id: Uuid::new_v4(),
                seed: 7,
                policy: "frontier".into(),
                record: Ok(ok_a),
            },
            FinishedRun {
                id: Uuid::new_v4(),
                seed: 8,
                policy: "frontier".into(),
                record: Err("map ungeneratable after 8 attempts".into()),
            },
        ];
        let summary = summarize("frontier", &runs);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed_runs, 1);
        assert_eq!(summary.successes, 1);
        assert!((summary.success_rate - 0.5).abs() < 1e-9);
        // The failed run contributes neither to avg_steps nor the other means.
        let expected_steps = f64::from(runs[0].record.as_ref().unwrap().stats.steps);
        assert!((summary.avg_steps - expected_steps).abs() < 1e-9);
        assert_eq!(summary.runs.len(), 2);
        assert!(summary.runs[1].error.is_some());
    }

    #[test]
    fn compare_uses_shared_seeds_per_policy() {
        let registry = JobRegistry::new();
        let job_id = spawn_compare(
            &registry,
            None,
            tiny_config(500),
            vec![PolicyKind::Random, PolicyKind::Frontier],
            3,
        )
        .expect("spawn");
        let snapshot = wait_for_terminal(&registry, job_id);
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total, 6);
        let result = snapshot.result.expect("result");
        let summaries = result["summaries"].as_array().expect("summaries");
        assert_eq!(summaries.len(), 2);
        let seeds_of = |summary: &Value| -> Vec<u64> {
            let mut seeds: Vec<u64> = summary["runs"]
                .as_array()
                .expect("runs")
                .iter()
                .map(|r| r["seed"].as_u64().expect("seed"))
                .collect();
            seeds.sort_unstable();
            seeds
        };
        assert_eq!(seeds_of(&summaries[0]), seeds_of(&summaries[1]));
        assert_eq!(seeds_of(&summaries[0]), vec![500, 501, 502]);
    }
}
