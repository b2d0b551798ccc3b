//! Round trips through the on-disk archive with real run records.

use gridscout_core::{MapKind, Simulation, SimulationConfig};
use gridscout_policy::PolicyKind;
use gridscout_storage::{RunStore, SummaryRow};
use serde_json::json;
use uuid::Uuid;

fn small_record() -> gridscout_core::RunRecord {
    let config = SimulationConfig {
        width: 15,
        height: 15,
        map_kind: MapKind::Random,
        complexity: 0.05,
        num_targets: 2,
        seed: Some(404),
        ..SimulationConfig::default()
    };
    Simulation::new(config, PolicyKind::Frontier.build(1))
        .expect("simulation")
        .run()
}

#[test]
fn archived_batches_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = RunStore::open(temp.path()).expect("store");
    let record = small_record();

    let batch = store.create_batch("benchmark", "frontier").expect("batch");
    batch
        .write_config(&json!({ "type": "benchmark", "num_runs": 1 }))
        .expect("config");
    let run_id = Uuid::new_v4();
    batch.write_run(run_id, &record).expect("run");
    batch
        .write_summary(&[SummaryRow::from_record(&record)])
        .expect("summary");

    let batches = store.list_batches().expect("list");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].count, 1);
    assert!(batches[0].name.contains("benchmark_frontier"));

    let contents = store.batch_contents(&batches[0].name).expect("contents");
    assert_eq!(contents.config["type"], "benchmark");
    assert_eq!(contents.runs.len(), 1);
    assert_eq!(contents.runs[0].id, run_id.to_string());
    assert_eq!(contents.runs[0].row.seed, 404);
    assert_eq!(contents.runs[0].row.policy, "frontier");

    let csv = store.summary_csv(&batches[0].name).expect("csv");
    assert!(csv.starts_with("seed,policy,success,steps,coverage,efficiency,turns,collisions"));
    assert!(csv.lines().count() >= 2);
}

#[test]
fn find_run_recovers_the_full_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = RunStore::open(temp.path()).expect("store");
    let record = small_record();

    let batch = store.create_batch("single", "frontier").expect("batch");
    let run_id = Uuid::new_v4();
    batch.write_run(run_id, &record).expect("run");

    let loaded = store.find_run(run_id).expect("lookup").expect("present");
    assert_eq!(loaded.config.seed, record.config.seed);
    assert_eq!(loaded.stats.steps, record.stats.steps);
    assert_eq!(loaded.history.len(), record.history.len());
    assert_eq!(
        serde_json::to_value(&loaded.map).unwrap(),
        serde_json::to_value(&record.map).unwrap()
    );

    assert!(store.find_run(Uuid::new_v4()).expect("lookup").is_none());
}
