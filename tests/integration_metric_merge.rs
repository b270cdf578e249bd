use anyhow::Result;
use rca_trans::{
    cli::Args, results::StageStatus, PipelineConfig, PipelineRunner, ResultsManager, Stage,
};
use std::fs;
use std::path::Path;

const REQUEST_METRICS: &str = "\
ServiceName,TimeUnix,MetricName,BucketCounts,Count
ts-order-service,2024-10-24 13:05:00,http.client.request.duration,\"[10, 20, 30, 40]\",100
ts-order-service,2024-10-24 13:05:00,http.server.request.duration,\"[0, 0, 0, 10]\",10
ts-auth-service,2024-10-24 13:05:00,http.client.request.duration,\"[1, 2, x, 4]\",7
ts-order-service,2024-10-24 13:06:00,rpc.server.duration,\"[1, 1, 1, 1]\",4
";

fn write_experiment(root: &Path, name: &str, metrics: Option<&str>) {
    let dir = root.join(name).join("abnormal");
    fs::create_dir_all(&dir).unwrap();
    if let Some(content) = metrics {
        fs::write(dir.join("request_metrics.csv"), content).unwrap();
    }
}

fn run_all(config: &PipelineConfig) -> Result<ResultsManager> {
    let mut results = ResultsManager::new(&config.summary_output)?;
    for experiment in &config.experiments {
        PipelineRunner::new(config, experiment).run(&mut results)?;
    }
    results.finalize()?;
    Ok(results)
}

fn parse_latencies(line: &str) -> Vec<f64> {
    line.split(',').skip(3).map(|v| v.parse().unwrap()).collect()
}

/// Split raw request metrics per service, then merge latencies across services.
///
/// The auth service's only row has a malformed bucket sequence, so its file is
/// skipped while the order service still reaches the merged table.
#[test]
fn metric_and_merge_stages_end_to_end() -> Result<()> {
    let work = tempfile::tempdir()?;
    let experiments = work.path().join("ts-1024");
    write_experiment(&experiments, "cpu-stress", Some(REQUEST_METRICS));

    let config_file = work.path().join("rca.toml");
    fs::write(
        &config_file,
        "stages = [\"metric\", \"merge\"]\nbucket_weights = [1.0, 2.0, 3.0, 4.0]\n",
    )?;

    let args = Args {
        config: Some(config_file),
        experiments_root: Some(experiments),
        output_root: Some(work.path().join("out")),
        ..Default::default()
    };
    let config = PipelineConfig::from_args(&args)?;
    assert_eq!(config.stages, vec![Stage::Metric, Stage::Merge]);

    let results = run_all(&config)?;

    let out = work.path().join("out");
    assert!(out.join("cpu-stress/request/ts-order-service.csv").is_file());
    assert!(out.join("cpu-stress/request/ts-auth-service.csv").is_file());
    assert!(out.join("cpu-stress/metric/ts-order-service.csv").is_file());
    assert!(!out.join("cpu-stress/metric/ts-auth-service.csv").exists());

    let merged = fs::read_to_string(out.join("metric/cpu-stress.csv"))?;
    let lines: Vec<&str> = merged.lines().collect();
    assert_eq!(
        lines[0],
        "Time,TimeStamp,PodName,client_P90,client_P95,client_P99,server_P90,server_P95,server_P99"
    );
    assert_eq!(lines.len(), 3);

    assert!(lines[1].starts_with("2024-10-24 13:05:00,1729775100,ts-order-service,"));
    for value in parse_latencies(lines[1]) {
        assert!((value - 4.0).abs() < 1e-9, "unexpected latency {}", value);
    }

    // Unrecognized metric names contribute zeros only.
    assert!(lines[2].starts_with("2024-10-24 13:06:00,1729775160,ts-order-service,"));
    assert!(parse_latencies(lines[2]).iter().all(|v| *v == 0.0));

    let merge = results
        .reports()
        .iter()
        .find(|r| r.stage == Stage::Merge)
        .unwrap();
    assert_eq!(merge.status, StageStatus::Completed);
    assert_eq!(merge.skipped_files.len(), 1);
    assert_eq!(merge.skipped_files[0].file, "ts-auth-service.csv");

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("run_summary.json"))?)?;
    assert_eq!(summary["summary"]["skipped_files"], 1);
    assert_eq!(summary["summary"]["failed_stages"], 0);
    Ok(())
}

/// An experiment without a metrics export still yields a header-only merge.
#[test]
fn experiment_without_metrics_merges_nothing() -> Result<()> {
    let work = tempfile::tempdir()?;
    let experiments = work.path().join("ts-1024");
    write_experiment(&experiments, "no-metrics", None);

    let args = Args {
        experiments_root: Some(experiments),
        output_root: Some(work.path().join("out")),
        stages: vec![Stage::Metric, Stage::Merge],
        ..Default::default()
    };
    let config = PipelineConfig::from_args(&args)?;
    let results = run_all(&config)?;

    assert!(matches!(
        results.reports()[0].status,
        StageStatus::NotRun { .. }
    ));
    assert_eq!(results.reports()[1].status, StageStatus::Completed);

    let merged = fs::read_to_string(work.path().join("out/metric/no-metrics.csv"))?;
    assert_eq!(merged.lines().count(), 1);
    Ok(())
}
