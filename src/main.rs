//! # rca-trans - Main Entry Point
//!
//! Converts fault-injection telemetry exports into the tables used for
//! root-cause analysis.
//!
//! ## Flow
//!
//! 1. **Parse arguments** and install logging
//! 2. **Build the configuration** from defaults, `--config` and CLI options
//! 3. **Fault stage**: convert the chaos schedule once for the run
//! 4. **Experiments**: run the enabled stages for every experiment
//! 5. **Summary**: write the JSON run summary
//!
//! ## Error Handling
//!
//! Depending on `continue_on_error`, a failing experiment either stops the
//! run (default) or is recorded and the next experiment starts. The run
//! summary is written in both cases; files already produced are kept.

use anyhow::Result;
use clap::Parser;
use rca_trans::{
    cli::{Args, Stage},
    config::{ExperimentConfig, PipelineConfig},
    logging::init_logging,
    pipeline::{run_fault_stage, PipelineRunner},
    results::ResultsManager,
    VERSION,
};
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so the log file is flushed.
    let _log_guard = init_logging(args.verbose, args.log_file.as_deref())?;

    info!("Starting rca-trans {}", VERSION);
    debug!("Arguments: {:?}", args);

    let config = PipelineConfig::from_args(&args)?;
    debug!("Configuration: {:?}", config);
    info!(
        "{} experiments, stages: {}",
        config.experiments.len(),
        config
            .stages
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut results_manager = ResultsManager::new(&config.summary_output)?;

    if config.stage_enabled(Stage::Fault) {
        if let Err(e) = run_fault_stage(&config, &mut results_manager) {
            error!("Fault stage failed: {:#}", e);
            if !config.continue_on_error {
                results_manager.finalize()?;
                return Err(e);
            }
        }
    }

    for experiment in &config.experiments {
        match run_experiment(&config, experiment, &mut results_manager) {
            Ok(_) => info!("Experiment {} completed successfully", experiment.name),
            Err(e) => {
                error!("Experiment {} failed: {:#}", experiment.name, e);
                if !config.continue_on_error {
                    results_manager.finalize()?;
                    return Err(e);
                }
            }
        }
    }

    let summary = results_manager.finalize()?.summary;
    if summary.all_succeeded() {
        info!("All tasks completed successfully");
    } else {
        warn!("Run finished with {} failed stages", summary.failed_stages);
    }
    Ok(())
}

/// Run the enabled stages for one experiment
///
/// ## Returns
/// - `Ok(())` when every enabled stage completed or had no input
/// - `Err(anyhow::Error)` with the first stage failure
fn run_experiment(
    config: &PipelineConfig,
    experiment: &ExperimentConfig,
    results_manager: &mut ResultsManager,
) -> Result<()> {
    PipelineRunner::new(config, experiment).run(results_manager)
}
