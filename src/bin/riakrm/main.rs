use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, info, trace, warn};

use riakrm_rs::config::Config;
use riakrm_rs::config::args::CLIArgs;
use riakrm_rs::types::error::is_cancelled_error;
use riakrm_rs::{DeleteReport, DeletionPipeline, RiakError, create_pipeline_cancellation_token};

mod ctrl_c_handler;
mod tracing_init;

/// riakrm - Delete every key of one or more Riak buckets.
///
/// This binary is a thin wrapper over the riakrm-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "riakrm",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let report = run(config).await?;
    if let Some(e) = partial_failure(&report) {
        std::process::exit(e.exit_code());
    }

    Ok(())
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

async fn run(config: Config) -> Result<DeleteReport> {
    let cancellation_token = create_pipeline_cancellation_token();

    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("deletion pipeline start.");

    let mut pipeline = DeletionPipeline::new(config, cancellation_token)?;
    let report = pipeline.run().await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

    if pipeline.has_error() {
        let errors = pipeline.get_errors_and_consume().unwrap_or_default();
        for err in &errors {
            if is_cancelled_error(err) {
                debug!("deletion cancelled by user.");
                return Ok(report);
            }
            error!("{:#}", err);
        }
        error!(duration_sec = duration_sec, "riakrm failed.");
        return Err(anyhow::anyhow!("riakrm failed."));
    }

    for failure in &report.bucket_failures {
        warn!(
            bucket = failure.bucket,
            error = failure.message,
            "bucket could not be enumerated."
        );
    }
    info!(
        deleted = report.deleted,
        already_absent = report.already_absent,
        failed = report.failures.len(),
        duration_sec = duration_sec,
        "riakrm has been completed."
    );

    Ok(report)
}

fn partial_failure(report: &DeleteReport) -> Option<RiakError> {
    if !report.has_failures() {
        return None;
    }

    let failed = report.failures.len() as u64;
    warn!(
        deleted = report.deleted,
        failed = failed,
        bucket_failures = report.bucket_failures.len(),
        "some keys could not be deleted."
    );
    Some(RiakError::PartialFailure {
        deleted: report.deleted,
        failed,
    })
}
