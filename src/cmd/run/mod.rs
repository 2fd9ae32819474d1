use std::time::Duration;

use clap::Args;
use rama::{
    error::OpaqueError, graceful::ShutdownGuard, net::address::SocketAddress, telemetry::tracing,
};

use crate::config::RunConfig;

pub mod driver;
pub mod reporter;

use self::{
    driver::{RunStatus, run_load},
    reporter::{HumanReporter, JsonlReporter, Reporter},
};

#[derive(Debug, Clone, Args)]
/// run the load harness against a target
pub struct RunCommand {
    /// socket address of the target server
    /// (e.g. the address a `connbench mock` responder reports)
    #[arg(value_name = "ADDRESS", required = true)]
    target: SocketAddress,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    #[clap(flatten)]
    config: RunConfig,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), OpaqueError> {
    let cfg = args.config;
    cfg.validate()?;

    tracing::info!(
        total_requests = %cfg.total_requests,
        per_identity_cap = %cfg.per_identity_cap,
        identity_count = %cfg.identity_count(),
        strategy = ?cfg.strategy,
        "run config parameters ready",
    );

    const REPORT_INTERVAL: Duration = Duration::from_secs(1);

    let reporter: Box<dyn Reporter> = if args.json {
        const EMIT_EVENTS: bool = true;
        Box::new(JsonlReporter::new(REPORT_INTERVAL, EMIT_EVENTS))
    } else {
        Box::new(HumanReporter::new(REPORT_INTERVAL))
    };

    let result = run_load(guard, args.target, &cfg, reporter).await?;

    match result.status {
        RunStatus::Complete => {
            tracing::info!(
                "run complete: {} succeeded, {} failed in {:?}",
                result.succeeded,
                result.failed,
                result.elapsed,
            );
        }
        RunStatus::Incomplete => {
            tracing::warn!(
                "run incomplete: {}/{} requests terminal after {:?} ({} succeeded, {} failed)",
                result.terminal(),
                result.total(),
                result.elapsed,
                result.succeeded,
                result.failed,
            );
        }
    }

    Ok(())
}
