use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use tokio::task::{self, JoinSet};

use choke_lib::{
    AdmissionGate, ChokeConfig, DestinationId, ErrorKind, GateBuilder, THROTTLED_BY,
    THROTTLED_BY_HEADER,
};

use super::print_rows;
use crate::ExitCode;
use crate::formatters::simulation::SimulationReport;
use crate::options::SimulateArgs;

/// Run synthetic load against one destination on a private ledger.
///
/// This process acts as the coordinator, so the ledger is created from
/// scratch and removed again at the end.
pub(crate) async fn simulate(config: &ChokeConfig, args: &SimulateArgs) -> Result<ExitCode> {
    let registry = config.registry()?;
    let id = registry
        .lookup(&args.destination)
        .ok_or_else(|| anyhow!("Destination `{}` is not configured", args.destination))?;

    let identity = config.identity(std::process::id());
    let gate = GateBuilder::builder()
        .registry(registry)
        .identity(identity.clone())
        .settings(config.settings.clone())
        .build()
        .create()
        .with_context(|| {
            format!(
                "Cannot create a ledger at `{}`",
                identity.region_path.display()
            )
        })?;
    let gate = Arc::new(gate);

    let start = Instant::now();
    let mut workers = JoinSet::new();
    for _ in 0..args.workers {
        workers.spawn(run_worker(Arc::clone(&gate), id, args.clone()));
    }
    while let Some(result) = workers.join_next().await {
        result??;
    }
    let elapsed = start.elapsed();

    let leftover = gate.snapshot(id)?.in_use_slots;
    if leftover > 0 {
        warn!("{leftover} slots still in use after the simulation");
    }

    let stats = gate.stats(id)?;
    let destination = gate.registry().get(id)?;
    info!("{}: {}", destination.name, stats.summary());
    if stats.rejected > 0 {
        let rejection = gate.rejection();
        info!(
            "Rejected requests would be answered with {} \"{}\" ({THROTTLED_BY_HEADER}: {THROTTLED_BY})",
            rejection.status_code, rejection.message
        );
    }

    let report = SimulationReport {
        destination: destination.name.clone(),
        workers: args.workers,
        requests: u64::from(args.workers) * u64::from(args.requests),
        admitted: stats.admitted,
        burst_admitted: stats.burst_admitted,
        rejected: stats.rejected,
        lock_failures: stats.lock_failures,
        peak_in_use: stats.peak_in_use,
        hard_limit: destination.policy.hard_limit(),
        elapsed: humantime::format_duration(round_to_millis(elapsed)).to_string(),
    };
    print_rows(&[report], args.format)?;
    Ok(ExitCode::Success)
}

/// Issue `args.requests` requests one after another, holding each admitted
/// slot for `args.hold`
async fn run_worker(
    gate: Arc<AdmissionGate>,
    id: DestinationId,
    args: SimulateArgs,
) -> Result<()> {
    for _ in 0..args.requests {
        // Taking the ledger lock blocks the thread
        let admitted = task::block_in_place(|| gate.admit(id));
        match admitted {
            Ok(Some(permit)) => {
                tokio::time::sleep(args.hold).await;
                if let Err(e) = task::block_in_place(|| permit.release()) {
                    // The slot stays taken until the ledger is torn down
                    warn!("{e}");
                }
            }
            Ok(None) => task::yield_now().await,
            // Counted in the gate's statistics; keep going like a host would
            Err(e @ ErrorKind::LockUnavailable(_)) => warn!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn round_to_millis(duration: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
