use anyhow::{Context, Result};
use log::{debug, warn};

use choke_lib::{ChokeConfig, Clock, GateBuilder, SystemClock};

use super::print_rows;
use crate::ExitCode;
use crate::formatters::status::StatusRow;
use crate::options::StatusArgs;

/// Attach to a live ledger and print one row per destination
pub(crate) fn status(config: &ChokeConfig, args: &StatusArgs) -> Result<ExitCode> {
    let identity = args.identity();
    let registry = config.registry()?;
    if registry.is_empty() {
        warn!("No destinations configured; nothing to inspect");
        return Ok(ExitCode::Success);
    }

    let gate = GateBuilder::builder()
        .registry(registry)
        .identity(identity.clone())
        .settings(config.settings.clone())
        .build()
        .attach()
        .with_context(|| {
            format!(
                "Cannot attach to the ledger at `{}`",
                identity.region_path.display()
            )
        })?;
    debug!("Attached to ledger at {}", identity.region_path.display());

    let now = SystemClock.now();
    let mut rows = Vec::with_capacity(gate.registry().len());
    for (id, destination) in gate.registry().iter() {
        let record = gate.snapshot(id)?;
        rows.push(StatusRow::new(id, destination, &record, now));
    }

    print_rows(&rows, args.format)?;
    Ok(ExitCode::Success)
}
