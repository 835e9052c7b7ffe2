use std::collections::HashSet;

use anyhow::Result;
use log::{info, warn};

use choke_lib::ChokeConfig;

use super::print_rows;
use crate::ExitCode;
use crate::formatters::destinations::destination_rows;
use crate::options::CheckArgs;

/// Validate the configuration and print its destinations
pub(crate) fn check(config: &ChokeConfig, args: &CheckArgs) -> Result<ExitCode> {
    config.validate()?;
    let registry = config.registry()?;

    if registry.is_empty() {
        warn!("No destinations configured; a gate cannot be created without any");
    }
    for name in duplicate_names(config) {
        warn!("Destination `{name}` is registered more than once; lookups by name only find the first");
    }

    let settings = &config.settings;
    info!(
        "Lock timeout {}, poll interval {}, on lock failure: {}, grace mode: {}",
        humantime::format_duration(settings.lock_timeout),
        humantime::format_duration(settings.lock_poll_interval),
        settings.lock_failure,
        settings.grace_mode
    );
    info!(
        "Throttled requests are answered with {} \"{}\"",
        settings.rejection.status_code, settings.rejection.message
    );

    print_rows(&destination_rows(&registry), args.format)?;
    Ok(ExitCode::Success)
}

fn duplicate_names(config: &ChokeConfig) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for destination in &config.destinations {
        let name = destination.name.as_str();
        if !seen.insert(name) && !duplicates.contains(&name) {
            duplicates.push(name);
        }
    }
    duplicates
}
