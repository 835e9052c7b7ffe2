//! `choke` is the operator tool for the choke admission gate.
//!
//! The gate itself lives in `choke-lib` and is embedded by the host server.
//! This binary works with the same configuration file and ledger files:
//!
//! Validate a configuration and list its destinations:
//! ```sh
//! choke --config choke.toml check
//! ```
//!
//! Inspect the ledger of a running group of workers (the paths are the ones
//! the coordinating process exported):
//! ```sh
//! choke status --region "$CHOKE_LEDGER_REGION" --lock "$CHOKE_LEDGER_LOCK"
//! ```
//!
//! Put synthetic load on one destination and see how the gate reacts:
//! ```sh
//! choke simulate --destination www.example.com --workers 16 --hold 20ms
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use anyhow::{Error, Result};
use clap::Parser;
use log::error;

use choke_lib::{ChokeConfig, ErrorKind};

mod commands;
mod formatters;
mod options;
mod verbosity;

use crate::formatters::log::init_logging;
use crate::options::{ChokeOptions, Command, load_config_file};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    /// The ledger could not be created or attached
    LedgerUnavailable = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // This matters here: a coordinating gate removes its ledger files on drop.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
///
/// This includes a potential config file, command-line- and environment
/// variables. The returned file configuration carries the merged settings.
fn load_config() -> Result<(ChokeOptions, ChokeConfig)> {
    let mut opts = ChokeOptions::parse();

    init_logging(&opts.config.verbose);

    let mut file = load_config_file(opts.config_file.as_ref())?;
    opts.config.merge(&file);
    file.settings = opts.config.gate_settings(&file);
    file.ledger_dir.clone_from(&opts.config.ledger_dir);

    Ok((opts, file))
}

fn run_main() -> Result<i32> {
    let (opts, config) = match load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Error while loading config: {e:#}");
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    let result = match &opts.command {
        Command::Check(args) => commands::check(&config, args),
        Command::Status(args) => commands::status(&config, args),
        Command::Simulate(args) => {
            // Admission blocks on the ledger lock, so the simulation needs
            // the multi-threaded runtime for `block_in_place`
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::simulate(&config, args))
        }
    };

    match result {
        Ok(code) => Ok(code as i32),
        Err(e) if is_fatal(&e) => {
            error!("{e:#}");
            Ok(ExitCode::LedgerUnavailable as i32)
        }
        Err(e) => Err(e),
    }
}

/// Returns `true` if the error chain contains a ledger error that keeps this
/// process from taking part in admission control
fn is_fatal(error: &Error) -> bool {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ErrorKind>())
        .is_some_and(ErrorKind::is_fatal)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use anyhow::Context;

    use super::*;

    #[test]
    fn test_fatal_errors_are_found_behind_context() {
        let attach = ErrorKind::Attach {
            path: PathBuf::from("/run/choke/ledger"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let err = Err::<(), _>(attach)
            .context("Cannot attach to the ledger")
            .unwrap_err();
        assert!(is_fatal(&err));
    }

    #[test]
    fn test_other_errors_are_not_fatal() {
        let invalid = ErrorKind::InvalidPolicy {
            field: "slot_limit",
            value: 40_000,
            max: 32_767,
        };
        assert!(!is_fatal(&Error::from(invalid)));
        assert!(!is_fatal(&anyhow::anyhow!("something else")));
    }
}
