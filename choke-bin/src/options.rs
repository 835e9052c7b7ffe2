use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use choke_lib::ledger::{LOCK_PATH_ENV, REGION_PATH_ENV};
use choke_lib::lock::{DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL};
use choke_lib::{ChokeConfig, GateSettings, GraceMode, LedgerIdentity, LockFailurePolicy};
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, builder::TypedValueParser};
use const_format::formatcp;
use strum::{Display, EnumIter, EnumString, VariantNames};

use crate::verbosity::Verbosity;

pub(crate) const CHOKE_CONFIG_FILE: &str = "choke.toml";

// clap requires `&str` defaults, while the library keeps `Duration`s
const LOCK_TIMEOUT_STR: &str = "100ms";
const LOCK_POLL_INTERVAL_STR: &str = "5ms";

// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    CHOKE_CONFIG_FILE,
);

/// Output format of the inspection commands
#[derive(
    Debug, Default, Clone, Copy, Display, EnumIter, EnumString, VariantNames, PartialEq, Eq,
)]
#[non_exhaustive]
pub(crate) enum OutputFormat {
    /// Human-readable table
    #[default]
    #[strum(serialize = "table", ascii_case_insensitive)]
    Table,
    /// Pretty-printed JSON
    #[strum(serialize = "json", ascii_case_insensitive)]
    Json,
}

/// Operator tool for the choke admission gate.
///
/// Validates gate configuration, inspects the slot ledger shared by a
/// running group of workers, and drives synthetic load against a private
/// ledger.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct ChokeOptions {
    /// Configuration file to use
    #[arg(short, long = "config", global = true)]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Validate the configuration and print the registered destinations
    Check(CheckArgs),

    /// Attach to a live ledger and print the state of each destination
    ///
    /// The destinations in the configuration must be the ones the
    /// coordinating process registered, in the same order.
    Status(StatusArgs),

    /// Run synthetic load against one destination on a private ledger
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct CheckArgs {
    /// Output format
    #[arg(long, default_value = "table", value_parser = format_parser())]
    pub(crate) format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct StatusArgs {
    /// Backing file of the shared ledger region
    #[arg(long, env = REGION_PATH_ENV)]
    pub(crate) region: PathBuf,

    /// Lock file guarding the ledger
    #[arg(long, env = LOCK_PATH_ENV)]
    pub(crate) lock: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_parser = format_parser())]
    pub(crate) format: OutputFormat,
}

impl StatusArgs {
    pub(crate) fn identity(&self) -> LedgerIdentity {
        LedgerIdentity::new(&self.region, &self.lock)
    }
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct SimulateArgs {
    /// Name of the destination to load
    #[arg(long)]
    pub(crate) destination: String,

    /// Number of concurrent workers
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) workers: u16,

    /// Requests issued by each worker
    #[arg(long, default_value_t = 100)]
    pub(crate) requests: u32,

    /// How long an admitted request holds its slot, e.g. `10ms`
    #[arg(long, default_value = "10ms", value_parser = humantime::parse_duration)]
    pub(crate) hold: Duration,

    /// Output format
    #[arg(long, default_value = "table", value_parser = format_parser())]
    pub(crate) format: OutputFormat,
}

fn format_parser() -> impl TypedValueParser<Value = OutputFormat> {
    PossibleValuesParser::new(OutputFormat::VARIANTS).map(|s| s.parse::<OutputFormat>().unwrap())
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:expr , $toml:expr ; $( $key:ident : $default:expr, )* ) => {
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key.clone();
            }
        )*
    };
}

/// Gate settings that can be given on the command line.
///
/// Values that differ from their default win over the configuration file.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Config {
    #[clap(flatten)]
    pub(crate) verbose: Verbosity,

    /// Upper bound on waiting for the ledger lock
    #[arg(
        long,
        global = true,
        default_value = LOCK_TIMEOUT_STR,
        value_parser = humantime::parse_duration
    )]
    pub(crate) lock_timeout: Duration,

    /// Pause between two attempts to take the ledger lock
    #[arg(
        long,
        global = true,
        default_value = LOCK_POLL_INTERVAL_STR,
        value_parser = humantime::parse_duration
    )]
    pub(crate) lock_poll_interval: Duration,

    /// What to do when the ledger lock cannot be taken in time
    #[arg(
        long,
        global = true,
        default_value = "error",
        value_parser = PossibleValuesParser::new(LockFailurePolicy::VARIANTS).map(|s| s.parse::<LockFailurePolicy>().unwrap())
    )]
    pub(crate) lock_failure: LockFailurePolicy,

    /// Whether burst admissions store their grace window
    #[arg(
        long,
        global = true,
        default_value = "persistent",
        value_parser = PossibleValuesParser::new(GraceMode::VARIANTS).map(|s| s.parse::<GraceMode>().unwrap())
    )]
    pub(crate) grace_mode: GraceMode,

    /// Directory for ledger region and lock files
    #[arg(long, global = true)]
    pub(crate) ledger_dir: Option<PathBuf>,

    /// Log every admission decision at debug instead of trace level
    #[arg(long, global = true)]
    pub(crate) debug: bool,
}

impl Config {
    /// Merge the settings from the configuration file into the CLI configuration
    pub(crate) fn merge(&mut self, file: &ChokeConfig) {
        fold_in! { self, file.settings;
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
            lock_failure: LockFailurePolicy::default(),
            grace_mode: GraceMode::default(),
            debug: false,
        }
        if self.ledger_dir.is_none() {
            self.ledger_dir.clone_from(&file.ledger_dir);
        }
    }

    /// Gate settings after merging; rejection values only come from the file
    pub(crate) fn gate_settings(&self, file: &ChokeConfig) -> GateSettings {
        GateSettings {
            lock_timeout: self.lock_timeout,
            lock_poll_interval: self.lock_poll_interval,
            lock_failure: self.lock_failure,
            grace_mode: self.grace_mode,
            rejection: file.settings.rejection.clone(),
            debug: self.debug,
        }
    }
}

/// Load the configuration file given with `--config`, or `choke.toml` from
/// the current directory if it exists.
pub(crate) fn load_config_file(explicit: Option<&PathBuf>) -> Result<ChokeConfig> {
    if let Some(path) = explicit {
        return ChokeConfig::load_from_file(path)
            .with_context(|| format!("Cannot load configuration file `{}`", path.display()));
    }

    let default_config = PathBuf::from(CHOKE_CONFIG_FILE);
    if default_config.is_file() {
        return ChokeConfig::load_from_file(&default_config).with_context(|| {
            format!(
                "Cannot load default configuration file `{}`",
                default_config.display()
            )
        });
    }
    Ok(ChokeConfig::default())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(args: &[&str]) -> ChokeOptions {
        ChokeOptions::parse_from(std::iter::once("choke").chain(args.iter().copied()))
    }

    #[test]
    fn verify_app() {
        use clap::CommandFactory;
        ChokeOptions::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_library() {
        let opts = parse(&["check"]);
        let settings = opts.config.gate_settings(&ChokeConfig::default());
        assert_eq!(settings, GateSettings::default());
    }

    #[test]
    fn test_file_fills_in_defaults() {
        let file = ChokeConfig::from_toml_str(
            r#"
            ledger_dir = "/run/choke"

            [settings]
            lock_timeout = "1s"
            lock_failure = "reject"
            "#,
        )
        .unwrap();
        let mut opts = parse(&["check"]);
        opts.config.merge(&file);

        assert_eq!(opts.config.lock_timeout, Duration::from_secs(1));
        assert_eq!(opts.config.lock_failure, LockFailurePolicy::Reject);
        assert_eq!(opts.config.ledger_dir, Some(PathBuf::from("/run/choke")));
    }

    #[test]
    fn test_cli_wins_over_file() {
        let file = ChokeConfig::from_toml_str(
            r#"
            [settings]
            lock_timeout = "1s"
            grace_mode = "always-fresh"
            "#,
        )
        .unwrap();
        let mut opts = parse(&[
            "--lock-timeout",
            "250ms",
            "--grace-mode",
            "persistent",
            "--ledger-dir",
            "/tmp/x",
            "check",
        ]);
        opts.config.merge(&file);

        assert_eq!(opts.config.lock_timeout, Duration::from_millis(250));
        // Explicitly passing the default cannot be told apart from not passing it
        assert_eq!(opts.config.grace_mode, GraceMode::AlwaysFresh);
        assert_eq!(opts.config.ledger_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_simulate_args() {
        let opts = parse(&[
            "simulate",
            "--destination",
            "www.example.com",
            "--workers",
            "8",
            "--hold",
            "1ms",
            "--format",
            "json",
        ]);
        let Command::Simulate(args) = opts.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.workers, 8);
        assert_eq!(args.requests, 100);
        assert_eq!(args.hold, Duration::from_millis(1));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_status_args_from_flags() {
        let opts = parse(&["status", "--region", "/r", "--lock", "/l"]);
        let Command::Status(args) = opts.command else {
            panic!("expected status");
        };
        assert_eq!(args.identity(), LedgerIdentity::new("/r", "/l"));
        assert_eq!(args.format, OutputFormat::Table);
    }
}
