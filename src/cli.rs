//! Command-line surface (spec §6 "CLI surface").

use std::path::PathBuf;

use clap::Parser;

use crate::persistence::{config_store, log_store, state_store, trade_store};

/// Supervisory daemon that synthesizes triggered trailing-stop-loss orders on Kraken.
#[derive(Debug, Parser)]
#[command(name = "ttslo", version, about)]
pub struct Cli {
    /// Path to the config file.
    #[arg(long, default_value_os_t = config_store::default_path())]
    pub config: PathBuf,

    /// Path to the state file.
    #[arg(long, default_value_os_t = state_store::default_path())]
    pub state: PathBuf,

    /// Path to the log file.
    #[arg(long, default_value_os_t = log_store::default_path())]
    pub log: PathBuf,

    /// Path to the trade file.
    #[arg(long, default_value_os_t = trade_store::default_path())]
    pub trade: PathBuf,

    /// Path to an optional `.env`-style file to load before resolving credentials.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Path to the notifications routing INI file.
    #[arg(long, default_value = "ttslo_notifications.ini")]
    pub notifications_config: PathBuf,

    /// Tick interval, in seconds.
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Run exactly one tick then exit.
    #[arg(long)]
    pub once: bool,

    /// Run every decision step but submit no orders and persist no writes.
    #[arg(long)]
    pub dry_run: bool,

    /// Raise the log level to `debug`.
    #[arg(long)]
    pub verbose: bool,

    /// Write a template config to `--config` and exit.
    #[arg(long)]
    pub create_sample_config: bool,

    /// Run the validator, print its report, and exit (0 on pass, 1 on error).
    #[arg(long)]
    pub validate_config: bool,
}

impl Cli {
    /// Parse from `std::env::args()`.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["ttslo"]);
        assert_eq!(cli.interval, 60);
        assert!(!cli.once);
        assert!(!cli.dry_run);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["ttslo", "--once", "--dry-run", "--verbose", "--interval", "5"]);
        assert!(cli.once);
        assert!(cli.dry_run);
        assert!(cli.verbose);
        assert_eq!(cli.interval, 5);
    }
}
