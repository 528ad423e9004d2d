//! Process entry point (spec §4.8): parse CLI flags, wire up logging and the
//! environment, then dispatch to a one-shot path or the supervisor loop.

use std::process::ExitCode;

use ttslo::cli::Cli;
use ttslo::config::credentials::CredentialResolver;
use ttslo::persistence::config_store;
use ttslo::supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    supervisor::load_env_file(cli.env_file.as_deref());
    let credentials = CredentialResolver::from_env();

    if cli.create_sample_config {
        return match tokio::fs::write(&cli.config, config_store::sample_template()).await {
            Ok(()) => {
                println!("wrote sample config to {}", cli.config.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to write sample config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if cli.validate_config {
        return match supervisor::run_validate(&cli, &credentials).await {
            Ok(0) => ExitCode::SUCCESS,
            Ok(_) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("validation could not run: {e}");
                ExitCode::FAILURE
            }
        };
    }

    match supervisor::run(&cli, credentials).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ttslo exited: {e}");
            ExitCode::FAILURE
        }
    }
}
