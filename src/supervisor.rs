//! Supervisor (spec §4.8): process entry flow around the Rule Engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::credentials::{CredentialResolver, CredentialScope};
use crate::config::NotificationConfig;
use crate::engine::{EnginePaths, KrakenExchangeFactory, RuleEngine};
use crate::error::TtsloError;
use crate::exchange::ExchangeClient;
use crate::notifications::queue::NotificationQueue;
use crate::notifications::telegram::TelegramClient;
use crate::notifications::{EventKind, NotificationService};
use crate::persistence::config_store;
use crate::persistence::log_store::LogStore;
use crate::price_provider::PriceProvider;
use crate::validator::{self, validate_live};

/// Load `--env-file` (if given) into the process environment (spec §4.8 "load env").
pub fn load_env_file(path: Option<&Path>) {
    match path {
        Some(path) => {
            if let Err(e) = dotenv::from_path(path) {
                log::warn!("could not load env file {}: {e}", path.display());
            }
        }
        None => {
            // Best-effort: a `.env` in the working directory, silently absent otherwise.
            let _ = dotenv::dotenv();
        }
    }
}

/// One-shot `--validate-config` path (spec §6): static validation plus, when a
/// read-only credential resolves, the live phase. Prints the report and
/// returns the process exit code (`0` pass, `1` error).
///
/// # Errors
///
/// Returns an error if the config file cannot be read.
pub async fn run_validate(cli: &Cli, credentials: &CredentialResolver) -> Result<i32> {
    let doc = config_store::load(&cli.config).await?;
    let mut report = validator::validate_static(&doc);

    let rules: Vec<_> = doc.rules().filter(|r| r.enabled.is_active()).collect();
    if let Some(creds) = credentials.resolve(crate::rule::DEFAULT_ACCOUNT, CredentialScope::ReadOnly) {
        if let Ok(client) = ExchangeClient::new(creds) {
            validate_live(&rules, &client, &mut report).await;
        }
    }

    for issue in &report.errors {
        println!("error: [{}] {}", issue.rule_id, issue.message);
    }
    for issue in &report.warnings {
        println!("warning: [{}] {}", issue.rule_id, issue.message);
    }
    if report.is_ok() {
        println!("validation passed: {} rule(s) checked", rules.len());
        Ok(0)
    } else {
        Ok(1)
    }
}

/// Build the engine, exchange factory, price provider and notification
/// service, then run the supervisory loop until `--once` completes or a
/// shutdown signal arrives (spec §4.8).
///
/// # Errors
///
/// Returns an error if the read-only credential (required unconditionally)
/// cannot be resolved, or if a component fails to initialize. A missing
/// read-write credential is not fatal: the daemon runs in monitoring-only
/// mode, logging every order it would otherwise have placed.
pub async fn run(cli: &Cli, credentials: CredentialResolver) -> Result<(), TtsloError> {
    if credentials
        .resolve(crate::rule::DEFAULT_ACCOUNT, CredentialScope::ReadOnly)
        .is_none()
    {
        return Err(TtsloError::Credential { scope: "read-only", account: crate::rule::DEFAULT_ACCOUNT.to_owned() });
    }
    if credentials
        .resolve(crate::rule::DEFAULT_ACCOUNT, CredentialScope::ReadWrite)
        .is_none()
    {
        log::warn!("no read-write credential resolved; running in monitoring-only mode, no orders will be placed");
    }

    let doc = config_store::load(&cli.config).await.map_err(TtsloError::Persistence)?;
    let pairs: Vec<String> = doc.rules().map(|r| r.pair.clone()).collect();

    let ro_creds = credentials
        .resolve(crate::rule::DEFAULT_ACCOUNT, CredentialScope::ReadOnly)
        .expect("checked above");
    let price_client: Arc<dyn crate::exchange::Exchange> =
        Arc::new(ExchangeClient::new(ro_creds).map_err(|e| TtsloError::Other(std::io::Error::other(e.to_string())))?);
    let prices = Arc::new(PriceProvider::spawn(pairs, price_client));
    if let Err(e) = prices.warm_cache().await {
        log::warn!("startup price warm encountered an error: {e}");
    }

    let notifications_config = NotificationConfig::load(&cli.notifications_config).map_err(TtsloError::Persistence)?;
    let telegram = std::env::var("TELEGRAM_BOT_TOKEN")
        .ok()
        .and_then(|token| TelegramClient::new(token).ok());
    let queue_path = NotificationQueue::default_path();
    let notifications = Arc::new(
        NotificationService::load(notifications_config, telegram, queue_path)
            .await
            .map_err(TtsloError::Persistence)?,
    );

    let logs = LogStore::open(cli.log.clone()).await.map_err(TtsloError::Persistence)?;
    let paths = EnginePaths {
        config: cli.config.clone(),
        state: cli.state.clone(),
        log: cli.log.clone(),
        trade: cli.trade.clone(),
    };
    let factory = Arc::new(KrakenExchangeFactory::new(credentials));
    let engine = RuleEngine::new(paths, cli.dry_run, factory, prices, notifications.clone(), logs);

    let interval = Duration::from_secs(cli.interval);

    if cli.once {
        engine.tick().await.map_err(TtsloError::Persistence)?;
        return Ok(());
    }

    loop {
        if let Err(e) = engine.tick().await {
            log::error!("tick failed: {e}");
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown signal received; exiting after completing the in-flight tick");
                notifications.notify(EventKind::AppExit, "ttslo shutting down").await;
                break;
            }
        }
    }

    Ok(())
}
