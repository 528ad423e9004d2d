//! Rule Engine / Scheduler (spec §4.4): the per-tick evaluation sweep.
//!
//! One [`RuleEngine::tick`] call runs the seven phases spec §4.4 names:
//! reload, price acquisition, evaluation, order creation, fill monitoring,
//! chain activation, persistence. Every per-rule failure is caught and
//! logged locally (spec §7 "Propagation rule") so one bad rule never stops
//! the sweep from covering the rest.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::config::credentials::{CredentialResolver, CredentialScope};
use crate::exchange::types::{aggregate_balance, format_offset, format_volume, split_pair};
use crate::exchange::{AddOrderParams, Exchange, OrderStatus};
use crate::notifications::{EventKind, NotificationService};
use crate::persistence::config_store::{self, ConfigDocument};
use crate::persistence::coordination::CoordinationHandshake;
use crate::persistence::log_store::{LogEntry, LogStore};
use crate::persistence::state_store::{self, StateDocument};
use crate::persistence::trade_store::{self, TradeDocument};
use crate::price_provider::PriceProvider;
use crate::profit;
use crate::rule::{EnabledState, Rule, RuleState};
use crate::validator::{self, ValidationReport};

/// After this many consecutive ticks where a triggered order cannot be
/// found on the exchange, reconciliation gives up and marks it lost (spec
/// §4.4.2 "Not found", §7 `ReconciliationAmbiguity`).
const MAX_CONSECUTIVE_ABSENCES: u32 = 3;

/// Builds [`Exchange`] clients for an account on demand, scoped by
/// credential kind. Abstracted behind a trait so tests can substitute a
/// fake without touching the network.
#[async_trait::async_trait]
pub trait ExchangeFactory: Send + Sync {
    /// Build (or fetch a cached) client for `account`/`scope`, or `None` if
    /// no credential resolves for that pair.
    async fn client_for(&self, account: &str, scope: CredentialScope) -> Option<Arc<dyn Exchange>>;
}

/// The default factory: resolves credentials from the environment and
/// builds a real [`crate::exchange::ExchangeClient`] per account, caching
/// each one for the process lifetime.
pub struct KrakenExchangeFactory {
    credentials: CredentialResolver,
    cache: Mutex<HashMap<(String, bool), Arc<dyn Exchange>>>,
}

impl KrakenExchangeFactory {
    /// Build a factory over `credentials`.
    #[must_use]
    pub fn new(credentials: CredentialResolver) -> Self {
        Self { credentials, cache: Mutex::new(HashMap::new()) }
    }
}

#[async_trait::async_trait]
impl ExchangeFactory for KrakenExchangeFactory {
    async fn client_for(&self, account: &str, scope: CredentialScope) -> Option<Arc<dyn Exchange>> {
        let is_rw = matches!(scope, CredentialScope::ReadWrite);
        let key = (account.to_owned(), is_rw);
        if let Some(client) = self.cache.lock().await.get(&key) {
            return Some(client.clone());
        }
        let creds = self.credentials.resolve(account, scope)?;
        let client = crate::exchange::ExchangeClient::new(creds).ok()?;
        let client: Arc<dyn Exchange> = Arc::new(client);
        self.cache.lock().await.insert(key, client.clone());
        Some(client)
    }
}

/// Paths to the four tabular stores the engine owns (spec §6).
#[derive(Debug, Clone)]
pub struct EnginePaths {
    /// Config file path.
    pub config: PathBuf,
    /// State file path.
    pub state: PathBuf,
    /// Log file path.
    pub log: PathBuf,
    /// Trade file path.
    pub trade: PathBuf,
}

/// Owns one per-tick evaluation sweep across every configured rule.
pub struct RuleEngine {
    paths: EnginePaths,
    dry_run: bool,
    exchanges: Arc<dyn ExchangeFactory>,
    prices: Arc<PriceProvider>,
    notifications: Arc<NotificationService>,
    logs: LogStore,
    coordination: Mutex<CoordinationHandshake>,
    absences: Mutex<HashMap<String, u32>>,
    next_userref: AtomicU32,
}

impl RuleEngine {
    /// Construct the engine. `logs` must already have its header written
    /// (see [`LogStore::open`]).
    #[must_use]
    pub fn new(
        paths: EnginePaths,
        dry_run: bool,
        exchanges: Arc<dyn ExchangeFactory>,
        prices: Arc<PriceProvider>,
        notifications: Arc<NotificationService>,
        logs: LogStore,
    ) -> Self {
        let coordination = CoordinationHandshake::for_config_path(&paths.config);
        Self {
            paths,
            dry_run,
            exchanges,
            prices,
            notifications,
            logs,
            coordination: Mutex::new(coordination),
            absences: Mutex::new(HashMap::new()),
            next_userref: AtomicU32::new(1),
        }
    }

    /// Run exactly one tick: all seven phases of spec §4.4.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures outside the per-rule isolation
    /// boundary (spec §7): an unreadable config file, or a persistence
    /// write failing after its retries.
    pub async fn tick(&self) -> Result<()> {
        let mut coordination = self.coordination.lock().await;
        coordination.poll().await?;
        let writes_allowed = !coordination.is_active();
        drop(coordination);

        if !writes_allowed {
            log::info!("editor coordination active; skipping tick");
            return Ok(());
        }

        // Phase 1: reload + static validation + auto-disable.
        let mut config_doc = config_store::load(&self.paths.config).await?;
        let report = validator::validate_static(&config_doc);
        let config_dirty = self.apply_auto_disable(&mut config_doc, &report).await;

        let mut state_doc = state_store::load(&self.paths.state).await?;
        let mut trade_doc = trade_store::load(&self.paths.trade).await?;

        let enabled_rules: Vec<Rule> = config_doc
            .rules()
            .filter(|r| r.enabled.is_active())
            .cloned()
            .collect();

        // Phase 1 continued: fill reconciliation for rules already armed.
        let mut chained: Vec<(String, chrono::DateTime<Utc>, Decimal)> = Vec::new();
        self.monitor_fills(&enabled_rules, &mut state_doc, &mut trade_doc, &mut chained).await;

        // Phase 2: price acquisition — warm the cache for every distinct
        // pair of an enabled, non-terminal rule.
        let pending_pairs: Vec<String> = enabled_rules
            .iter()
            .filter(|r| !state_doc.get(&r.id).is_some_and(|s| s.triggered))
            .map(|r| r.pair.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if let Err(e) = self.prices.warm_many(&pending_pairs).await {
            log::warn!("price warm phase encountered an error: {e}");
        }

        // Phases 3 + 4: evaluate and, on crossing, submit an order.
        for rule in &enabled_rules {
            let Some(state) = state_doc.get(&rule.id) else {
                state_doc.upsert(&rule.id, RuleState::default());
                continue;
            };
            if state.triggered {
                continue;
            }
            self.evaluate_and_order(rule, &mut state_doc, &mut trade_doc).await;
        }

        // Phase 6: chain activation for rules that completed fill-monitoring this tick.
        for (config_id, _trigger_time, _price) in &chained {
            if let Some(rule) = enabled_rules.iter().find(|r| &r.id == config_id).or_else(|| config_doc.rules().find(|r| &r.id == config_id)) {
                self.activate_linked_order(rule, &mut config_doc, &mut state_doc).await;
            }
        }

        // Phase 7: persistence. `--dry-run` writes nothing to disk (spec.md's
        // "no state/config writes" contract) even though in-memory state and
        // trade documents may have been mutated while evaluating this tick.
        if !self.dry_run {
            if config_dirty || !chained.is_empty() {
                config_store::save(&self.paths.config, &config_doc).await?;
            }
            state_store::save(&self.paths.state, &state_doc).await?;
            trade_store::save(&self.paths.trade, &trade_doc).await?;
        }

        Ok(())
    }

    async fn apply_auto_disable(&self, config_doc: &mut ConfigDocument, report: &ValidationReport) -> bool {
        let mut dirty = false;
        for rule_id in report.configs_with_errors() {
            if rule_id == "<unknown>" {
                continue;
            }
            self.log(log::Level::Warn, &rule_id, "static validation failed; auto-disabling").await;
            self.notifications
                .notify(EventKind::ValidationError, format!("rule `{rule_id}` failed validation and was disabled"))
                .await;
            if self.dry_run {
                continue;
            }
            if config_doc.set_enabled(&rule_id, EnabledState::False) {
                dirty = true;
            }
        }
        dirty
    }

    /// Phase 3 + 4: evaluate `rule`'s threshold against the cached price and,
    /// on crossing, run the order-creation safety discipline (spec §4.4.1).
    async fn evaluate_and_order(&self, rule: &Rule, state_doc: &mut StateDocument, trade_doc: &mut TradeDocument) {
        let reading = match self.prices.get_price(&rule.pair).await {
            Ok(r) => r,
            Err(e) => {
                self.log(log::Level::Warn, &rule.id, &format!("cannot retrieve price: {e}")).await;
                return;
            }
        };

        if !rule.threshold_type.crossed(reading.price, rule.threshold_price) {
            return;
        }

        let Some(rw_client) = self.exchanges.client_for(rule.account(), CredentialScope::ReadWrite).await else {
            self.log(log::Level::Error, &rule.id, "no read-write credential for account; skipping order").await;
            return;
        };

        let balance_account = rule.account().to_owned();
        let balances = match self.exchanges.client_for(&balance_account, CredentialScope::ReadOnly).await {
            Some(ro_client) => match ro_client.balance().await {
                Ok(b) => b,
                Err(e) => {
                    self.record_error(state_doc, &rule.id, &format!("balance query failed: {e}")).await;
                    self.notifications.notify(EventKind::ApiError, format!("{}: balance query failed: {e}", rule.id)).await;
                    return;
                }
            },
            None => {
                self.log(log::Level::Error, &rule.id, "no read-only credential for balance check; skipping order").await;
                return;
            }
        };

        let (base, quote) = split_pair(&rule.pair);
        let insufficient = match rule.direction {
            crate::rule::Direction::Sell => aggregate_balance(&balances, &base) < rule.volume,
            crate::rule::Direction::Buy => aggregate_balance(&balances, &quote) < rule.volume * reading.price,
        };
        if insufficient {
            self.record_error(state_doc, &rule.id, "insufficient balance for order").await;
            self.notifications
                .notify(EventKind::InsufficientBalance, format!("rule `{}` has insufficient balance for its order", rule.id))
                .await;
            return;
        }

        if self.dry_run {
            self.log(log::Level::Info, &rule.id, "dry-run: threshold crossed, order submission skipped").await;
            return;
        }

        let params = AddOrderParams {
            pair: rule.pair.clone(),
            side: rule.direction.into(),
            ordertype: "trailing-stop",
            volume: rule.volume,
            price: format_offset(rule.trailing_offset_percent),
            trigger: "index",
            userref: self.next_userref.fetch_add(1, Ordering::Relaxed),
            validate: false,
        };
        log::debug!("submitting order for {} with volume {}", rule.id, format_volume(rule.volume));

        match rw_client.add_trailing_stop(params).await {
            Ok(result) => {
                let order_id = result.txid.first().cloned().unwrap_or_default();
                let now = Utc::now();
                let mut state = RuleState::default();
                state.triggered = true;
                state.trigger_price = Some(reading.price);
                state.trigger_time = Some(now);
                state.order_id = order_id.clone();
                state.offset = Some(rule.trailing_offset_percent);
                state.activated_on = Some(now);
                state.last_checked = Some(now);
                state_doc.upsert(&rule.id, state);

                profit::record_entry(trade_doc, rule, reading.price, now);

                self.log(log::Level::Info, &rule.id, &format!("threshold crossed at {}; order {order_id} submitted", reading.price)).await;
                self.notifications
                    .notify(EventKind::TriggerReached, format!("rule `{}` crossed its threshold at {}", rule.id, reading.price))
                    .await;
                self.notifications
                    .notify(EventKind::TslCreated, format!("rule `{}` trailing-stop order {order_id} created", rule.id))
                    .await;
            }
            Err(e) => {
                self.record_error(state_doc, &rule.id, &format!("order submission failed: {e}")).await;
                self.notifications
                    .notify(EventKind::ApiError, format!("rule `{}` order submission failed ({}): {e}", rule.id, e.kind()))
                    .await;
            }
        }
    }

    /// Phase 5: fill monitoring for every armed, not-yet-fill-notified rule
    /// (spec §4.4.2). Appends `(rule_id, trigger_time, fill_price)` to
    /// `chained` for every rule newly observed as `closed` this tick, so the
    /// caller can run phase 6 against the pre-reload `config_doc`.
    async fn monitor_fills(
        &self,
        rules: &[Rule],
        state_doc: &mut StateDocument,
        trade_doc: &mut TradeDocument,
        chained: &mut Vec<(String, chrono::DateTime<Utc>, Decimal)>,
    ) {
        let armed: Vec<&Rule> = rules
            .iter()
            .filter(|r| state_doc.get(&r.id).is_some_and(|s| s.triggered && !s.fill_notified && !s.order_id.is_empty()))
            .collect();
        if armed.is_empty() {
            return;
        }

        let by_account: HashMap<&str, Vec<&Rule>> =
            armed.iter().fold(HashMap::new(), |mut acc, r| {
                acc.entry(r.account()).or_default().push(r);
                acc
            });

        for (account, rules) in by_account {
            let Some(client) = self.exchanges.client_for(account, CredentialScope::ReadOnly).await else {
                continue;
            };
            let txids: Vec<String> =
                rules.iter().filter_map(|r| state_doc.get(&r.id).map(|s| s.order_id.clone())).collect();
            let orders = match client.query_orders(&txids).await {
                Ok(o) => o,
                Err(e) => {
                    log::warn!("fill monitoring: query_orders failed for account {account}: {e}");
                    continue;
                }
            };

            for rule in rules {
                let Some(state) = state_doc.get(&rule.id).cloned() else { continue };
                let order_id = state.order_id.clone();
                match orders.get(&order_id) {
                    Some(info) if info.status == OrderStatus::Closed => {
                        self.reset_absence(&order_id).await;
                        let exit_price = if info.avg_price.is_zero() {
                            state.trigger_price.unwrap_or_default()
                        } else {
                            info.avg_price
                        };
                        let now = Utc::now();
                        let mut new_state = state.clone();
                        new_state.fill_notified = true;
                        new_state.last_checked = Some(now);
                        state_doc.upsert(&rule.id, new_state);

                        if let Some(trade) = trade_doc.open_trade_for_rule(&rule.id) {
                            let trade_id = trade.trade_id.clone();
                            profit::record_exit(trade_doc, &trade_id, rule.direction, exit_price, now);
                        } else {
                            profit::record_filled_only(trade_doc, rule, exit_price, now);
                        }

                        self.log(log::Level::Info, &rule.id, &format!("order {order_id} closed at {exit_price}")).await;
                        self.notifications
                            .notify(EventKind::TslFilled, format!("rule `{}` order {order_id} filled", rule.id))
                            .await;

                        chained.push((rule.id.clone(), now, exit_price));
                    }
                    Some(info) if info.is_terminal() => {
                        self.reset_absence(&order_id).await;
                        let mut new_state = state.clone();
                        new_state.fill_notified = true;
                        new_state.last_checked = Some(Utc::now());
                        state_doc.upsert(&rule.id, new_state);
                        self.log(log::Level::Info, &rule.id, &format!("order {order_id} reached terminal non-fill status {:?}", info.status)).await;
                    }
                    Some(_) => {
                        self.reset_absence(&order_id).await;
                    }
                    None => {
                        let count = self.bump_absence(&order_id).await;
                        if count >= MAX_CONSECUTIVE_ABSENCES {
                            let mut new_state = state.clone();
                            new_state.fill_notified = true;
                            new_state.last_error = format!("order {order_id} not found for {count} consecutive ticks; treated as lost");
                            state_doc.upsert(&rule.id, new_state);
                            self.log(log::Level::Warn, &rule.id, "order lost after repeated absence; ceasing polling").await;
                        } else {
                            log::warn!("order {order_id} for rule {} not found (absence {count}/{MAX_CONSECUTIVE_ABSENCES})", rule.id);
                        }
                    }
                }
            }
        }
    }

    /// Phase 6: activate `rule`'s linked successor, if any (spec §4.4.3).
    async fn activate_linked_order(&self, rule: &Rule, config_doc: &mut ConfigDocument, state_doc: &mut StateDocument) {
        let Some(linked_id) = &rule.linked_order_id else { return };
        let Some(successor) = config_doc.rules().find(|r| &r.id == linked_id).cloned() else {
            self.log(log::Level::Warn, &rule.id, &format!("linked_order_id `{linked_id}` not found at activation time")).await;
            return;
        };
        if successor.enabled.is_active() {
            return;
        }
        if state_doc.get(&successor.id).is_some_and(|s| s.triggered) {
            return;
        }
        if self.dry_run {
            self.log(log::Level::Info, &rule.id, &format!("dry-run: would activate linked rule `{linked_id}`")).await;
            return;
        }
        config_doc.set_enabled(linked_id, EnabledState::True);
        self.log(log::Level::Info, &rule.id, &format!("activated linked rule `{linked_id}`")).await;
        self.notifications
            .notify(EventKind::LinkedOrderActivated, format!("rule `{linked_id}` activated by fill of `{}`", rule.id))
            .await;
    }

    async fn record_error(&self, state_doc: &mut StateDocument, rule_id: &str, message: &str) {
        let mut state = state_doc.get(rule_id).cloned().unwrap_or_default();
        state.last_error = message.to_owned();
        state.last_checked = Some(Utc::now());
        state_doc.upsert(rule_id, state);
        self.log(log::Level::Error, rule_id, message).await;
    }

    async fn bump_absence(&self, order_id: &str) -> u32 {
        let mut absences = self.absences.lock().await;
        let count = absences.entry(order_id.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    async fn reset_absence(&self, order_id: &str) {
        self.absences.lock().await.remove(order_id);
    }

    async fn log(&self, level: log::Level, rule_id: &str, message: &str) {
        let component = "engine";
        match level {
            log::Level::Error => log::error!("[{rule_id}] {message}"),
            log::Level::Warn => log::warn!("[{rule_id}] {message}"),
            _ => log::info!("[{rule_id}] {message}"),
        }
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: level_str(level),
            component,
            config_id: rule_id.to_owned(),
            message: message.to_owned(),
            details: String::new(),
        };
        if let Err(e) = self.logs.append(&entry).await {
            log::error!("failed to append log entry: {e}");
        }
    }
}

fn level_str(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "error",
        log::Level::Warn => "warn",
        log::Level::Info => "info",
        log::Level::Debug => "debug",
        log::Level::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::exchange::{AddOrderDescr, AddOrderResult, Balance, OrderInfo};
    use crate::persistence::config_store::HEADER;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;

    struct FakeExchange {
        price: Decimal,
        balances: Vec<Balance>,
        order_status: Mutex<Option<OrderInfo>>,
        submitted: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Exchange for FakeExchange {
        async fn current_price(&self, _pair: &str) -> Result<Decimal, crate::error::ExchangeError> {
            Ok(self.price)
        }
        async fn current_prices(
            &self,
            pairs: &[String],
        ) -> Result<HashMap<String, Decimal>, crate::error::ExchangeError> {
            Ok(pairs.iter().map(|p| (p.clone(), self.price)).collect())
        }
        async fn balance(&self) -> Result<Vec<Balance>, crate::error::ExchangeError> {
            Ok(self.balances.clone())
        }
        async fn query_orders(
            &self,
            _txids: &[String],
        ) -> Result<HashMap<String, OrderInfo>, crate::error::ExchangeError> {
            let mut map = HashMap::new();
            if let Some(info) = self.order_status.lock().await.clone() {
                map.insert("O1".to_owned(), info);
            }
            Ok(map)
        }
        async fn add_trailing_stop(
            &self,
            _params: AddOrderParams,
        ) -> Result<AddOrderResult, crate::error::ExchangeError> {
            self.submitted.store(true, Ordering::SeqCst);
            Ok(AddOrderResult {
                txid: vec!["O1".to_owned()],
                descr: AddOrderDescr { order: "sell 0.01 XXBTZUSD @ trailing stop +5.0%".to_owned() },
            })
        }
    }

    struct FakeFactory(Arc<FakeExchange>);

    #[async_trait::async_trait]
    impl ExchangeFactory for FakeFactory {
        async fn client_for(&self, _account: &str, _scope: CredentialScope) -> Option<Arc<dyn Exchange>> {
            Some(self.0.clone())
        }
    }

    async fn build_engine(dir: &std::path::Path, exchange: Arc<FakeExchange>) -> RuleEngine {
        let prices = Arc::new(PriceProvider::spawn(vec!["XXBTZUSD".to_owned()], exchange.clone()));
        let notifications = Arc::new(
            NotificationService::load(NotificationConfig::default(), None, dir.join("queue.json"))
                .await
                .unwrap(),
        );
        let logs = LogStore::open(dir.join("log.csv")).await.unwrap();
        RuleEngine::new(
            EnginePaths {
                config: dir.join("config.csv"),
                state: dir.join("state.csv"),
                log: dir.join("log.csv"),
                trade: dir.join("trades.csv"),
            },
            false,
            Arc::new(FakeFactory(exchange)),
            prices,
            notifications,
            logs,
        )
    }

    #[tokio::test]
    async fn s1_basic_sell_high_trigger() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!("{HEADER}\nbtc_1,XXBTZUSD,50000,above,sell,0.01,5.0,true,,primary\n"),
        )
        .await
        .unwrap();

        let exchange = Arc::new(FakeExchange {
            price: dec!(50001),
            balances: vec![Balance { asset: "XXBT".to_owned(), amount: dec!(1) }],
            order_status: Mutex::new(None),
            submitted: AtomicBool::new(false),
        });
        let engine = build_engine(dir.path(), exchange.clone()).await;

        engine.tick().await.unwrap();

        let state = state_store::load(&dir.path().join("state.csv")).await.unwrap();
        let btc1 = state.get("btc_1").unwrap();
        assert!(btc1.triggered);
        assert_eq!(btc1.trigger_price, Some(dec!(50001)));
        assert_eq!(btc1.order_id, "O1");
        assert!(exchange.submitted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn s2_insufficient_balance_blocks_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!("{HEADER}\nbtc_1,XXBTZUSD,50000,above,sell,0.01,5.0,true,,primary\n"),
        )
        .await
        .unwrap();

        let exchange = Arc::new(FakeExchange {
            price: dec!(50001),
            balances: vec![Balance { asset: "XXBT".to_owned(), amount: dec!(0.005) }],
            order_status: Mutex::new(None),
            submitted: AtomicBool::new(false),
        });
        let engine = build_engine(dir.path(), exchange.clone()).await;

        engine.tick().await.unwrap();

        let state = state_store::load(&dir.path().join("state.csv")).await.unwrap();
        let btc1 = state.get("btc_1").unwrap();
        assert!(!btc1.triggered);
        assert!(!btc1.last_error.is_empty());
        assert!(!exchange.submitted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_crossing_leaves_rule_pending() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!("{HEADER}\nbtc_1,XXBTZUSD,50000,above,sell,0.01,5.0,true,,primary\n"),
        )
        .await
        .unwrap();
        let exchange = Arc::new(FakeExchange {
            price: dec!(49999),
            balances: vec![Balance { asset: "XXBT".to_owned(), amount: dec!(1) }],
            order_status: Mutex::new(None),
            submitted: AtomicBool::new(false),
        });
        let engine = build_engine(dir.path(), exchange.clone()).await;
        engine.tick().await.unwrap();
        let state = state_store::load(&dir.path().join("state.csv")).await.unwrap();
        assert!(!state.get("btc_1").unwrap().triggered);
    }

    #[tokio::test]
    async fn s3_chain_activation_on_fill() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!(
                "{HEADER}\nbuy_a,XXBTZUSD,100000,below,buy,0.01,2.0,true,sell_a,primary\nsell_a,XXBTZUSD,120000,above,sell,0.01,2.0,false,,primary\n"
            ),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("state.csv"),
            format!(
                "{}\nbuy_a,true,99999,2026-01-01T00:00:00Z,O1,2.0,2026-01-01T00:00:00Z,false,2026-01-01T00:00:00Z,,false\n",
                crate::persistence::state_store::HEADER
            ),
        )
        .await
        .unwrap();

        let exchange = Arc::new(FakeExchange {
            price: dec!(99999),
            balances: vec![Balance { asset: "ZUSD".to_owned(), amount: dec!(10000) }],
            order_status: Mutex::new(Some(OrderInfo {
                status: OrderStatus::Closed,
                vol_exec: dec!(0.01),
                vol: dec!(0.01),
                avg_price: dec!(99900),
                closetm: Some(1_700_000_000.0),
            })),
            submitted: AtomicBool::new(false),
        });
        let engine = build_engine(dir.path(), exchange.clone()).await;

        engine.tick().await.unwrap();

        let config_text = tokio::fs::read_to_string(dir.path().join("config.csv")).await.unwrap();
        assert!(config_text.lines().any(|l| l.starts_with("sell_a") && l.contains(",true,")));

        let state = state_store::load(&dir.path().join("state.csv")).await.unwrap();
        assert!(state.get("buy_a").unwrap().fill_notified);
    }

    #[tokio::test]
    async fn dry_run_never_submits_orders() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!("{HEADER}\nbtc_1,XXBTZUSD,50000,above,sell,0.01,5.0,true,,primary\n"),
        )
        .await
        .unwrap();
        let exchange = Arc::new(FakeExchange {
            price: dec!(50001),
            balances: vec![Balance { asset: "XXBT".to_owned(), amount: dec!(1) }],
            order_status: Mutex::new(None),
            submitted: AtomicBool::new(false),
        });
        let mut engine = build_engine(dir.path(), exchange.clone()).await;
        engine.dry_run = true;
        engine.tick().await.unwrap();
        assert!(!exchange.submitted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dry_run_writes_no_state_to_disk_even_on_a_blocked_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.csv"),
            format!("{HEADER}\nbtc_1,XXBTZUSD,50000,above,sell,0.01,5.0,true,,primary\n"),
        )
        .await
        .unwrap();
        let exchange = Arc::new(FakeExchange {
            price: dec!(50001),
            balances: vec![Balance { asset: "XXBT".to_owned(), amount: dec!(0.005) }],
            order_status: Mutex::new(None),
            submitted: AtomicBool::new(false),
        });
        let mut engine = build_engine(dir.path(), exchange.clone()).await;
        engine.dry_run = true;
        engine.tick().await.unwrap();

        assert!(tokio::fs::metadata(dir.path().join("state.csv")).await.is_err());
        assert!(tokio::fs::metadata(dir.path().join("trades.csv")).await.is_err());
    }
}
