//! Trade file store (spec §3 `TradeRecord`, §4.7 Profit Tracker, §6).
//!
//! One row per rule transition, keyed by `trade_id`: an entry leg is
//! inserted when a rule triggers, then the same row is rewritten in place
//! with the exit leg once the order fills. Persisted with the same
//! atomic-write protocol as the config/state stores (spec §4.3) rather than
//! append-only, since the exit leg must land in the entry leg's own row.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::persistence::atomic::write_atomically;
use crate::rule::Direction;

/// Column order mandated by spec §6.
pub const HEADER: &str = "trade_id,config_id,pair,direction,volume,entry_price,exit_price,entry_time,exit_time,profit_loss,profit_loss_pct,status,notes";

/// Lifecycle of one [`TradeRecord`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Entry leg recorded; exit not yet observed.
    Triggered,
    /// Entry and exit legs both recorded.
    Completed,
    /// Exit observed via reconciliation with no prior entry leg in this store.
    FilledOnly,
}

/// One row of the trade file: entry/exit legs and realized P&L for a rule's order.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    /// Opaque unique id for this trade (spec §3; a `Uuid` v4 per SPEC_FULL.md).
    pub trade_id: String,
    /// Rule id this trade belongs to.
    pub config_id: String,
    /// Trading pair.
    pub pair: String,
    /// `buy` or `sell`.
    pub direction: Direction,
    /// Volume traded, base asset units.
    pub volume: Decimal,
    /// Price at threshold crossing (entry leg).
    pub entry_price: Decimal,
    /// Fill price (exit leg), once known.
    pub exit_price: Option<Decimal>,
    /// Timestamp of the entry leg.
    pub entry_time: DateTime<Utc>,
    /// Timestamp of the exit leg, once known.
    pub exit_time: Option<DateTime<Utc>>,
    /// Realized P&L (spec §4.7 sign rule), once the exit leg is known.
    pub profit_loss: Option<Decimal>,
    /// `profit_loss` expressed as a percentage of `entry_price * volume`.
    pub profit_loss_pct: Option<Decimal>,
    /// Current lifecycle status.
    pub status: TradeStatus,
    /// Free-form annotation (e.g. a reconciliation note).
    pub notes: String,
}

impl TradeRecord {
    /// Realized P&L for `direction` going from `entry` to `exit` (spec §4.7):
    /// `sell` => `(entry - exit) * volume`; `buy` => `(exit - entry) * volume`.
    #[must_use]
    pub fn realized_pnl(direction: Direction, entry: Decimal, exit: Decimal, volume: Decimal) -> Decimal {
        match direction {
            Direction::Sell => (entry - exit) * volume,
            Direction::Buy => (exit - entry) * volume,
        }
    }
}

/// An in-memory view of the trade file, keyed by `trade_id`.
#[derive(Debug, Clone, Default)]
pub struct TradeDocument {
    records: Vec<TradeRecord>,
}

impl TradeDocument {
    /// Parse the full file contents (header included).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut records = Vec::new();
        for raw_line in text.lines().skip(1) {
            if raw_line.trim().is_empty() {
                continue;
            }
            if let Some(record) = parse_row(&split_csv_line(raw_line)) {
                records.push(record);
            }
        }
        Self { records }
    }

    /// Insert a new record (spec §4.4.1 step 8: "Append `triggered` TradeRecord").
    pub fn insert(&mut self, record: TradeRecord) {
        self.records.push(record);
    }

    /// Rewrite the record for `trade_id` in place, if present.
    pub fn update(&mut self, trade_id: &str, f: impl FnOnce(&mut TradeRecord)) -> bool {
        if let Some(record) = self.records.iter_mut().find(|r| r.trade_id == trade_id) {
            f(record);
            true
        } else {
            false
        }
    }

    /// Find the open (not yet completed) trade for a given rule id, if any.
    #[must_use]
    pub fn open_trade_for_rule(&self, config_id: &str) -> Option<&TradeRecord> {
        self.records
            .iter()
            .find(|r| r.config_id == config_id && r.status == TradeStatus::Triggered)
    }

    /// All records.
    #[must_use]
    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    /// Render back to file text, header first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for record in &self.records {
            out.push_str(&render_row(record));
            out.push('\n');
        }
        out
    }
}

fn opt_decimal(s: &str) -> Option<Decimal> {
    if s.trim().is_empty() { None } else { s.trim().parse().ok() }
}

fn opt_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.trim().is_empty() {
        None
    } else {
        DateTime::parse_from_rfc3339(s.trim()).ok().map(|d| d.with_timezone(&Utc))
    }
}

fn parse_row(fields: &[String]) -> Option<TradeRecord> {
    Some(TradeRecord {
        trade_id: fields.first()?.trim().to_owned(),
        config_id: fields.get(1)?.trim().to_owned(),
        pair: fields.get(2)?.trim().to_owned(),
        direction: fields.get(3)?.trim().parse().ok()?,
        volume: fields.get(4)?.trim().parse().ok()?,
        entry_price: fields.get(5)?.trim().parse().ok()?,
        exit_price: fields.get(6).and_then(|s| opt_decimal(s)),
        entry_time: fields.get(7).and_then(|s| opt_datetime(s))?,
        exit_time: fields.get(8).and_then(|s| opt_datetime(s)),
        profit_loss: fields.get(9).and_then(|s| opt_decimal(s)),
        profit_loss_pct: fields.get(10).and_then(|s| opt_decimal(s)),
        status: match fields.get(11).map(|s| s.trim()) {
            Some("completed") => TradeStatus::Completed,
            Some("filled_only") => TradeStatus::FilledOnly,
            _ => TradeStatus::Triggered,
        },
        notes: fields.get(12).map(|s| s.trim().to_owned()).unwrap_or_default(),
    })
}

fn render_row(r: &TradeRecord) -> String {
    let status = match r.status {
        TradeStatus::Triggered => "triggered",
        TradeStatus::Completed => "completed",
        TradeStatus::FilledOnly => "filled_only",
    };
    let fields = vec![
        r.trade_id.clone(),
        r.config_id.clone(),
        r.pair.clone(),
        r.direction.to_string(),
        r.volume.to_string(),
        r.entry_price.to_string(),
        r.exit_price.map(|d| d.to_string()).unwrap_or_default(),
        r.entry_time.to_rfc3339(),
        r.exit_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        r.profit_loss.map(|d| d.to_string()).unwrap_or_default(),
        r.profit_loss_pct.map(|d| d.to_string()).unwrap_or_default(),
        status.to_owned(),
        r.notes.clone(),
    ];
    join_csv_line(&fields)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => record.iter().map(str::to_owned).collect(),
        _ => vec![],
    }
}

fn join_csv_line(fields: &[String]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(vec![]);
    writer.write_record(fields).expect("writing to an in-memory buffer cannot fail");
    let bytes = writer.into_inner().expect("buffer flush cannot fail");
    String::from_utf8(bytes).expect("csv writer emits valid utf8 for utf8 input").trim_end_matches('\n').to_owned()
}

/// Load a trade document from disk, or empty if absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub async fn load(path: &Path) -> Result<TradeDocument> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(TradeDocument::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TradeDocument::default()),
        Err(e) => Err(e).with_context(|| format!("reading trade file {}", path.display())),
    }
}

/// Persist `doc` to `path` via the atomic-write protocol.
///
/// # Errors
///
/// Returns an error if the underlying atomic write fails after retries.
pub async fn save(path: &Path, doc: &TradeDocument) -> Result<()> {
    write_atomically(path, &doc.render()).await
}

/// Default path for the trade file.
#[must_use]
pub fn default_path() -> PathBuf {
    PathBuf::from("ttslo_trades.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> TradeRecord {
        TradeRecord {
            trade_id: "t1".to_owned(),
            config_id: "btc_1".to_owned(),
            pair: "XXBTZUSD".to_owned(),
            direction: Direction::Sell,
            volume: dec!(0.01),
            entry_price: dec!(50001),
            exit_price: None,
            entry_time: Utc::now(),
            exit_time: None,
            profit_loss: None,
            profit_loss_pct: None,
            status: TradeStatus::Triggered,
            notes: String::new(),
        }
    }

    #[test]
    fn insert_then_update_completes_the_same_row() {
        let mut doc = TradeDocument::default();
        doc.insert(sample());
        let updated = doc.update("t1", |r| {
            r.exit_price = Some(dec!(49500));
            r.status = TradeStatus::Completed;
            r.profit_loss = Some(TradeRecord::realized_pnl(Direction::Sell, r.entry_price, dec!(49500), r.volume));
        });
        assert!(updated);
        assert_eq!(doc.records().len(), 1);
        assert_eq!(doc.records()[0].status, TradeStatus::Completed);
        assert_eq!(doc.records()[0].profit_loss, Some(dec!(5.01)));
    }

    #[test]
    fn sell_direction_profits_when_exit_is_lower() {
        let pnl = TradeRecord::realized_pnl(Direction::Sell, dec!(50000), dec!(49000), dec!(1));
        assert_eq!(pnl, dec!(1000));
    }

    #[test]
    fn buy_direction_profits_when_exit_is_higher() {
        let pnl = TradeRecord::realized_pnl(Direction::Buy, dec!(50000), dec!(51000), dec!(1));
        assert_eq!(pnl, dec!(1000));
    }

    #[test]
    fn round_trips_through_render_and_parse() {
        let mut doc = TradeDocument::default();
        doc.insert(sample());
        let reparsed = TradeDocument::parse(&doc.render());
        assert_eq!(reparsed.records().len(), 1);
        assert_eq!(reparsed.records()[0].trade_id, "t1");
    }
}
