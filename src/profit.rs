//! Profit Tracker (spec §4.7): records the entry leg at trigger time and the
//! exit leg (with realized P&L) at fill time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::persistence::trade_store::{TradeDocument, TradeRecord, TradeStatus};
use crate::rule::{Direction, Rule};

/// Record the entry leg for a rule that just triggered (spec §4.4.1 step 8).
///
/// Returns the generated `trade_id` so the engine can look the row back up
/// at fill time without re-scanning the document.
pub fn record_entry(doc: &mut TradeDocument, rule: &Rule, trigger_price: Decimal, trigger_time: DateTime<Utc>) -> String {
    let trade_id = Uuid::new_v4().to_string();
    doc.insert(TradeRecord {
        trade_id: trade_id.clone(),
        config_id: rule.id.clone(),
        pair: rule.pair.clone(),
        direction: rule.direction,
        volume: rule.volume,
        entry_price: trigger_price,
        exit_price: None,
        entry_time: trigger_time,
        exit_time: None,
        profit_loss: None,
        profit_loss_pct: None,
        status: TradeStatus::Triggered,
        notes: String::new(),
    });
    trade_id
}

/// Record the exit leg for `trade_id`, computing realized P&L per spec
/// §4.7's sign rule. No-op (returns `false`) if the trade row is not found,
/// which happens for orders discovered already filled via reconciliation
/// with no local entry leg (those get a `filled_only` row instead, see
/// [`record_filled_only`]).
pub fn record_exit(
    doc: &mut TradeDocument,
    trade_id: &str,
    direction: Direction,
    exit_price: Decimal,
    exit_time: DateTime<Utc>,
) -> bool {
    doc.update(trade_id, |record| {
        let pnl = TradeRecord::realized_pnl(direction, record.entry_price, exit_price, record.volume);
        let notional = record.entry_price * record.volume;
        record.exit_price = Some(exit_price);
        record.exit_time = Some(exit_time);
        record.profit_loss = Some(pnl);
        record.profit_loss_pct = if notional.is_zero() { None } else { Some(pnl / notional * Decimal::ONE_HUNDRED) };
        record.status = TradeStatus::Completed;
    })
}

/// Record a fill observed with no prior local entry leg (spec §3
/// `TradeRecord.status = filled_only`): reconciliation found a `closed`
/// order this process never saw trigger, most likely after a crash between
/// exchange acceptance and state persistence (spec §4.4.1 "Between steps 6
/// and 8").
pub fn record_filled_only(doc: &mut TradeDocument, rule: &Rule, exit_price: Decimal, exit_time: DateTime<Utc>) {
    doc.insert(TradeRecord {
        trade_id: Uuid::new_v4().to_string(),
        config_id: rule.id.clone(),
        pair: rule.pair.clone(),
        direction: rule.direction,
        volume: rule.volume,
        entry_price: exit_price,
        exit_price: Some(exit_price),
        entry_time: exit_time,
        exit_time: Some(exit_time),
        profit_loss: Some(Decimal::ZERO),
        profit_loss_pct: Some(Decimal::ZERO),
        status: TradeStatus::FilledOnly,
        notes: "reconciled with no prior local trigger".to_owned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule() -> Rule {
        Rule {
            id: "btc_1".to_owned(),
            pair: "XXBTZUSD".to_owned(),
            threshold_price: dec!(50000),
            threshold_type: crate::rule::ThresholdType::Above,
            direction: Direction::Sell,
            volume: dec!(0.01),
            trailing_offset_percent: dec!(5.0),
            enabled: crate::rule::EnabledState::True,
            linked_order_id: None,
            account: String::new(),
        }
    }

    #[test]
    fn entry_then_exit_computes_sell_pnl() {
        let mut doc = TradeDocument::default();
        let trade_id = record_entry(&mut doc, &rule(), dec!(50001), Utc::now());
        let updated = record_exit(&mut doc, &trade_id, Direction::Sell, dec!(49500), Utc::now());
        assert!(updated);
        let record = doc.records().iter().find(|r| r.trade_id == trade_id).unwrap();
        assert_eq!(record.status, TradeStatus::Completed);
        assert_eq!(record.profit_loss, Some(dec!(5.01)));
    }

    #[test]
    fn exit_for_unknown_trade_id_is_a_no_op() {
        let mut doc = TradeDocument::default();
        assert!(!record_exit(&mut doc, "nonexistent", Direction::Sell, dec!(1), Utc::now()));
    }
}
