//! Request/response types for the Kraken private and public REST surface (spec §4.1, §4.4.1).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rule::Direction;

/// `buy` or `sell`, as Kraken spells it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl From<Direction> for OrderSide {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Buy => OrderSide::Buy,
            Direction::Sell => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        })
    }
}

/// Parameters for Kraken's `AddOrder` endpoint, restricted to what a
/// triggered trailing-stop needs (spec §4.4.1 step 6).
#[derive(Debug, Clone)]
pub struct AddOrderParams {
    /// Trading pair, Kraken asset-pair notation (e.g. `XXBTZUSD`).
    pub pair: String,
    /// `buy` or `sell`.
    pub side: OrderSide,
    /// Order type; always `trailing-stop` for rules this crate manages.
    pub ordertype: &'static str,
    /// Volume in base asset units.
    pub volume: Decimal,
    /// Trailing offset, formatted as `+N.N%` (spec §4.4.1 step 6).
    pub price: String,
    /// `index` preferred, falls back to `last` on `EOrder:Invalid price:index unavailable`.
    pub trigger: &'static str,
    /// Caller-supplied idempotency token (spec §4.4.1 step 2), sent as `userref`.
    pub userref: u32,
    /// Validate-only dry run; never actually places the order.
    pub validate: bool,
}

/// Result of a successful `AddOrder` call.
#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderResult {
    /// Exchange-assigned transaction ids (usually a single element).
    pub txid: Vec<String>,
    /// Human-readable description of the order that was placed.
    pub descr: AddOrderDescr,
}

/// Human-readable order description embedded in [`AddOrderResult`].
#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderDescr {
    /// Free-form description string, e.g. `sell 1.5 XXBTZUSD @ trailing stop +2.0%`.
    pub order: String,
}

/// Order status as reported by `QueryOrders`/`OpenOrders`/`ClosedOrders` (spec §4.4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order is resting, untriggered.
    Pending,
    /// Order is resting on the book.
    Open,
    /// Order has been fully or partially filled and closed.
    Closed,
    /// Order was canceled before it could fill.
    Canceled,
    /// Order expired per its `expiretm`.
    Expired,
}

/// Subset of Kraken's order-info object this crate cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    /// `status` field.
    pub status: OrderStatus,
    /// Volume executed so far, as a decimal string from Kraken.
    #[serde(with = "rust_decimal::serde::str")]
    pub vol_exec: Decimal,
    /// Requested volume, as a decimal string from Kraken.
    #[serde(with = "rust_decimal::serde::str")]
    pub vol: Decimal,
    /// Average fill price, as a decimal string from Kraken; `0` if unfilled.
    #[serde(with = "rust_decimal::serde::str", rename = "price")]
    pub avg_price: Decimal,
    /// Unix timestamp the order closed, if closed.
    pub closetm: Option<f64>,
}

impl OrderInfo {
    /// True once the order is in a lifecycle-terminal state (spec §4.4.2).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Closed | OrderStatus::Canceled | OrderStatus::Expired
        )
    }

    /// True when the order filled (partially or fully) rather than dying untouched.
    #[must_use]
    pub fn has_fill(&self) -> bool {
        self.vol_exec > Decimal::ZERO
    }
}

/// A single asset balance, as returned by Kraken's `Balance` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    /// Asset symbol (Kraken notation, e.g. `ZUSD`, `XXBT`).
    pub asset: String,
    /// Total balance, decimal.
    pub amount: Decimal,
}

/// Quote-asset codes recognized when splitting a Kraken pair symbol into its
/// base and quote legs, longest first so e.g. `ZUSD` is preferred over `USD`.
/// Kraken has no public "list the legs of this symbol" endpoint cheap enough
/// to call on every balance check, so the split is this static table plus an
/// even-halves fallback for symbols it doesn't recognize (spec §4.4.1 step 6).
const QUOTE_ASSETS_BY_LENGTH_DESC: &[&str] = &[
    "ZUSD", "ZEUR", "ZGBP", "ZJPY", "ZCAD", "ZAUD", "XXBT", "XETH", "USDT", "USDC", "BUSD", "DAI",
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD",
];

/// Split a Kraken asset-pair symbol (e.g. `XXBTZUSD`) into `(base, quote)`.
#[must_use]
pub fn split_pair(pair: &str) -> (String, String) {
    let upper = pair.to_uppercase();
    for quote in QUOTE_ASSETS_BY_LENGTH_DESC {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            let base = upper[..upper.len() - quote.len()].to_owned();
            return (base, (*quote).to_owned());
        }
    }
    let mid = upper.len() / 2;
    (upper[..mid].to_owned(), upper[mid..].to_owned())
}

/// Sum every balance entry for `asset`, including spot-wallet suffix
/// variants like `XXBT.F` (spec §4.4.1 step 6: "aggregated across
/// spot-wallet suffixes").
#[must_use]
pub fn aggregate_balance(balances: &[Balance], asset: &str) -> Decimal {
    balances
        .iter()
        .filter(|b| b.asset == asset || b.asset.starts_with(&format!("{asset}.")))
        .map(|b| b.amount)
        .sum()
}

/// Render a trailing offset as Kraken's `+N.N%` order-price notation (spec
/// §4.4.1: "one decimal place" always, regardless of the input's own scale).
#[must_use]
pub fn format_offset(percent: Decimal) -> String {
    format!("+{percent:.1}%")
}

/// Parse a Kraken `+N.N%` offset string back into a percentage [`Decimal`].
///
/// # Errors
///
/// Returns an error if `s` is not of the form `+<number>%`.
pub fn parse_offset(s: &str) -> Result<Decimal, String> {
    let trimmed = s
        .strip_prefix('+')
        .ok_or_else(|| format!("offset `{s}` missing leading `+`"))?;
    let trimmed = trimmed
        .strip_suffix('%')
        .ok_or_else(|| format!("offset `{s}` missing trailing `%`"))?;
    trimmed
        .parse::<Decimal>()
        .map_err(|e| format!("offset `{s}` is not numeric: {e}"))
}

/// Render a volume the way Kraken expects it on the wire: a plain decimal
/// string with no thousands separator and no trailing `.0` noise beyond what
/// the value itself carries.
#[must_use]
pub fn format_volume(volume: Decimal) -> String {
    volume.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn offset_formatting_round_trips() {
        let pct = dec!(2.5);
        let formatted = format_offset(pct);
        assert_eq!(formatted, "+2.5%");
        assert_eq!(parse_offset(&formatted).unwrap(), pct);
    }

    #[test]
    fn offset_formatting_always_carries_one_decimal_place() {
        assert_eq!(format_offset(dec!(5)), "+5.0%");
        assert_eq!(format_offset(dec!(10.24)), "+10.2%");
    }

    #[test]
    fn splits_standard_kraken_pair() {
        assert_eq!(split_pair("XXBTZUSD"), ("XXBT".to_owned(), "ZUSD".to_owned()));
    }

    #[test]
    fn aggregates_spot_wallet_suffix_variants() {
        let balances = vec![
            Balance { asset: "XXBT".to_owned(), amount: dec!(0.1) },
            Balance { asset: "XXBT.F".to_owned(), amount: dec!(0.2) },
            Balance { asset: "ZUSD".to_owned(), amount: dec!(500) },
        ];
        assert_eq!(aggregate_balance(&balances, "XXBT"), dec!(0.3));
    }

    #[test]
    fn parse_offset_rejects_malformed_strings() {
        assert!(parse_offset("2.5%").is_err());
        assert!(parse_offset("+2.5").is_err());
        assert!(parse_offset("+abc%").is_err());
    }

    #[test]
    fn volume_formatting_drops_trailing_zeros() {
        assert_eq!(format_volume(dec!(1.50000)), "1.5");
        assert_eq!(format_volume(dec!(0.00100000)), "0.001");
    }
}
