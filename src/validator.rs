//! Validator (spec §4.6): static per-row checks plus an optional live phase
//! that compares rules against current market prices.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;

use crate::exchange::types::split_pair;
use crate::exchange::Exchange;
use crate::persistence::config_store::{ConfigDocument, ConfigLine};
use crate::rule::{Direction, Rule, ThresholdType};

/// Pair suffixes whose quote asset is fiat, a stablecoin, or BTC (spec §4.6
/// "Financial-responsibility rule"). Kraken prefixes fiat quote assets with
/// `Z` and BTC with `X`; both bare and venue-prefixed spellings are listed
/// since the config column may use either.
const RESTRICTED_QUOTE_SUFFIXES: &[&str] = &[
    "ZUSD", "USD", "USDT", "USDC", "ZEUR", "EUR", "ZGBP", "GBP", "ZJPY", "JPY", "DAI", "BUSD",
    "XXBT", "XBT",
];

/// Asset codes recognized for the static "unknown pair symbol" check (spec
/// §4.6). Covers Kraken's commonly traded bases and quotes, bare and
/// venue-prefixed spellings alike; not exhaustive of every asset Kraken
/// lists, the same spirit as `exchange::types::split_pair`'s quote table.
const KNOWN_ASSET_CODES: &[&str] = &[
    "XXBT", "XBT", "XETH", "ETH", "XXRP", "XRP", "XLTC", "LTC", "XXLM", "XLM", "XXDG", "XDG",
    "ADA", "DOT", "SOL", "MATIC", "LINK", "UNI", "ATOM", "ALGO", "XTZ", "DOGE", "AVAX", "FIL",
    "ETC", "XXMR", "XMR", "XZEC", "ZEC", "DASH", "BCH", "EOS", "TRX", "NEAR", "SAND", "MANA",
    "AAVE", "COMP", "MKR", "SNX", "YFI", "CRV", "BAT", "GRT", "CHZ", "ICP", "FTM", "KSM",
    "ZUSD", "USD", "USDT", "USDC", "ZEUR", "EUR", "ZGBP", "GBP", "ZJPY", "JPY", "ZCAD", "CAD",
    "ZAUD", "AUD", "DAI", "BUSD",
];

/// True when both legs of `pair` are recognized asset codes.
fn is_known_pair(pair: &str) -> bool {
    let (base, quote) = split_pair(pair);
    KNOWN_ASSET_CODES.contains(&base.as_str()) && KNOWN_ASSET_CODES.contains(&quote.as_str())
}

/// One validation finding attached to a specific rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Rule id the finding concerns (empty for file-level findings, e.g. a cycle).
    pub rule_id: String,
    /// Human-readable description.
    pub message: String,
}

/// Outcome of a validation pass (spec §4.6: "reports errors, warnings, auto-disables").
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Findings that must auto-disable the offending row.
    pub errors: Vec<ValidationIssue>,
    /// Findings that are advisory only.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when no row failed static or live validation.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Rule ids with at least one error, for the persistence layer's
    /// auto-disable path (spec §4.3, §4.6 "configs_with_errors").
    #[must_use]
    pub fn configs_with_errors(&self) -> HashSet<String> {
        self.errors.iter().map(|i| i.rule_id.clone()).collect()
    }

    fn error(&mut self, rule_id: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue { rule_id: rule_id.into(), message: message.into() });
    }

    fn warning(&mut self, rule_id: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue { rule_id: rule_id.into(), message: message.into() });
    }
}

/// Run the static validation phase over every row in `doc` (spec §4.6 "Static phase").
#[must_use]
pub fn validate_static(doc: &ConfigDocument) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut rules_by_id: HashMap<String, &Rule> = HashMap::new();

    for line in doc.lines() {
        let ConfigLine::Record { fields, parsed } = line else { continue };

        let Some(rule) = parsed else {
            let id = fields.first().map(String::as_str).unwrap_or("<unknown>");
            report.error(id, "row has a malformed or missing required field");
            continue;
        };

        if rule.id.is_empty() {
            report.error("<unknown>", "row has an empty id");
            continue;
        }
        if !seen_ids.insert(rule.id.clone()) {
            report.error(&rule.id, format!("duplicate rule id `{}`", rule.id));
            continue;
        }

        if !is_known_pair(&rule.pair) {
            report.error(&rule.id, format!("pair `{}` is not a recognized asset-pair symbol", rule.pair));
        }

        if rule.threshold_price <= Decimal::ZERO {
            report.error(&rule.id, "threshold_price must be positive");
        }
        if rule.volume <= Decimal::ZERO {
            report.error(&rule.id, "volume must be positive");
        }
        if rule.trailing_offset_percent <= Decimal::ZERO {
            report.error(&rule.id, "trailing_offset_percent must be positive");
        }

        if let Some(linked) = &rule.linked_order_id {
            if linked == &rule.id {
                report.error(&rule.id, "linked_order_id cannot reference itself");
            }
        }

        if let Some(violation) = financial_responsibility_violation(rule) {
            report.error(&rule.id, violation);
        }

        rules_by_id.insert(rule.id.clone(), rule);
    }

    for rule in rules_by_id.values() {
        if let Some(linked) = &rule.linked_order_id {
            if !rules_by_id.contains_key(linked) {
                report.error(&rule.id, format!("linked_order_id `{linked}` does not reference a known rule"));
            }
        }
    }

    for cycle_member in find_cycle(&rules_by_id) {
        report.error(&cycle_member, "rule participates in a linked_order_id cycle");
    }

    report
}

/// Financial-responsibility rule (spec §4.6): on a stablecoin/fiat/BTC-quoted
/// pair only (above, sell) and (below, buy) are admissible.
fn financial_responsibility_violation(rule: &Rule) -> Option<String> {
    if !is_restricted_quote(&rule.pair) {
        return None;
    }
    let admissible = matches!(
        (rule.threshold_type, rule.direction),
        (ThresholdType::Above, Direction::Sell) | (ThresholdType::Below, Direction::Buy)
    );
    if admissible {
        None
    } else {
        Some(format!(
            "pair `{}` is fiat/stablecoin/BTC quoted: only (above, sell) and (below, buy) are allowed",
            rule.pair
        ))
    }
}

fn is_restricted_quote(pair: &str) -> bool {
    let upper = pair.to_uppercase();
    RESTRICTED_QUOTE_SUFFIXES.iter().any(|suffix| upper.ends_with(suffix))
}

/// DFS cycle detection over the `id -> linked_order_id` graph (spec §9
/// design note, §8 property 5).
fn find_cycle(rules_by_id: &HashMap<String, &Rule>) -> HashSet<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut in_cycle: HashSet<String> = HashSet::new();

    fn visit<'a>(
        id: &'a str,
        rules_by_id: &HashMap<String, &'a Rule>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        in_cycle: &mut HashSet<String>,
    ) {
        match marks.get(id) {
            Some(Mark::Done) => return,
            Some(Mark::Visiting) => {
                if let Some(pos) = stack.iter().position(|s| *s == id) {
                    for member in &stack[pos..] {
                        in_cycle.insert((*member).to_owned());
                    }
                }
                return;
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(rule) = rules_by_id.get(id) {
            if let Some(next) = &rule.linked_order_id {
                if rules_by_id.contains_key(next.as_str()) {
                    visit(next, rules_by_id, marks, stack, in_cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
    }

    let mut stack = Vec::new();
    for id in rules_by_id.keys() {
        visit(id, rules_by_id, &mut marks, &mut stack, &mut in_cycle);
    }
    in_cycle
}

/// Run the live validation phase (spec §4.6 "Live phase"): compares each
/// rule's threshold against the current market price. Requires a read-only
/// exchange client; callers skip this phase entirely when no read-only
/// credential is available.
pub async fn validate_live(rules: &[&Rule], client: &dyn Exchange, report: &mut ValidationReport) {
    for rule in rules {
        let price = match client.current_price(&rule.pair).await {
            Ok(p) => p,
            Err(e) => {
                report.error(&rule.id, format!("could not fetch live price for `{}`: {e}", rule.pair));
                continue;
            }
        };

        if rule.threshold_type.crossed(price, rule.threshold_price) {
            report.error(&rule.id, format!("threshold already crossed: price {price} vs threshold {}", rule.threshold_price));
            continue;
        }

        let gap = (price - rule.threshold_price).abs();
        let offset_amount = rule.threshold_price * rule.trailing_offset_percent / Decimal::ONE_HUNDRED;
        if offset_amount.is_zero() {
            continue;
        }
        if gap < offset_amount {
            report.error(
                &rule.id,
                format!("gap between price ({price}) and threshold ({}) is smaller than the trailing offset", rule.threshold_price),
            );
        } else if gap < offset_amount * Decimal::TWO {
            report.warning(
                &rule.id,
                format!("gap between price ({price}) and threshold ({}) is less than 2x the trailing offset", rule.threshold_price),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::config_store::HEADER;

    fn doc(rows: &[&str]) -> ConfigDocument {
        let mut text = format!("{HEADER}\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        ConfigDocument::parse(&text)
    }

    #[test]
    fn rejects_duplicate_ids() {
        let d = doc(&[
            "r1,XXBTZUSD,70000,above,sell,0.5,2.0,true,,primary",
            "r1,XXBTZUSD,70000,above,sell,0.5,2.0,true,,primary",
        ]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("duplicate")));
    }

    #[test]
    fn rejects_self_link() {
        let d = doc(&["r1,XXBTZUSD,70000,above,sell,0.5,2.0,true,r1,primary"]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("itself")));
    }

    #[test]
    fn rejects_unknown_successor() {
        let d = doc(&["r1,XXBTZUSD,70000,above,sell,0.5,2.0,true,ghost,primary"]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("does not reference")));
    }

    #[test]
    fn rejects_cycle() {
        let d = doc(&[
            "a,XXBTZUSD,70000,above,sell,0.5,2.0,true,b,primary",
            "b,XXBTZUSD,70000,above,sell,0.5,2.0,false,a,primary",
        ]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("cycle")));
    }

    #[test]
    fn rejects_buy_high_on_fiat_pair() {
        let d = doc(&["r1,XXBTZUSD,70000,above,buy,0.5,2.0,true,,primary"]);
        let report = validate_static(&d);
        assert!(!report.is_ok());
    }

    #[test]
    fn accepts_sell_high_on_fiat_pair() {
        let d = doc(&["r1,XXBTZUSD,70000,above,sell,0.5,2.0,true,,primary"]);
        let report = validate_static(&d);
        assert!(report.is_ok());
    }

    #[test]
    fn exotic_pair_is_exempt_from_financial_responsibility_rule() {
        let d = doc(&["r1,ETHDOT,1.0,above,buy,0.5,2.0,true,,primary"]);
        let report = validate_static(&d);
        assert!(report.is_ok());
    }

    #[test]
    fn rejects_nonpositive_volume() {
        let d = doc(&["r1,ETHXBT,1.0,above,sell,0,2.0,true,,primary"]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("volume")));
    }

    #[test]
    fn rejects_unknown_pair_symbol() {
        let d = doc(&["r1,ZZZZQQQQ,70000,above,sell,0.5,2.0,true,,primary"]);
        let report = validate_static(&d);
        assert!(report.errors.iter().any(|i| i.message.contains("recognized")));
    }
}
