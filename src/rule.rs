//! The [`Rule`]/[`RuleState`] data model (spec §3).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the threshold triggers the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    /// Triggers when the current price is `>=` the threshold.
    Above,
    /// Triggers when the current price is `<=` the threshold.
    Below,
}

impl ThresholdType {
    /// Evaluate the threshold condition (spec §4.4 phase 3).
    #[must_use]
    pub fn crossed(self, current: Decimal, threshold: Decimal) -> bool {
        match self {
            ThresholdType::Above => current >= threshold,
            ThresholdType::Below => current <= threshold,
        }
    }
}

impl fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ThresholdType::Above => "above",
            ThresholdType::Below => "below",
        })
    }
}

impl FromStr for ThresholdType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" => Ok(ThresholdType::Above),
            "below" => Ok(ThresholdType::Below),
            other => Err(format!("unknown threshold_type `{other}`")),
        }
    }
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Direction::Buy),
            "sell" => Ok(Direction::Sell),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

/// Tri-plus-state `enabled` column (spec §3: "tri-state... the last three are all inert").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnabledState {
    /// The rule is live and evaluated every tick.
    True,
    /// The rule is off; no evaluation.
    False,
    /// The rule is temporarily suspended by a human.
    Paused,
    /// The rule is permanently retired.
    Canceled,
}

impl EnabledState {
    /// Any state other than `true` is inert (spec §3 lifecycle).
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, EnabledState::True)
    }
}

impl fmt::Display for EnabledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnabledState::True => "true",
            EnabledState::False => "false",
            EnabledState::Paused => "paused",
            EnabledState::Canceled => "canceled",
        })
    }
}

impl FromStr for EnabledState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" => Ok(EnabledState::True),
            "false" => Ok(EnabledState::False),
            "paused" => Ok(EnabledState::Paused),
            "canceled" | "cancelled" => Ok(EnabledState::Canceled),
            other => Err(format!("unknown enabled state `{other}`")),
        }
    }
}

/// Default account name (spec §3: "optional, default `primary`").
pub const DEFAULT_ACCOUNT: &str = "primary";

/// One row of the config file: the user's declarative triggered-trailing-stop intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Non-empty, unique across rules.
    pub id: String,
    /// Exchange-native trading-pair symbol, e.g. `XXBTZUSD`.
    pub pair: String,
    /// Positive decimal.
    pub threshold_price: Decimal,
    /// `above` or `below`.
    pub threshold_type: ThresholdType,
    /// `buy` or `sell`.
    pub direction: Direction,
    /// Positive decimal, in base asset units.
    pub volume: Decimal,
    /// Positive decimal, percent.
    pub trailing_offset_percent: Decimal,
    /// `true`, `false`, `paused` or `canceled`.
    pub enabled: EnabledState,
    /// Rule id to enable upon this rule's full fill.
    pub linked_order_id: Option<String>,
    /// Selects credential scope; defaults to [`DEFAULT_ACCOUNT`].
    pub account: String,
}

impl Rule {
    /// The account this rule trades against, defaulting per spec §3.
    #[must_use]
    pub fn account(&self) -> &str {
        if self.account.is_empty() {
            DEFAULT_ACCOUNT
        } else {
            &self.account
        }
    }
}

/// Observed lifecycle for a [`Rule`], keyed by rule id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleState {
    /// Whether the threshold has crossed and an order has been submitted.
    pub triggered: bool,
    /// Price at the moment of threshold crossing.
    pub trigger_price: Option<Decimal>,
    /// Timestamp of the threshold crossing.
    pub trigger_time: Option<DateTime<Utc>>,
    /// Exchange-assigned id of the submitted trailing-stop, or empty.
    pub order_id: String,
    /// Snapshot of `trailing_offset_percent` used at submission time.
    pub offset: Option<Decimal>,
    /// Timestamp of the last evaluation of this rule.
    pub last_checked: Option<DateTime<Utc>>,
    /// Whether the filled-order message has been emitted.
    pub fill_notified: bool,
    /// Timestamp of the pending->armed transition.
    pub activated_on: Option<DateTime<Utc>>,
    /// Free-form description of the most recent error.
    pub last_error: String,
    /// Whether `last_error` has already produced a notification.
    pub error_notified: bool,
}

impl RuleState {
    /// Lifecycle classification used by the engine and dashboard consumers (spec §3).
    #[must_use]
    pub fn lifecycle(&self, enabled: EnabledState) -> Lifecycle {
        if !enabled.is_active() {
            return Lifecycle::Disabled;
        }
        if !self.triggered {
            return Lifecycle::Pending;
        }
        if self.fill_notified {
            return Lifecycle::Terminal;
        }
        Lifecycle::Armed
    }

    /// Invariant 1 of spec §8: `triggered=true ⇒ order_id != ""`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.triggered || !self.order_id.is_empty()
    }
}

/// The four lifecycle states a rule is in at any time (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// `enabled` is not `true`.
    Disabled,
    /// `enabled=true` and not yet triggered.
    Pending,
    /// Triggered, order submitted, not yet fill-notified.
    Armed,
    /// Filled or explicitly canceled.
    Terminal,
}
