use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Lots;

/// Trade direction at the broker wire level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => f.write_str("buy"),
            Direction::Sell => f.write_str("sell"),
        }
    }
}

/// What role an `EnsureOrder` played in driving the position towards its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

/// The four order kinds the reconciler can issue, per spec §3/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOrderKind {
    Buy,
    Sell,
    StopLoss,
    TakeProfit,
}

impl EnsureOrderKind {
    /// `true` for the two trade-leg kinds that settle into a position
    /// (as opposed to conditional stop/take orders).
    pub fn is_trade_leg(self) -> bool {
        matches!(self, EnsureOrderKind::Buy | EnsureOrderKind::Sell)
    }
}

/// The observed fill for a trade-leg `EnsureOrder`, hydrated by
/// `BrokerAdapter::pull_ensure_orders_result`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub date: DateTime<Utc>,
    pub price: Decimal,
}

/// One order issued during a single `Reconciler::ensure` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureOrder {
    pub kind: EnsureOrderKind,
    /// Always positive; sign is implied by `kind`/`action`.
    pub quantity: Lots,
    pub order_id: String,
    pub action: Option<PositionAction>,
    /// Trigger price, set for `stop_loss`/`take_profit` orders only.
    pub price: Option<Decimal>,
    /// Populated for `buy`/`sell` legs only, after `pull_ensure_orders_result`.
    pub fill: Option<Fill>,
}

impl EnsureOrder {
    pub fn trade(
        kind: EnsureOrderKind,
        quantity: Lots,
        order_id: impl Into<String>,
        action: PositionAction,
    ) -> Self {
        Self {
            kind,
            quantity,
            order_id: order_id.into(),
            action: Some(action),
            price: None,
            fill: None,
        }
    }

    pub fn stop(
        kind: EnsureOrderKind,
        quantity: Lots,
        order_id: impl Into<String>,
        price: Decimal,
    ) -> Self {
        Self {
            kind,
            quantity,
            order_id: order_id.into(),
            action: None,
            price: Some(price),
            fill: None,
        }
    }
}

/// The two protective conditional order kinds observable at the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOrderKind {
    StopLoss,
    TakeProfit,
}

/// A protective order as currently observed at the broker (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrder {
    pub order_id: String,
    pub order_type: StopOrderKind,
    pub direction: Direction,
    pub quantity: Lots,
    pub stop_price: Option<Decimal>,
}
