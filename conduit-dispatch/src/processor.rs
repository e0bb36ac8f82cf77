use std::collections::HashMap;
use std::sync::Arc;

use conduit_broker::{BrokerAdapter, Reconciler};
use conduit_core::{
    EnsureOrderKind, Instrument, PositionAction, Signal, TradingError, TradingResult,
};
use conduit_notify::{ErrorReport, NotificationReport, Notifier, SignalReport, SlippageEntry};
use rust_decimal::Decimal;

/// Per-signal orchestrator (spec §4.4): resolves broker state, drives the
/// reconciler, hydrates fills, computes slippage/profit, and notifies.
pub struct SignalProcessor {
    account: String,
    broker: Arc<dyn BrokerAdapter>,
    notifier: Arc<dyn Notifier>,
    reconciler: Reconciler,
}

impl SignalProcessor {
    pub fn new(account: impl Into<String>, broker: Arc<dyn BrokerAdapter>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            account: account.into(),
            broker,
            notifier,
            reconciler: Reconciler,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Runs the full spec §4.4 sequence. On success with issued orders,
    /// emits the success report itself (step 7); the dispatcher only needs
    /// to handle the failure-notification path (spec §4.7 step 3).
    pub async fn process(&self, signal: &Signal) -> TradingResult<SignalReport> {
        let info = self
            .broker
            .get_instrument_info(&signal.instrument)
            .await?
            .ok_or_else(|| TradingError::instrument_not_found(&signal.instrument))?;

        let init_position = self.broker.get_position(&info).await?;

        let (final_position, mut orders) = self
            .reconciler
            .ensure(
                self.broker.as_ref(),
                &info,
                init_position.as_ref(),
                signal.position,
                signal.capital_leverage_percent,
                signal.reserve_capital,
                signal.stop_price,
                signal.limit_price,
            )
            .await?;

        orders = self.broker.pull_ensure_orders_result(orders, &info).await?;

        let slippage = compute_slippage(signal, &orders);
        let profit = compute_profit(info.lot_size, init_position.as_ref(), &orders);
        let current_stops = self.broker.get_current_stop_orders(&info).await?;

        let report = SignalReport {
            account: self.account.clone(),
            signal: signal.clone(),
            init_position,
            orders,
            slippage,
            profit,
            final_position,
            current_stops,
        };

        if !report.orders.is_empty() {
            self.notifier
                .notify(&NotificationReport::Success(report.clone()))
                .await;
        }

        Ok(report)
    }

    /// Composes and sends the distinct, shorter failure report (spec §9
    /// "Supplemented Features": the original's `_send_error_notification`).
    pub async fn notify_failure(&self, signal: &Signal, instrument: &Instrument, err: &TradingError) {
        let report = ErrorReport {
            account: self.account.clone(),
            instrument: Some(instrument.clone()),
            position: Some(signal.position),
            code: err.code.clone(),
            message: err.message.clone(),
        };
        self.notifier.notify(&NotificationReport::Failure(report)).await;
    }
}

/// Spec §4.5. Only populated when the signal carries an advisory entry
/// price or time; empty otherwise.
fn compute_slippage(signal: &Signal, orders: &[conduit_core::EnsureOrder]) -> HashMap<String, SlippageEntry> {
    let mut out = HashMap::new();
    if signal.entry_price.is_none() && signal.entry_time.is_none() {
        return out;
    }

    for order in orders {
        if !order.kind.is_trade_leg() {
            continue;
        }
        let Some(fill) = order.fill else { continue };

        let mut entry = SlippageEntry::default();
        if let Some(entry_price) = signal.entry_price {
            let selling = matches!(
                order.action,
                Some(PositionAction::OpenShort) | Some(PositionAction::CloseLong)
            );
            entry.price = Some(if selling {
                entry_price - fill.price
            } else {
                fill.price - entry_price
            });
        }
        if let Some(entry_time) = signal.entry_time {
            entry.time = Some(fill.date.signed_duration_since(entry_time));
        }
        out.insert(order.order_id.clone(), entry);
    }

    out
}

/// Spec §4.6. `None` when there was no prior position or no closing leg.
fn compute_profit(
    lot_size: Decimal,
    init_position: Option<&conduit_core::Position>,
    orders: &[conduit_core::EnsureOrder],
) -> Option<Decimal> {
    let position = init_position?;
    if orders.is_empty() {
        return None;
    }

    let (closing_action, sign) = if position.quantity > 0 {
        (PositionAction::CloseLong, Decimal::ONE)
    } else {
        (PositionAction::CloseShort, -Decimal::ONE)
    };

    let closing_orders: Vec<_> = orders
        .iter()
        .filter(|o| o.action == Some(closing_action))
        .collect();
    if closing_orders.is_empty() {
        return None;
    }

    let mut pnl = Decimal::ZERO;
    for order in closing_orders {
        let Some(fill) = order.fill else { continue };
        let qty = Decimal::from(order.quantity) * lot_size;
        pnl += sign * (fill.price - position.average_price) * qty;
    }
    Some(pnl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{EnsureOrder, Fill, Position};
    use rust_decimal_macros::dec;

    fn fill_order(action: PositionAction, qty: i64, price: Decimal, order_id: &str) -> EnsureOrder {
        let mut order = EnsureOrder::trade(EnsureOrderKind::Sell, qty, order_id, action);
        order.fill = Some(Fill {
            date: chrono::Utc::now(),
            price,
        });
        order
    }

    #[test]
    fn profit_none_without_prior_position() {
        let orders = vec![fill_order(PositionAction::CloseLong, 10, dec!(110), "o1")];
        assert_eq!(compute_profit(dec!(1), None, &orders), None);
    }

    #[test]
    fn profit_computed_for_closing_long() {
        let position = Position {
            instrument: Instrument::new("SBER", "TQBR"),
            quantity: 50,
            average_price: dec!(100),
        };
        let orders = vec![fill_order(PositionAction::CloseLong, 50, dec!(110), "o1")];
        let profit = compute_profit(dec!(1), Some(&position), &orders).unwrap();
        assert_eq!(profit, dec!(500));
    }

    #[test]
    fn profit_computed_for_closing_short() {
        let position = Position {
            instrument: Instrument::new("SBER", "TQBR"),
            quantity: -50,
            average_price: dec!(100),
        };
        let orders = vec![fill_order(PositionAction::CloseShort, 50, dec!(90), "o1")];
        let profit = compute_profit(dec!(1), Some(&position), &orders).unwrap();
        assert_eq!(profit, dec!(500));
    }

    #[test]
    fn slippage_empty_without_advisory_fields() {
        let signal = Signal::new(Instrument::new("SBER", "TQBR"), conduit_core::PositionState::Long);
        let orders = vec![fill_order(PositionAction::OpenLong, 10, dec!(100), "o1")];
        assert!(compute_slippage(&signal, &orders).is_empty());
    }

    #[test]
    fn slippage_sign_for_buying_vs_selling_actions() {
        let mut signal = Signal::new(Instrument::new("SBER", "TQBR"), conduit_core::PositionState::Long);
        signal.entry_price = Some(dec!(100));
        let buy_order = fill_order(PositionAction::OpenLong, 10, dec!(105), "buy-1");
        let sell_order = fill_order(PositionAction::CloseLong, 10, dec!(95), "sell-1");
        let slippage = compute_slippage(&signal, &[buy_order.clone(), sell_order.clone()]);
        assert_eq!(slippage[&buy_order.order_id].price, Some(dec!(5)));
        assert_eq!(slippage[&sell_order.order_id].price, Some(dec!(5)));
    }
}
