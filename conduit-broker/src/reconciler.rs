use conduit_core::{
    position::signed_quantity, Direction, EnsureOrder, EnsureOrderKind, InstrumentInfo, Lots,
    Position, PositionAction, PositionState, StopOrder, StopOrderKind, TradingResult,
};
use rust_decimal::Decimal;
use tracing::info;

use crate::adapter::{BrokerAdapter, DEFAULT_SETTLEMENT_ATTEMPTS, DEFAULT_SETTLEMENT_DELAY};
use crate::sizing::calculate_position_size;

/// Pure position-reconciliation state machine (spec §4.3). Holds no state
/// of its own: every call drives an arbitrary current broker state to the
/// requested target, issuing the minimum necessary orders via `broker`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reconciler;

impl Reconciler {
    /// Drive `init_position` to `desired`, installing/refreshing protective
    /// stops as needed, and wait for the broker to settle.
    ///
    /// Any adapter error aborts the remainder of the call and propagates;
    /// orders already appended to the (discarded) return value are still
    /// observable at the broker — the next signal re-reconciles from ground
    /// truth, so no local retry or rollback is attempted (spec §4.3).
    pub async fn ensure(
        &self,
        broker: &dyn BrokerAdapter,
        info: &InstrumentInfo,
        init_position: Option<&Position>,
        desired: PositionState,
        leverage_percent: Decimal,
        reserve_capital: Decimal,
        stop_price: Option<Decimal>,
        take_price: Option<Decimal>,
    ) -> TradingResult<(Option<Position>, Vec<EnsureOrder>)> {
        let init_qty = signed_quantity(init_position);
        let init_stops = broker.get_current_stop_orders(info).await?;
        info!(
            instrument = %info.id,
            init_qty,
            ?desired,
            stop_count = init_stops.len(),
            "starting reconciliation"
        );

        let mut orders = Vec::new();
        let expected_qty = match desired {
            PositionState::Long => {
                self.drive_to_long(
                    broker,
                    info,
                    init_qty,
                    &init_stops,
                    leverage_percent,
                    reserve_capital,
                    &mut orders,
                )
                .await?
            }
            PositionState::Short => {
                self.drive_to_short(
                    broker,
                    info,
                    init_qty,
                    &init_stops,
                    leverage_percent,
                    reserve_capital,
                    &mut orders,
                )
                .await?
            }
            PositionState::Flat => {
                self.drive_to_flat(broker, info, init_qty, &mut orders).await?
            }
        };

        let final_position = broker
            .get_position_waiting_for_settlement(
                info,
                expected_qty,
                DEFAULT_SETTLEMENT_ATTEMPTS,
                DEFAULT_SETTLEMENT_DELAY,
            )
            .await?;
        let final_qty = signed_quantity(final_position.as_ref());
        let final_stops = broker.get_current_stop_orders(info).await?;

        info!(
            instrument = %info.id,
            final_qty,
            "reconciliation reached settled quantity"
        );

        if final_qty != init_qty || stops_need_update(&final_stops, stop_price, take_price) {
            self.refresh_stops(broker, info, &final_stops, final_qty, stop_price, take_price, &mut orders)
                .await?;
        } else {
            info!(instrument = %info.id, "stop orders already match desired state");
        }

        Ok((final_position, orders))
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_to_long(
        &self,
        broker: &dyn BrokerAdapter,
        info: &InstrumentInfo,
        init_qty: Lots,
        init_stops: &[StopOrder],
        leverage_percent: Decimal,
        reserve_capital: Decimal,
        orders: &mut Vec<EnsureOrder>,
    ) -> TradingResult<Lots> {
        if init_qty > 0 {
            return Ok(init_qty);
        }
        if init_qty < 0 {
            broker.cancel_stop_orders(init_stops).await?;
            let qty = -init_qty;
            let order_id = broker.place_market_order(info, Direction::Buy, qty).await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Buy,
                qty,
                order_id,
                PositionAction::CloseShort,
            ));
        }

        let n = calculate_position_size(broker, info, leverage_percent, reserve_capital, Direction::Buy)
            .await?;
        if n > 0 {
            let order_id = broker.place_market_order(info, Direction::Buy, n).await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Buy,
                n,
                order_id,
                PositionAction::OpenLong,
            ));
        }
        Ok(n)
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_to_short(
        &self,
        broker: &dyn BrokerAdapter,
        info: &InstrumentInfo,
        init_qty: Lots,
        init_stops: &[StopOrder],
        leverage_percent: Decimal,
        reserve_capital: Decimal,
        orders: &mut Vec<EnsureOrder>,
    ) -> TradingResult<Lots> {
        if init_qty < 0 {
            return Ok(init_qty);
        }
        if init_qty > 0 {
            broker.cancel_stop_orders(init_stops).await?;
            let order_id = broker
                .place_market_order(info, Direction::Sell, init_qty)
                .await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Sell,
                init_qty,
                order_id,
                PositionAction::CloseLong,
            ));
        }

        let n = calculate_position_size(broker, info, leverage_percent, reserve_capital, Direction::Sell)
            .await?;
        if n > 0 {
            let order_id = broker.place_market_order(info, Direction::Sell, n).await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Sell,
                n,
                order_id,
                PositionAction::OpenShort,
            ));
        }
        Ok(-n)
    }

    async fn drive_to_flat(
        &self,
        broker: &dyn BrokerAdapter,
        info: &InstrumentInfo,
        init_qty: Lots,
        orders: &mut Vec<EnsureOrder>,
    ) -> TradingResult<Lots> {
        if init_qty > 0 {
            let order_id = broker.place_market_order(info, Direction::Sell, init_qty).await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Sell,
                init_qty,
                order_id,
                PositionAction::CloseLong,
            ));
        } else if init_qty < 0 {
            let qty = -init_qty;
            let order_id = broker.place_market_order(info, Direction::Buy, qty).await?;
            orders.push(EnsureOrder::trade(
                EnsureOrderKind::Buy,
                qty,
                order_id,
                PositionAction::CloseShort,
            ));
        }
        Ok(0)
    }

    #[allow(clippy::too_many_arguments)]
    async fn refresh_stops(
        &self,
        broker: &dyn BrokerAdapter,
        info: &InstrumentInfo,
        final_stops: &[StopOrder],
        final_qty: Lots,
        stop_price: Option<Decimal>,
        take_price: Option<Decimal>,
        orders: &mut Vec<EnsureOrder>,
    ) -> TradingResult<()> {
        broker.cancel_stop_orders(final_stops).await?;

        let direction = if final_qty > 0 {
            Direction::Sell
        } else if final_qty < 0 {
            Direction::Buy
        } else {
            info!(instrument = %info.id, "position is flat, no stop orders to install");
            return Ok(());
        };
        let qty = final_qty.abs();

        if let Some(sp) = stop_price {
            let order_id = broker
                .place_stop_loss_order(info, direction, qty, sp)
                .await?;
            orders.push(EnsureOrder::stop(EnsureOrderKind::StopLoss, qty, order_id, sp));
        }
        if let Some(tp) = take_price {
            let order_id = broker
                .place_take_profit_order(info, direction, qty, tp)
                .await?;
            orders.push(EnsureOrder::stop(EnsureOrderKind::TakeProfit, qty, order_id, tp));
        }
        Ok(())
    }
}

/// True when the currently observed stop orders don't match the requested
/// stop/take prices, or there's more than one of either kind (spec §4.3).
/// `None` is treated as a value distinct from any price, not "don't care".
fn stops_need_update(
    stops: &[StopOrder],
    stop_price: Option<Decimal>,
    take_price: Option<Decimal>,
) -> bool {
    let mut current_stop: Option<Decimal> = None;
    let mut seen_stop = false;
    let mut current_take: Option<Decimal> = None;
    let mut seen_take = false;

    for stop in stops {
        match stop.order_type {
            StopOrderKind::StopLoss => {
                if seen_stop {
                    info!("stop orders need update: more than one stop-loss order found");
                    return true;
                }
                seen_stop = true;
                current_stop = stop.stop_price;
            }
            StopOrderKind::TakeProfit => {
                if seen_take {
                    info!("stop orders need update: more than one take-profit order found");
                    return true;
                }
                seen_take = true;
                current_take = stop.stop_price;
            }
        }
    }

    stop_price != current_stop || take_price != current_take
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{Instrument, InstrumentInfo, InstrumentType};
    use rust_decimal_macros::dec;

    fn stop(kind: StopOrderKind, price: Decimal) -> StopOrder {
        StopOrder {
            order_id: "x".into(),
            order_type: kind,
            direction: Direction::Sell,
            quantity: 1,
            stop_price: Some(price),
        }
    }

    #[test]
    fn idempotent_when_single_matching_stop_and_take() {
        let stops = vec![
            stop(StopOrderKind::StopLoss, dec!(95)),
            stop(StopOrderKind::TakeProfit, dec!(110)),
        ];
        assert!(!stops_need_update(&stops, Some(dec!(95)), Some(dec!(110))));
    }

    #[test]
    fn duplicate_stop_loss_triggers_refresh_even_if_prices_match() {
        let stops = vec![
            stop(StopOrderKind::StopLoss, dec!(95)),
            stop(StopOrderKind::StopLoss, dec!(95)),
        ];
        assert!(stops_need_update(&stops, Some(dec!(95)), None));
    }

    #[test]
    fn differing_price_triggers_refresh() {
        let stops = vec![stop(StopOrderKind::StopLoss, dec!(90))];
        assert!(stops_need_update(&stops, Some(dec!(95)), None));
    }

    #[test]
    fn absent_request_differs_from_any_present_stop() {
        let stops = vec![stop(StopOrderKind::StopLoss, dec!(90))];
        assert!(stops_need_update(&stops, None, None));
    }

    #[allow(dead_code)]
    fn sample_info() -> InstrumentInfo {
        InstrumentInfo {
            id: Instrument::new("SBER", "TQBR"),
            name: "Sberbank".into(),
            kind: InstrumentType::Share,
            currency: "RUB".into(),
            lot_size: dec!(1),
            min_price_step: dec!(0.01),
            margin_long: Some(dec!(50)),
            margin_short: Some(dec!(50)),
        }
    }
}
