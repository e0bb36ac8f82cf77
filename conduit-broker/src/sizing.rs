use conduit_core::{Direction, InstrumentInfo, Lots, TradingError, TradingResult};
use rust_decimal::Decimal;

use crate::adapter::BrokerAdapter;

/// Position sizing per spec §4.2.
///
/// 1. `cap = (balance + reserve_capital) * leverage_percent / 100`
/// 2. `qty_by_balance` — the broker's max-lots primitive when available,
///    else `floor(balance / margin_per_lot(direction))`.
/// 3. `qty_by_leverage = floor(cap / (last_price * lot_size))`.
/// 4. Result: `max(0, min(qty_by_balance, qty_by_leverage))`.
///
/// The smaller of the two wins deliberately: `qty_by_balance` is a hard
/// margin safety net, `qty_by_leverage` honours the user-declared risk.
pub async fn calculate_position_size(
    broker: &dyn BrokerAdapter,
    info: &InstrumentInfo,
    leverage_percent: Decimal,
    reserve_capital: Decimal,
    direction: Direction,
) -> TradingResult<Lots> {
    let balance = broker.get_money_balance(&info.currency).await?;
    let last_price = broker.get_last_price(info).await?;

    let cap = (balance + reserve_capital) * leverage_percent / Decimal::ONE_HUNDRED;

    let qty_by_balance = match broker.max_lots_for_direction(info, direction).await? {
        Some(max_lots) => max_lots,
        None => match info.margin_per_lot(direction) {
            Some(margin) if margin > Decimal::ZERO => floor_to_lots(balance / margin),
            _ => Lots::MAX,
        },
    };

    if info.lot_size <= Decimal::ZERO {
        return Err(TradingError::new(
            conduit_core::ErrorCode::UnsupportedInstrumentType,
            format!("instrument {} has non-positive lot size {}", info.id, info.lot_size),
        ));
    }
    let per_lot_cost = last_price * info.lot_size;
    let qty_by_leverage = if per_lot_cost > Decimal::ZERO {
        floor_to_lots(cap / per_lot_cost)
    } else {
        0
    };

    Ok(qty_by_balance.min(qty_by_leverage).max(0))
}

fn floor_to_lots(value: Decimal) -> Lots {
    use rust_decimal::prelude::ToPrimitive;
    value.floor().to_i64().unwrap_or(if value.is_sign_negative() {
        Lots::MIN
    } else {
        Lots::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_core::{Direction, EnsureOrder, Instrument, InstrumentType, Position, StopOrder};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct StubBroker {
        balance: Decimal,
        last_price: Decimal,
        max_lots: Option<Lots>,
        order_seq: AtomicI64,
    }

    impl StubBroker {
        fn new(balance: Decimal, last_price: Decimal) -> Self {
            Self {
                balance,
                last_price,
                max_lots: None,
                order_seq: AtomicI64::new(0),
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for StubBroker {
        fn broker_name(&self) -> &str {
            "stub"
        }

        async fn get_instrument_info(
            &self,
            _instrument: &Instrument,
        ) -> TradingResult<Option<conduit_core::InstrumentInfo>> {
            unimplemented!()
        }

        async fn get_position(&self, _info: &conduit_core::InstrumentInfo) -> TradingResult<Option<Position>> {
            unimplemented!()
        }

        async fn get_money_balance(&self, _currency: &str) -> TradingResult<Decimal> {
            Ok(self.balance)
        }

        async fn get_last_price(&self, _info: &conduit_core::InstrumentInfo) -> TradingResult<Decimal> {
            Ok(self.last_price)
        }

        async fn place_market_order(
            &self,
            _info: &conduit_core::InstrumentInfo,
            _direction: Direction,
            _quantity: Lots,
        ) -> TradingResult<String> {
            Ok(format!("order-{}", self.order_seq.fetch_add(1, Ordering::SeqCst)))
        }

        async fn place_stop_loss_order(
            &self,
            _info: &conduit_core::InstrumentInfo,
            _direction: Direction,
            _quantity: Lots,
            _stop_price: Decimal,
        ) -> TradingResult<String> {
            unimplemented!()
        }

        async fn place_take_profit_order(
            &self,
            _info: &conduit_core::InstrumentInfo,
            _direction: Direction,
            _quantity: Lots,
            _target_price: Decimal,
        ) -> TradingResult<String> {
            unimplemented!()
        }

        async fn cancel_stop_orders(&self, _orders: &[StopOrder]) -> TradingResult<()> {
            Ok(())
        }

        async fn get_current_stop_orders(
            &self,
            _info: &conduit_core::InstrumentInfo,
        ) -> TradingResult<Vec<StopOrder>> {
            Ok(Vec::new())
        }

        async fn pull_ensure_orders_result(
            &self,
            orders: Vec<EnsureOrder>,
            _info: &conduit_core::InstrumentInfo,
        ) -> TradingResult<Vec<EnsureOrder>> {
            Ok(orders)
        }

        async fn max_lots_for_direction(
            &self,
            _info: &conduit_core::InstrumentInfo,
            _direction: Direction,
        ) -> TradingResult<Option<Lots>> {
            Ok(self.max_lots)
        }
    }

    fn instrument_info(margin_long: Decimal) -> conduit_core::InstrumentInfo {
        conduit_core::InstrumentInfo {
            id: Instrument::new("SBER", "TQBR"),
            name: "Sberbank".into(),
            kind: InstrumentType::Share,
            currency: "RUB".into(),
            lot_size: dec!(1),
            min_price_step: dec!(0.01),
            margin_long: Some(margin_long),
            margin_short: Some(margin_long),
        }
    }

    #[tokio::test]
    async fn scenario_1_open_fresh_long() {
        let broker = StubBroker::new(dec!(10000), dec!(100));
        let info = instrument_info(dec!(50));
        let qty = calculate_position_size(&broker, &info, dec!(100), dec!(0), Direction::Buy)
            .await
            .unwrap();
        // qty_by_balance = 200, qty_by_leverage = 100 -> min = 100
        assert_eq!(qty, 100);
    }

    #[tokio::test]
    async fn scenario_2_flip_long_to_short_sizing() {
        let broker = StubBroker::new(dec!(5000), dec!(100));
        let info = instrument_info(dec!(50));
        let qty = calculate_position_size(&broker, &info, dec!(50), dec!(0), Direction::Sell)
            .await
            .unwrap();
        // qty_by_balance = floor(5000/50) = 100, qty_by_leverage = floor((5000*0.5)/100) = 25
        assert_eq!(qty, 25);
    }

    #[tokio::test]
    async fn zero_price_yields_zero_quantity() {
        let broker = StubBroker::new(dec!(10000), Decimal::ZERO);
        let info = instrument_info(dec!(50));
        let qty = calculate_position_size(&broker, &info, dec!(100), dec!(0), Direction::Buy)
            .await
            .unwrap();
        assert_eq!(qty, 0);
    }
}
