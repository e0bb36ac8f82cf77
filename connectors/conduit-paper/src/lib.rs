//! In-memory paper broker: a real, usable `BrokerAdapter` that fills orders
//! immediately at a configured last price instead of talking to a live
//! brokerage. Configured entirely from the account's `broker.config` JSON
//! blob, so it needs no network access or credentials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conduit_broker::BrokerAdapter;
use conduit_core::{
    Direction, EnsureOrder, ErrorCode, Fill, Instrument, InstrumentInfo, Lots, Position,
    StopOrder, StopOrderKind, TradingError, TradingResult,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

/// `{balances: {<currency>: <amount>}, instruments: {<"TICKER@CLASS">: {...}}, prices: {<"TICKER@CLASS">: <price>}}`,
/// the `broker.config` shape for `name: paper` accounts.
#[derive(Debug, Deserialize)]
pub struct PaperConfig {
    #[serde(default)]
    pub balances: HashMap<String, Decimal>,
    #[serde(default)]
    pub instruments: HashMap<String, PaperInstrument>,
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperInstrument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: conduit_core::InstrumentType,
    pub currency: String,
    pub lot_size: Decimal,
    pub min_price_step: Decimal,
    pub margin_long: Option<Decimal>,
    pub margin_short: Option<Decimal>,
}

impl TryFrom<serde_json::Value> for PaperConfig {
    type Error = TradingError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid paper broker config: {err}")))
    }
}

struct StopEntry {
    instrument: Instrument,
    order: StopOrder,
}

#[derive(Default)]
struct State {
    positions: HashMap<Instrument, Position>,
    stop_orders: HashMap<String, StopEntry>,
    balances: HashMap<String, Decimal>,
    prices: HashMap<Instrument, Decimal>,
    fills: HashMap<String, Fill>,
}

/// In-process paper trading account. Fills every market order at the
/// currently configured last price and settles the position synchronously,
/// so `get_position_waiting_for_settlement` always returns on its first poll.
pub struct PaperBroker {
    instruments: HashMap<Instrument, InstrumentInfo>,
    state: Mutex<State>,
    next_order_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(config: PaperConfig) -> Self {
        let mut instruments = HashMap::new();
        for (key, def) in config.instruments {
            let Ok(instrument) = key.parse::<Instrument>() else {
                continue;
            };
            instruments.insert(
                instrument.clone(),
                InstrumentInfo {
                    id: instrument,
                    name: def.name,
                    kind: def.kind,
                    currency: def.currency,
                    lot_size: def.lot_size,
                    min_price_step: def.min_price_step,
                    margin_long: def.margin_long,
                    margin_short: def.margin_short,
                },
            );
        }

        let mut prices = HashMap::new();
        for (key, price) in config.prices {
            if let Ok(instrument) = key.parse::<Instrument>() {
                prices.insert(instrument, price);
            }
        }

        Self {
            instruments,
            state: Mutex::new(State {
                balances: config.balances,
                prices,
                ..State::default()
            }),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn from_account_config(config: serde_json::Value) -> TradingResult<Arc<Self>> {
        Ok(Arc::new(Self::new(PaperConfig::try_from(config)?)))
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn broker_name(&self) -> &str {
        "paper"
    }

    async fn get_instrument_info(&self, instrument: &Instrument) -> TradingResult<Option<InstrumentInfo>> {
        Ok(self.instruments.get(instrument).cloned())
    }

    async fn get_position(&self, info: &InstrumentInfo) -> TradingResult<Option<Position>> {
        Ok(self.state.lock().await.positions.get(&info.id).cloned())
    }

    async fn get_money_balance(&self, currency: &str) -> TradingResult<Decimal> {
        Ok(self
            .state
            .lock()
            .await
            .balances
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_last_price(&self, info: &InstrumentInfo) -> TradingResult<Decimal> {
        self.state
            .lock()
            .await
            .prices
            .get(&info.id)
            .copied()
            .ok_or_else(|| TradingError::new(ErrorCode::NoPriceData, format!("no paper price seeded for {}", info.id)))
    }

    async fn place_market_order(&self, info: &InstrumentInfo, direction: Direction, quantity: Lots) -> TradingResult<String> {
        let price = self.get_last_price(info).await?;
        let order_id = self.next_id("paper-order");
        let signed = match direction {
            Direction::Buy => quantity,
            Direction::Sell => -quantity,
        };

        let mut state = self.state.lock().await;
        let position = state.positions.entry(info.id.clone()).or_insert(Position {
            instrument: info.id.clone(),
            quantity: 0,
            average_price: price,
        });
        position.quantity += signed;
        position.average_price = price;
        if position.quantity == 0 {
            state.positions.remove(&info.id);
        }
        state.fills.insert(order_id.clone(), Fill { date: Utc::now(), price });

        info!(order_id = %order_id, %direction, quantity, "paper market order filled");
        Ok(order_id)
    }

    async fn place_stop_loss_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        stop_price: Decimal,
    ) -> TradingResult<String> {
        let order_id = self.next_id("paper-stop");
        let mut state = self.state.lock().await;
        state.stop_orders.insert(
            order_id.clone(),
            StopEntry {
                instrument: info.id.clone(),
                order: StopOrder {
                    order_id: order_id.clone(),
                    order_type: StopOrderKind::StopLoss,
                    direction,
                    quantity,
                    stop_price: Some(stop_price),
                },
            },
        );
        Ok(order_id)
    }

    async fn place_take_profit_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        target_price: Decimal,
    ) -> TradingResult<String> {
        let order_id = self.next_id("paper-stop");
        let mut state = self.state.lock().await;
        state.stop_orders.insert(
            order_id.clone(),
            StopEntry {
                instrument: info.id.clone(),
                order: StopOrder {
                    order_id: order_id.clone(),
                    order_type: StopOrderKind::TakeProfit,
                    direction,
                    quantity,
                    stop_price: Some(target_price),
                },
            },
        );
        Ok(order_id)
    }

    async fn cancel_stop_orders(&self, orders: &[StopOrder]) -> TradingResult<()> {
        let mut state = self.state.lock().await;
        for order in orders {
            state.stop_orders.remove(&order.order_id);
        }
        Ok(())
    }

    async fn get_current_stop_orders(&self, info: &InstrumentInfo) -> TradingResult<Vec<StopOrder>> {
        Ok(self
            .state
            .lock()
            .await
            .stop_orders
            .values()
            .filter(|entry| entry.instrument == info.id)
            .map(|entry| entry.order.clone())
            .collect())
    }

    async fn pull_ensure_orders_result(
        &self,
        mut orders: Vec<EnsureOrder>,
        _info: &InstrumentInfo,
    ) -> TradingResult<Vec<EnsureOrder>> {
        let state = self.state.lock().await;
        for order in &mut orders {
            if !order.kind.is_trade_leg() {
                continue;
            }
            order.fill = Some(
                *state
                    .fills
                    .get(&order.order_id)
                    .ok_or_else(|| TradingError::order_trade_not_found(&order.order_id))?,
            );
        }
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::InstrumentType;
    use rust_decimal_macros::dec;

    fn instrument_info() -> InstrumentInfo {
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

    fn broker_with_price(price: Decimal) -> PaperBroker {
        let mut prices = HashMap::new();
        prices.insert("SBER@TQBR".to_string(), price);
        let mut instruments = HashMap::new();
        instruments.insert(
            "SBER@TQBR".to_string(),
            PaperInstrument {
                name: "Sberbank".into(),
                kind: InstrumentType::Share,
                currency: "RUB".into(),
                lot_size: dec!(1),
                min_price_step: dec!(0.01),
                margin_long: Some(dec!(50)),
                margin_short: Some(dec!(50)),
            },
        );
        PaperBroker::new(PaperConfig {
            balances: HashMap::new(),
            instruments,
            prices,
        })
    }

    #[tokio::test]
    async fn market_buy_opens_a_settled_long_position() {
        let broker = broker_with_price(dec!(100));
        let info = instrument_info();
        let order_id = broker.place_market_order(&info, Direction::Buy, 10).await.unwrap();
        let position = broker.get_position(&info).await.unwrap().unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.average_price, dec!(100));

        let orders = vec![EnsureOrder::trade(
            conduit_core::EnsureOrderKind::Buy,
            10,
            order_id,
            conduit_core::PositionAction::OpenLong,
        )];
        let hydrated = broker.pull_ensure_orders_result(orders, &info).await.unwrap();
        assert!(hydrated[0].fill.is_some());
    }

    #[tokio::test]
    async fn closing_a_position_removes_it_entirely() {
        let broker = broker_with_price(dec!(100));
        let info = instrument_info();
        broker.place_market_order(&info, Direction::Buy, 10).await.unwrap();
        broker.place_market_order(&info, Direction::Sell, 10).await.unwrap();
        assert!(broker.get_position(&info).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_removes_only_the_named_stop_orders() {
        let broker = broker_with_price(dec!(100));
        let info = instrument_info();
        let stop_id = broker
            .place_stop_loss_order(&info, Direction::Sell, 10, dec!(90))
            .await
            .unwrap();
        let take_id = broker
            .place_take_profit_order(&info, Direction::Sell, 10, dec!(120))
            .await
            .unwrap();

        let stops = broker.get_current_stop_orders(&info).await.unwrap();
        assert_eq!(stops.len(), 2);

        broker
            .cancel_stop_orders(&[StopOrder {
                order_id: stop_id,
                order_type: StopOrderKind::StopLoss,
                direction: Direction::Sell,
                quantity: 10,
                stop_price: Some(dec!(90)),
            }])
            .await
            .unwrap();

        let remaining = broker.get_current_stop_orders(&info).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].order_id, take_id);
    }
}
