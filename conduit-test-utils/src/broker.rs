use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    Direction, EnsureOrder, ErrorCode, Fill, Instrument, InstrumentInfo, Lots, Position, StopOrder,
    TradingError, TradingResult,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use conduit_broker::BrokerAdapter;

/// Declarative bootstrap for [`MockBroker`], mirroring this codebase's
/// existing mock-exchange config-builder pattern.
#[derive(Clone, Default)]
pub struct MockBrokerConfig {
    instruments: Vec<InstrumentInfo>,
    positions: Vec<Position>,
    balances: Vec<(String, Decimal)>,
    last_prices: Vec<(Instrument, Decimal)>,
    /// Artificial latency on `get_instrument_info`, for tests that need a
    /// reconciliation to still be in flight when a later signal arrives.
    instrument_lookup_delay: Option<Duration>,
    /// Instrument ids that should fail with `InstrumentNotFound`, for
    /// exercising the dispatcher's error-isolation path (spec §8 scenario 6).
    unresolvable_instruments: Vec<Instrument>,
}

impl MockBrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instrument(mut self, info: InstrumentInfo) -> Self {
        self.instruments.push(info);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }

    pub fn with_balance(mut self, currency: impl Into<String>, amount: Decimal) -> Self {
        self.balances.push((currency.into(), amount));
        self
    }

    pub fn with_last_price(mut self, instrument: Instrument, price: Decimal) -> Self {
        self.last_prices.push((instrument, price));
        self
    }

    pub fn with_instrument_lookup_delay(mut self, delay: Duration) -> Self {
        self.instrument_lookup_delay = Some(delay);
        self
    }

    pub fn with_unresolvable_instrument(mut self, instrument: Instrument) -> Self {
        self.unresolvable_instruments.push(instrument);
        self
    }
}

struct Inner {
    instruments: HashMap<Instrument, InstrumentInfo>,
    positions: HashMap<Instrument, Position>,
    stop_orders: HashMap<Instrument, Vec<StopOrder>>,
    balances: HashMap<String, Decimal>,
    last_prices: HashMap<Instrument, Decimal>,
    fills: HashMap<String, Fill>,
    next_order_id: u64,
    instrument_lookup_delay: Option<Duration>,
    unresolvable_instruments: std::collections::HashSet<Instrument>,
}

/// In-memory `BrokerAdapter` for exercising `Reconciler`/`SignalProcessor`
/// without a real broker connection. Orders settle immediately: every
/// market order's fill price is the instrument's current last price, and
/// `average_price` is reset to that price on every trade (this mock does
/// not model weighted cost basis across partial fills).
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MockBroker {
    pub fn new(config: MockBrokerConfig) -> Self {
        let instruments = config
            .instruments
            .into_iter()
            .map(|info| (info.id.clone(), info))
            .collect();
        let positions = config
            .positions
            .into_iter()
            .map(|position| (position.instrument.clone(), position))
            .collect();
        let balances = config.balances.into_iter().collect();
        let last_prices = config.last_prices.into_iter().collect();

        Self {
            inner: Arc::new(Mutex::new(Inner {
                instruments,
                positions,
                stop_orders: HashMap::new(),
                balances,
                last_prices,
                fills: HashMap::new(),
                next_order_id: 0,
                instrument_lookup_delay: config.instrument_lookup_delay,
                unresolvable_instruments: config.unresolvable_instruments.into_iter().collect(),
            })),
        }
    }

    pub async fn set_last_price(&self, instrument: Instrument, price: Decimal) {
        self.inner.lock().await.last_prices.insert(instrument, price);
    }

    pub async fn position(&self, instrument: &Instrument) -> Option<Position> {
        self.inner.lock().await.positions.get(instrument).cloned()
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    fn broker_name(&self) -> &str {
        "mock"
    }

    async fn get_instrument_info(&self, instrument: &Instrument) -> TradingResult<Option<InstrumentInfo>> {
        let delay = {
            let inner = self.inner.lock().await;
            if inner.unresolvable_instruments.contains(instrument) {
                return Ok(None);
            }
            inner.instrument_lookup_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.inner.lock().await.instruments.get(instrument).cloned())
    }

    async fn get_position(&self, info: &InstrumentInfo) -> TradingResult<Option<Position>> {
        Ok(self.inner.lock().await.positions.get(&info.id).cloned())
    }

    async fn get_money_balance(&self, currency: &str) -> TradingResult<Decimal> {
        Ok(self
            .inner
            .lock()
            .await
            .balances
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_last_price(&self, info: &InstrumentInfo) -> TradingResult<Decimal> {
        self.inner
            .lock()
            .await
            .last_prices
            .get(&info.id)
            .copied()
            .ok_or_else(|| TradingError::new(ErrorCode::NoPriceData, format!("no last price for {}", info.id)))
    }

    async fn place_market_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
    ) -> TradingResult<String> {
        let mut inner = self.inner.lock().await;
        let price = *inner
            .last_prices
            .get(&info.id)
            .ok_or_else(|| TradingError::new(ErrorCode::NoPriceData, format!("no last price for {}", info.id)))?;

        let delta = match direction {
            Direction::Buy => quantity,
            Direction::Sell => -quantity,
        };
        let new_quantity = inner
            .positions
            .get(&info.id)
            .map(|p| p.quantity)
            .unwrap_or(0)
            + delta;

        if new_quantity == 0 {
            inner.positions.remove(&info.id);
        } else {
            inner.positions.insert(
                info.id.clone(),
                Position {
                    instrument: info.id.clone(),
                    quantity: new_quantity,
                    average_price: price,
                },
            );
        }

        let order_id = format!("mock-order-{}", inner.next_order_id);
        inner.next_order_id += 1;
        inner.fills.insert(
            order_id.clone(),
            Fill {
                date: chrono::Utc::now(),
                price,
            },
        );
        Ok(order_id)
    }

    async fn place_stop_loss_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        stop_price: Decimal,
    ) -> TradingResult<String> {
        self.place_stop(info, conduit_core::StopOrderKind::StopLoss, direction, quantity, stop_price)
            .await
    }

    async fn place_take_profit_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        target_price: Decimal,
    ) -> TradingResult<String> {
        self.place_stop(info, conduit_core::StopOrderKind::TakeProfit, direction, quantity, target_price)
            .await
    }

    async fn cancel_stop_orders(&self, orders: &[StopOrder]) -> TradingResult<()> {
        let ids: std::collections::HashSet<_> = orders.iter().map(|o| o.order_id.clone()).collect();
        let mut inner = self.inner.lock().await;
        for stops in inner.stop_orders.values_mut() {
            stops.retain(|o| !ids.contains(&o.order_id));
        }
        Ok(())
    }

    async fn get_current_stop_orders(&self, info: &InstrumentInfo) -> TradingResult<Vec<StopOrder>> {
        Ok(self
            .inner
            .lock()
            .await
            .stop_orders
            .get(&info.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn pull_ensure_orders_result(
        &self,
        mut orders: Vec<EnsureOrder>,
        _info: &InstrumentInfo,
    ) -> TradingResult<Vec<EnsureOrder>> {
        let inner = self.inner.lock().await;
        for order in &mut orders {
            if !order.kind.is_trade_leg() {
                continue;
            }
            order.fill = Some(
                *inner
                    .fills
                    .get(&order.order_id)
                    .ok_or_else(|| TradingError::order_trade_not_found(&order.order_id))?,
            );
        }
        Ok(orders)
    }
}

impl MockBroker {
    async fn place_stop(
        &self,
        info: &InstrumentInfo,
        kind: conduit_core::StopOrderKind,
        direction: Direction,
        quantity: Lots,
        price: Decimal,
    ) -> TradingResult<String> {
        let mut inner = self.inner.lock().await;
        let order_id = format!("mock-stop-{}", inner.next_order_id);
        inner.next_order_id += 1;
        inner.stop_orders.entry(info.id.clone()).or_default().push(StopOrder {
            order_id: order_id.clone(),
            order_type: kind,
            direction,
            quantity,
            stop_price: Some(price),
        });
        Ok(order_id)
    }
}
