use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    Direction, EnsureOrder, InstrumentInfo, Instrument, Lots, Position, StopOrder, TradingError,
    TradingResult,
};
use rust_decimal::Decimal;
use tracing::warn;

/// Capability abstracting one brokerage account's RPC surface (spec §4.1).
///
/// Implementors map every method onto the broker's own wire protocol
/// (gRPC, REST, ...). `Reconciler` depends only on this trait, never on a
/// concrete broker, per the capability-dispatch design note (spec §9).
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Human-readable name used in logs/notifications, e.g. `"finam"`.
    fn broker_name(&self) -> &str;

    async fn get_instrument_info(&self, instrument: &Instrument) -> TradingResult<Option<InstrumentInfo>>;

    async fn get_position(&self, info: &InstrumentInfo) -> TradingResult<Option<Position>>;

    async fn get_money_balance(&self, currency: &str) -> TradingResult<Decimal>;

    async fn get_last_price(&self, info: &InstrumentInfo) -> TradingResult<Decimal>;

    async fn place_market_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
    ) -> TradingResult<String>;

    async fn place_stop_loss_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        stop_price: Decimal,
    ) -> TradingResult<String>;

    async fn place_take_profit_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        target_price: Decimal,
    ) -> TradingResult<String>;

    async fn cancel_stop_orders(&self, orders: &[StopOrder]) -> TradingResult<()>;

    async fn get_current_stop_orders(&self, info: &InstrumentInfo) -> TradingResult<Vec<StopOrder>>;

    async fn pull_ensure_orders_result(
        &self,
        orders: Vec<EnsureOrder>,
        info: &InstrumentInfo,
    ) -> TradingResult<Vec<EnsureOrder>>;

    /// Broker-native "how many lots could I buy/sell right now" primitive,
    /// when the wire protocol exposes one. Spec §9 Open Question (a): most
    /// adapters don't have this, so the default falls back to `None` and
    /// `calculate_position_size` uses the balance/margin computation instead.
    /// Override only when the broker genuinely exposes such a call; keep the
    /// fallback explicit rather than silently assuming it exists everywhere.
    async fn max_lots_for_direction(
        &self,
        _info: &InstrumentInfo,
        _direction: Direction,
    ) -> TradingResult<Option<Lots>> {
        Ok(None)
    }

    /// Poll `get_position` until it matches `expected_qty`, or fail with
    /// `PositionSettlementTimeout` (spec §4.1). Provided as a default method
    /// since the polling loop itself is broker-agnostic; adapters only need
    /// to implement `get_position` correctly.
    async fn get_position_waiting_for_settlement(
        &self,
        info: &InstrumentInfo,
        expected_qty: Lots,
        max_attempts: u32,
        delay: Duration,
    ) -> TradingResult<Option<Position>> {
        let mut last_seen: Option<Position> = None;
        for attempt in 0..max_attempts.max(1) {
            let position = self.get_position(info).await?;
            let settled = match &position {
                Some(p) => p.quantity == expected_qty && (!p.average_price.is_zero() || expected_qty == 0),
                None => expected_qty == 0,
            };
            if settled {
                return Ok(position);
            }
            last_seen = position;
            if attempt + 1 < max_attempts.max(1) {
                tokio::time::sleep(delay).await;
            }
        }
        warn!(
            broker = self.broker_name(),
            instrument = %info.id,
            expected_qty,
            ?last_seen,
            "position settlement timed out"
        );
        Err(TradingError::settlement_timeout(expected_qty, max_attempts))
    }
}

/// Default polling parameters mandated by spec §4.1.
pub const DEFAULT_SETTLEMENT_ATTEMPTS: u32 = 20;
pub const DEFAULT_SETTLEMENT_DELAY: Duration = Duration::from_millis(250);
