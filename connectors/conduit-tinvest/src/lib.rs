//! Tinkoff Invest (TInvest) gRPC broker connector (spec §6 broker backend
//! `tinvest`).
//!
//! Implements [`conduit_broker::BrokerAdapter`] against the subset of the
//! TInvest API described in `proto/tinvest.proto`. Unlike [`conduit-finam`],
//! this broker exposes a genuine max-lots primitive (`GetMaxLots`), so
//! `max_lots_for_direction` is overridden here rather than left to the
//! balance/margin fallback (spec §9 Open Question (a); see DESIGN.md).

mod grpc {
    tonic::include_proto!("conduit.tinvest.v1");
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_broker::BrokerAdapter;
use conduit_core::{
    Direction, EnsureOrder, ErrorCode, Fill, Instrument, InstrumentInfo, InstrumentType, Lots,
    Position, StopOrder, StopOrderKind, TradingError, TradingResult,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::info;

use grpc::instruments_client::InstrumentsClient;
use grpc::market_data_client::MarketDataClient;
use grpc::operations_client::OperationsClient;
use grpc::orders_client::OrdersClient;
use grpc::stop_orders_client::StopOrdersClient;
use grpc::{
    CancelStopOrderRequest, GetInstrumentRequest, GetLastPricesRequest, GetMaxLotsRequest,
    GetOrderStateRequest, GetPortfolioRequest, GetPositionsRequest, GetStopOrdersRequest,
    InstrumentType as WireInstrumentType, OrderDirection, OrderType as WireOrderType,
    PostOrderRequest, PostStopOrderRequest, Quotation, StopOrderDirection, StopOrderType,
};

const INVEST_GRPC_API: &str = "https://invest-public-api.tinkoff.ru:443";
const INVEST_GRPC_API_SANDBOX: &str = "https://sandbox-invest-public-api.tinkoff.ru:443";
const BROKER_NAME: &str = "tinvest";

/// `{token, account_id, sandbox_mode?}`, the `broker.config` shape for
/// `name: tinvest` accounts.
#[derive(Debug, Deserialize)]
pub struct TInvestConfig {
    pub token: String,
    pub account_id: String,
    #[serde(default)]
    pub sandbox_mode: bool,
}

impl TryFrom<serde_json::Value> for TInvestConfig {
    type Error = TradingError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid tinvest broker config: {err}")))
    }
}

fn quotation_to_decimal(q: &Quotation) -> Decimal {
    Decimal::from(q.units) + Decimal::new(q.nano as i64, 9)
}

fn decimal_to_quotation(value: Decimal) -> Quotation {
    let units = value.trunc().to_i64().unwrap_or(0);
    let nano = ((value - value.trunc()) * Decimal::new(1_000_000_000, 0))
        .to_i32()
        .unwrap_or(0);
    Quotation { units, nano }
}

fn map_instrument_type(wire: i32) -> InstrumentType {
    match wire {
        x if x == WireInstrumentType::Share as i32 => InstrumentType::Share,
        x if x == WireInstrumentType::Futures as i32 => InstrumentType::Future,
        x if x == WireInstrumentType::Bond as i32 => InstrumentType::Bond,
        x if x == WireInstrumentType::Etf as i32 => InstrumentType::Etf,
        x if x == WireInstrumentType::Currency as i32 => InstrumentType::Currency,
        _ => InstrumentType::Other,
    }
}

/// `BrokerAdapter` implementation talking to the Tinkoff Invest API over gRPC.
pub struct TInvestBroker {
    account_id: String,
    token: String,
    instruments: InstrumentsClient<Channel>,
    operations: OperationsClient<Channel>,
    market_data: MarketDataClient<Channel>,
    orders: OrdersClient<Channel>,
    stop_orders: StopOrdersClient<Channel>,
}

impl TInvestBroker {
    pub fn connect(config: TInvestConfig) -> TradingResult<Self> {
        let endpoint = if config.sandbox_mode {
            INVEST_GRPC_API_SANDBOX
        } else {
            INVEST_GRPC_API
        };
        Self::connect_to(config, endpoint)
    }

    /// Connects to an arbitrary endpoint, for tests that substitute a mock
    /// gRPC server.
    pub fn connect_to(config: TInvestConfig, endpoint: &str) -> TradingResult<Self> {
        let endpoint = Endpoint::from_shared(endpoint.to_string())
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid tinvest endpoint: {err}")))?
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10));
        let channel = endpoint.connect_lazy();

        Ok(Self {
            account_id: config.account_id,
            token: config.token,
            instruments: InstrumentsClient::new(channel.clone()),
            operations: OperationsClient::new(channel.clone()),
            market_data: MarketDataClient::new(channel.clone()),
            orders: OrdersClient::new(channel.clone()),
            stop_orders: StopOrdersClient::new(channel),
        })
    }

    pub fn from_account_config(config: serde_json::Value) -> TradingResult<Self> {
        Self::connect(TInvestConfig::try_from(config)?)
    }

    fn authed<T>(&self, message: T) -> TradingResult<Request<T>> {
        let mut request = Request::new(message);
        let value = MetadataValue::try_from(self.token.as_str())
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid tinvest token: {err}")))?;
        request.metadata_mut().insert("authorization", value);
        Ok(request)
    }

    fn wrap_status(&self, method: &str, status: Status) -> TradingError {
        TradingError::broker_request(
            BROKER_NAME,
            status.code().to_string(),
            format!("tinvest {method} failed ({}): {}", status.code(), status.message()),
        )
    }

    /// This connector addresses instruments by FIGI, carried in
    /// `Instrument::ticker`; `class_code` is unused (spec §9 Open Question
    /// (b) territory — broker-specific addressing is expected to vary).
    fn figi(instrument: &Instrument) -> &str {
        &instrument.ticker
    }
}

#[async_trait]
impl BrokerAdapter for TInvestBroker {
    fn broker_name(&self) -> &str {
        BROKER_NAME
    }

    async fn get_instrument_info(&self, instrument: &Instrument) -> TradingResult<Option<InstrumentInfo>> {
        let figi = Self::figi(instrument).to_string();
        let response = match self
            .instruments
            .clone()
            .get_instrument(self.authed(GetInstrumentRequest { figi: figi.clone() })?)
            .await
        {
            Ok(response) => response.into_inner(),
            Err(status) if status.code() == tonic::Code::NotFound => return Ok(None),
            Err(status) => return Err(self.wrap_status("GetInstrument", status)),
        };

        let basic_asset_size = if response.has_basic_asset_size {
            response
                .basic_asset_size
                .as_ref()
                .map(quotation_to_decimal)
                .unwrap_or(Decimal::ONE)
        } else {
            Decimal::ONE
        };
        let lot_size = Decimal::from(response.lot) * basic_asset_size;
        let min_price_step = response
            .min_price_increment
            .as_ref()
            .map(quotation_to_decimal)
            .unwrap_or(Decimal::ZERO);

        Ok(Some(InstrumentInfo {
            id: instrument.clone(),
            name: response.name,
            kind: map_instrument_type(response.r#type),
            currency: response.currency,
            lot_size,
            min_price_step,
            // Upstream exposes no per-lot margin figures for this broker;
            // `max_lots_for_direction` carries the sizing cap instead.
            margin_long: None,
            margin_short: None,
        }))
    }

    async fn get_position(&self, info: &InstrumentInfo) -> TradingResult<Option<Position>> {
        let figi = Self::figi(&info.id);
        let portfolio = self
            .operations
            .clone()
            .get_portfolio(self.authed(GetPortfolioRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetPortfolio", status))?
            .into_inner();

        for position in portfolio.positions {
            if position.figi != figi {
                continue;
            }
            let quantity = position
                .quantity
                .as_ref()
                .map(quotation_to_decimal)
                .unwrap_or(Decimal::ZERO)
                .trunc()
                .to_i64()
                .unwrap_or(0);
            if quantity == 0 {
                return Ok(None);
            }
            return Ok(Some(Position {
                instrument: info.id.clone(),
                quantity,
                average_price: position
                    .average_position_price
                    .as_ref()
                    .map(quotation_to_decimal)
                    .unwrap_or(Decimal::ZERO),
            }));
        }
        Ok(None)
    }

    async fn get_money_balance(&self, currency: &str) -> TradingResult<Decimal> {
        let positions = self
            .operations
            .clone()
            .get_positions(self.authed(GetPositionsRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetPositions", status))?
            .into_inner();

        Ok(positions
            .money
            .iter()
            .find(|m| m.currency == currency)
            .and_then(|m| m.amount.as_ref())
            .map(quotation_to_decimal)
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_last_price(&self, info: &InstrumentInfo) -> TradingResult<Decimal> {
        let figi = Self::figi(&info.id).to_string();
        let response = self
            .market_data
            .clone()
            .get_last_prices(self.authed(GetLastPricesRequest { figi: vec![figi] })?)
            .await
            .map_err(|status| self.wrap_status("GetLastPrices", status))?
            .into_inner();

        response
            .last_prices
            .first()
            .and_then(|p| p.price.as_ref())
            .map(quotation_to_decimal)
            .ok_or_else(|| TradingError::new(ErrorCode::NoPriceData, format!("no price data available for {}", info.id)))
    }

    async fn max_lots_for_direction(&self, info: &InstrumentInfo, direction: Direction) -> TradingResult<Option<Lots>> {
        let response = self
            .orders
            .clone()
            .get_max_lots(self.authed(GetMaxLotsRequest {
                account_id: self.account_id.clone(),
                instrument_id: Self::figi(&info.id).to_string(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetMaxLots", status))?
            .into_inner();

        Ok(Some(match direction {
            Direction::Buy => response.buy_max_lots,
            Direction::Sell => response.sell_max_lots,
        }))
    }

    async fn place_market_order(&self, info: &InstrumentInfo, direction: Direction, quantity: Lots) -> TradingResult<String> {
        let response = self
            .orders
            .clone()
            .post_order(self.authed(PostOrderRequest {
                account_id: self.account_id.clone(),
                figi: Self::figi(&info.id).to_string(),
                quantity,
                direction: wire_order_direction(direction) as i32,
                order_type: WireOrderType::Market as i32,
            })?)
            .await
            .map_err(|status| self.wrap_status("PostOrder", status))?
            .into_inner();
        info!(order_id = %response.order_id, %direction, quantity, instrument = %info.id, "tinvest market order placed");
        Ok(response.order_id)
    }

    async fn place_stop_loss_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        stop_price: Decimal,
    ) -> TradingResult<String> {
        self.place_stop(info, direction, quantity, stop_price, StopOrderType::StopLoss, "stop loss")
            .await
    }

    async fn place_take_profit_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        target_price: Decimal,
    ) -> TradingResult<String> {
        self.place_stop(info, direction, quantity, target_price, StopOrderType::TakeProfit, "take profit")
            .await
    }

    async fn cancel_stop_orders(&self, orders: &[StopOrder]) -> TradingResult<()> {
        let mut client = self.stop_orders.clone();
        for order in orders {
            client
                .cancel_stop_order(self.authed(CancelStopOrderRequest {
                    account_id: self.account_id.clone(),
                    stop_order_id: order.order_id.clone(),
                })?)
                .await
                .map_err(|status| self.wrap_status("CancelStopOrder", status))?;
            info!(stop_order_id = %order.order_id, "tinvest stop order cancelled");
        }
        Ok(())
    }

    async fn get_current_stop_orders(&self, info: &InstrumentInfo) -> TradingResult<Vec<StopOrder>> {
        let figi = Self::figi(&info.id);
        let response = self
            .stop_orders
            .clone()
            .get_stop_orders(self.authed(GetStopOrdersRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetStopOrders", status))?
            .into_inner();

        Ok(response
            .stop_orders
            .into_iter()
            .filter(|order| order.figi == figi)
            .map(|order| StopOrder {
                order_id: order.stop_order_id,
                order_type: if order.stop_order_type == StopOrderType::StopLoss as i32 {
                    StopOrderKind::StopLoss
                } else {
                    StopOrderKind::TakeProfit
                },
                direction: if order.direction == StopOrderDirection::Sell as i32 {
                    Direction::Sell
                } else {
                    Direction::Buy
                },
                quantity: order
                    .lots_requested
                    .as_ref()
                    .map(quotation_to_decimal)
                    .unwrap_or(Decimal::ZERO)
                    .trunc()
                    .to_i64()
                    .unwrap_or(0),
                stop_price: order.stop_price.as_ref().map(quotation_to_decimal),
            })
            .collect())
    }

    async fn pull_ensure_orders_result(&self, mut orders: Vec<EnsureOrder>, _info: &InstrumentInfo) -> TradingResult<Vec<EnsureOrder>> {
        let mut client = self.orders.clone();
        for order in &mut orders {
            if !order.kind.is_trade_leg() {
                continue;
            }
            let state = client
                .get_order_state(self.authed(GetOrderStateRequest {
                    account_id: self.account_id.clone(),
                    order_id: order.order_id.clone(),
                })?)
                .await
                .map_err(|status| {
                    if status.code() == tonic::Code::NotFound {
                        TradingError::order_trade_not_found(&order.order_id)
                    } else {
                        self.wrap_status("GetOrderState", status)
                    }
                })?
                .into_inner();
            let price = state.average_position_price.as_ref().map(quotation_to_decimal).unwrap_or(Decimal::ZERO);
            let date = DateTime::<Utc>::from_timestamp(state.order_date_seconds, 0).unwrap_or_else(Utc::now);
            order.fill = Some(Fill { date, price });
        }
        Ok(orders)
    }
}

impl TInvestBroker {
    async fn place_stop(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        price: Decimal,
        kind: StopOrderType,
        label: &str,
    ) -> TradingResult<String> {
        let response = self
            .stop_orders
            .clone()
            .post_stop_order(self.authed(PostStopOrderRequest {
                account_id: self.account_id.clone(),
                figi: Self::figi(&info.id).to_string(),
                quantity,
                stop_price: Some(decimal_to_quotation(price)),
                direction: wire_stop_direction(direction) as i32,
                stop_order_type: kind as i32,
            })?)
            .await
            .map_err(|status| self.wrap_status("PostStopOrder", status))?
            .into_inner();
        info!(stop_order_id = %response.stop_order_id, %direction, quantity, price = %price, instrument = %info.id, "tinvest {label} order placed");
        Ok(response.stop_order_id)
    }
}

fn wire_order_direction(direction: Direction) -> OrderDirection {
    match direction {
        Direction::Buy => OrderDirection::Buy,
        Direction::Sell => OrderDirection::Sell,
    }
}

fn wire_stop_direction(direction: Direction) -> StopOrderDirection {
    match direction {
        Direction::Buy => StopOrderDirection::Buy,
        Direction::Sell => StopOrderDirection::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quotation_round_trips_through_decimal() {
        let q = Quotation { units: 95, nano: 500_000_000 };
        assert_eq!(quotation_to_decimal(&q), dec!(95.5));
    }

    #[test]
    fn decimal_round_trips_through_quotation() {
        let q = decimal_to_quotation(dec!(12.25));
        assert_eq!(q.units, 12);
        assert_eq!(q.nano, 250_000_000);
    }

    #[test]
    fn negative_decimal_round_trips() {
        let q = decimal_to_quotation(dec!(-3.5));
        let back = quotation_to_decimal(&q);
        assert_eq!(back, dec!(-3.5));
    }

    #[test]
    fn maps_known_instrument_types() {
        assert_eq!(map_instrument_type(WireInstrumentType::Share as i32), InstrumentType::Share);
        assert_eq!(map_instrument_type(WireInstrumentType::Futures as i32), InstrumentType::Future);
        assert_eq!(map_instrument_type(99), InstrumentType::Other);
    }
}
