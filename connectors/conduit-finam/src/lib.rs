//! Finam gRPC broker connector (spec §6 broker backend `finam`).
//!
//! Implements [`conduit_broker::BrokerAdapter`] against the subset of the
//! Finam Trade API described in `proto/finam.proto`, translating every RPC
//! error into the broker-neutral `TradingError::broker_request` shape
//! (spec §11 "Broker-neutral RPC error wrapping").

mod grpc {
    tonic::include_proto!("conduit.finam.v1");
}

use std::str::FromStr;
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

use grpc::accounts_client::AccountsClient;
use grpc::assets_client::AssetsClient;
use grpc::market_data_client::MarketDataClient;
use grpc::orders_client::OrdersClient;
use grpc::{
    CancelOrderRequest, GetAccountRequest, GetAssetParamsRequest, GetAssetRequest,
    GetOrdersRequest, OrderStatus, OrderType as WireOrderType, PlaceOrderRequest, QuoteRequest,
    Side, StopCondition, TradesRequest,
};

const DEFAULT_ENDPOINT: &str = "https://trade-api.finam.ru:443";
const BROKER_NAME: &str = "finam";

/// `{token, account_id}`, the `broker.config` shape for `name: finam` accounts.
#[derive(Debug, Deserialize)]
pub struct FinamConfig {
    pub token: String,
    pub account_id: String,
}

impl TryFrom<serde_json::Value> for FinamConfig {
    type Error = TradingError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid finam broker config: {err}")))
    }
}

/// `BrokerAdapter` implementation talking to the Finam Trade API over gRPC.
/// Every generated client wraps the same lazily-connected `Channel`, so
/// cloning a client per call is cheap (matches the Finam Python SDK's
/// single long-lived `FinamPy` client, minus its thread-local auth cache).
pub struct FinamBroker {
    account_id: String,
    token: String,
    assets: AssetsClient<Channel>,
    accounts: AccountsClient<Channel>,
    market_data: MarketDataClient<Channel>,
    orders: OrdersClient<Channel>,
}

impl FinamBroker {
    pub fn connect(config: FinamConfig) -> TradingResult<Self> {
        Self::connect_to(config, DEFAULT_ENDPOINT)
    }

    /// Connects to an arbitrary endpoint, for tests that substitute a mock
    /// gRPC server.
    pub fn connect_to(config: FinamConfig, endpoint: &str) -> TradingResult<Self> {
        let endpoint = Endpoint::from_shared(endpoint.to_string())
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid finam endpoint: {err}")))?
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10));
        let channel = endpoint.connect_lazy();

        Ok(Self {
            account_id: config.account_id,
            token: config.token,
            assets: AssetsClient::new(channel.clone()),
            accounts: AccountsClient::new(channel.clone()),
            market_data: MarketDataClient::new(channel.clone()),
            orders: OrdersClient::new(channel),
        })
    }

    pub fn from_account_config(config: serde_json::Value) -> TradingResult<Self> {
        Self::connect(FinamConfig::try_from(config)?)
    }

    /// Attaches the bearer token to an outgoing request, mirroring the
    /// original client's per-call `metadata=(self._client.metadata,)`.
    fn authed<T>(&self, message: T) -> TradingResult<Request<T>> {
        let mut request = Request::new(message);
        let value = MetadataValue::try_from(self.token.as_str())
            .map_err(|err| TradingError::new(ErrorCode::ConfigError, format!("invalid finam token: {err}")))?;
        request.metadata_mut().insert("authorization", value);
        Ok(request)
    }

    fn wrap_status(&self, method: &str, status: Status) -> TradingError {
        TradingError::broker_request(
            BROKER_NAME,
            status.code().to_string(),
            format!("finam {method} failed: {}", status.message()),
        )
    }
}

fn parse_decimal(raw: &str, field: &str) -> TradingResult<Decimal> {
    Decimal::from_str(raw).map_err(|err| {
        TradingError::broker_request(BROKER_NAME, "DECIMAL_PARSE_ERROR", format!("invalid {field} {raw:?}: {err}"))
    })
}

fn to_lots(value: Decimal) -> Lots {
    value.trunc().to_i64().unwrap_or(0)
}

fn map_instrument_type(wire: &str) -> InstrumentType {
    match wire {
        "equity" | "share" => InstrumentType::Share,
        "future" | "futures" => InstrumentType::Future,
        "bond" => InstrumentType::Bond,
        "etf" => InstrumentType::Etf,
        "currency" => InstrumentType::Currency,
        _ => InstrumentType::Other,
    }
}

#[async_trait]
impl BrokerAdapter for FinamBroker {
    fn broker_name(&self) -> &str {
        BROKER_NAME
    }

    async fn get_instrument_info(&self, instrument: &Instrument) -> TradingResult<Option<InstrumentInfo>> {
        let symbol = instrument.to_string();
        let mut assets = self.assets.clone();

        let asset = match assets
            .get_asset(self.authed(GetAssetRequest {
                symbol: symbol.clone(),
                account_id: self.account_id.clone(),
            })?)
            .await
        {
            Ok(response) => response.into_inner(),
            Err(status) if status.code() == tonic::Code::NotFound => return Ok(None),
            Err(status) => return Err(self.wrap_status("GetAsset", status)),
        };

        let params = assets
            .get_asset_params(self.authed(GetAssetParamsRequest {
                symbol: symbol.clone(),
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetAssetParams", status))?
            .into_inner();

        let lot_size = parse_decimal(&asset.lot_size, "lot_size")?;
        let min_price_step = if lot_size.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::from(asset.min_step) / lot_size
        };

        Ok(Some(InstrumentInfo {
            id: instrument.clone(),
            name: asset.name,
            kind: map_instrument_type(&asset.r#type),
            currency: params.currency_code,
            lot_size,
            min_price_step,
            margin_long: Some(parse_decimal(&params.long_initial_margin, "long_initial_margin")?),
            margin_short: Some(parse_decimal(&params.short_initial_margin, "short_initial_margin")?),
        }))
    }

    async fn get_position(&self, info: &InstrumentInfo) -> TradingResult<Option<Position>> {
        let symbol = info.id.to_string();
        let account = self
            .accounts
            .clone()
            .get_account(self.authed(GetAccountRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetAccount", status))?
            .into_inner();

        for position in account.positions {
            if position.symbol != symbol {
                continue;
            }
            let quantity = to_lots(parse_decimal(&position.quantity, "position.quantity")?);
            if quantity == 0 {
                return Ok(None);
            }
            return Ok(Some(Position {
                instrument: info.id.clone(),
                quantity,
                average_price: parse_decimal(&position.average_price, "position.average_price")?,
            }));
        }
        Ok(None)
    }

    async fn get_money_balance(&self, _currency: &str) -> TradingResult<Decimal> {
        let account = self
            .accounts
            .clone()
            .get_account(self.authed(GetAccountRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetAccount", status))?
            .into_inner();
        parse_decimal(&account.available_cash, "available_cash")
    }

    async fn get_last_price(&self, info: &InstrumentInfo) -> TradingResult<Decimal> {
        let response = self
            .market_data
            .clone()
            .last_quote(self.authed(QuoteRequest {
                symbol: info.id.to_string(),
            })?)
            .await
            .map_err(|status| self.wrap_status("LastQuote", status))?
            .into_inner();
        if response.last_price.is_empty() {
            return Err(TradingError::new(
                ErrorCode::NoPriceData,
                format!("no last price available for {}", info.id),
            ));
        }
        parse_decimal(&response.last_price, "last_price")
    }

    async fn place_market_order(&self, info: &InstrumentInfo, direction: Direction, quantity: Lots) -> TradingResult<String> {
        let response = self
            .orders
            .clone()
            .place_order(self.authed(PlaceOrderRequest {
                account_id: self.account_id.clone(),
                symbol: info.id.to_string(),
                quantity: quantity.to_string(),
                side: wire_side(direction) as i32,
                r#type: WireOrderType::Market as i32,
                stop_price: String::new(),
                stop_condition: StopCondition::Unspecified as i32,
            })?)
            .await
            .map_err(|status| self.wrap_status("PlaceOrder (market)", status))?
            .into_inner();
        info!(order_id = %response.order_id, %direction, quantity, instrument = %info.id, "finam market order placed");
        Ok(response.order_id)
    }

    async fn place_stop_loss_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        stop_price: Decimal,
    ) -> TradingResult<String> {
        let condition = if direction == Direction::Sell {
            StopCondition::LastDown
        } else {
            StopCondition::LastUp
        };
        self.place_stop_order(info, direction, quantity, stop_price, condition, "stop loss")
            .await
    }

    async fn place_take_profit_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        target_price: Decimal,
    ) -> TradingResult<String> {
        let condition = if direction == Direction::Sell {
            StopCondition::LastUp
        } else {
            StopCondition::LastDown
        };
        self.place_stop_order(info, direction, quantity, target_price, condition, "take profit")
            .await
    }

    async fn cancel_stop_orders(&self, orders: &[StopOrder]) -> TradingResult<()> {
        let mut client = self.orders.clone();
        for order in orders {
            client
                .cancel_order(self.authed(CancelOrderRequest {
                    account_id: self.account_id.clone(),
                    order_id: order.order_id.clone(),
                })?)
                .await
                .map_err(|status| self.wrap_status("CancelOrder", status))?;
            info!(order_id = %order.order_id, "finam order cancelled");
        }
        Ok(())
    }

    async fn get_current_stop_orders(&self, info: &InstrumentInfo) -> TradingResult<Vec<StopOrder>> {
        let symbol = info.id.to_string();
        let response = self
            .orders
            .clone()
            .get_orders(self.authed(GetOrdersRequest {
                account_id: self.account_id.clone(),
            })?)
            .await
            .map_err(|status| self.wrap_status("GetOrders", status))?
            .into_inner();

        let mut stops = Vec::new();
        for order in response.orders {
            if order.status != OrderStatus::Watching as i32 || order.symbol != symbol {
                continue;
            }
            let kind = order.r#type;
            if kind != WireOrderType::Stop as i32 && kind != WireOrderType::StopLimit as i32 {
                continue;
            }

            let side = order.side;
            let condition = order.stop_condition;
            let order_type = if (condition == StopCondition::LastDown as i32 && side == Side::Sell as i32)
                || (condition == StopCondition::LastUp as i32 && side == Side::Buy as i32)
            {
                StopOrderKind::StopLoss
            } else {
                StopOrderKind::TakeProfit
            };

            stops.push(StopOrder {
                order_id: order.order_id,
                order_type,
                direction: if side == Side::Sell as i32 { Direction::Sell } else { Direction::Buy },
                quantity: to_lots(parse_decimal(&order.quantity, "order.quantity")?),
                stop_price: if order.stop_price.is_empty() {
                    None
                } else {
                    Some(parse_decimal(&order.stop_price, "order.stop_price")?)
                },
            });
        }
        Ok(stops)
    }

    async fn pull_ensure_orders_result(&self, mut orders: Vec<EnsureOrder>, _info: &InstrumentInfo) -> TradingResult<Vec<EnsureOrder>> {
        let now = Utc::now();
        let trades = self
            .accounts
            .clone()
            .trades(self.authed(TradesRequest {
                account_id: self.account_id.clone(),
                start_time_seconds: (now - chrono::Duration::days(1)).timestamp(),
                end_time_seconds: (now + chrono::Duration::days(1)).timestamp(),
            })?)
            .await
            .map_err(|status| self.wrap_status("Trades", status))?
            .into_inner()
            .trades;

        for order in &mut orders {
            if !order.kind.is_trade_leg() {
                continue;
            }
            let trade = trades
                .iter()
                .find(|t| t.order_id == order.order_id)
                .ok_or_else(|| TradingError::order_trade_not_found(&order.order_id))?;
            let date = DateTime::<Utc>::from_timestamp(trade.timestamp_seconds, 0).unwrap_or(now);
            order.fill = Some(Fill {
                date,
                price: parse_decimal(&trade.price, "trade.price")?,
            });
        }
        Ok(orders)
    }
}

impl FinamBroker {
    async fn place_stop_order(
        &self,
        info: &InstrumentInfo,
        direction: Direction,
        quantity: Lots,
        price: Decimal,
        condition: StopCondition,
        label: &str,
    ) -> TradingResult<String> {
        let response = self
            .orders
            .clone()
            .place_order(self.authed(PlaceOrderRequest {
                account_id: self.account_id.clone(),
                symbol: info.id.to_string(),
                quantity: quantity.to_string(),
                side: wire_side(direction) as i32,
                r#type: WireOrderType::Stop as i32,
                stop_price: price.to_string(),
                stop_condition: condition as i32,
            })?)
            .await
            .map_err(|status| self.wrap_status("PlaceOrder (stop)", status))?
            .into_inner();
        info!(order_id = %response.order_id, %direction, quantity, price = %price, instrument = %info.id, "finam {label} order placed");
        Ok(response.order_id)
    }
}

fn wire_side(direction: Direction) -> Side {
    match direction {
        Direction::Buy => Side::Buy,
        Direction::Sell => Side::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_instrument_types() {
        assert_eq!(map_instrument_type("share"), InstrumentType::Share);
        assert_eq!(map_instrument_type("futures"), InstrumentType::Future);
        assert_eq!(map_instrument_type("weird"), InstrumentType::Other);
    }

    #[test]
    fn parses_decimal_quantity_strings() {
        let parsed = parse_decimal("12.0000", "quantity").unwrap();
        assert_eq!(to_lots(parsed), 12);
    }

    #[test]
    fn rejects_malformed_decimal_strings() {
        assert!(parse_decimal("not-a-number", "quantity").is_err());
    }
}
