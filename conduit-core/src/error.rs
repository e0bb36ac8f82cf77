use thiserror::Error;

/// Broker-neutral error categories (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    InstrumentNotFound,
    NoPriceData,
    InvalidPositionDirection,
    PositionSettlementTimeout,
    OrderTradeNotFound,
    BrokerRequestError,
    UnsupportedInstrumentType,
    ConfigError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InstrumentNotFound => "INSTRUMENT_NOT_FOUND",
            ErrorCode::NoPriceData => "NO_PRICE_DATA",
            ErrorCode::InvalidPositionDirection => "INVALID_POSITION_DIRECTION",
            ErrorCode::PositionSettlementTimeout => "POSITION_SETTLEMENT_TIMEOUT",
            ErrorCode::OrderTradeNotFound => "ORDER_TRADE_NOT_FOUND",
            ErrorCode::BrokerRequestError => "BROKER_REQUEST_ERROR",
            ErrorCode::UnsupportedInstrumentType => "UNSUPPORTED_INSTRUMENT_TYPE",
            ErrorCode::ConfigError => "CONFIG_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every `BrokerAdapter`/`Reconciler`/`SignalProcessor` fallible operation
/// returns this error. `source_code` preserves the broker's own error code
/// (e.g. Finam's `FINAM_REQUEST_ERROR`) when `code` is `BrokerRequestError`.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TradingError {
    pub code: ErrorCode,
    pub message: String,
    pub broker: Option<String>,
    pub source_code: Option<String>,
}

impl TradingError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            broker: None,
            source_code: None,
        }
    }

    pub fn broker_request(
        broker: impl Into<String>,
        source_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::BrokerRequestError,
            message: message.into(),
            broker: Some(broker.into()),
            source_code: Some(source_code.into()),
        }
    }

    pub fn instrument_not_found(instrument: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InstrumentNotFound,
            format!("unknown instrument: {instrument}"),
        )
    }

    pub fn settlement_timeout(expected_qty: crate::Lots, attempts: u32) -> Self {
        Self::new(
            ErrorCode::PositionSettlementTimeout,
            format!(
                "position did not settle to expected quantity {expected_qty} after {attempts} attempts"
            ),
        )
    }

    pub fn order_trade_not_found(order_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::OrderTradeNotFound,
            format!("could not locate a fill for order {order_id}"),
        )
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
