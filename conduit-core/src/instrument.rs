use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Broker-specific identifier: a ticker plus a class/board code, e.g. a
/// MOEX-style `SBER@TQBR` or a futures `RIZ5@SPBFUT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Instrument {
    pub ticker: String,
    pub class_code: String,
}

impl Instrument {
    pub fn new(ticker: impl Into<String>, class_code: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            class_code: class_code.into(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ticker, self.class_code)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid instrument format, expected 'ticker@class'")]
pub struct InstrumentParseError;

impl FromStr for Instrument {
    type Err = InstrumentParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (ticker, class_code) = value.split_once('@').ok_or(InstrumentParseError)?;
        if ticker.is_empty() || class_code.is_empty() {
            return Err(InstrumentParseError);
        }
        Ok(Self::new(ticker, class_code))
    }
}

/// Accepts either a `"TICKER@CLASS"` JSON string or an
/// `{ "ticker": ..., "class_code": ... }` object, per spec §6.
impl<'de> Deserialize<'de> for Instrument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Obj { ticker: String, class_code: String },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Obj { ticker, class_code } => Ok(Instrument::new(ticker, class_code)),
        }
    }
}

/// Broker-reported instrument class, e.g. equity vs. future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Share,
    Future,
    Currency,
    Bond,
    Etf,
    Other,
}

/// Static metadata resolved once per reconciliation from `BrokerAdapter::get_instrument_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub id: Instrument,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstrumentType,
    pub currency: String,
    /// Lot size; must be >= 0 per spec §3.
    pub lot_size: Decimal,
    /// Minimum price step; must be > 0 per spec §3.
    pub min_price_step: Decimal,
    pub margin_long: Option<Decimal>,
    pub margin_short: Option<Decimal>,
}

impl InstrumentInfo {
    /// Per-lot margin requirement for opening in `direction`.
    pub fn margin_per_lot(&self, direction: crate::Direction) -> Option<Decimal> {
        match direction {
            crate::Direction::Buy => self.margin_long,
            crate::Direction::Sell => self.margin_short,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_at_class() {
        let instrument: Instrument = "SBER@TQBR".parse().unwrap();
        assert_eq!(instrument.ticker, "SBER");
        assert_eq!(instrument.class_code, "TQBR");
        assert_eq!(instrument.to_string(), "SBER@TQBR");
    }

    #[test]
    fn rejects_missing_class() {
        assert!("SBER".parse::<Instrument>().is_err());
        assert!("@TQBR".parse::<Instrument>().is_err());
    }

    #[test]
    fn deserializes_from_string_or_object() {
        let from_str: Instrument = serde_json::from_str("\"SBER@TQBR\"").unwrap();
        let from_obj: Instrument =
            serde_json::from_str(r#"{"ticker":"SBER","class_code":"TQBR"}"#).unwrap();
        assert_eq!(from_str, from_obj);
    }
}

impl PartialEq for InstrumentInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
