use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::Instrument;

/// Desired position state for an instrument, as declared by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Long,
    Short,
    Flat,
}

/// An immutable position-intent instruction received over HTTP (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default = "generate_signal_id")]
    pub signal_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub position: PositionState,
    pub instrument: Instrument,
    pub entry_price: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_entry_time")]
    pub entry_time: Option<DateTime<FixedOffset>>,
    pub stop_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub reserve_capital: Decimal,
    #[serde(default = "default_leverage_percent")]
    pub capital_leverage_percent: Decimal,
}

fn generate_signal_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn default_leverage_percent() -> Decimal {
    Decimal::ONE_HUNDRED
}

/// Parses an ISO-8601 timestamp. If the wire value carries no UTC offset,
/// assigns the server's local offset on ingest, matching spec §6's
/// "`entry_time` without offset is assigned the server's local offset."
fn deserialize_entry_time<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(with_offset));
    }

    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(serde::de::Error::custom)?;
    let local_offset = *Local::now().offset();
    Ok(Some(
        naive
            .and_local_timezone(local_offset)
            .single()
            .ok_or_else(|| serde::de::Error::custom("ambiguous local timestamp"))?,
    ))
}

impl Signal {
    /// Builds a signal with generated id/timestamp, for tests and internal callers.
    pub fn new(instrument: Instrument, position: PositionState) -> Self {
        Self {
            signal_id: generate_signal_id(),
            timestamp: Utc::now(),
            position,
            instrument,
            entry_price: None,
            entry_time: None,
            stop_price: None,
            limit_price: None,
            reserve_capital: Decimal::ZERO,
            capital_leverage_percent: default_leverage_percent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_signal_id_is_eight_chars() {
        let id = generate_signal_id();
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn defaults_match_spec() {
        let json = r#"{"position":"long","instrument":"SBER@TQBR"}"#;
        let signal: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.reserve_capital, Decimal::ZERO);
        assert_eq!(signal.capital_leverage_percent, Decimal::ONE_HUNDRED);
        assert!(signal.entry_time.is_none());
    }

    #[test]
    fn naive_entry_time_gets_local_offset() {
        let json =
            r#"{"position":"long","instrument":"SBER@TQBR","entry_time":"2026-01-02T10:00:00"}"#;
        let signal: Signal = serde_json::from_str(json).unwrap();
        let entry_time = signal.entry_time.unwrap();
        assert_eq!(entry_time.naive_local().to_string(), "2026-01-02 10:00:00");
    }

    #[test]
    fn offset_entry_time_is_preserved() {
        let json = r#"{"position":"short","instrument":"SBER@TQBR","entry_time":"2026-01-02T10:00:00+03:00"}"#;
        let signal: Signal = serde_json::from_str(json).unwrap();
        let entry_time = signal.entry_time.unwrap();
        assert_eq!(entry_time.offset().local_minus_utc(), 3 * 3600);
    }
}
