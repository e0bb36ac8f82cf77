use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Instrument, Lots};

/// A broker-observed position. Sign of `quantity` carries long/short;
/// absence (`None` at the call site) means flat (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    /// `> 0` long, `< 0` short. Never zero: a flat position is represented
    /// as `Option::None` at every call site, not as `quantity == 0`.
    pub quantity: Lots,
    pub average_price: Decimal,
}

impl Position {
    /// A non-flat position whose `average_price` is still zero has not yet
    /// settled at the broker (spec §3 invariant).
    pub fn is_settled(&self) -> bool {
        self.quantity == 0 || !self.average_price.is_zero()
    }
}

/// Quantity helper usable on `Option<&Position>` at every `Reconciler` call site.
pub fn signed_quantity(position: Option<&Position>) -> Lots {
    position.map(|p| p.quantity).unwrap_or(0)
}
