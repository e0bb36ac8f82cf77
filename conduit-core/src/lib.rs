//! Domain types shared by every Conduit crate: signals, instruments,
//! positions, orders, and the broker-neutral error taxonomy.

pub mod error;
pub mod instrument;
pub mod order;
pub mod position;
pub mod signal;

pub use error::{ErrorCode, TradingError, TradingResult};
pub use instrument::{Instrument, InstrumentInfo, InstrumentType};
pub use order::{
    Direction, EnsureOrder, EnsureOrderKind, Fill, PositionAction, StopOrder, StopOrderKind,
};
pub use position::Position;
pub use signal::{PositionState, Signal};

/// Integer lot count. Brokers in this domain only ever trade whole lots.
pub type Lots = i64;

/// Fixed-precision decimal used for every price, balance, and PnL figure.
pub type Price = rust_decimal::Decimal;
