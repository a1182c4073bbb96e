//! Shared types for the spread-capture market maker.
//!
//! Domain types used by both the venue integration crate and the trading
//! engine, plus the price/size quantization boundary between decimal
//! decision math and the venue's integer micro-units.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod quantize;
pub mod types;

pub use quantize::{micro, quantize, QuantizationError, QuantizedAmounts};
pub use types::{
    book_update_valid, ActiveOrder, Fill, OrderEvent, OrderStatus, Outcome, Side, TopOfBook,
    MAX_VALID_SPREAD,
};
