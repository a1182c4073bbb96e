//! Quantization of decimal orders into venue micro-units.
//!
//! The venue wire format expresses orders as two unsigned integer amounts
//! in millionths (maker_amount / taker_amount). Everything above this
//! boundary works in `Decimal`; everything below it is `u64`. No decision
//! code may consume the integer amounts directly.
//!
//! Rules:
//! - size is rounded to 2 decimals, notional (price x size) to 5;
//! - BUY: maker = micro(notional), taker = micro(size);
//! - SELL: maker = micro(size), taker = micro(notional).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::types::Side;

const MICRO_FACTOR: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Errors produced while quantizing an order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantizationError {
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("size rounds to a non-positive amount: {0}")]
    NonPositiveSize(Decimal),

    #[error("rounding produced a zero wire amount (price={price}, size={size})")]
    ZeroAmount { price: Decimal, size: Decimal },

    #[error("amount does not fit in u64 micro-units: {0}")]
    Overflow(Decimal),
}

/// Wire-side integer amounts for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedAmounts {
    /// What the maker gives up, in millionths.
    pub maker_amount: u64,
    /// What the maker receives, in millionths.
    pub taker_amount: u64,
    /// Size after 2-decimal rounding, for audit logging.
    pub rounded_size: Decimal,
    /// Notional after 5-decimal rounding, for audit logging.
    pub rounded_notional: Decimal,
}

/// Convert a non-negative decimal to integer millionths, rounding half up.
pub fn micro(value: Decimal) -> Result<u64, QuantizationError> {
    let scaled = (value * MICRO_FACTOR)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled.to_u64().ok_or(QuantizationError::Overflow(value))
}

/// Quantize `(side, price, size)` into wire amounts.
///
/// Fails when the size rounds to zero, the price is non-positive, or either
/// wire amount would be zero.
pub fn quantize(
    side: Side,
    price: Decimal,
    size: Decimal,
) -> Result<QuantizedAmounts, QuantizationError> {
    if price <= Decimal::ZERO {
        return Err(QuantizationError::NonPositivePrice(price));
    }

    let rounded_size =
        size.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded_size <= Decimal::ZERO {
        return Err(QuantizationError::NonPositiveSize(size));
    }

    let rounded_notional = (price * rounded_size)
        .round_dp_with_strategy(5, RoundingStrategy::MidpointAwayFromZero);

    let size_micro = micro(rounded_size)?;
    let notional_micro = micro(rounded_notional)?;

    let (maker_amount, taker_amount) = match side {
        Side::Buy => (notional_micro, size_micro),
        Side::Sell => (size_micro, notional_micro),
    };

    if maker_amount == 0 || taker_amount == 0 {
        return Err(QuantizationError::ZeroAmount { price, size });
    }

    Ok(QuantizedAmounts {
        maker_amount,
        taker_amount,
        rounded_size,
        rounded_notional,
    })
}
