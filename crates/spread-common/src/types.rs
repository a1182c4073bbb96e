//! Core domain types shared across the workspace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Widest bid/ask spread a book update may carry and still be believed.
///
/// Anything wider is a closed or broken market and the update is dropped.
pub const MAX_VALID_SPREAD: Decimal = Decimal::from_parts(20, 0, 0, false, 2); // 0.20

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the wire representation used by the venue.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which outcome token of a binary market is being traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// Check the top-of-book sanity invariant for an incoming update.
///
/// A book update is believable only when `0 < bid < ask <= 1` and the
/// spread does not exceed [`MAX_VALID_SPREAD`]. Updates failing this are
/// dropped before they can reach any cached state.
pub fn book_update_valid(best_bid: Decimal, best_ask: Decimal) -> bool {
    best_bid > Decimal::ZERO
        && best_bid < best_ask
        && best_ask <= Decimal::ONE
        && best_ask - best_bid <= MAX_VALID_SPREAD
}

/// Latest observed top-of-book for a single outcome token.
///
/// All fields start empty and are populated by the first valid observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopOfBook {
    /// Highest resting buy price.
    pub best_bid: Option<Decimal>,
    /// Lowest resting sell price.
    pub best_ask: Option<Decimal>,
    /// Minimum price increment; may change dynamically near book edges.
    pub tick_size: Option<Decimal>,
    /// When the last valid update was applied.
    pub last_update: Option<DateTime<Utc>>,
}

impl TopOfBook {
    /// Both sides observed.
    pub fn is_complete(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }

    /// Current spread, when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Spread expressed in cents, when both sides are present.
    pub fn spread_cents(&self) -> Option<Decimal> {
        self.spread().map(|s| s * Decimal::ONE_HUNDRED)
    }

    /// Whether the book has been updated within `max_age`.
    pub fn is_fresh(&self, max_age: chrono::Duration) -> bool {
        match self.last_update {
            Some(ts) => Utc::now() - ts <= max_age,
            None => false,
        }
    }

    /// Apply a validated (bid, ask) pair, stamping the update time.
    ///
    /// Returns false and leaves the book untouched when the pair violates
    /// the sanity invariant.
    pub fn apply_prices(&mut self, best_bid: Decimal, best_ask: Decimal) -> bool {
        if !book_update_valid(best_bid, best_ask) {
            return false;
        }
        self.best_bid = Some(best_bid);
        self.best_ask = Some(best_ask);
        self.last_update = Some(Utc::now());
        true
    }
}

/// A live resting order on the venue.
///
/// At most one of these exists per asset at any time; the order manager's
/// map insertion is the only path that creates one.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOrder {
    /// Venue order id (or a synthetic id in dry-run).
    pub order_id: String,
    /// Outcome token the order rests on.
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    /// Size in shares.
    pub size: Decimal,
    pub placed_at: DateTime<Utc>,
}

impl ActiveOrder {
    /// Notional value of the order (price x size).
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Age of the order in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.placed_at).num_milliseconds()
    }
}

/// A trade execution reported by the user stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order_id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    /// Shares executed in this fill.
    pub size: Decimal,
    pub ts: DateTime<Utc>,
}

/// Venue-reported lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Resting on the book.
    Live,
    /// Fully matched.
    Matched,
    /// Cancelled (by us or externally).
    Cancelled,
}

impl OrderStatus {
    /// Parse the venue's status string; unknown values map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIVE" | "PLACEMENT" => Some(OrderStatus::Live),
            "MATCHED" | "FILLED" => Some(OrderStatus::Matched),
            "CANCELLED" | "CANCELED" | "CANCELLATION" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// An order-status change reported by the user stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub order_id: String,
    pub asset_id: String,
    pub status: OrderStatus,
    /// Shares matched so far, as reported by the venue.
    pub size_matched: Decimal,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_max_valid_spread_constant() {
        assert_eq!(MAX_VALID_SPREAD, dec!(0.20));
    }

    #[test]
    fn test_book_update_valid_accepts_normal_book() {
        assert!(book_update_valid(dec!(0.46), dec!(0.50)));
    }

    #[test]
    fn test_book_update_valid_rejects_crossed() {
        assert!(!book_update_valid(dec!(0.55), dec!(0.40)));
    }

    #[test]
    fn test_book_update_valid_rejects_locked() {
        // bid == ask: spread of zero is not a valid book
        assert!(!book_update_valid(dec!(0.50), dec!(0.50)));
    }

    #[test]
    fn test_book_update_valid_rejects_wide_spread() {
        assert!(!book_update_valid(dec!(0.10), dec!(0.35)));
        // Exactly 0.20 wide is still acceptable
        assert!(book_update_valid(dec!(0.30), dec!(0.50)));
    }

    #[test]
    fn test_book_update_valid_rejects_out_of_range() {
        assert!(!book_update_valid(dec!(0), dec!(0.10)));
        assert!(!book_update_valid(dec!(0.95), dec!(1.01)));
    }

    #[test]
    fn test_top_of_book_apply_prices() {
        let mut book = TopOfBook::default();
        assert!(!book.is_complete());

        assert!(book.apply_prices(dec!(0.46), dec!(0.50)));
        assert!(book.is_complete());
        assert_eq!(book.spread(), Some(dec!(0.04)));
        assert_eq!(book.spread_cents(), Some(dec!(4)));
    }

    #[test]
    fn test_top_of_book_rejects_invalid_update() {
        let mut book = TopOfBook::default();
        book.apply_prices(dec!(0.46), dec!(0.50));

        // Crossed update must not disturb the cached state
        assert!(!book.apply_prices(dec!(0.55), dec!(0.40)));
        assert_eq!(book.best_bid, Some(dec!(0.46)));
        assert_eq!(book.best_ask, Some(dec!(0.50)));
    }

    #[test]
    fn test_active_order_notional() {
        let order = ActiveOrder {
            order_id: "o-1".to_string(),
            asset_id: "token-1".to_string(),
            side: Side::Buy,
            price: dec!(0.46),
            size: dec!(5),
            placed_at: Utc::now(),
        };
        assert_eq!(order.notional(), dec!(2.30));
    }

    #[test]
    fn test_order_status_parse() {
        assert_eq!(OrderStatus::parse("LIVE"), Some(OrderStatus::Live));
        assert_eq!(OrderStatus::parse("matched"), Some(OrderStatus::Matched));
        assert_eq!(
            OrderStatus::parse("CANCELLED"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(OrderStatus::parse("CANCELED"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("something-else"), None);
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Sell.to_string(), "SELL");
    }
}
