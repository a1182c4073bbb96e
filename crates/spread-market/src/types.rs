//! Wire-message types for the venue's WebSocket channels.
//!
//! All prices and sizes arrive as strings and are parsed explicitly at this
//! boundary. Unknown event kinds are dropped by the decode helpers; nothing
//! dynamically typed leaks past this module.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Subscription frame for the MARKET channel.
///
/// Lists the complete current asset set; re-sending is idempotent.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl SubscribeMessage {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            assets_ids,
            msg_type: "market",
        }
    }
}

/// Authentication block carried by the USER channel subscribe frame.
#[derive(Debug, Serialize)]
pub struct WsAuth {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub passphrase: String,
    pub address: String,
    /// UNIX seconds, matching the signed payload.
    pub timestamp: String,
    /// HMAC-SHA256 over `timestamp + "GET" + "/ws/user"`, URL-safe base64.
    pub signature: String,
}

/// Subscription frame for the USER channel.
#[derive(Debug, Serialize)]
pub struct UserSubscribeMessage {
    pub auth: WsAuth,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub markets: Vec<String>,
}

impl UserSubscribeMessage {
    pub fn new(auth: WsAuth, markets: Vec<String>) -> Self {
        Self {
            auth,
            msg_type: "user",
            markets,
        }
    }
}

/// One price level as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WireLevel {
    pub price: String,
    pub size: String,
}

impl WireLevel {
    /// Parse both fields; `None` if either is malformed.
    pub fn parse(&self) -> Option<(Decimal, Decimal)> {
        let price = self.price.parse().ok()?;
        let size = self.size.parse().ok()?;
        Some((price, size))
    }
}

/// Full order book snapshot from the MARKET channel.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMessage {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

impl BookMessage {
    /// Best bid: maximum parsed bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().filter_map(|l| l.parse()).map(|(p, _)| p).max()
    }

    /// Best ask: minimum parsed ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().filter_map(|l| l.parse()).map(|(p, _)| p).min()
    }
}

/// One entry of a price_change message.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
}

impl PriceChange {
    /// Parsed (best_bid, best_ask) pair, when the entry carries both.
    pub fn best_pair(&self) -> Option<(Decimal, Decimal)> {
        let bid = self.best_bid.as_deref()?.parse().ok()?;
        let ask = self.best_ask.as_deref()?.parse().ok()?;
        Some((bid, ask))
    }
}

/// Top-of-book delta from the MARKET channel.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMessage {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub price_changes: Vec<PriceChange>,
}

/// Tick-size change from the MARKET channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeChangeMessage {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub old_tick_size: String,
    #[serde(default)]
    pub new_tick_size: String,
    #[serde(default)]
    pub timestamp: String,
}

impl TickSizeChangeMessage {
    pub fn new_tick(&self) -> Option<Decimal> {
        self.new_tick_size.parse().ok()
    }
}

/// Decoded MARKET channel message.
#[derive(Debug, Clone)]
pub enum MarketWireMessage {
    Book(BookMessage),
    PriceChange(PriceChangeMessage),
    TickSizeChange(TickSizeChangeMessage),
}

/// Trade execution from the USER channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMessage {
    #[serde(default)]
    pub id: String,
    pub asset_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub taker_order_id: String,
    #[serde(default)]
    pub timestamp: String,
}

impl TradeMessage {
    /// The order id this trade executed against, preferring the taker id.
    pub fn order_id(&self) -> &str {
        if !self.taker_order_id.is_empty() {
            &self.taker_order_id
        } else {
            &self.id
        }
    }
}

/// Order lifecycle update from the USER channel.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderMessage {
    pub id: String,
    pub asset_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Decoded USER channel message.
#[derive(Debug, Clone)]
pub enum UserWireMessage {
    Trade(TradeMessage),
    Order(OrderMessage),
}

/// Envelope: the venue sends either one object or an array of objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
}

impl Envelope {
    fn into_items(self) -> Vec<serde_json::Value> {
        match self {
            Envelope::Many(v) => v,
            Envelope::One(v) => vec![v],
        }
    }
}

fn event_type(value: &serde_json::Value) -> Option<&str> {
    value.get("event_type").and_then(|t| t.as_str())
}

/// Decode a MARKET channel frame into typed messages.
///
/// Unknown event kinds and malformed items are dropped; the caller sees
/// only well-formed messages.
pub fn decode_market_messages(text: &str) -> Vec<MarketWireMessage> {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in envelope.into_items() {
        let decoded = match event_type(&item) {
            Some("book") => serde_json::from_value(item)
                .map(MarketWireMessage::Book)
                .ok(),
            Some("price_change") => serde_json::from_value(item)
                .map(MarketWireMessage::PriceChange)
                .ok(),
            Some("tick_size_change") => serde_json::from_value(item)
                .map(MarketWireMessage::TickSizeChange)
                .ok(),
            _ => None,
        };
        if let Some(msg) = decoded {
            out.push(msg);
        }
    }
    out
}

/// Decode a USER channel frame into typed messages.
pub fn decode_user_messages(text: &str) -> Vec<UserWireMessage> {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in envelope.into_items() {
        let decoded = match event_type(&item) {
            Some("trade") => serde_json::from_value(item)
                .map(UserWireMessage::Trade)
                .ok(),
            Some("order") => serde_json::from_value(item)
                .map(UserWireMessage::Order)
                .ok(),
            _ => None,
        };
        if let Some(msg) = decoded {
            out.push(msg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_message_serialization() {
        let msg = SubscribeMessage::market(vec!["token1".to_string(), "token2".to_string()]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"assets_ids\""));
        assert!(json.contains("\"type\":\"market\""));
    }

    #[test]
    fn test_book_message_best_levels() {
        let json = r#"{
            "event_type": "book",
            "asset_id": "token123",
            "market": "cond456",
            "timestamp": "1704067200000",
            "bids": [{"price": "0.44", "size": "80"}, {"price": "0.46", "size": "100"}],
            "asks": [{"price": "0.52", "size": "60"}, {"price": "0.50", "size": "150"}]
        }"#;

        let msgs = decode_market_messages(json);
        assert_eq!(msgs.len(), 1);
        let MarketWireMessage::Book(book) = &msgs[0] else {
            panic!("expected book");
        };
        assert_eq!(book.best_bid(), Some(dec!(0.46)));
        assert_eq!(book.best_ask(), Some(dec!(0.50)));
    }

    #[test]
    fn test_price_change_decoding() {
        let json = r#"{
            "event_type": "price_change",
            "asset_id": "token123",
            "market": "cond456",
            "timestamp": "1704067200000",
            "price_changes": [
                {"asset_id": "token123", "price": "0.46", "size": "50",
                 "side": "buy", "best_bid": "0.46", "best_ask": "0.50"}
            ]
        }"#;

        let msgs = decode_market_messages(json);
        assert_eq!(msgs.len(), 1);
        let MarketWireMessage::PriceChange(pc) = &msgs[0] else {
            panic!("expected price_change");
        };
        assert_eq!(pc.price_changes[0].best_pair(), Some((dec!(0.46), dec!(0.50))));
    }

    #[test]
    fn test_tick_size_change_decoding() {
        let json = r#"{
            "event_type": "tick_size_change",
            "asset_id": "token123",
            "market": "cond456",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001",
            "timestamp": "1704067200000"
        }"#;

        let msgs = decode_market_messages(json);
        assert_eq!(msgs.len(), 1);
        let MarketWireMessage::TickSizeChange(tc) = &msgs[0] else {
            panic!("expected tick_size_change");
        };
        assert_eq!(tc.new_tick(), Some(dec!(0.001)));
    }

    #[test]
    fn test_unknown_kind_dropped() {
        let json = r#"{"event_type": "last_trade_price", "asset_id": "token123"}"#;
        assert!(decode_market_messages(json).is_empty());

        let json = r#"{"event_type": "heartbeat"}"#;
        assert!(decode_user_messages(json).is_empty());
    }

    #[test]
    fn test_invalid_json_dropped() {
        assert!(decode_market_messages("not json at all").is_empty());
        assert!(decode_user_messages("PONG").is_empty());
    }

    #[test]
    fn test_array_envelope() {
        let json = r#"[
            {"event_type": "book", "asset_id": "a",
             "bids": [{"price": "0.40", "size": "10"}],
             "asks": [{"price": "0.45", "size": "10"}]},
            {"event_type": "bogus"},
            {"event_type": "book", "asset_id": "b",
             "bids": [{"price": "0.60", "size": "10"}],
             "asks": [{"price": "0.62", "size": "10"}]}
        ]"#;
        let msgs = decode_market_messages(json);
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn test_user_trade_decoding() {
        let json = r#"{
            "event_type": "trade",
            "id": "trade-1",
            "asset_id": "token123",
            "side": "BUY",
            "price": "0.46",
            "size": "5",
            "status": "MATCHED",
            "taker_order_id": "order-9",
            "timestamp": "1704067200000"
        }"#;

        let msgs = decode_user_messages(json);
        assert_eq!(msgs.len(), 1);
        let UserWireMessage::Trade(trade) = &msgs[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.order_id(), "order-9");
    }

    #[test]
    fn test_user_order_decoding() {
        let json = r#"{
            "event_type": "order",
            "id": "order-9",
            "asset_id": "token123",
            "side": "BUY",
            "status": "CANCELLATION",
            "size_matched": "0",
            "timestamp": "1704067200000"
        }"#;

        let msgs = decode_user_messages(json);
        assert_eq!(msgs.len(), 1);
        let UserWireMessage::Order(order) = &msgs[0] else {
            panic!("expected order");
        };
        assert_eq!(order.id, "order-9");
        assert_eq!(order.status, "CANCELLATION");
    }
}
