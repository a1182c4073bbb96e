//! Venue integration for the spread-capture market maker.
//!
//! Talks to the binary-outcome CLOB venue over two WebSocket channels and
//! REST:
//!
//! - `feed`: MARKET channel (order book snapshots, price changes, tick-size
//!   changes) with a validated top-of-book cache
//! - `user_feed`: authenticated USER channel (fills and order status)
//! - `client`: REST order entry (`post_order`, `cancel_orders`) and reads
//! - `directory`: candidate-market listing from the venue's directory API
//!
//! Wire messages are decoded into tagged variants at the boundary; unknown
//! kinds are discarded there and never reach the engine.

pub mod auth;
pub mod client;
pub mod directory;
pub mod feed;
pub mod types;
pub mod user_feed;

pub use auth::{sign_request, ws_auth_payload, ApiCredentials, AuthError};
pub use client::{
    ApiError, CancelResponse, ClobClient, ClobClientConfig, MarketMetadata, NewOrder, OpenOrder,
    OrderSigner, PostOrderResponse, RestBook, RestLevel,
};
pub use directory::{DirectoryClient, DirectoryConfig, DirectoryError, DirectoryMarket};
pub use feed::{FeedConfig, FeedError, FeedEvent, MarketFeed};
pub use types::{
    decode_market_messages, decode_user_messages, BookMessage, MarketWireMessage,
    OrderMessage, PriceChange, PriceChangeMessage, SubscribeMessage, TickSizeChangeMessage,
    TradeMessage, UserSubscribeMessage, UserWireMessage, WireLevel,
};
pub use user_feed::{UserFeed, UserFeedConfig, UserFeedEvent};
