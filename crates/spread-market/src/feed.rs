//! MARKET channel WebSocket feed.
//!
//! Maintains a validated top-of-book cache per subscribed asset. The worker
//! task owns the socket; the engine reads prices synchronously through the
//! shared cache and receives tick-size notifications over a bounded channel.
//!
//! Subscription changes are coalesced over a short debounce window and then
//! re-sent as one MARKET-subscribe frame listing the complete current asset
//! set; the same frame is re-sent after every reconnection.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant, Sleep};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, info, warn};

use spread_common::TopOfBook;

use crate::types::{decode_market_messages, MarketWireMessage, SubscribeMessage};

/// Tick size assumed until the venue reports one.
const DEFAULT_TICK_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Errors surfaced by the market feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("connection timeout")]
    Timeout,

    #[error("no liveness signal within {0:?}")]
    LivenessLost(Duration),

    #[error("stream ended unexpectedly")]
    StreamEnded,

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectsExhausted(u32),
}

/// Configuration for the market feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// MARKET channel WebSocket URL.
    pub ws_url: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Keep-alive heartbeat cadence.
    pub ping_interval: Duration,
    /// Terminate the transport when nothing arrives for this long.
    pub liveness_timeout: Duration,
    /// Initial reconnect delay (doubles per attempt).
    pub initial_reconnect_delay: Duration,
    /// Reconnect delay cap.
    pub max_reconnect_delay: Duration,
    /// Give up after this many consecutive failed attempts.
    pub max_reconnect_attempts: u32,
    /// Window over which subscription changes are coalesced.
    pub subscribe_debounce: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(30),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            subscribe_debounce: Duration::from_millis(75),
        }
    }
}

/// Events the feed pushes to the engine.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connection (re-)established and subscription frame sent.
    Connected,
    /// Connection lost; the worker will retry with back-off.
    Disconnected(String),
    /// The venue changed an asset's tick size; live orders on that asset
    /// should be re-evaluated.
    TickSizeChange { asset_id: String, tick_size: Decimal },
}

#[derive(Debug)]
enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Handle to the market feed: synchronous cache reads plus subscription
/// management. Cheap to clone.
#[derive(Clone)]
pub struct MarketFeed {
    books: Arc<DashMap<String, TopOfBook>>,
    cmd_tx: mpsc::Sender<FeedCommand>,
}

impl MarketFeed {
    /// Spawn the feed worker. Returns the handle and the worker's join
    /// handle; the worker exits on shutdown or after reconnect exhaustion.
    pub fn start(
        config: FeedConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<Result<(), FeedError>>) {
        let books: Arc<DashMap<String, TopOfBook>> = Arc::new(DashMap::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let worker = FeedWorker {
            config,
            books: books.clone(),
            cmd_rx,
            event_tx,
            assets: HashSet::new(),
        };
        let handle = tokio::spawn(worker.run(shutdown));

        (Self { books, cmd_tx }, handle)
    }

    /// Add assets to the subscription set.
    pub async fn subscribe(&self, assets: Vec<String>) {
        let _ = self.cmd_tx.send(FeedCommand::Subscribe(assets)).await;
    }

    /// Remove assets from the subscription set.
    pub async fn unsubscribe(&self, assets: Vec<String>) {
        let _ = self.cmd_tx.send(FeedCommand::Unsubscribe(assets)).await;
    }

    /// Latest validated (best_bid, best_ask), when both sides have been
    /// observed.
    pub fn last_prices(&self, asset_id: &str) -> Option<(Decimal, Decimal)> {
        let book = self.books.get(asset_id)?;
        Some((book.best_bid?, book.best_ask?))
    }

    /// Full cached top-of-book for an asset.
    pub fn top_of_book(&self, asset_id: &str) -> Option<TopOfBook> {
        self.books.get(asset_id).map(|b| b.clone())
    }

    /// Cached tick size, defaulting to 0.01 until the venue reports one.
    pub fn tick_size(&self, asset_id: &str) -> Decimal {
        self.books
            .get(asset_id)
            .and_then(|b| b.tick_size)
            .unwrap_or(DEFAULT_TICK_SIZE)
    }

    /// Whether the asset's book has updated within `max_age`.
    pub fn is_active(&self, asset_id: &str, max_age: Duration) -> bool {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        self.books
            .get(asset_id)
            .map(|b| b.is_fresh(max_age))
            .unwrap_or(false)
    }
}

struct FeedWorker {
    config: FeedConfig,
    books: Arc<DashMap<String, TopOfBook>>,
    cmd_rx: mpsc::Receiver<FeedCommand>,
    event_tx: mpsc::Sender<FeedEvent>,
    assets: HashSet<String>,
}

impl FeedWorker {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), FeedError> {
        let mut attempts: u32 = 0;

        loop {
            if shutdown.try_recv().is_ok() {
                info!("market feed: shutdown signal received");
                return Ok(());
            }

            // Nothing to stream until something is subscribed.
            while self.assets.is_empty() {
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => self.apply_command(cmd),
                        None => return Ok(()),
                    },
                    _ = shutdown.recv() => {
                        info!("market feed: shutdown while idle");
                        return Ok(());
                    }
                }
            }

            match self.run_connection(&mut shutdown, &mut attempts).await {
                Ok(()) => {
                    info!("market feed: clean shutdown");
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    let _ = self
                        .event_tx
                        .try_send(FeedEvent::Disconnected(e.to_string()));

                    if attempts >= self.config.max_reconnect_attempts {
                        warn!(attempts, "market feed: reconnect attempts exhausted");
                        return Err(FeedError::ReconnectsExhausted(attempts));
                    }

                    let delay = reconnect_delay(
                        attempts,
                        self.config.initial_reconnect_delay,
                        self.config.max_reconnect_delay,
                    );
                    warn!(error = %e, attempts, ?delay, "market feed: reconnecting");

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.recv() => {
                            info!("market feed: shutdown during reconnect delay");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Run one connection until shutdown (Ok) or transport failure (Err).
    async fn run_connection(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
        attempts: &mut u32,
    ) -> Result<(), FeedError> {
        info!(url = %self.config.ws_url, "market feed: connecting");

        let connect = timeout(self.config.connect_timeout, connect_async(&self.config.ws_url));
        let (ws_stream, _response) = match connect.await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(FeedError::Connection(e.to_string())),
            Err(_) => return Err(FeedError::Timeout),
        };

        let (mut write, mut read) = ws_stream.split();

        // Resubscription is idempotent: always the complete current set.
        let frame = subscribe_frame(&self.assets)?;
        write.send(Message::Text(frame)).await?;
        info!(
            asset_count = self.assets.len(),
            "market feed: connected and subscribed"
        );

        *attempts = 0;
        let _ = self.event_tx.try_send(FeedEvent::Connected);

        let mut ping_timer = interval(self.config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Armed while a subscription change awaits the debounce window.
        let mut resub_timer: Pin<Box<Sleep>> = Box::pin(sleep(self.config.subscribe_debounce));
        let mut resub_armed = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            self.apply_command(cmd);
                            resub_timer
                                .as_mut()
                                .reset(Instant::now() + self.config.subscribe_debounce);
                            resub_armed = true;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                _ = resub_timer.as_mut(), if resub_armed => {
                    resub_armed = false;
                    let frame = subscribe_frame(&self.assets)?;
                    write.send(Message::Text(frame)).await?;
                    debug!(asset_count = self.assets.len(), "market feed: resubscribed");
                }

                _ = ping_timer.tick() => {
                    write.send(Message::Text("PING".to_string())).await?;
                }

                msg = timeout(self.config.liveness_timeout, read.next()) => {
                    let msg = match msg {
                        Ok(m) => m,
                        Err(_) => return Err(FeedError::LivenessLost(self.config.liveness_timeout)),
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text == "PONG" {
                                continue;
                            }
                            self.handle_frame(&text);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            return Err(FeedError::Connection("server closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(FeedError::WebSocket(e)),
                        None => return Err(FeedError::StreamEnded),
                    }
                }
            }
        }
    }

    fn apply_command(&mut self, cmd: FeedCommand) {
        match cmd {
            FeedCommand::Subscribe(assets) => {
                for asset in assets {
                    self.assets.insert(asset);
                }
            }
            FeedCommand::Unsubscribe(assets) => {
                for asset in assets {
                    self.assets.remove(&asset);
                    self.books.remove(&asset);
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let messages = decode_market_messages(text);
        if messages.is_empty() {
            debug!(frame = %truncate(text, 120), "market feed: ignoring frame");
            return;
        }
        for msg in messages {
            if let Some(event) = apply_market_message(&self.books, msg) {
                if self.event_tx.try_send(event).is_err() {
                    warn!("market feed: event channel full, dropping notification");
                }
            }
        }
    }
}

/// Apply one decoded message to the book cache.
///
/// Invalid updates (invariant violations, unparsable prices) are dropped
/// without touching cached state. Returns a notification for tick-size
/// changes only.
fn apply_market_message(
    books: &DashMap<String, TopOfBook>,
    msg: MarketWireMessage,
) -> Option<FeedEvent> {
    match msg {
        MarketWireMessage::Book(book) => {
            let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) else {
                debug!(asset = %book.asset_id, "market feed: snapshot missing a side, dropped");
                return None;
            };
            let mut entry = books.entry(book.asset_id.clone()).or_default();
            if !entry.apply_prices(bid, ask) {
                debug!(asset = %book.asset_id, %bid, %ask, "market feed: invalid snapshot dropped");
            }
            None
        }
        MarketWireMessage::PriceChange(pc) => {
            for change in &pc.price_changes {
                let Some((bid, ask)) = change.best_pair() else {
                    continue;
                };
                let asset = if change.asset_id.is_empty() {
                    &pc.asset_id
                } else {
                    &change.asset_id
                };
                let mut entry = books.entry(asset.clone()).or_default();
                if !entry.apply_prices(bid, ask) {
                    debug!(%asset, %bid, %ask, "market feed: invalid price_change dropped");
                }
            }
            None
        }
        MarketWireMessage::TickSizeChange(tc) => {
            let tick = tc.new_tick()?;
            books.entry(tc.asset_id.clone()).or_default().tick_size = Some(tick);
            Some(FeedEvent::TickSizeChange {
                asset_id: tc.asset_id,
                tick_size: tick,
            })
        }
    }
}

fn subscribe_frame(assets: &HashSet<String>) -> Result<String, FeedError> {
    let mut ids: Vec<String> = assets.iter().cloned().collect();
    ids.sort();
    serde_json::to_string(&SubscribeMessage::market(ids))
        .map_err(|e| FeedError::Connection(format!("subscribe serialization: {e}")))
}

/// Exponential back-off: `min(initial * 2^(n-1), max)`.
fn reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    initial.saturating_mul(factor).min(max)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book_json(asset: &str, bid: &str, ask: &str) -> String {
        format!(
            r#"{{"event_type":"book","asset_id":"{asset}",
                "bids":[{{"price":"{bid}","size":"100"}}],
                "asks":[{{"price":"{ask}","size":"100"}}]}}"#
        )
    }

    #[test]
    fn test_reconnect_delay_schedule() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(reconnect_delay(1, initial, max), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2, initial, max), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5, initial, max), Duration::from_secs(16));
        assert_eq!(reconnect_delay(6, initial, max), Duration::from_secs(30));
        assert_eq!(reconnect_delay(10, initial, max), Duration::from_secs(30));
    }

    #[test]
    fn test_apply_book_snapshot() {
        let books = DashMap::new();
        let msgs = decode_market_messages(&book_json("a", "0.46", "0.50"));
        for msg in msgs {
            apply_market_message(&books, msg);
        }
        let book = books.get("a").unwrap();
        assert_eq!(book.best_bid, Some(dec!(0.46)));
        assert_eq!(book.best_ask, Some(dec!(0.50)));
    }

    #[test]
    fn test_invalid_snapshot_keeps_prior_state() {
        let books = DashMap::new();
        for msg in decode_market_messages(&book_json("a", "0.46", "0.50")) {
            apply_market_message(&books, msg);
        }
        // Crossed book must not overwrite the cached prices
        for msg in decode_market_messages(&book_json("a", "0.55", "0.40")) {
            apply_market_message(&books, msg);
        }
        let book = books.get("a").unwrap();
        assert_eq!(book.best_bid, Some(dec!(0.46)));
        assert_eq!(book.best_ask, Some(dec!(0.50)));
    }

    #[test]
    fn test_price_change_applies_when_valid() {
        let books = DashMap::new();
        let json = r#"{"event_type":"price_change","asset_id":"a",
            "price_changes":[{"asset_id":"a","price":"0.47","size":"10","side":"buy",
                              "best_bid":"0.47","best_ask":"0.50"}]}"#;
        for msg in decode_market_messages(json) {
            apply_market_message(&books, msg);
        }
        let book = books.get("a").unwrap();
        assert_eq!(book.best_bid, Some(dec!(0.47)));
    }

    #[test]
    fn test_wide_spread_price_change_dropped() {
        let books = DashMap::new();
        let json = r#"{"event_type":"price_change","asset_id":"a",
            "price_changes":[{"asset_id":"a","price":"0.10","size":"10","side":"buy",
                              "best_bid":"0.10","best_ask":"0.55"}]}"#;
        for msg in decode_market_messages(json) {
            apply_market_message(&books, msg);
        }
        assert!(books.get("a").map(|b| b.best_bid.is_none()).unwrap_or(true));
    }

    #[test]
    fn test_tick_size_change_updates_cache_and_notifies() {
        let books = DashMap::new();
        let json = r#"{"event_type":"tick_size_change","asset_id":"a",
                       "old_tick_size":"0.01","new_tick_size":"0.001"}"#;
        let mut events = Vec::new();
        for msg in decode_market_messages(json) {
            if let Some(event) = apply_market_message(&books, msg) {
                events.push(event);
            }
        }
        assert_eq!(books.get("a").unwrap().tick_size, Some(dec!(0.001)));
        assert!(matches!(
            events.as_slice(),
            [FeedEvent::TickSizeChange { tick_size, .. }] if *tick_size == dec!(0.001)
        ));
    }

    #[tokio::test]
    async fn test_handle_last_prices_via_cache() {
        let (event_tx, _event_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (feed, handle) = MarketFeed::start(
            FeedConfig {
                ws_url: "wss://invalid.localhost/ws".to_string(),
                max_reconnect_attempts: 1,
                ..FeedConfig::default()
            },
            event_tx,
            shutdown_rx,
        );

        // Nothing subscribed yet: cache is empty.
        assert!(feed.last_prices("a").is_none());
        assert_eq!(feed.tick_size("a"), dec!(0.01));
        assert!(!feed.is_active("a", Duration::from_secs(60)));

        // Seed the cache directly, as the worker would.
        feed.books.entry("a".to_string()).or_default().apply_prices(dec!(0.46), dec!(0.50));
        assert_eq!(feed.last_prices("a"), Some((dec!(0.46), dec!(0.50))));
        assert!(feed.is_active("a", Duration::from_secs(60)));

        handle.abort();
    }
}
