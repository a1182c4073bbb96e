//! Authenticated USER channel WebSocket feed.
//!
//! Streams the account's own trade executions and order-status changes and
//! forwards them to the engine as domain events. The subscribe frame
//! carries the HMAC authentication block from [`crate::auth`].
//!
//! Shares the market feed's keep-alive and reconnect envelope: PING every
//! 10 s, 30 s liveness cutoff, capped exponential back-off for at most 10
//! attempts.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use spread_common::{Fill, OrderEvent, OrderStatus, Side};

use crate::auth::{ws_auth_payload, ApiCredentials};
use crate::feed::FeedError;
use crate::types::{decode_user_messages, OrderMessage, TradeMessage, UserSubscribeMessage, UserWireMessage};

/// Configuration for the user feed.
#[derive(Debug, Clone)]
pub struct UserFeedConfig {
    /// USER channel WebSocket URL.
    pub ws_url: String,
    /// Markets (condition ids) to scope the subscription to; empty means
    /// all of the account's markets.
    pub markets: Vec<String>,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub liveness_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for UserFeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/user".to_string(),
            markets: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(30),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
        }
    }
}

/// Events delivered to the engine from the user stream.
#[derive(Debug, Clone)]
pub enum UserFeedEvent {
    /// One of our orders (partially) executed.
    Fill(Fill),
    /// An order changed lifecycle status.
    Order(OrderEvent),
    /// Connection lost; the worker will retry with back-off.
    Disconnected(String),
}

/// Authenticated user-stream worker.
pub struct UserFeed {
    config: UserFeedConfig,
    creds: ApiCredentials,
    event_tx: mpsc::Sender<UserFeedEvent>,
}

impl UserFeed {
    /// Spawn the user feed worker.
    pub fn start(
        config: UserFeedConfig,
        creds: ApiCredentials,
        event_tx: mpsc::Sender<UserFeedEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<Result<(), FeedError>> {
        let feed = Self {
            config,
            creds,
            event_tx,
        };
        tokio::spawn(feed.run(shutdown))
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), FeedError> {
        let mut attempts: u32 = 0;

        loop {
            if shutdown.try_recv().is_ok() {
                info!("user feed: shutdown signal received");
                return Ok(());
            }

            match self.run_connection(&mut shutdown, &mut attempts).await {
                Ok(()) => {
                    info!("user feed: clean shutdown");
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    let _ = self
                        .event_tx
                        .try_send(UserFeedEvent::Disconnected(e.to_string()));

                    if attempts >= self.config.max_reconnect_attempts {
                        warn!(attempts, "user feed: reconnect attempts exhausted");
                        return Err(FeedError::ReconnectsExhausted(attempts));
                    }

                    let delay = user_reconnect_delay(
                        attempts,
                        self.config.initial_reconnect_delay,
                        self.config.max_reconnect_delay,
                    );
                    warn!(error = %e, attempts, ?delay, "user feed: reconnecting");

                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown.recv() => {
                            info!("user feed: shutdown during reconnect delay");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn run_connection(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        attempts: &mut u32,
    ) -> Result<(), FeedError> {
        info!(url = %self.config.ws_url, "user feed: connecting");

        let connect = timeout(self.config.connect_timeout, connect_async(&self.config.ws_url));
        let (ws_stream, _response) = match connect.await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(FeedError::Connection(e.to_string())),
            Err(_) => return Err(FeedError::Timeout),
        };

        let (mut write, mut read) = ws_stream.split();

        let auth = ws_auth_payload(&self.creds)
            .map_err(|e| FeedError::Connection(format!("auth: {e}")))?;
        let frame = UserSubscribeMessage::new(auth, self.config.markets.clone());
        let frame = serde_json::to_string(&frame)
            .map_err(|e| FeedError::Connection(format!("subscribe serialization: {e}")))?;
        write.send(Message::Text(frame)).await?;
        info!("user feed: connected and subscribed");

        *attempts = 0;

        let mut ping_timer = interval(self.config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
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
                            self.handle_frame(&text).await;
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

    async fn handle_frame(&self, text: &str) {
        for msg in decode_user_messages(text) {
            let event = match msg {
                UserWireMessage::Trade(trade) => fill_from_trade(&trade).map(UserFeedEvent::Fill),
                UserWireMessage::Order(order) => {
                    order_event_from_message(&order).map(UserFeedEvent::Order)
                }
            };
            let Some(event) = event else {
                debug!(frame = %text.chars().take(120).collect::<String>(),
                       "user feed: dropping malformed event");
                continue;
            };
            // Awaited send: fills must not be dropped under back-pressure.
            if self.event_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Decode a trade message to a [`Fill`]; `None` drops it.
fn fill_from_trade(trade: &TradeMessage) -> Option<Fill> {
    let side = parse_side(&trade.side)?;
    let price: Decimal = trade.price.parse().ok()?;
    let size: Decimal = trade.size.parse().ok()?;
    if size <= Decimal::ZERO {
        return None;
    }
    Some(Fill {
        order_id: trade.order_id().to_string(),
        asset_id: trade.asset_id.clone(),
        side,
        price,
        size,
        ts: parse_millis(&trade.timestamp),
    })
}

/// Decode an order message to an [`OrderEvent`]; unknown statuses drop it.
fn order_event_from_message(order: &OrderMessage) -> Option<OrderEvent> {
    let status = OrderStatus::parse(&order.status)?;
    let size_matched = order.size_matched.parse().unwrap_or(Decimal::ZERO);
    Some(OrderEvent {
        order_id: order.id.clone(),
        asset_id: order.asset_id.clone(),
        status,
        size_matched,
        ts: parse_millis(&order.timestamp),
    })
}

fn parse_side(s: &str) -> Option<Side> {
    match s.to_ascii_uppercase().as_str() {
        "BUY" => Some(Side::Buy),
        "SELL" => Some(Side::Sell),
        _ => None,
    }
}

fn parse_millis(s: &str) -> DateTime<Utc> {
    s.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn user_reconnect_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    initial.saturating_mul(factor).min(max)
}
