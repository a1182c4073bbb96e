//! Order lifecycle management under the side-lock invariant.
//!
//! At most one live order exists per asset at any time. The map insertion
//! in `place_*` is the only way an asset goes from "no order" to "live
//! order", and both the insertion and the returned id come from the same
//! critical section, so the invariant holds at the data-model level.
//!
//! Replace is cancel-then-place: when the cancel fails the previous order
//! is kept and [`OrderError::ReplaceFailed`] is returned; when the place
//! fails after a successful cancel the asset is left orderless for the
//! caller to repair on the next tick. The manager never retries on its
//! own.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use spread_common::{quantize, ActiveOrder, QuantizationError, Side};
use spread_market::ApiError;

use crate::venue::{Venue, VenueOpenOrder};

/// Placement and replace failures.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("asset {0} already has a live order")]
    AlreadyActive(String),

    #[error("asset {0} has no live order")]
    NoActiveOrder(String),

    #[error("post-only order would cross: bid {best_bid} / ask {best_ask}")]
    WouldCross {
        best_bid: Decimal,
        best_ask: Decimal,
    },

    #[error(transparent)]
    Quantization(#[from] QuantizationError),

    #[error("venue error: {0}")]
    Api(#[from] ApiError),

    #[error("replace failed, prior order kept: {0}")]
    ReplaceFailed(String),
}

/// Order dynamics knobs, lifted from [`crate::config::BotConfig`].
#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Replace a resting order older than this.
    pub order_ttl: Duration,
    /// Replace when the book drifts at least this many ticks away.
    pub replace_price_ticks: Decimal,
    /// How long a fresh sell may chase the ask.
    pub ask_chase_window: Duration,
    /// Replace budget per chase window.
    pub ask_chase_max_replaces: u32,
}

impl OrderManagerConfig {
    pub fn from_bot_config(config: &crate::config::BotConfig) -> Self {
        Self {
            order_ttl: config.order_ttl(),
            replace_price_ticks: config.replace_price_ticks,
            ask_chase_window: config.ask_chase_window(),
            ask_chase_max_replaces: config.ask_chase_max_replaces,
        }
    }
}

/// Realizes the state machine's intentions on the venue.
pub struct OrderManager {
    config: OrderManagerConfig,
    venue: Box<dyn Venue>,
    active_orders: HashMap<String, ActiveOrder>,
}

impl OrderManager {
    pub fn new(config: OrderManagerConfig, venue: Box<dyn Venue>) -> Self {
        Self {
            config,
            venue,
            active_orders: HashMap::new(),
        }
    }

    /// The live order for an asset, if any.
    pub fn active_order(&self, asset_id: &str) -> Option<&ActiveOrder> {
        self.active_orders.get(asset_id)
    }

    pub fn active_count(&self) -> usize {
        self.active_orders.len()
    }

    /// Ids of every live order (for shutdown and reconciliation).
    pub fn all_order_ids(&self) -> Vec<String> {
        self.active_orders
            .values()
            .map(|o| o.order_id.clone())
            .collect()
    }

    /// Forget a live order without touching the venue (it filled, or the
    /// venue reported it cancelled).
    pub fn clear(&mut self, asset_id: &str) -> Option<ActiveOrder> {
        self.active_orders.remove(asset_id)
    }

    /// Place a buy joining the best bid. Post-only: rejects when the book
    /// is crossed or locked.
    pub async fn place_buy(
        &mut self,
        asset_id: &str,
        best_bid: Decimal,
        best_ask: Decimal,
        size: Decimal,
    ) -> Result<ActiveOrder, OrderError> {
        if best_bid >= best_ask {
            return Err(OrderError::WouldCross { best_bid, best_ask });
        }
        self.place(asset_id, Side::Buy, best_bid, size).await
    }

    /// Place a sell joining the best ask. Post-only: rejects when the book
    /// is crossed or locked.
    pub async fn place_sell(
        &mut self,
        asset_id: &str,
        best_bid: Decimal,
        best_ask: Decimal,
        size: Decimal,
    ) -> Result<ActiveOrder, OrderError> {
        if best_ask <= best_bid {
            return Err(OrderError::WouldCross { best_bid, best_ask });
        }
        self.place(asset_id, Side::Sell, best_ask, size).await
    }

    async fn place(
        &mut self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<ActiveOrder, OrderError> {
        if self.active_orders.contains_key(asset_id) {
            return Err(OrderError::AlreadyActive(asset_id.to_string()));
        }

        let amounts = quantize(side, price, size)?;
        let order_id = self
            .venue
            .place_order(asset_id, side, price, size, amounts)
            .await?;

        let order = ActiveOrder {
            order_id,
            asset_id: asset_id.to_string(),
            side,
            price,
            size: amounts.rounded_size,
            placed_at: Utc::now(),
        };
        info!(asset = asset_id, %side, %price, size = %order.size,
              order_id = %order.order_id, "order placed");
        self.active_orders.insert(asset_id.to_string(), order.clone());
        Ok(order)
    }

    /// Whether the resting buy should be replaced: stale past the TTL, or
    /// the best bid drifted at least the configured number of ticks.
    pub fn should_replace_buy(
        &self,
        asset_id: &str,
        current_bid: Decimal,
        tick_size: Decimal,
    ) -> bool {
        self.should_replace(asset_id, Side::Buy, current_bid, tick_size)
    }

    /// Sell-side twin of [`Self::should_replace_buy`], against the ask.
    pub fn should_replace_sell(
        &self,
        asset_id: &str,
        current_ask: Decimal,
        tick_size: Decimal,
    ) -> bool {
        self.should_replace(asset_id, Side::Sell, current_ask, tick_size)
    }

    fn should_replace(
        &self,
        asset_id: &str,
        side: Side,
        current_price: Decimal,
        tick_size: Decimal,
    ) -> bool {
        let Some(order) = self.active_orders.get(asset_id) else {
            return false;
        };
        if order.side != side {
            return false;
        }
        if order.age_ms() > self.config.order_ttl.as_millis() as i64 {
            return true;
        }
        let drift = (current_price - order.price).abs();
        drift >= self.config.replace_price_ticks * tick_size
    }

    /// Cancel-then-place the resting buy at the new best bid.
    pub async fn replace_buy(
        &mut self,
        asset_id: &str,
        new_bid: Decimal,
        new_ask: Decimal,
    ) -> Result<ActiveOrder, OrderError> {
        let size = self.cancel_for_replace(asset_id, Side::Buy).await?;
        self.place_buy(asset_id, new_bid, new_ask, size).await
    }

    /// Cancel-then-place the resting sell at the new best ask.
    pub async fn replace_sell(
        &mut self,
        asset_id: &str,
        new_bid: Decimal,
        new_ask: Decimal,
    ) -> Result<ActiveOrder, OrderError> {
        let size = self.cancel_for_replace(asset_id, Side::Sell).await?;
        self.place_sell(asset_id, new_bid, new_ask, size).await
    }

    /// Cancel the existing order for a replace. On success the entry is
    /// removed and the order's size returned for re-placement; on failure
    /// the entry is kept.
    async fn cancel_for_replace(
        &mut self,
        asset_id: &str,
        side: Side,
    ) -> Result<Decimal, OrderError> {
        let order = self
            .active_orders
            .get(asset_id)
            .ok_or_else(|| OrderError::NoActiveOrder(asset_id.to_string()))?;
        if order.side != side {
            return Err(OrderError::NoActiveOrder(asset_id.to_string()));
        }
        let order_id = order.order_id.clone();
        let size = order.size;

        match self.venue.cancel_orders(&[order_id.clone()]).await {
            Ok(cancelled) if cancelled.contains(&order_id) => {
                self.active_orders.remove(asset_id);
                debug!(asset = asset_id, %order_id, "replace: cancel acknowledged");
                Ok(size)
            }
            Ok(_) => Err(OrderError::ReplaceFailed(format!(
                "venue did not acknowledge cancel of {order_id}"
            ))),
            Err(e) => {
                warn!(asset = asset_id, %order_id, error = %e, "replace: cancel failed");
                Err(OrderError::ReplaceFailed(e.to_string()))
            }
        }
    }

    /// Cancel the live order for an asset, removing it on acknowledgment.
    pub async fn cancel(&mut self, asset_id: &str) -> Result<ActiveOrder, OrderError> {
        let order = self
            .active_orders
            .get(asset_id)
            .ok_or_else(|| OrderError::NoActiveOrder(asset_id.to_string()))?;
        let order_id = order.order_id.clone();

        let cancelled = self.venue.cancel_orders(&[order_id.clone()]).await?;
        if !cancelled.contains(&order_id) {
            return Err(OrderError::Api(ApiError::Rejected {
                reason: format!("cancel of {order_id} not acknowledged"),
            }));
        }
        let order = self
            .active_orders
            .remove(asset_id)
            .ok_or_else(|| OrderError::NoActiveOrder(asset_id.to_string()))?;
        info!(asset = asset_id, %order_id, "order cancelled");
        Ok(order)
    }

    /// Cancel every live order (shutdown sweep). Best effort: failures are
    /// logged and the local entries dropped regardless.
    pub async fn cancel_all(&mut self) {
        let ids = self.all_order_ids();
        if ids.is_empty() {
            return;
        }
        match self.venue.cancel_orders(&ids).await {
            Ok(cancelled) => info!(
                requested = ids.len(),
                cancelled = cancelled.len(),
                "cancel-all complete"
            ),
            Err(e) => warn!(error = %e, "cancel-all failed"),
        }
        self.active_orders.clear();
    }

    /// Whether the chase window is still open for a sell: the window has
    /// not elapsed AND the replace budget is not spent.
    pub fn chase_window_open(
        &self,
        chase_started_at: Option<DateTime<Utc>>,
        replace_count: u32,
    ) -> bool {
        let Some(started) = chase_started_at else {
            return false;
        };
        if replace_count >= self.config.ask_chase_max_replaces {
            return false;
        }
        let elapsed = Utc::now() - started;
        elapsed < chrono::Duration::from_std(self.config.ask_chase_window)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Venue open orders, for reconciliation.
    pub async fn venue_open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError> {
        self.venue.open_orders().await
    }

    /// Cancel venue orders that are not in the local map (reconciliation
    /// strays). Local bookkeeping is untouched.
    pub async fn cancel_untracked(&self, order_ids: &[String]) -> Result<(), ApiError> {
        if order_ids.is_empty() {
            return Ok(());
        }
        self.venue.cancel_orders(order_ids).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use spread_common::QuantizedAmounts;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    /// Scriptable venue double: counts calls, can be told to fail.
    #[derive(Default)]
    struct MockVenue {
        placements: AtomicU64,
        cancels: AtomicU64,
        fail_place: AtomicBool,
        fail_cancel: AtomicBool,
    }

    #[async_trait]
    impl Venue for Arc<MockVenue> {
        async fn place_order(
            &self,
            _asset_id: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
            _amounts: QuantizedAmounts,
        ) -> Result<String, ApiError> {
            if self.fail_place.load(Ordering::SeqCst) {
                return Err(ApiError::Rejected {
                    reason: "rejected by test".to_string(),
                });
            }
            let n = self.placements.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("order-{n}"))
        }

        async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>, ApiError> {
            if self.fail_cancel.load(Ordering::SeqCst) {
                return Err(ApiError::Rejected {
                    reason: "cancel refused by test".to_string(),
                });
            }
            self.cancels.fetch_add(order_ids.len() as u64, Ordering::SeqCst);
            Ok(order_ids.to_vec())
        }

        async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError> {
            Ok(Vec::new())
        }
    }

    fn test_config() -> OrderManagerConfig {
        OrderManagerConfig {
            order_ttl: Duration::from_millis(45_000),
            replace_price_ticks: Decimal::ONE,
            ask_chase_window: Duration::from_secs(30),
            ask_chase_max_replaces: 5,
        }
    }

    fn manager() -> (OrderManager, Arc<MockVenue>) {
        let venue = Arc::new(MockVenue::default());
        (
            OrderManager::new(test_config(), Box::new(venue.clone())),
            venue,
        )
    }

    #[tokio::test]
    async fn test_place_buy_records_active_order() {
        let (mut orders, venue) = manager();
        let order = orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.price, dec!(0.46));
        assert_eq!(orders.active_count(), 1);
        assert_eq!(venue.placements.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_side_lock_rejects_second_order() {
        let (mut orders, _) = manager();
        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        let second = orders.place_buy("a", dec!(0.46), dec!(0.50), dec!(5)).await;
        assert!(matches!(second, Err(OrderError::AlreadyActive(_))));
        assert_eq!(orders.active_count(), 1);
    }

    #[tokio::test]
    async fn test_post_only_rejects_crossed_book() {
        let (mut orders, venue) = manager();
        let crossed = orders.place_buy("a", dec!(0.50), dec!(0.50), dec!(5)).await;
        assert!(matches!(crossed, Err(OrderError::WouldCross { .. })));
        // Venue was never touched
        assert_eq!(venue.placements.load(Ordering::SeqCst), 0);
        assert!(orders.active_order("a").is_none());
    }

    #[tokio::test]
    async fn test_place_failure_records_nothing() {
        let (mut orders, venue) = manager();
        venue.fail_place.store(true, Ordering::SeqCst);

        let result = orders.place_buy("a", dec!(0.46), dec!(0.50), dec!(5)).await;
        assert!(matches!(result, Err(OrderError::Api(_))));
        assert!(orders.active_order("a").is_none());
    }

    #[tokio::test]
    async fn test_should_replace_on_drift() {
        let (mut orders, _) = manager();
        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        // Same price: no replace
        assert!(!orders.should_replace_buy("a", dec!(0.46), dec!(0.01)));
        // One tick away: replace
        assert!(orders.should_replace_buy("a", dec!(0.47), dec!(0.01)));
        // Wrong side query: never
        assert!(!orders.should_replace_sell("a", dec!(0.47), dec!(0.01)));
    }

    #[tokio::test]
    async fn test_should_replace_on_ttl() {
        let venue = Arc::new(MockVenue::default());
        let mut config = test_config();
        config.order_ttl = Duration::from_millis(0);
        let mut orders = OrderManager::new(config, Box::new(venue));

        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Price unchanged but the order is past its TTL
        assert!(orders.should_replace_buy("a", dec!(0.46), dec!(0.01)));
    }

    #[tokio::test]
    async fn test_replace_swaps_order_atomically() {
        let (mut orders, venue) = manager();
        let old = orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        let new = orders.replace_buy("a", dec!(0.47), dec!(0.50)).await.unwrap();
        assert_ne!(old.order_id, new.order_id);
        assert_eq!(new.price, dec!(0.47));
        assert_eq!(new.size, old.size);
        // Exactly one live order at the end
        assert_eq!(orders.active_count(), 1);
        assert_eq!(venue.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_order_when_cancel_fails() {
        let (mut orders, venue) = manager();
        let old = orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        venue.fail_cancel.store(true, Ordering::SeqCst);
        let result = orders.replace_buy("a", dec!(0.47), dec!(0.50)).await;
        assert!(matches!(result, Err(OrderError::ReplaceFailed(_))));
        // The prior order is still live and tracked
        assert_eq!(
            orders.active_order("a").map(|o| o.order_id.clone()),
            Some(old.order_id)
        );
    }

    #[tokio::test]
    async fn test_replace_leaves_orderless_when_place_fails() {
        let (mut orders, venue) = manager();
        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        venue.fail_place.store(true, Ordering::SeqCst);
        let result = orders.replace_buy("a", dec!(0.47), dec!(0.50)).await;
        assert!(matches!(result, Err(OrderError::Api(_))));
        // Cancel went through, new placement failed: nothing live
        assert!(orders.active_order("a").is_none());
    }

    #[tokio::test]
    async fn test_cancel_removes_entry() {
        let (mut orders, _) = manager();
        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();

        orders.cancel("a").await.unwrap();
        assert!(orders.active_order("a").is_none());
        assert!(matches!(
            orders.cancel("a").await,
            Err(OrderError::NoActiveOrder(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_all_sweeps() {
        let (mut orders, venue) = manager();
        orders
            .place_buy("a", dec!(0.46), dec!(0.50), dec!(5))
            .await
            .unwrap();
        orders
            .place_sell("b", dec!(0.40), dec!(0.44), dec!(5))
            .await
            .unwrap();

        orders.cancel_all().await;
        assert_eq!(orders.active_count(), 0);
        assert_eq!(venue.cancels.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chase_window_gating() {
        let (orders, _) = manager();

        // No chase started: closed
        assert!(!orders.chase_window_open(None, 0));
        // Fresh window with budget: open
        assert!(orders.chase_window_open(Some(Utc::now()), 0));
        // Budget spent: closed
        assert!(!orders.chase_window_open(Some(Utc::now()), 5));
        // Window elapsed: closed
        let old = Utc::now() - chrono::Duration::seconds(31);
        assert!(!orders.chase_window_open(Some(old), 0));
    }
}
