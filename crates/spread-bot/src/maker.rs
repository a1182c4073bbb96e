//! The orchestrator: market lifecycle, event routing, reconciliation.
//!
//! Everything that mutates risk, state-machine, or order bookkeeping runs
//! on this one task. The feeds deliver events through bounded channels and
//! the venue is only reached through the order manager, so check-then-act
//! sequences (risk gate, then place, then record) cannot interleave with
//! fill processing.
//!
//! The loop has four event sources: the 500 ms tick, user-stream events,
//! market-feed notifications, and the periodic timers (metrics, reconcile,
//! market-activity health).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use spread_common::{Fill, OrderStatus, Side};
use spread_market::{FeedEvent, MarketFeed, UserFeedEvent};

use crate::config::BotConfig;
use crate::order_manager::{OrderError, OrderManager, OrderManagerConfig};
use crate::risk::{RiskConfig, RiskDecision, RiskManager};
use crate::selector::CandidateMarket;
use crate::state::{InvariantViolation, OrderRef, State, StateMachine};
use crate::venue::Venue;

/// Main loop cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Exit criteria are suppressed for this long after market init.
const GRACE_PERIOD_SECS: i64 = 30;
/// How long startup waits for initial prices before proceeding anyway.
const PRICE_WAIT: Duration = Duration::from_secs(10);
/// Market-activity health check cadence.
const HEALTH_INTERVAL: Duration = Duration::from_secs(180);
/// An asset with no book update for this long is logged as inactive.
const MARKET_INACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

// Price sanity bounds applied before any order decision.
const MIN_SANE_BID: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001
const MAX_SANE_ASK: Decimal = Decimal::from_parts(999, 0, 0, false, 3); // 0.999
const MIN_SANE_SPREAD: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001
const MAX_SANE_SPREAD: Decimal = Decimal::from_parts(5, 0, 0, false, 1); // 0.5

/// Counters logged by the periodic metrics snapshot.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub orders_placed: u64,
    pub orders_replaced: u64,
    pub orders_cancelled: u64,
    pub buy_fills: u64,
    pub sell_fills: u64,
    pub rounds_completed: u64,
    pub risk_denials: u64,
    pub markets_deactivated: u64,
}

/// The trading engine.
pub struct MarketMaker {
    config: BotConfig,
    feed: MarketFeed,
    feed_events: mpsc::Receiver<FeedEvent>,
    user_events: mpsc::Receiver<UserFeedEvent>,
    orders: OrderManager,
    risk: RiskManager,
    machine: StateMachine,
    metrics: Metrics,
    shutdown: broadcast::Receiver<()>,
}

impl MarketMaker {
    pub fn new(
        config: BotConfig,
        feed: MarketFeed,
        feed_events: mpsc::Receiver<FeedEvent>,
        user_events: mpsc::Receiver<UserFeedEvent>,
        venue: Box<dyn Venue>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let orders = OrderManager::new(OrderManagerConfig::from_bot_config(&config), venue);
        let risk = RiskManager::new(RiskConfig::from_bot_config(&config));
        Self {
            config,
            feed,
            feed_events,
            user_events,
            orders,
            risk,
            machine: StateMachine::new(),
            metrics: Metrics::default(),
            shutdown,
        }
    }

    /// Run the engine over the selected markets until shutdown.
    pub async fn run(&mut self, candidates: Vec<CandidateMarket>) -> anyhow::Result<()> {
        for candidate in &candidates {
            self.machine.init_market(
                &candidate.asset_id,
                &candidate.condition_id,
                &candidate.slug,
            )?;
        }
        self.feed
            .subscribe(candidates.iter().map(|c| c.asset_id.clone()).collect())
            .await;

        self.wait_for_prices().await;

        if self.config.dry_run {
            debug!("dry-run: startup reconciliation skipped");
        } else {
            self.reconcile().await;
        }

        let mut tick = interval(TICK_INTERVAL);
        let mut reconcile_timer = interval(self.config.reconcile_interval());
        let mut metrics_timer = interval(self.config.metrics_interval());
        let mut health_timer = interval(HEALTH_INTERVAL);
        for timer in [
            &mut tick,
            &mut reconcile_timer,
            &mut metrics_timer,
            &mut health_timer,
        ] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(markets = self.machine.len(), "market maker running");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("shutdown requested");
                    break;
                }
                _ = tick.tick() => self.on_tick().await?,
                Some(event) = self.user_events.recv() => self.on_user_event(event).await?,
                Some(event) = self.feed_events.recv() => self.on_feed_event(event),
                _ = reconcile_timer.tick() => {
                    if !self.config.dry_run {
                        self.reconcile().await;
                    }
                }
                _ = metrics_timer.tick() => self.log_metrics(),
                _ = health_timer.tick() => self.health_check(),
            }
        }

        info!("cancelling all live orders before exit");
        self.orders.cancel_all().await;
        Ok(())
    }

    /// Wait up to [`PRICE_WAIT`] for every market to show prices. Markets
    /// still dark are logged, not failed.
    async fn wait_for_prices(&self) {
        let deadline = Instant::now() + PRICE_WAIT;
        loop {
            let missing: Vec<String> = self
                .machine
                .assets()
                .into_iter()
                .filter(|a| self.feed.last_prices(a).is_none())
                .collect();
            if missing.is_empty() {
                info!("all markets have initial prices");
                return;
            }
            if Instant::now() >= deadline {
                warn!(count = missing.len(), ?missing, "markets without initial prices");
                return;
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    // ------------------------------------------------------------------
    // Tick processing
    // ------------------------------------------------------------------

    async fn on_tick(&mut self) -> Result<(), InvariantViolation> {
        for asset in self.machine.assets() {
            let Some(market) = self.machine.get(&asset) else {
                continue;
            };
            if market.state == State::Deactivating {
                self.progress_deactivation(&asset).await?;
                continue;
            }
            if let Some(reason) = self.check_exit(&asset) {
                self.deactivate(&asset, reason).await?;
                continue;
            }
            self.process_market(&asset).await?;
        }
        Ok(())
    }

    /// Exit criteria, suppressed during the post-init grace period.
    fn check_exit(&self, asset_id: &str) -> Option<&'static str> {
        let market = self.machine.get(asset_id)?;
        if market.age_secs() < GRACE_PERIOD_SECS {
            return None;
        }
        let Some((bid, ask)) = self.feed.last_prices(asset_id) else {
            return Some("no_prices");
        };
        if ask - bid < self.config.min_spread_cents / Decimal::ONE_HUNDRED {
            return Some("spread_too_small");
        }
        None
    }

    async fn process_market(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let state = match self.machine.get(asset_id) {
            Some(m) => m.state,
            None => return Ok(()),
        };
        match state {
            State::Idle => self.try_begin_buy(asset_id).await,
            State::WaitBuyFill => self.manage_buy(asset_id).await,
            State::PlaceSell => self.try_place_sell(asset_id).await,
            State::AskChase => self.manage_chase(asset_id).await,
            State::WaitSellFill => self.maybe_replace_sell(asset_id).await,
            State::Complete => self.machine.complete_to_idle(asset_id),
            // PLACE_BUY is transient within a handler; DEACTIVATING is
            // handled before dispatch.
            State::PlaceBuy | State::Deactivating => Ok(()),
        }
    }

    /// Current prices if they pass the sanity gate; anything outside the
    /// believable band is treated as no-price for this tick.
    fn sane_prices(&self, asset_id: &str) -> Option<(Decimal, Decimal)> {
        let (bid, ask) = self.feed.last_prices(asset_id)?;
        let spread = ask - bid;
        if bid < MIN_SANE_BID
            || ask > MAX_SANE_ASK
            || spread < MIN_SANE_SPREAD
            || spread > MAX_SANE_SPREAD
        {
            debug!(asset = asset_id, %bid, %ask, "prices outside sanity band, skipping tick");
            return None;
        }
        Some((bid, ask))
    }

    /// IDLE: gate through risk, then join the best bid.
    async fn try_begin_buy(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let Some((bid, ask)) = self.sane_prices(asset_id) else {
            return Ok(());
        };
        let spread_cents = (ask - bid) * Decimal::ONE_HUNDRED;
        let size = order_size(self.config.min_notional_per_order_usdc, bid);

        match self.risk.can_place_buy(asset_id, size, bid, spread_cents) {
            RiskDecision::Denied(reason) => {
                info!(asset = asset_id, reason = reason.code(), %size, %bid,
                      "risk denied buy");
                self.metrics.risk_denials += 1;
                return Ok(());
            }
            RiskDecision::Allowed => {}
        }

        self.machine.begin_buy(asset_id)?;
        match self.orders.place_buy(asset_id, bid, ask, size).await {
            Ok(order) => {
                self.risk.record_buy_order(asset_id, order.size, order.price);
                self.machine.buy_placed(
                    asset_id,
                    OrderRef {
                        order_id: order.order_id,
                        price: order.price,
                        size: order.size,
                    },
                )?;
                self.metrics.orders_placed += 1;
                Ok(())
            }
            Err(e) => {
                warn!(asset = asset_id, error = %e, "buy placement failed");
                self.machine.buy_failed(asset_id)
            }
        }
    }

    /// WAIT_BUY_FILL: replace the resting buy on TTL or drift.
    async fn manage_buy(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let Some((bid, ask)) = self.sane_prices(asset_id) else {
            return Ok(());
        };
        let tick_size = self.feed.tick_size(asset_id);
        if !self.orders.should_replace_buy(asset_id, bid, tick_size) {
            return Ok(());
        }
        let Some(old) = self.orders.active_order(asset_id).cloned() else {
            return Ok(());
        };

        match self.orders.replace_buy(asset_id, bid, ask).await {
            Ok(new) => {
                self.risk.cancel_buy_order(asset_id, old.size, old.price);
                self.risk.record_buy_order(asset_id, new.size, new.price);
                self.machine.buy_replaced(
                    asset_id,
                    OrderRef {
                        order_id: new.order_id.clone(),
                        price: new.price,
                        size: new.size,
                    },
                )?;
                self.metrics.orders_replaced += 1;
                debug!(asset = asset_id, old = %old.price, new = %new.price, "buy replaced");
                Ok(())
            }
            Err(OrderError::ReplaceFailed(reason)) => {
                // Cancel failed: the prior order is intact, try again later.
                warn!(asset = asset_id, %reason, "buy replace failed, keeping prior order");
                Ok(())
            }
            Err(e) => {
                // Cancel succeeded but the new placement failed: orderless.
                warn!(asset = asset_id, error = %e, "buy replace lost the order");
                self.risk.cancel_buy_order(asset_id, old.size, old.price);
                self.machine.buy_cancelled(asset_id)
            }
        }
    }

    /// PLACE_SELL: offer the held position at the best ask.
    async fn try_place_sell(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let size = match self.machine.get(asset_id) {
            Some(m) if m.holds_position() => m.filled_size,
            _ => return Ok(()),
        };
        let Some((bid, ask)) = self.sane_prices(asset_id) else {
            return Ok(());
        };

        match self.orders.place_sell(asset_id, bid, ask, size).await {
            Ok(order) => {
                self.machine.sell_placed(
                    asset_id,
                    OrderRef {
                        order_id: order.order_id,
                        price: order.price,
                        size: order.size,
                    },
                )?;
                self.metrics.orders_placed += 1;
                Ok(())
            }
            Err(e) => {
                // Stay in PLACE_SELL; the next tick retries.
                warn!(asset = asset_id, error = %e, "sell placement failed, will retry");
                Ok(())
            }
        }
    }

    /// ASK_CHASE: chase while the window is open, then settle into
    /// WAIT_SELL_FILL.
    async fn manage_chase(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let (chase_started_at, replace_count) = match self.machine.get(asset_id) {
            Some(m) => (m.chase_started_at, m.replace_count),
            None => return Ok(()),
        };
        if !self.orders.chase_window_open(chase_started_at, replace_count) {
            debug!(asset = asset_id, replace_count, "chase window closed");
            return self.machine.chase_expired(asset_id);
        }
        self.maybe_replace_sell(asset_id).await
    }

    /// Replace the resting sell on TTL or ask drift. The same policy runs
    /// inside and after the chase window.
    async fn maybe_replace_sell(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let Some((bid, ask)) = self.sane_prices(asset_id) else {
            return Ok(());
        };
        let tick_size = self.feed.tick_size(asset_id);
        if !self.orders.should_replace_sell(asset_id, ask, tick_size) {
            return Ok(());
        }

        match self.orders.replace_sell(asset_id, bid, ask).await {
            Ok(new) => {
                self.machine.sell_replaced(
                    asset_id,
                    OrderRef {
                        order_id: new.order_id.clone(),
                        price: new.price,
                        size: new.size,
                    },
                )?;
                self.metrics.orders_replaced += 1;
                debug!(asset = asset_id, new = %new.price, "sell replaced");
                Ok(())
            }
            Err(OrderError::ReplaceFailed(reason)) => {
                warn!(asset = asset_id, %reason, "sell replace failed, keeping prior order");
                Ok(())
            }
            Err(e) => {
                warn!(asset = asset_id, error = %e, "sell replace lost the order");
                self.machine.sell_lost(asset_id)
            }
        }
    }

    // ------------------------------------------------------------------
    // Deactivation
    // ------------------------------------------------------------------

    /// Withdraw a market: cancel whatever rests, then liquidate inventory.
    async fn deactivate(&mut self, asset_id: &str, reason: &str) -> Result<(), InvariantViolation> {
        warn!(asset = asset_id, reason, "deactivating market");
        self.metrics.markets_deactivated += 1;

        if let Some(order) = self.orders.active_order(asset_id).cloned() {
            match self.orders.cancel(asset_id).await {
                Ok(_) => self.metrics.orders_cancelled += 1,
                Err(e) => {
                    warn!(asset = asset_id, error = %e,
                          "cancel during deactivation failed, dropping local record");
                    self.orders.clear(asset_id);
                }
            }
            if order.side == Side::Buy {
                self.risk.cancel_buy_order(asset_id, order.size, order.price);
            }
        }

        self.machine.deactivate(asset_id)?;
        self.progress_deactivation(asset_id).await
    }

    /// DEACTIVATING: place the liquidation sell if inventory remains, or
    /// finish the withdrawal once flat.
    async fn progress_deactivation(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let (holds, size) = match self.machine.get(asset_id) {
            Some(m) => (m.holds_position(), m.filled_size),
            None => return Ok(()),
        };

        if !holds {
            self.finish_deactivation(asset_id).await;
            return Ok(());
        }
        if self.orders.active_order(asset_id).is_some() {
            // Liquidation sell is working; wait for it.
            return Ok(());
        }
        let Some((bid, ask)) = self.sane_prices(asset_id) else {
            return Ok(());
        };
        match self.orders.place_sell(asset_id, bid, ask, size).await {
            Ok(order) => {
                info!(asset = asset_id, price = %order.price, %size, "liquidation sell placed");
                self.machine.liquidation_placed(
                    asset_id,
                    OrderRef {
                        order_id: order.order_id,
                        price: order.price,
                        size: order.size,
                    },
                )
            }
            Err(e) => {
                warn!(asset = asset_id, error = %e, "liquidation sell failed, will retry");
                Ok(())
            }
        }
    }

    async fn finish_deactivation(&mut self, asset_id: &str) {
        self.risk.clean_market(asset_id);
        self.machine.remove(asset_id);
        self.feed.unsubscribe(vec![asset_id.to_string()]).await;
        info!(asset = asset_id, "market withdrawn");
    }

    // ------------------------------------------------------------------
    // Event routing
    // ------------------------------------------------------------------

    async fn on_user_event(&mut self, event: UserFeedEvent) -> Result<(), InvariantViolation> {
        match event {
            UserFeedEvent::Fill(fill) => self.on_fill(fill).await,
            UserFeedEvent::Order(order) => self.on_order_event(order),
            UserFeedEvent::Disconnected(reason) => {
                warn!(%reason, "user feed disconnected");
                Ok(())
            }
        }
    }

    async fn on_fill(&mut self, fill: Fill) -> Result<(), InvariantViolation> {
        let asset_id = fill.asset_id.clone();
        let Some(market) = self.machine.get(&asset_id) else {
            warn!(asset = %asset_id, order = %fill.order_id, "fill for unknown market dropped");
            return Ok(());
        };

        match (market.state, fill.side) {
            (State::WaitBuyFill, Side::Buy) => {
                if !order_matches(market.buy_order.as_ref(), &fill.order_id) {
                    warn!(asset = %asset_id, order = %fill.order_id,
                          "buy fill for unrecognized order dropped");
                    return Ok(());
                }
                self.orders.clear(&asset_id);
                self.machine.buy_filled(&asset_id, fill.size, fill.price)?;
                self.metrics.buy_fills += 1;
                info!(asset = %asset_id, size = %fill.size, price = %fill.price, "buy filled");
                // Flip straight into the sell; waiting a tick only gives
                // the market time to move away.
                self.try_place_sell(&asset_id).await
            }
            (State::AskChase | State::WaitSellFill, Side::Sell) => {
                if !order_matches(market.sell_order.as_ref(), &fill.order_id) {
                    warn!(asset = %asset_id, order = %fill.order_id,
                          "sell fill for unrecognized order dropped");
                    return Ok(());
                }
                let cost = market.filled_price * market.filled_size;
                self.orders.clear(&asset_id);
                self.risk.record_sell_fill(&asset_id, fill.size);
                self.machine.sell_filled(&asset_id)?;
                self.metrics.sell_fills += 1;
                self.metrics.rounds_completed += 1;
                let pnl = fill.price * fill.size - cost;
                info!(asset = %asset_id, size = %fill.size, price = %fill.price, %pnl,
                      "sell filled, round trip complete");
                Ok(())
            }
            (State::Deactivating, Side::Sell) => {
                self.orders.clear(&asset_id);
                self.risk.record_sell_fill(&asset_id, fill.size);
                self.machine.liquidation_filled(&asset_id)?;
                self.metrics.sell_fills += 1;
                info!(asset = %asset_id, size = %fill.size, "liquidation sell filled");
                self.finish_deactivation(&asset_id).await;
                Ok(())
            }
            (state, side) => {
                warn!(asset = %asset_id, %state, %side, "fill in unexpected state dropped");
                Ok(())
            }
        }
    }

    /// Order-status routing. Only CANCELLED drives transitions; a stale id
    /// (already replaced) is discarded, tolerating the race between a
    /// replace and the cancellation notice for the replaced order.
    fn on_order_event(
        &mut self,
        event: spread_common::OrderEvent,
    ) -> Result<(), InvariantViolation> {
        if event.status != OrderStatus::Cancelled {
            debug!(order = %event.order_id, status = ?event.status, "order status noted");
            return Ok(());
        }

        let asset_id = event.asset_id.clone();
        let Some(market) = self.machine.get(&asset_id) else {
            warn!(asset = %asset_id, order = %event.order_id,
                  "cancellation for unknown market dropped");
            return Ok(());
        };

        let state = market.state;
        let matched_buy = market
            .buy_order
            .clone()
            .filter(|o| o.order_id == event.order_id);
        let sell_match = order_matches(market.sell_order.as_ref(), &event.order_id);

        if let (State::WaitBuyFill, Some(order)) = (state, matched_buy) {
            self.orders.clear(&asset_id);
            self.risk.cancel_buy_order(&asset_id, order.size, order.price);
            self.machine.buy_cancelled(&asset_id)?;
            info!(asset = %asset_id, order = %event.order_id, "live buy cancelled externally");
        } else if sell_match && matches!(state, State::AskChase | State::WaitSellFill) {
            self.orders.clear(&asset_id);
            self.machine.sell_lost(&asset_id)?;
            info!(asset = %asset_id, order = %event.order_id,
                  "live sell cancelled externally, will re-place");
        } else if sell_match && state == State::Deactivating {
            self.orders.clear(&asset_id);
            self.machine.liquidation_sell_lost(&asset_id)?;
            info!(asset = %asset_id, "liquidation sell cancelled externally, will re-place");
        } else {
            debug!(asset = %asset_id, order = %event.order_id,
                   "stale cancellation ignored");
        }
        Ok(())
    }

    fn on_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => info!("market feed connected"),
            FeedEvent::Disconnected(reason) => warn!(%reason, "market feed disconnected"),
            FeedEvent::TickSizeChange {
                asset_id,
                tick_size,
            } => {
                // The next tick re-evaluates any live order against the
                // new tick via should_replace.
                debug!(asset = %asset_id, %tick_size, "tick size changed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Periodic tasks
    // ------------------------------------------------------------------

    /// Compare local live orders against the venue's open orders. Strays
    /// on the venue are cancelled; local records the venue no longer knows
    /// are dropped and their markets repaired.
    async fn reconcile(&mut self) {
        let venue_orders = match self.orders.venue_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "reconcile: open-orders fetch failed");
                return;
            }
        };
        let venue_ids: HashSet<String> =
            venue_orders.iter().map(|o| o.order_id.clone()).collect();
        let local_ids: HashSet<String> = self.orders.all_order_ids().into_iter().collect();

        let strays: Vec<String> = venue_ids.difference(&local_ids).cloned().collect();
        if !strays.is_empty() {
            warn!(count = strays.len(), "reconcile: cancelling untracked venue orders");
            if let Err(e) = self.orders.cancel_untracked(&strays).await {
                warn!(error = %e, "reconcile: stray cancel failed");
            }
        }

        let lost: Vec<String> = local_ids.difference(&venue_ids).cloned().collect();
        if lost.is_empty() {
            debug!(local = local_ids.len(), venue = venue_ids.len(), "reconcile: clean");
            return;
        }
        for asset_id in self.machine.assets() {
            let Some(order) = self.orders.active_order(&asset_id) else {
                continue;
            };
            if !lost.contains(&order.order_id) {
                continue;
            }
            warn!(asset = %asset_id, order = %order.order_id,
                  "reconcile: local order missing on venue, treating as cancelled");
            let event = spread_common::OrderEvent {
                order_id: order.order_id.clone(),
                asset_id: asset_id.clone(),
                status: OrderStatus::Cancelled,
                size_matched: Decimal::ZERO,
                ts: chrono::Utc::now(),
            };
            if let Err(e) = self.on_order_event(event) {
                warn!(error = %e, "reconcile: repair failed");
            }
        }
    }

    fn log_metrics(&self) {
        let counts = self.machine.state_counts();
        let mut states: HashMap<&'static str, usize> = HashMap::new();
        for (state, count) in counts {
            states.insert(state.as_str(), count);
        }
        info!(
            markets = self.machine.len(),
            active_orders = self.orders.active_count(),
            global_notional = %self.risk.global_notional(),
            ?states,
            placed = self.metrics.orders_placed,
            replaced = self.metrics.orders_replaced,
            cancelled = self.metrics.orders_cancelled,
            buy_fills = self.metrics.buy_fills,
            sell_fills = self.metrics.sell_fills,
            rounds = self.metrics.rounds_completed,
            risk_denials = self.metrics.risk_denials,
            deactivated = self.metrics.markets_deactivated,
            "metrics snapshot"
        );
    }

    fn health_check(&self) {
        for asset in self.machine.assets() {
            if !self.feed.is_active(&asset, MARKET_INACTIVE_TIMEOUT) {
                warn!(asset = %asset, timeout = ?MARKET_INACTIVE_TIMEOUT,
                      "market has had no book update within the activity window");
            }
        }
    }

    /// Test-facing view of the counters.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Shares to buy so the order notional lands on the configured floor.
fn order_size(min_notional: Decimal, price: Decimal) -> Decimal {
    (min_notional / price).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn order_matches(order: Option<&OrderRef>, order_id: &str) -> bool {
    order.map(|o| o.order_id == order_id).unwrap_or(false)
}
