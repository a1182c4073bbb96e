//! Per-market trading state machine.
//!
//! Each active market cycles through a strictly sequential buy-then-sell
//! round trip:
//!
//! ```text
//! IDLE -> PLACE_BUY -> WAIT_BUY_FILL -> PLACE_SELL -> ASK_CHASE
//!                                            |            |
//!                                            |            v
//!                                            |     WAIT_SELL_FILL
//!                                            v            |
//!                                        (fill) ----> COMPLETE -> IDLE
//! ```
//!
//! Any state may transition to DEACTIVATING when exit criteria fire. The
//! strict sequencing is what makes risk accounting exact: a market holds
//! either nothing, one committed buy, or one position with a working sell.
//!
//! Transitions are methods; calling one from the wrong source state is an
//! [`InvariantViolation`] and the process treats it as fatal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// The eight per-market states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No live order; may initiate a buy.
    Idle,
    /// A buy placement attempt is in flight.
    PlaceBuy,
    /// A resting buy is live; may be replaced on drift or TTL.
    WaitBuyFill,
    /// Holding shares; a sell placement attempt is in flight.
    PlaceSell,
    /// A resting sell is live inside the chase window.
    AskChase,
    /// A resting sell is live after the chase window.
    WaitSellFill,
    /// Round trip finished; returns to IDLE on the next tick.
    Complete,
    /// Market is being withdrawn and liquidated.
    Deactivating,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::PlaceBuy => "place_buy",
            State::WaitBuyFill => "wait_buy_fill",
            State::PlaceSell => "place_sell",
            State::AskChase => "ask_chase",
            State::WaitSellFill => "wait_sell_fill",
            State::Complete => "complete",
            State::Deactivating => "deactivating",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violation of the transition rules. Fatal: indicates an engine bug, not
/// a market condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("illegal transition for {asset_id}: {from} -> {to}")]
    IllegalTransition {
        asset_id: String,
        from: State,
        to: State,
    },

    #[error("unknown market {0}")]
    UnknownMarket(String),

    #[error("market {0} already initialized")]
    AlreadyInitialized(String),
}

/// Reference to an order the state machine is waiting on.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRef {
    pub order_id: String,
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-market state record.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub asset_id: String,
    pub condition_id: String,
    pub slug: String,
    pub state: State,
    /// Metadata of the resting buy, while one exists.
    pub buy_order: Option<OrderRef>,
    /// Metadata of the resting sell, while one exists.
    pub sell_order: Option<OrderRef>,
    /// Position size acquired by the last buy fill.
    pub filled_size: Decimal,
    /// Price the position was acquired at, for releasing exposure.
    pub filled_price: Decimal,
    /// When the current sell entered the chase window.
    pub chase_started_at: Option<DateTime<Utc>>,
    /// Sell replaces performed for the current position.
    pub replace_count: u32,
    pub initialized_at: DateTime<Utc>,
}

impl MarketState {
    fn new(asset_id: String, condition_id: String, slug: String) -> Self {
        Self {
            asset_id,
            condition_id,
            slug,
            state: State::Idle,
            buy_order: None,
            sell_order: None,
            filled_size: Decimal::ZERO,
            filled_price: Decimal::ZERO,
            chase_started_at: None,
            replace_count: 0,
            initialized_at: Utc::now(),
        }
    }

    /// Seconds since this market was initialized.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.initialized_at).num_seconds()
    }

    /// Holding shares that still need to be sold.
    pub fn holds_position(&self) -> bool {
        self.filled_size > Decimal::ZERO
    }
}

/// All per-market state, keyed by asset id.
#[derive(Debug, Default)]
pub struct StateMachine {
    markets: HashMap<String, MarketState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market in IDLE.
    pub fn init_market(
        &mut self,
        asset_id: &str,
        condition_id: &str,
        slug: &str,
    ) -> Result<(), InvariantViolation> {
        if self.markets.contains_key(asset_id) {
            return Err(InvariantViolation::AlreadyInitialized(asset_id.to_string()));
        }
        self.markets.insert(
            asset_id.to_string(),
            MarketState::new(
                asset_id.to_string(),
                condition_id.to_string(),
                slug.to_string(),
            ),
        );
        Ok(())
    }

    pub fn get(&self, asset_id: &str) -> Option<&MarketState> {
        self.markets.get(asset_id)
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.markets.contains_key(asset_id)
    }

    /// Remove a market record entirely (after liquidation completes).
    pub fn remove(&mut self, asset_id: &str) -> Option<MarketState> {
        self.markets.remove(asset_id)
    }

    /// Asset ids of all registered markets.
    pub fn assets(&self) -> Vec<String> {
        self.markets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    /// Count of markets per state, for the metrics snapshot.
    pub fn state_counts(&self) -> HashMap<State, usize> {
        let mut counts = HashMap::new();
        for market in self.markets.values() {
            *counts.entry(market.state).or_insert(0) += 1;
        }
        counts
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// IDLE -> PLACE_BUY: eligibility and risk passed, placement starting.
    pub fn begin_buy(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::Idle, State::PlaceBuy)?;
        market.state = State::PlaceBuy;
        Ok(())
    }

    /// PLACE_BUY -> WAIT_BUY_FILL: placement succeeded.
    pub fn buy_placed(
        &mut self,
        asset_id: &str,
        order: OrderRef,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::PlaceBuy, State::WaitBuyFill)?;
        market.state = State::WaitBuyFill;
        market.buy_order = Some(order);
        Ok(())
    }

    /// PLACE_BUY -> IDLE: placement failed.
    pub fn buy_failed(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::PlaceBuy, State::Idle)?;
        market.state = State::Idle;
        market.buy_order = None;
        Ok(())
    }

    /// WAIT_BUY_FILL -> PLACE_SELL: our buy filled; record the position.
    pub fn buy_filled(
        &mut self,
        asset_id: &str,
        size: Decimal,
        price: Decimal,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::WaitBuyFill, State::PlaceSell)?;
        market.state = State::PlaceSell;
        market.buy_order = None;
        market.filled_size = size;
        market.filled_price = price;
        Ok(())
    }

    /// WAIT_BUY_FILL -> IDLE: our live buy was cancelled externally.
    pub fn buy_cancelled(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::WaitBuyFill, State::Idle)?;
        market.state = State::Idle;
        market.buy_order = None;
        Ok(())
    }

    /// Refresh the buy order metadata after a successful replace.
    pub fn buy_replaced(
        &mut self,
        asset_id: &str,
        order: OrderRef,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::WaitBuyFill, State::WaitBuyFill)?;
        market.buy_order = Some(order);
        Ok(())
    }

    /// PLACE_SELL -> ASK_CHASE: sell placed; the chase window opens.
    pub fn sell_placed(
        &mut self,
        asset_id: &str,
        order: OrderRef,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::PlaceSell, State::AskChase)?;
        market.state = State::AskChase;
        market.sell_order = Some(order);
        market.chase_started_at = Some(Utc::now());
        market.replace_count = 0;
        Ok(())
    }

    /// Refresh the sell order metadata after a successful replace, bumping
    /// the per-position replace counter.
    pub fn sell_replaced(
        &mut self,
        asset_id: &str,
        order: OrderRef,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        match market.state {
            State::AskChase | State::WaitSellFill => {
                market.sell_order = Some(order);
                market.replace_count += 1;
                Ok(())
            }
            from => Err(InvariantViolation::IllegalTransition {
                asset_id: asset_id.to_string(),
                from,
                to: market.state,
            }),
        }
    }

    /// The sell was lost without a fill (external cancel, failed replace);
    /// go back to PLACE_SELL so the next tick re-places it.
    pub fn sell_lost(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        match market.state {
            State::AskChase | State::WaitSellFill => {
                market.state = State::PlaceSell;
                market.sell_order = None;
                Ok(())
            }
            from => Err(InvariantViolation::IllegalTransition {
                asset_id: asset_id.to_string(),
                from,
                to: State::PlaceSell,
            }),
        }
    }

    /// ASK_CHASE -> WAIT_SELL_FILL: window exhausted or max replaces hit.
    pub fn chase_expired(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::AskChase, State::WaitSellFill)?;
        market.state = State::WaitSellFill;
        Ok(())
    }

    /// ASK_CHASE | WAIT_SELL_FILL -> COMPLETE: our sell filled.
    pub fn sell_filled(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        match market.state {
            State::AskChase | State::WaitSellFill => {
                market.state = State::Complete;
                market.sell_order = None;
                market.filled_size = Decimal::ZERO;
                market.filled_price = Decimal::ZERO;
                market.chase_started_at = None;
                Ok(())
            }
            from => Err(InvariantViolation::IllegalTransition {
                asset_id: asset_id.to_string(),
                from,
                to: State::Complete,
            }),
        }
    }

    /// COMPLETE -> IDLE: round trip booked; ready for the next one.
    pub fn complete_to_idle(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::Complete, State::Idle)?;
        market.state = State::Idle;
        market.replace_count = 0;
        Ok(())
    }

    /// any -> DEACTIVATING: exit criteria met; the market is withdrawn.
    pub fn deactivate(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        market.state = State::Deactivating;
        Ok(())
    }

    /// Record the liquidation sell placed while DEACTIVATING.
    pub fn liquidation_placed(
        &mut self,
        asset_id: &str,
        order: OrderRef,
    ) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::Deactivating, State::Deactivating)?;
        market.sell_order = Some(order);
        Ok(())
    }

    /// The liquidation sell filled: the position is gone, withdrawal can
    /// finish.
    pub fn liquidation_filled(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::Deactivating, State::Deactivating)?;
        market.sell_order = None;
        market.filled_size = Decimal::ZERO;
        market.filled_price = Decimal::ZERO;
        Ok(())
    }

    /// The liquidation sell was lost without a fill; it will be re-placed
    /// on the next tick.
    pub fn liquidation_sell_lost(&mut self, asset_id: &str) -> Result<(), InvariantViolation> {
        let market = self.expect(asset_id)?;
        Self::check(market, State::Deactivating, State::Deactivating)?;
        market.sell_order = None;
        Ok(())
    }

    fn expect(&mut self, asset_id: &str) -> Result<&mut MarketState, InvariantViolation> {
        self.markets
            .get_mut(asset_id)
            .ok_or_else(|| InvariantViolation::UnknownMarket(asset_id.to_string()))
    }

    fn check(
        market: &MarketState,
        expected: State,
        to: State,
    ) -> Result<(), InvariantViolation> {
        if market.state == expected {
            Ok(())
        } else {
            Err(InvariantViolation::IllegalTransition {
                asset_id: market.asset_id.clone(),
                from: market.state,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn machine_with(asset: &str) -> StateMachine {
        let mut machine = StateMachine::new();
        machine.init_market(asset, "cond-1", "will-it-rain").unwrap();
        machine
    }

    fn buy_ref() -> OrderRef {
        OrderRef {
            order_id: "buy-1".to_string(),
            price: dec!(0.46),
            size: dec!(5),
        }
    }

    fn sell_ref() -> OrderRef {
        OrderRef {
            order_id: "sell-1".to_string(),
            price: dec!(0.50),
            size: dec!(5),
        }
    }

    #[test]
    fn test_init_starts_idle() {
        let machine = machine_with("a");
        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::Idle);
        assert!(market.buy_order.is_none());
        assert!(!market.holds_position());
    }

    #[test]
    fn test_double_init_rejected() {
        let mut machine = machine_with("a");
        assert_eq!(
            machine.init_market("a", "cond-1", "slug"),
            Err(InvariantViolation::AlreadyInitialized("a".to_string()))
        );
    }

    #[test]
    fn test_full_round_trip() {
        let mut machine = machine_with("a");

        machine.begin_buy("a").unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::PlaceBuy);

        machine.buy_placed("a", buy_ref()).unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::WaitBuyFill);

        machine.buy_filled("a", dec!(5), dec!(0.46)).unwrap();
        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::PlaceSell);
        assert!(market.buy_order.is_none());
        assert_eq!(market.filled_size, dec!(5));

        machine.sell_placed("a", sell_ref()).unwrap();
        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::AskChase);
        assert!(market.chase_started_at.is_some());
        assert_eq!(market.replace_count, 0);

        machine.sell_filled("a").unwrap();
        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::Complete);
        assert!(market.sell_order.is_none());
        assert_eq!(market.filled_size, Decimal::ZERO);

        machine.complete_to_idle("a").unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::Idle);
    }

    #[test]
    fn test_buy_failure_returns_to_idle() {
        let mut machine = machine_with("a");
        machine.begin_buy("a").unwrap();
        machine.buy_failed("a").unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::Idle);
    }

    #[test]
    fn test_external_buy_cancel_returns_to_idle() {
        let mut machine = machine_with("a");
        machine.begin_buy("a").unwrap();
        machine.buy_placed("a", buy_ref()).unwrap();
        machine.buy_cancelled("a").unwrap();

        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::Idle);
        assert!(market.buy_order.is_none());
    }

    #[test]
    fn test_chase_expiry_then_fill() {
        let mut machine = machine_with("a");
        machine.begin_buy("a").unwrap();
        machine.buy_placed("a", buy_ref()).unwrap();
        machine.buy_filled("a", dec!(5), dec!(0.46)).unwrap();
        machine.sell_placed("a", sell_ref()).unwrap();

        machine.chase_expired("a").unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::WaitSellFill);

        machine.sell_filled("a").unwrap();
        assert_eq!(machine.get("a").unwrap().state, State::Complete);
    }

    #[test]
    fn test_sell_replace_bumps_counter() {
        let mut machine = machine_with("a");
        machine.begin_buy("a").unwrap();
        machine.buy_placed("a", buy_ref()).unwrap();
        machine.buy_filled("a", dec!(5), dec!(0.46)).unwrap();
        machine.sell_placed("a", sell_ref()).unwrap();

        let replacement = OrderRef {
            order_id: "sell-2".to_string(),
            price: dec!(0.51),
            size: dec!(5),
        };
        machine.sell_replaced("a", replacement).unwrap();

        let market = machine.get("a").unwrap();
        assert_eq!(market.replace_count, 1);
        assert_eq!(market.sell_order.as_ref().unwrap().order_id, "sell-2");
        // Replace does not advance the state
        assert_eq!(market.state, State::AskChase);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut machine = machine_with("a");

        // Cannot record a fill in IDLE
        assert!(matches!(
            machine.buy_filled("a", dec!(5), dec!(0.46)),
            Err(InvariantViolation::IllegalTransition { .. })
        ));
        // Cannot place a sell without a position
        assert!(matches!(
            machine.sell_placed("a", sell_ref()),
            Err(InvariantViolation::IllegalTransition { .. })
        ));
        // Cannot begin a buy twice
        machine.begin_buy("a").unwrap();
        assert!(matches!(
            machine.begin_buy("a"),
            Err(InvariantViolation::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_market_rejected() {
        let mut machine = StateMachine::new();
        assert_eq!(
            machine.begin_buy("ghost"),
            Err(InvariantViolation::UnknownMarket("ghost".to_string()))
        );
    }

    #[test]
    fn test_deactivate_from_any_state() {
        for advance in 0..4 {
            let mut machine = machine_with("a");
            if advance >= 1 {
                machine.begin_buy("a").unwrap();
            }
            if advance >= 2 {
                machine.buy_placed("a", buy_ref()).unwrap();
            }
            if advance >= 3 {
                machine.buy_filled("a", dec!(5), dec!(0.46)).unwrap();
            }
            machine.deactivate("a").unwrap();
            assert_eq!(machine.get("a").unwrap().state, State::Deactivating);
        }
    }

    #[test]
    fn test_sell_lost_returns_to_place_sell() {
        let mut machine = machine_with("a");
        machine.begin_buy("a").unwrap();
        machine.buy_placed("a", buy_ref()).unwrap();
        machine.buy_filled("a", dec!(5), dec!(0.46)).unwrap();
        machine.sell_placed("a", sell_ref()).unwrap();

        machine.sell_lost("a").unwrap();
        let market = machine.get("a").unwrap();
        assert_eq!(market.state, State::PlaceSell);
        assert!(market.sell_order.is_none());
        // Position is still held and will be re-offered
        assert!(market.holds_position());
    }

    #[test]
    fn test_state_counts() {
        let mut machine = StateMachine::new();
        machine.init_market("a", "c1", "s1").unwrap();
        machine.init_market("b", "c2", "s2").unwrap();
        machine.begin_buy("a").unwrap();

        let counts = machine.state_counts();
        assert_eq!(counts.get(&State::Idle), Some(&1));
        assert_eq!(counts.get(&State::PlaceBuy), Some(&1));
    }
}
