//! Pre-trade risk gating and exposure accounting.
//!
//! Tracks committed shares and notional per asset plus the aggregate
//! notional at risk, and gates every buy placement against the configured
//! floors and caps. Checks run in a fixed order and the first failure wins.
//!
//! All mutation happens from the orchestrator task; check-then-act
//! sequences are atomic because nothing else touches this state.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

/// Tolerance on the minimum-notional floor (0.5%), absorbing size rounding.
const MIN_NOTIONAL_TOLERANCE: Decimal = Decimal::from_parts(995, 0, 0, false, 3); // 0.995

/// Why a buy placement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDenial {
    MinNotional,
    ExpectedProfitLow,
    MinSize,
    SharesCap,
    MarketNotionalCap,
    GlobalNotionalCap,
}

impl RiskDenial {
    /// Stable code for logs and tests.
    pub fn code(&self) -> &'static str {
        match self {
            RiskDenial::MinNotional => "min_notional",
            RiskDenial::ExpectedProfitLow => "expected_profit_low",
            RiskDenial::MinSize => "min_size",
            RiskDenial::SharesCap => "shares_cap",
            RiskDenial::MarketNotionalCap => "market_notional_cap",
            RiskDenial::GlobalNotionalCap => "global_notional_cap",
        }
    }
}

impl std::fmt::Display for RiskDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Denied(RiskDenial),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }
}

/// Committed exposure for one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Exposure {
    /// Shares committed (resting buy size, or held position).
    pub shares_committed: Decimal,
    /// USDC committed against those shares.
    pub notional_committed: Decimal,
}

/// Risk limits, lifted from [`crate::config::BotConfig`].
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub min_notional_per_order: Decimal,
    pub min_expected_profit: Decimal,
    pub min_size_shares: Decimal,
    pub max_shares_per_market: Decimal,
    pub max_usdc_per_market: Decimal,
    pub max_notional_at_risk: Decimal,
}

impl RiskConfig {
    pub fn from_bot_config(config: &crate::config::BotConfig) -> Self {
        Self {
            min_notional_per_order: config.min_notional_per_order_usdc,
            min_expected_profit: config.min_expected_profit_usdc,
            min_size_shares: config.min_size_shares,
            max_shares_per_market: config.max_shares_per_market,
            max_usdc_per_market: config.max_usdc_per_market,
            max_notional_at_risk: config.max_notional_at_risk_usdc,
        }
    }
}

/// Exposure tracker and buy gate.
#[derive(Debug)]
pub struct RiskManager {
    config: RiskConfig,
    exposure: HashMap<String, Exposure>,
    global_notional: Decimal,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            exposure: HashMap::new(),
            global_notional: Decimal::ZERO,
        }
    }

    /// Gate a buy placement. Denials are evaluated in a fixed order:
    /// notional floor, expected profit, size floor, share cap, per-market
    /// notional cap, global notional cap.
    pub fn can_place_buy(
        &self,
        asset_id: &str,
        size: Decimal,
        price: Decimal,
        spread_cents: Decimal,
    ) -> RiskDecision {
        let notional = size * price;

        if notional < MIN_NOTIONAL_TOLERANCE * self.config.min_notional_per_order {
            return RiskDecision::Denied(RiskDenial::MinNotional);
        }

        let expected_profit = spread_cents / Decimal::ONE_HUNDRED * notional;
        if expected_profit < self.config.min_expected_profit {
            return RiskDecision::Denied(RiskDenial::ExpectedProfitLow);
        }

        if size < self.config.min_size_shares {
            return RiskDecision::Denied(RiskDenial::MinSize);
        }

        let current = self.exposure(asset_id);
        if current.shares_committed + size > self.config.max_shares_per_market {
            return RiskDecision::Denied(RiskDenial::SharesCap);
        }
        if current.notional_committed + notional > self.config.max_usdc_per_market {
            return RiskDecision::Denied(RiskDenial::MarketNotionalCap);
        }
        if self.global_notional + notional > self.config.max_notional_at_risk {
            return RiskDecision::Denied(RiskDenial::GlobalNotionalCap);
        }

        RiskDecision::Allowed
    }

    /// Commit exposure for a placed (or replaced) buy order.
    pub fn record_buy_order(&mut self, asset_id: &str, size: Decimal, price: Decimal) {
        let notional = size * price;
        let entry = self.exposure.entry(asset_id.to_string()).or_default();
        entry.shares_committed += size;
        entry.notional_committed += notional;
        self.global_notional += notional;
        debug!(asset = asset_id, %size, %price, global = %self.global_notional,
               "risk: buy committed");
    }

    /// Release the exposure of a cancelled (or failed) buy order. Exact
    /// inverse of [`Self::record_buy_order`] for identical arguments.
    pub fn cancel_buy_order(&mut self, asset_id: &str, size: Decimal, price: Decimal) {
        let notional = size * price;
        if let Some(entry) = self.exposure.get_mut(asset_id) {
            entry.shares_committed = (entry.shares_committed - size).max(Decimal::ZERO);
            entry.notional_committed =
                (entry.notional_committed - notional).max(Decimal::ZERO);
        }
        self.global_notional = (self.global_notional - notional).max(Decimal::ZERO);
        debug!(asset = asset_id, %size, %price, global = %self.global_notional,
               "risk: buy released");
    }

    /// Release exposure closed out by a sell fill, pro rata to the shares
    /// sold. A fill for the full committed size zeroes the entry.
    pub fn record_sell_fill(&mut self, asset_id: &str, size: Decimal) {
        let released = match self.exposure.get_mut(asset_id) {
            Some(entry) if entry.shares_committed > Decimal::ZERO => {
                if size >= entry.shares_committed {
                    let released = entry.notional_committed;
                    entry.shares_committed = Decimal::ZERO;
                    entry.notional_committed = Decimal::ZERO;
                    released
                } else {
                    let ratio = size / entry.shares_committed;
                    let released = entry.notional_committed * ratio;
                    entry.shares_committed -= size;
                    entry.notional_committed -= released;
                    released
                }
            }
            _ => Decimal::ZERO,
        };
        self.global_notional = (self.global_notional - released).max(Decimal::ZERO);
        debug!(asset = asset_id, %size, global = %self.global_notional,
               "risk: sell fill released");
    }

    /// Drop an asset's entry entirely, releasing whatever it still holds.
    pub fn clean_market(&mut self, asset_id: &str) {
        if let Some(entry) = self.exposure.remove(asset_id) {
            self.global_notional =
                (self.global_notional - entry.notional_committed).max(Decimal::ZERO);
            debug!(asset = asset_id, released = %entry.notional_committed,
                   global = %self.global_notional, "risk: market cleaned");
        }
    }

    /// Current exposure for an asset (zero when untracked).
    pub fn exposure(&self, asset_id: &str) -> Exposure {
        self.exposure.get(asset_id).copied().unwrap_or_default()
    }

    /// Aggregate committed notional across all assets.
    pub fn global_notional(&self) -> Decimal {
        self.global_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> RiskConfig {
        RiskConfig {
            min_notional_per_order: dec!(2),
            min_expected_profit: dec!(0.05),
            min_size_shares: dec!(2),
            max_shares_per_market: dec!(100),
            max_usdc_per_market: dec!(25),
            max_notional_at_risk: dec!(100),
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(test_config())
    }

    #[test]
    fn test_allows_normal_buy() {
        let risk = manager();
        // 5 shares at 0.46 with a 4-cent spread: notional 2.30, profit 0.092
        assert_eq!(
            risk.can_place_buy("a", dec!(5), dec!(0.46), dec!(4)),
            RiskDecision::Allowed
        );
    }

    #[test]
    fn test_denies_in_order_min_notional_first() {
        let risk = manager();
        // Tiny order fails the notional floor before anything else
        assert_eq!(
            risk.can_place_buy("a", dec!(1), dec!(0.10), dec!(4)),
            RiskDecision::Denied(RiskDenial::MinNotional)
        );
    }

    #[test]
    fn test_min_notional_tolerance_boundary() {
        let risk = manager();
        // Exactly 0.995 * 2.00 = 1.99 notional is allowed
        // 3.98 shares at 0.50 = 1.99; spread wide enough to clear profit gate
        assert_eq!(
            risk.can_place_buy("a", dec!(3.98), dec!(0.50), dec!(10)),
            RiskDecision::Allowed
        );
        // A hair below the tolerance is denied
        assert_eq!(
            risk.can_place_buy("a", dec!(3.97), dec!(0.50), dec!(10)),
            RiskDecision::Denied(RiskDenial::MinNotional)
        );
    }

    #[test]
    fn test_denies_expected_profit_low() {
        let risk = manager();
        // 5 shares at 0.46 with a 1-cent spread: profit 0.023 < 0.05
        assert_eq!(
            risk.can_place_buy("a", dec!(5), dec!(0.46), dec!(1)),
            RiskDecision::Denied(RiskDenial::ExpectedProfitLow)
        );
    }

    #[test]
    fn test_denies_min_size() {
        let mut config = test_config();
        config.min_size_shares = dec!(10);
        let risk = RiskManager::new(config);
        assert_eq!(
            risk.can_place_buy("a", dec!(5), dec!(0.46), dec!(4)),
            RiskDecision::Denied(RiskDenial::MinSize)
        );
    }

    #[test]
    fn test_denies_shares_cap() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(98), dec!(0.10));
        assert_eq!(
            risk.can_place_buy("a", dec!(5), dec!(0.46), dec!(4)),
            RiskDecision::Denied(RiskDenial::SharesCap)
        );
    }

    #[test]
    fn test_denies_market_notional_cap() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(50), dec!(0.48)); // 24 USDC committed
        assert_eq!(
            risk.can_place_buy("a", dec!(5), dec!(0.46), dec!(4)),
            RiskDecision::Denied(RiskDenial::MarketNotionalCap)
        );
    }

    #[test]
    fn test_denies_global_notional_cap() {
        let mut config = test_config();
        config.max_notional_at_risk = dec!(10);
        let mut risk = RiskManager::new(config);

        // Two other markets holding 4.9 each
        risk.record_buy_order("m1", dec!(10), dec!(0.49));
        risk.record_buy_order("m2", dec!(10), dec!(0.49));

        // Third market's 2.30 would breach the global cap of 10
        assert_eq!(
            risk.can_place_buy("m3", dec!(5), dec!(0.46), dec!(4)),
            RiskDecision::Denied(RiskDenial::GlobalNotionalCap)
        );
    }

    #[test]
    fn test_record_then_cancel_restores_exactly() {
        let mut risk = manager();
        let before_global = risk.global_notional();
        let before = risk.exposure("a");

        risk.record_buy_order("a", dec!(5), dec!(0.46));
        assert_eq!(risk.exposure("a").notional_committed, dec!(2.30));
        assert_eq!(risk.global_notional(), dec!(2.30));

        risk.cancel_buy_order("a", dec!(5), dec!(0.46));
        assert_eq!(risk.exposure("a"), before);
        assert_eq!(risk.global_notional(), before_global);
    }

    #[test]
    fn test_sell_fill_releases_full_position() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(5), dec!(0.46));
        risk.record_sell_fill("a", dec!(5));

        assert_eq!(risk.exposure("a"), Exposure::default());
        assert_eq!(risk.global_notional(), Decimal::ZERO);
    }

    #[test]
    fn test_sell_fill_partial_releases_pro_rata() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(10), dec!(0.50)); // 5.00 committed
        risk.record_sell_fill("a", dec!(4));

        let exposure = risk.exposure("a");
        assert_eq!(exposure.shares_committed, dec!(6));
        assert_eq!(exposure.notional_committed, dec!(3.00));
        assert_eq!(risk.global_notional(), dec!(3.00));
    }

    #[test]
    fn test_subtraction_clamps_at_zero() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(5), dec!(0.46));
        // Cancelling more than was recorded clamps rather than going negative
        risk.cancel_buy_order("a", dec!(50), dec!(0.46));

        assert_eq!(risk.exposure("a").shares_committed, Decimal::ZERO);
        assert_eq!(risk.global_notional(), Decimal::ZERO);
    }

    #[test]
    fn test_clean_market_releases_global() {
        let mut risk = manager();
        risk.record_buy_order("a", dec!(5), dec!(0.46));
        risk.record_buy_order("b", dec!(5), dec!(0.40));

        risk.clean_market("a");
        assert_eq!(risk.exposure("a"), Exposure::default());
        assert_eq!(risk.global_notional(), dec!(2.00));

        // Cleaning twice is harmless
        risk.clean_market("a");
        assert_eq!(risk.global_notional(), dec!(2.00));
    }
}
