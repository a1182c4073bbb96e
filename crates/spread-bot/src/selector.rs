//! Market selection: eligibility, scoring, side choice, per-event cap.
//!
//! Candidates come from the directory listing, get their books warmed
//! through the market feed (REST snapshot as fallback), and pass through
//! strict filters before scoring. Within one event (condition id) only the
//! top scorers survive, bounding correlated exposure.

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use spread_common::Outcome;
use spread_market::{
    ClobClient, DirectoryClient, DirectoryError, DirectoryMarket, MarketFeed, RestBook,
};

/// Depth assigned to a side whose book came from the WebSocket cache
/// (top-of-book only, no level sizes worth trusting).
const WS_DEPTH_ESTIMATE_USDC: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

/// Total depth is capped here so malformed books cannot inflate scores.
const DEPTH_CAP_USDC: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Sizes above this are taken to be mis-scaled micro-units and divided
/// down before validation.
const MIS_SCALED_SIZE_THRESHOLD: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

const MICRO: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Why a candidate was rejected by the strict filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    SpreadTooSmall,
    SpreadTooLarge,
    VolumeLow,
    DepthLow,
    ClosingSoon,
    ExpectedProfitLow,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::SpreadTooSmall => "spread_too_small",
            DenyReason::SpreadTooLarge => "spread_too_large",
            DenyReason::VolumeLow => "volume_low",
            DenyReason::DepthLow => "depth_low",
            DenyReason::ClosingSoon => "closing_soon",
            DenyReason::ExpectedProfitLow => "expected_profit_low",
        }
    }
}

/// A market chosen for trading: one outcome token of one binary market.
#[derive(Debug, Clone)]
pub struct CandidateMarket {
    pub asset_id: String,
    pub outcome: Outcome,
    pub condition_id: String,
    pub slug: String,
    pub spread: Decimal,
    pub depth: Decimal,
    pub volume_24h: Decimal,
    pub hours_to_close: Decimal,
    pub score: f64,
}

/// Selection thresholds, lifted from [`crate::config::BotConfig`].
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub max_markets: usize,
    pub min_spread_cents: Decimal,
    pub max_spread_cents: Decimal,
    pub min_volume_24h: Decimal,
    pub min_depth_top2: Decimal,
    pub hours_to_close_min: Decimal,
    pub max_markets_per_event: usize,
    pub min_notional_per_order: Decimal,
    pub min_expected_profit: Decimal,
    /// How long to let the feed cache warm after subscribing candidates.
    pub warmup: Duration,
}

impl SelectorConfig {
    pub fn from_bot_config(config: &crate::config::BotConfig) -> Self {
        Self {
            max_markets: config.max_markets,
            min_spread_cents: config.min_spread_cents,
            max_spread_cents: config.max_spread_cents,
            min_volume_24h: config.min_volume_24h_usd,
            min_depth_top2: config.min_depth_top2_usd,
            hours_to_close_min: config.hours_to_close_min,
            max_markets_per_event: config.max_markets_per_event,
            min_notional_per_order: config.min_notional_per_order_usdc,
            min_expected_profit: config.min_expected_profit_usdc,
            warmup: Duration::from_secs(3),
        }
    }
}

/// One side's observed quote.
#[derive(Debug, Clone)]
struct SideQuote {
    asset_id: String,
    outcome: Outcome,
    spread: Decimal,
    depth: Decimal,
}

/// Market selector pipeline.
pub struct MarketSelector {
    config: SelectorConfig,
}

impl MarketSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline and return up to `max_markets` candidates,
    /// best score first.
    pub async fn select(
        &self,
        directory: &DirectoryClient,
        feed: &MarketFeed,
        clob: &ClobClient,
    ) -> Result<Vec<CandidateMarket>, DirectoryError> {
        let markets = directory
            .fetch_candidates(self.config.min_volume_24h)
            .await?;
        info!(count = markets.len(), "selector: directory candidates");

        // Warm the book cache for every side of every candidate.
        let tokens: Vec<String> = markets
            .iter()
            .flat_map(|m| [m.yes_token_id.clone(), m.no_token_id.clone()])
            .collect();
        feed.subscribe(tokens).await;
        tokio::time::sleep(self.config.warmup).await;

        let mut scored = Vec::new();
        for market in &markets {
            let Some(candidate) = self.evaluate(market, feed, clob).await else {
                continue;
            };
            scored.push(candidate);
        }

        let mut chosen = apply_event_cap(scored, self.config.max_markets_per_event);
        sort_by_score(&mut chosen);
        chosen.truncate(self.config.max_markets);

        info!(chosen = chosen.len(), "selector: markets selected");
        for c in &chosen {
            info!(asset = %c.asset_id, outcome = %c.outcome, slug = %c.slug,
                  spread = %c.spread, score = c.score, "selector: picked");
        }
        Ok(chosen)
    }

    /// Evaluate one directory market: quote both sides, choose one, apply
    /// the strict filters, and score it.
    async fn evaluate(
        &self,
        market: &DirectoryMarket,
        feed: &MarketFeed,
        clob: &ClobClient,
    ) -> Option<CandidateMarket> {
        let yes = self
            .quote_side(&market.yes_token_id, Outcome::Yes, feed, clob)
            .await;
        let no = self
            .quote_side(&market.no_token_id, Outcome::No, feed, clob)
            .await;

        let quote = choose_side(yes, no)?;
        let hours_to_close = market.hours_to_close().unwrap_or(Decimal::ZERO);

        if let Some(reason) = self.strict_filters(&quote, market.volume_24h, hours_to_close) {
            debug!(slug = %market.slug, asset = %quote.asset_id,
                   reason = reason.code(), "selector: candidate denied");
            return None;
        }

        let score = score_candidate(quote.spread, quote.depth, market.volume_24h, hours_to_close);
        Some(CandidateMarket {
            asset_id: quote.asset_id,
            outcome: quote.outcome,
            condition_id: market.condition_id.clone(),
            slug: market.slug.clone(),
            spread: quote.spread,
            depth: quote.depth,
            volume_24h: market.volume_24h,
            hours_to_close,
            score,
        })
    }

    /// Quote one side from the feed cache, falling back to a REST book
    /// snapshot when the cache has not warmed yet.
    async fn quote_side(
        &self,
        token_id: &str,
        outcome: Outcome,
        feed: &MarketFeed,
        clob: &ClobClient,
    ) -> Option<SideQuote> {
        if let Some((bid, ask)) = feed.last_prices(token_id) {
            let spread = ask - bid;
            if spread <= Decimal::ZERO {
                return None;
            }
            return Some(SideQuote {
                asset_id: token_id.to_string(),
                outcome,
                spread,
                depth: WS_DEPTH_ESTIMATE_USDC,
            });
        }

        match clob.get_order_book(token_id).await {
            Ok(book) => quote_from_rest_book(token_id, outcome, &book),
            Err(e) => {
                debug!(token = token_id, error = %e, "selector: no book available");
                None
            }
        }
    }

    /// Strict filters in deny-code order.
    fn strict_filters(
        &self,
        quote: &SideQuote,
        volume_24h: Decimal,
        hours_to_close: Decimal,
    ) -> Option<DenyReason> {
        let min_spread = self.config.min_spread_cents / Decimal::ONE_HUNDRED;
        let max_spread = self.config.max_spread_cents / Decimal::ONE_HUNDRED;

        if quote.spread < min_spread {
            return Some(DenyReason::SpreadTooSmall);
        }
        if quote.spread > max_spread {
            return Some(DenyReason::SpreadTooLarge);
        }
        if volume_24h < self.config.min_volume_24h {
            return Some(DenyReason::VolumeLow);
        }
        if quote.depth < self.config.min_depth_top2 {
            return Some(DenyReason::DepthLow);
        }
        if hours_to_close < self.config.hours_to_close_min {
            return Some(DenyReason::ClosingSoon);
        }
        if quote.spread * self.config.min_notional_per_order < self.config.min_expected_profit {
            return Some(DenyReason::ExpectedProfitLow);
        }
        None
    }
}

/// Build a quote from a REST book: best levels for the spread, normalized
/// top-2 levels per side for the depth.
fn quote_from_rest_book(token_id: &str, outcome: Outcome, book: &RestBook) -> Option<SideQuote> {
    let bid = book.best_bid()?;
    let ask = book.best_ask()?;
    let spread = ask - bid;
    if spread <= Decimal::ZERO {
        return None;
    }
    Some(SideQuote {
        asset_id: token_id.to_string(),
        outcome,
        spread,
        depth: rest_depth_top2(book),
    })
}

/// Sum of price x size over the top-2 levels of each side, with level
/// normalization applied and the total capped.
fn rest_depth_top2(book: &RestBook) -> Decimal {
    let mut bids: Vec<(Decimal, Decimal)> =
        book.bids.iter().filter_map(|l| l.parse()).collect();
    let mut asks: Vec<(Decimal, Decimal)> =
        book.asks.iter().filter_map(|l| l.parse()).collect();
    bids.sort_by(|a, b| b.0.cmp(&a.0));
    asks.sort_by(|a, b| a.0.cmp(&b.0));

    let mut depth = Decimal::ZERO;
    for (price, size_raw) in bids.into_iter().take(2).chain(asks.into_iter().take(2)) {
        if let Some((price, size)) = normalize_level(price, size_raw) {
            depth += price * size;
        }
    }
    depth.min(DEPTH_CAP_USDC)
}

/// Decode one book level, fixing mis-scaled sizes and rejecting garbage.
///
/// Sizes above the threshold are interpreted as micro-units and divided by
/// 10^6; a level survives only with `0 < price <= 1` and `0 < size < 10^6`.
fn normalize_level(price: Decimal, size_raw: Decimal) -> Option<(Decimal, Decimal)> {
    let size = if size_raw > MIS_SCALED_SIZE_THRESHOLD {
        size_raw / MICRO
    } else {
        size_raw
    };
    if price <= Decimal::ZERO || price > Decimal::ONE {
        return None;
    }
    if size <= Decimal::ZERO || size >= MICRO {
        return None;
    }
    Some((price, size))
}

/// Pick the side to trade: when both spreads are valid, the larger one.
fn choose_side(yes: Option<SideQuote>, no: Option<SideQuote>) -> Option<SideQuote> {
    match (yes, no) {
        (Some(y), Some(n)) => Some(if n.spread > y.spread { n } else { y }),
        (Some(y), None) => Some(y),
        (None, Some(n)) => Some(n),
        (None, None) => None,
    }
}

/// Composite eligibility score. Spread dominates; depth and volume enter
/// logarithmically; time-to-close adds a small bounded term.
fn score_candidate(
    spread: Decimal,
    depth: Decimal,
    volume_24h: Decimal,
    hours_to_close: Decimal,
) -> f64 {
    let spread = spread.to_f64().unwrap_or(0.0);
    let depth = depth.to_f64().unwrap_or(0.0).max(0.0);
    let volume = volume_24h.to_f64().unwrap_or(0.0).max(0.0);
    let hours = hours_to_close.to_f64().unwrap_or(0.0).max(0.0);

    0.4 * (spread * 1000.0)
        + 0.3 * (depth + 1.0).log10() * 100.0
        + 0.2 * (volume + 1.0).log10() * 50.0
        + 0.1 * (hours / 24.0).min(30.0)
}

/// Within each condition id, keep only the top scorers.
fn apply_event_cap(mut candidates: Vec<CandidateMarket>, max_per_event: usize) -> Vec<CandidateMarket> {
    use std::collections::HashMap;

    sort_by_score(&mut candidates);
    let mut per_event: HashMap<String, usize> = HashMap::new();
    candidates.retain(|c| {
        let count = per_event.entry(c.condition_id.clone()).or_insert(0);
        *count += 1;
        *count <= max_per_event
    });
    candidates
}

fn sort_by_score(candidates: &mut [CandidateMarket]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
