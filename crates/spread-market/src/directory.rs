//! Candidate-market listing from the venue's directory API.
//!
//! Fetches active binary markets with their outcome token pair, 24 h
//! volume, and close time. The selector consumes these rows; everything
//! here is read-only discovery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the directory API.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid directory data: {0}")]
    InvalidData(String),
}

/// A tradeable binary market as listed by the directory.
#[derive(Debug, Clone)]
pub struct DirectoryMarket {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub volume_24h: Decimal,
    pub end_date: Option<DateTime<Utc>>,
}

impl DirectoryMarket {
    /// Hours until the market closes; `None` when no close time is listed.
    pub fn hours_to_close(&self) -> Option<Decimal> {
        let end = self.end_date?;
        let minutes = (end - Utc::now()).num_minutes();
        Some(Decimal::from(minutes) / Decimal::from(60))
    }
}

/// Configuration for the directory client.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Rows per page; the API caps around 1000.
    pub page_size: u32,
    /// Pages fetched per listing pass.
    pub max_pages: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gamma-api.polymarket.com".to_string(),
            request_timeout: Duration::from_secs(15),
            page_size: 500,
            max_pages: 4,
        }
    }
}

/// Directory API client.
pub struct DirectoryClient {
    http: Client,
    config: DirectoryConfig,
}

impl DirectoryClient {
    pub fn new(config: DirectoryConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { http, config }
    }

    /// Fetch active candidate markets with at least `min_volume_24h` of
    /// 24-hour volume, ordered by volume descending.
    pub async fn fetch_candidates(
        &self,
        min_volume_24h: Decimal,
    ) -> Result<Vec<DirectoryMarket>, DirectoryError> {
        let mut out = Vec::new();

        for page in 0..self.config.max_pages {
            let offset = page * self.config.page_size;
            let rows = self.fetch_page(offset).await?;
            if rows.is_empty() {
                break;
            }

            let mut below_threshold = false;
            for row in rows {
                let Some(market) = parse_market(&row) else {
                    continue;
                };
                if market.volume_24h < min_volume_24h {
                    // Listing is volume-ordered; everything after is smaller.
                    below_threshold = true;
                    continue;
                }
                out.push(market);
            }
            if below_threshold {
                break;
            }
        }

        info!(count = out.len(), "directory: fetched candidate markets");
        Ok(out)
    }

    async fn fetch_page(&self, offset: u32) -> Result<Vec<DirectoryRow>, DirectoryError> {
        let limit = self.config.page_size.to_string();
        let offset = offset.to_string();
        let response = self
            .http
            .get(format!("{}/markets", self.config.base_url))
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("archived", "false"),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
                ("order", "volume24hr"),
                ("ascending", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::InvalidData(format!(
                "directory returned status {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

/// Directory wire row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryRow {
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    /// Token ids as a JSON string array: `["123", "456"]`.
    #[serde(default)]
    clob_token_ids: Option<String>,
    #[serde(default)]
    volume24hr: Option<f64>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    accepting_orders: bool,
}

fn parse_market(row: &DirectoryRow) -> Option<DirectoryMarket> {
    if !row.active || row.closed || !row.accepting_orders {
        return None;
    }
    let condition_id = row.condition_id.clone()?;
    let (yes_token_id, no_token_id) = parse_token_pair(row.clob_token_ids.as_deref())?;
    let volume_24h = row
        .volume24hr
        .and_then(Decimal::from_f64)
        .unwrap_or(Decimal::ZERO);
    let end_date = row
        .end_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(DirectoryMarket {
        condition_id,
        question: row.question.clone().unwrap_or_default(),
        slug: row.slug.clone().unwrap_or_default(),
        yes_token_id,
        no_token_id,
        volume_24h,
        end_date,
    })
}

/// The directory encodes the outcome token pair as a JSON string array.
fn parse_token_pair(input: Option<&str>) -> Option<(String, String)> {
    let raw = input?;
    let parsed: Vec<String> = serde_json::from_str(raw).ok()?;
    if parsed.len() < 2 {
        debug!(raw, "directory: token pair with fewer than two entries");
        return None;
    }
    Some((parsed[0].clone(), parsed[1].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_token_pair() {
        assert_eq!(
            parse_token_pair(Some(r#"["111", "222"]"#)),
            Some(("111".to_string(), "222".to_string()))
        );
        assert_eq!(parse_token_pair(Some(r#"["only-one"]"#)), None);
        assert_eq!(parse_token_pair(Some("not json")), None);
        assert_eq!(parse_token_pair(None), None);
    }

    #[test]
    fn test_parse_market_row() {
        let json = r#"{
            "conditionId": "cond-1",
            "question": "Will it rain?",
            "slug": "will-it-rain",
            "clobTokenIds": "[\"111\", \"222\"]",
            "volume24hr": 125000.5,
            "endDate": "2030-01-01T00:00:00Z",
            "active": true,
            "closed": false,
            "acceptingOrders": true
        }"#;
        let row: DirectoryRow = serde_json::from_str(json).unwrap();
        let market = parse_market(&row).unwrap();

        assert_eq!(market.condition_id, "cond-1");
        assert_eq!(market.yes_token_id, "111");
        assert_eq!(market.no_token_id, "222");
        assert_eq!(market.volume_24h, dec!(125000.5));
        assert!(market.hours_to_close().unwrap() > dec!(0));
    }

    #[test]
    fn test_parse_market_skips_closed_or_unlisted() {
        let json = r#"{
            "conditionId": "cond-1",
            "clobTokenIds": "[\"111\", \"222\"]",
            "active": true,
            "closed": true,
            "acceptingOrders": true
        }"#;
        let row: DirectoryRow = serde_json::from_str(json).unwrap();
        assert!(parse_market(&row).is_none());

        let json = r#"{
            "conditionId": "cond-2",
            "active": true,
            "closed": false,
            "acceptingOrders": true
        }"#;
        let row: DirectoryRow = serde_json::from_str(json).unwrap();
        assert!(parse_market(&row).is_none());
    }
}
