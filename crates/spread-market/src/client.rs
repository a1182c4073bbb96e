//! CLOB REST client.
//!
//! Covers the five venue methods the engine consumes: `post_order`,
//! `cancel_orders`, `get_order_book`, `get_open_orders`, and
//! `get_market_metadata`. Private endpoints carry the L2 header set built
//! from [`crate::auth`].
//!
//! Order signing is an external collaborator: the client takes an
//! [`OrderSigner`] and never sees key material. All requests run under a
//! client-wide timeout; venue rejections surface as [`ApiError::Rejected`]
//! with the venue's reason string.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use spread_common::Side;

use crate::auth::{sign_request, ApiCredentials, AuthError};

/// Errors from the venue REST surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("venue returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("venue rejected order: {reason}")]
    Rejected { reason: String },

    #[error("auth failure: {0}")]
    Auth(#[from] AuthError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("order signer failure: {0}")]
    Signer(String),

    #[error("credential not usable as a header value: {0}")]
    Header(String),
}

/// Signs order payloads for submission. The signing scheme (keys, domain
/// separation) lives outside this crate; implementations receive the fully
/// quantized order and return the signature plus the maker address.
pub trait OrderSigner: Send + Sync {
    /// On-chain address the signature is made for.
    fn maker_address(&self) -> &str;

    /// Produce the order signature (hex) over the payload.
    fn sign_order(&self, order: &NewOrder) -> Result<String, ApiError>;
}

/// A quantized order ready for signing and submission.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub token_id: String,
    pub side: Side,
    /// Decision-side price, for logging only; the wire carries amounts.
    pub price: Decimal,
    /// Decision-side size, for logging only.
    pub size: Decimal,
    pub maker_amount: u64,
    pub taker_amount: u64,
    /// UNIX seconds; 0 means Good-Til-Cancelled.
    pub expiration: i64,
    pub nonce: u64,
}

/// Venue acknowledgement of an order submission.
#[derive(Debug, Clone, Deserialize)]
pub struct PostOrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: String,
    #[serde(default, rename = "orderId")]
    pub order_id: String,
    #[serde(default)]
    pub status: String,
}

/// Venue acknowledgement of a cancel batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub canceled: Vec<String>,
    #[serde(default)]
    pub not_canceled: serde_json::Map<String, serde_json::Value>,
}

impl CancelResponse {
    /// True when every requested id was cancelled.
    pub fn all_cancelled(&self, requested: &[String]) -> bool {
        requested.iter().all(|id| self.canceled.contains(id))
    }
}

/// One price level from the REST book endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RestLevel {
    pub price: String,
    pub size: String,
}

impl RestLevel {
    pub fn parse(&self) -> Option<(Decimal, Decimal)> {
        Some((self.price.parse().ok()?, self.size.parse().ok()?))
    }
}

/// REST order book snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct RestBook {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<RestLevel>,
    #[serde(default)]
    pub asks: Vec<RestLevel>,
}

impl RestBook {
    /// Best bid: maximum parsed bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().filter_map(|l| l.parse()).map(|(p, _)| p).max()
    }

    /// Best ask: minimum parsed ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().filter_map(|l| l.parse()).map(|(p, _)| p).min()
    }
}

/// An open order as reported by the venue.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub status: String,
}

/// Market metadata from the venue.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketMetadata {
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub minimum_tick_size: Option<Decimal>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub accepting_orders: bool,
}

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct ClobClientConfig {
    pub base_url: String,
    /// Venue-side request timeout.
    pub request_timeout: Duration,
}

impl Default for ClobClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://clob.polymarket.com".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// CLOB REST client.
pub struct ClobClient {
    http: Client,
    config: ClobClientConfig,
    creds: ApiCredentials,
}

impl ClobClient {
    pub fn new(config: ClobClientConfig, creds: ApiCredentials) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self {
            http,
            config,
            creds,
        }
    }

    /// Submit a signed order as the given order type (e.g. "GTC").
    pub async fn post_order(
        &self,
        order: &NewOrder,
        signer: &dyn OrderSigner,
        order_type: &str,
    ) -> Result<PostOrderResponse, ApiError> {
        let signature = signer.sign_order(order)?;
        let body = order_body(order, signer.maker_address(), &self.creds.api_key, &signature, order_type);
        let body_str = serde_json::to_string(&body)?;

        let path = "/order";
        let response = self
            .http
            .post(format!("{}{}", self.config.base_url, path))
            .headers(self.auth_headers("POST", path, &body_str)?)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;

        let ack: PostOrderResponse = Self::read_json(response).await?;
        if !ack.success {
            return Err(ApiError::Rejected {
                reason: ack.error_msg,
            });
        }
        debug!(order_id = %ack.order_id, token = %order.token_id, "order accepted");
        Ok(ack)
    }

    /// Cancel a batch of orders by id.
    pub async fn cancel_orders(&self, order_ids: &[String]) -> Result<CancelResponse, ApiError> {
        if order_ids.is_empty() {
            return Ok(CancelResponse::default());
        }
        let body_str = serde_json::to_string(order_ids)?;
        let path = "/orders";
        let response = self
            .http
            .delete(format!("{}{}", self.config.base_url, path))
            .headers(self.auth_headers("DELETE", path, &body_str)?)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// Fetch the order book for one token.
    pub async fn get_order_book(&self, token_id: &str) -> Result<RestBook, ApiError> {
        let response = self
            .http
            .get(format!("{}/book", self.config.base_url))
            .query(&[("token_id", token_id)])
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// Fetch all of the account's open orders.
    pub async fn get_open_orders(&self) -> Result<Vec<OpenOrder>, ApiError> {
        let path = "/data/orders";
        let response = self
            .http
            .get(format!("{}{}", self.config.base_url, path))
            .headers(self.auth_headers("GET", path, "")?)
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// Fetch metadata for one market (condition id).
    pub async fn get_market_metadata(
        &self,
        condition_id: &str,
    ) -> Result<MarketMetadata, ApiError> {
        let response = self
            .http
            .get(format!("{}/markets/{condition_id}", self.config.base_url))
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// L2 header set: address, signature, timestamp, key, passphrase.
    fn auth_headers(
        &self,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<reqwest::header::HeaderMap, ApiError> {
        use reqwest::header::{HeaderMap, HeaderValue};

        let timestamp = Utc::now().timestamp();
        let signature = sign_request(&self.creds.api_secret, timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| -> Result<(), ApiError> {
            headers.insert(
                name,
                HeaderValue::from_str(value).map_err(|e| ApiError::Header(e.to_string()))?,
            );
            Ok(())
        };
        put("POLY_ADDRESS", &self.creds.address)?;
        put("POLY_SIGNATURE", &signature)?;
        put("POLY_TIMESTAMP", &timestamp.to_string())?;
        put("POLY_API_KEY", &self.creds.api_key)?;
        put("POLY_PASSPHRASE", &self.creds.passphrase)?;
        Ok(headers)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

/// Wire body for order submission.
fn order_body(
    order: &NewOrder,
    maker: &str,
    owner: &str,
    signature: &str,
    order_type: &str,
) -> serde_json::Value {
    serde_json::json!({
        "order": {
            "salt": order.nonce,
            "maker": maker,
            "signer": maker,
            "taker": "0x0000000000000000000000000000000000000000",
            "tokenId": order.token_id,
            "makerAmount": order.maker_amount.to_string(),
            "takerAmount": order.taker_amount.to_string(),
            "expiration": order.expiration.to_string(),
            "nonce": order.nonce.to_string(),
            "feeRateBps": "0",
            "side": order.side.as_str(),
            "signatureType": 2,
            "signature": signature,
        },
        "owner": owner,
        "orderType": order_type,
    })
}
