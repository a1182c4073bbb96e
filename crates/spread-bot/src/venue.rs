//! Execution seam between the order manager and the venue.
//!
//! The engine only ever talks to a [`Venue`]. [`LiveVenue`] delegates to
//! the REST client; [`DryRunVenue`] short-circuits every call to synthetic
//! order ids so the whole engine, side-lock and bookkeeping included, runs
//! without a single venue write.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use spread_common::{QuantizedAmounts, Side};
use spread_market::{ApiError, ClobClient, NewOrder, OrderSigner};

/// An open order as reported by the venue, reduced to what reconciliation
/// needs.
#[derive(Debug, Clone)]
pub struct VenueOpenOrder {
    pub order_id: String,
    pub asset_id: String,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
}

/// Order execution and inspection surface.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Submit a GTC order; returns the venue order id.
    async fn place_order(
        &self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        amounts: QuantizedAmounts,
    ) -> Result<String, ApiError>;

    /// Cancel a batch of orders; returns the ids actually cancelled.
    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>, ApiError>;

    /// All currently open orders for the account.
    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError>;
}

/// Live venue, delegating to the REST client with an external signer.
pub struct LiveVenue {
    client: ClobClient,
    signer: Box<dyn OrderSigner>,
    nonce: std::sync::atomic::AtomicU64,
}

impl LiveVenue {
    pub fn new(client: ClobClient, signer: Box<dyn OrderSigner>) -> Self {
        Self {
            client,
            signer,
            nonce: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Venue for LiveVenue {
    async fn place_order(
        &self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        amounts: QuantizedAmounts,
    ) -> Result<String, ApiError> {
        let order = NewOrder {
            token_id: asset_id.to_string(),
            side,
            price,
            size,
            maker_amount: amounts.maker_amount,
            taker_amount: amounts.taker_amount,
            expiration: 0, // GTC
            nonce: self
                .nonce
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        };
        let ack = self
            .client
            .post_order(&order, self.signer.as_ref(), "GTC")
            .await?;
        Ok(ack.order_id)
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>, ApiError> {
        let ack = self.client.cancel_orders(order_ids).await?;
        Ok(ack.canceled)
    }

    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError> {
        let orders = self.client.get_open_orders().await?;
        Ok(orders
            .into_iter()
            .map(|o| VenueOpenOrder {
                order_id: o.id,
                asset_id: o.asset_id,
                side: match o.side.to_ascii_uppercase().as_str() {
                    "BUY" => Some(Side::Buy),
                    "SELL" => Some(Side::Sell),
                    _ => None,
                },
                price: o.price.parse().ok(),
            })
            .collect())
    }
}

#[async_trait]
impl<T: Venue + ?Sized> Venue for std::sync::Arc<T> {
    async fn place_order(
        &self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        amounts: QuantizedAmounts,
    ) -> Result<String, ApiError> {
        self.as_ref()
            .place_order(asset_id, side, price, size, amounts)
            .await
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>, ApiError> {
        self.as_ref().cancel_orders(order_ids).await
    }

    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError> {
        self.as_ref().open_orders().await
    }
}

/// Dry-run venue: every call succeeds locally with synthetic ids.
#[derive(Debug, Default)]
pub struct DryRunVenue;

impl DryRunVenue {
    pub fn new() -> Self {
        info!("dry-run venue active: no orders will reach the venue");
        Self
    }
}

#[async_trait]
impl Venue for DryRunVenue {
    async fn place_order(
        &self,
        asset_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        _amounts: QuantizedAmounts,
    ) -> Result<String, ApiError> {
        let order_id = format!("dry-{}", Uuid::new_v4());
        debug!(%asset_id, %side, %price, %size, %order_id, "dry-run: order placed");
        Ok(order_id)
    }

    async fn cancel_orders(&self, order_ids: &[String]) -> Result<Vec<String>, ApiError> {
        debug!(count = order_ids.len(), "dry-run: orders cancelled");
        Ok(order_ids.to_vec())
    }

    async fn open_orders(&self) -> Result<Vec<VenueOpenOrder>, ApiError> {
        Ok(Vec::new())
    }
}

/// Order signer used when the external signing component is not wired in.
///
/// Live placements fail fast with a clear reason instead of submitting an
/// unsigned order; dry-run never consults it.
pub struct UnwiredSigner {
    address: String,
}

impl UnwiredSigner {
    pub fn new(address: String) -> Self {
        Self { address }
    }
}

impl OrderSigner for UnwiredSigner {
    fn maker_address(&self) -> &str {
        &self.address
    }

    fn sign_order(&self, _order: &NewOrder) -> Result<String, ApiError> {
        Err(ApiError::Signer(
            "order signing component is not wired in this build; set DRY_RUN=true".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spread_common::quantize;

    #[tokio::test]
    async fn test_dry_run_place_returns_synthetic_id() {
        let venue = DryRunVenue::new();
        let amounts = quantize(Side::Buy, dec!(0.46), dec!(5)).unwrap();
        let id = venue
            .place_order("token-a", Side::Buy, dec!(0.46), dec!(5), amounts)
            .await
            .unwrap();
        assert!(id.starts_with("dry-"));
    }

    #[tokio::test]
    async fn test_dry_run_ids_unique() {
        let venue = DryRunVenue::new();
        let amounts = quantize(Side::Buy, dec!(0.46), dec!(5)).unwrap();
        let a = venue
            .place_order("token-a", Side::Buy, dec!(0.46), dec!(5), amounts)
            .await
            .unwrap();
        let b = venue
            .place_order("token-a", Side::Buy, dec!(0.46), dec!(5), amounts)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_dry_run_cancel_acks_everything() {
        let venue = DryRunVenue::new();
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(venue.cancel_orders(&ids).await.unwrap(), ids);
    }

    #[test]
    fn test_unwired_signer_refuses() {
        let signer = UnwiredSigner::new("0xmaker".to_string());
        assert_eq!(signer.maker_address(), "0xmaker");
        let order = NewOrder {
            token_id: "t".to_string(),
            side: Side::Buy,
            price: dec!(0.46),
            size: dec!(5),
            maker_amount: 1,
            taker_amount: 1,
            expiration: 0,
            nonce: 1,
        };
        assert!(signer.sign_order(&order).is_err());
    }
}
