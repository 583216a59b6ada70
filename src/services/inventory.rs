//! Retrying inventory client over the platform Admin API.
//!
//! [`AdminApi`] is the raw transport seam (implemented by
//! [`ShopifyApi`](crate::services::shopify::ShopifyApi) and by test fakes).
//! [`InventoryClient`] layers the per-call timeout, bounded exponential backoff
//! for transient failures, and quantity validation on top of it.
//!
//! Nothing is cached: every read goes to the platform, since a stale quantity
//! is exactly what synchronization must never act on.

use crate::metrics::Metrics;
use crate::models::{
    InvalidQuantity, InventoryLevel, ProductId, Quantity, SyncTuning, VariantId, VariantRecord,
    VariantRef,
};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Failures reported by the platform or the transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Network error, timeout, 5xx or rate limiting. Retried.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("not found on platform: {0}")]
    NotFound(String),

    #[error("credential rejected: {0}")]
    AuthFailure(String),

    /// The platform reports the write was superseded by a newer change.
    #[error("superseded upstream: {0}")]
    Conflict(String),

    /// Any other client-side rejection (4xx) that retrying cannot fix.
    #[error("rejected by platform (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    InvalidQuantity(#[from] InvalidQuantity),
}

impl ApiError {
    /// Only upstream unavailability is worth retrying; everything else is structural.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::UpstreamUnavailable(_))
    }
}

/// Raw platform operations, one outbound request each
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Look up a variant, its size letter and owning product.
    async fn fetch_variant(&self, variant_id: VariantId) -> Result<VariantRecord, ApiError>;

    /// List every variant of a product.
    async fn fetch_product_variants(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<VariantRef>, ApiError>;

    /// Current available count. May be negative upstream (oversold).
    async fn fetch_available(&self, variant: &VariantRef) -> Result<i64, ApiError>;

    /// Set the available count.
    async fn set_available(&self, variant: &VariantRef, quantity: Quantity)
    -> Result<(), ApiError>;
}

/// Attempts, backoff and per-attempt timeout for outbound calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_tuning(tuning: &SyncTuning) -> Self {
        Self {
            attempts: tuning.retry_attempts.max(1),
            base_delay: Duration::from_millis(tuning.retry_base_delay_ms),
            timeout: Duration::from_secs(tuning.request_timeout_secs.max(1)),
        }
    }

    /// Backoff before the next attempt, after `attempt` attempts have failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Typed, retrying client used by the engine
#[derive(Clone)]
pub struct InventoryClient {
    api: Arc<dyn AdminApi>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl InventoryClient {
    pub fn new(api: Arc<dyn AdminApi>, policy: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            api,
            policy,
            metrics,
        }
    }

    /// Resolve a variant id to its ref and product.
    pub async fn variant(&self, variant_id: VariantId) -> Result<VariantRecord, ApiError> {
        self.with_retry("fetch variant", move || self.api.fetch_variant(variant_id))
            .await
    }

    /// List the variants of a product.
    pub async fn product_variants(&self, product_id: ProductId) -> Result<Vec<VariantRef>, ApiError> {
        self.with_retry("fetch product variants", move || {
            self.api.fetch_product_variants(product_id)
        })
        .await
    }

    /// Read the current level of a variant.
    ///
    /// Negative upstream counts fail with [`ApiError::InvalidQuantity`] and are not retried.
    pub async fn read(&self, variant: &VariantRef) -> Result<InventoryLevel, ApiError> {
        let raw = self
            .with_retry("read level", move || self.api.fetch_available(variant))
            .await?;
        let quantity = Quantity::try_from(raw)?;

        Ok(InventoryLevel {
            variant: variant.clone(),
            quantity,
            fetched_at: Utc::now(),
        })
    }

    /// Write a level. Last write wins unless the platform reports a conflict.
    pub async fn write(&self, variant: &VariantRef, quantity: Quantity) -> Result<(), ApiError> {
        self.metrics.record_write_issued();
        let result = self
            .with_retry("write level", move || self.api.set_available(variant, quantity))
            .await;
        if result.is_err() {
            self.metrics.record_write_failed();
        }
        result
    }

    /// Run `call` under the timeout, retrying transient failures with backoff.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::UpstreamUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.policy.timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.policy.attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt,
                        self.policy.attempts,
                        e,
                        delay
                    );
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
