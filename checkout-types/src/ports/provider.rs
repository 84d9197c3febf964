//! Payment provider port trait.
//!
//! Every external gateway is reached through this one contract. Adapters
//! are stateless apart from cached credentials, so a result depends only on
//! what the provider currently reports.

use crate::dto::{InvoiceRequest, NotifyRequest, NotifyResult, PayReq, PayResp};
use crate::error::ProviderError;

/// The port every gateway adapter implements.
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short gateway name used in logs and errors.
    fn name(&self) -> &'static str;

    // ─────────────────────────────────────────────────────────────────────────────
    // Checkout
    // ─────────────────────────────────────────────────────────────────────────────

    /// Opens a checkout session. Never retried internally, since a retry
    /// could open a duplicate session.
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Maps the provider's current view of an order to a `PaymentState`.
    ///
    /// Safe to repeat: the result is a pure function of provider state.
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError>;

    /// Fetches an electronic invoice URL. Most gateways have none.
    async fn get_invoice(&self, _req: &InvoiceRequest) -> Result<String, ProviderError> {
        Ok(String::new())
    }

    /// Body to reply to a webhook delivery with.
    fn response_error(&self, err: Option<&ProviderError>) -> String {
        match err {
            None => "success".to_string(),
            Some(_) => "fail".to_string(),
        }
    }
}
