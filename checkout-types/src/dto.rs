//! Values crossing the adapter boundary.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Money, PaymentMetadata, PaymentState, ProductIdentity};
use crate::error::CodecError;

// ─────────────────────────────────────────────────────────────────────────────
// Checkout DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Channel the payer is checking out from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEnv {
    #[default]
    Default,
    /// Inside the WeChat in-app browser; enables in-wallet (JSAPI) payment.
    WechatBrowser,
}

/// Request to open a checkout session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayReq {
    /// Configured provider instance name, echoed back on settlement
    pub provider_name: String,
    pub product_name: String,
    pub product_display_name: String,
    pub product_description: String,
    pub product_image: String,
    pub payer_name: String,
    /// Payer identifier (the WeChat openid for in-wallet payment)
    pub payer_id: String,
    pub payer_email: String,
    /// Caller-chosen correlation key, unique per checkout attempt
    pub payment_name: String,
    /// Major-unit amount, e.g. `10.50`
    pub price: Decimal,
    /// ISO 4217 code
    pub currency: String,
    pub return_url: String,
    pub notify_url: String,
    #[serde(default)]
    pub payment_env: PaymentEnv,
}

impl PayReq {
    pub fn money(&self) -> Result<Money, CodecError> {
        Money::new(self.price, &self.currency)
    }

    pub fn identity(&self) -> ProductIdentity {
        ProductIdentity::new(
            &self.product_name,
            &self.product_display_name,
            &self.provider_name,
        )
    }

    /// Full metadata record for gateways with a native metadata field.
    pub fn metadata(&self) -> Result<PaymentMetadata, CodecError> {
        let money = self.money()?;
        Ok(PaymentMetadata {
            payment_name: Some(self.payment_name.clone()),
            product_name: Some(self.product_name.clone()),
            product_display_name: Some(self.product_display_name.clone()),
            provider_name: Some(self.provider_name.clone()),
            price: Some(money.to_compact_string()),
            currency: Some(money.currency().to_string()),
        })
    }
}

/// Response after opening a checkout session.
///
/// The caller must persist `order_id` keyed by `payment_name` before
/// redirecting the payer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayResp {
    /// Where to send the payer
    pub pay_url: String,
    /// Provider-native identifier used for reconciliation
    pub order_id: String,
    /// Provider-specific extras
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attach_info: BTreeMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Input to a reconciliation check.
///
/// An empty body means a pull (poll by `order_id`); a non-empty body is a
/// webhook forwarded verbatim together with its headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyRequest {
    pub order_id: String,
    pub body: Vec<u8>,
    /// Header names are stored lower-cased
    pub headers: BTreeMap<String, String>,
}

impl NotifyRequest {
    pub fn poll(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            ..Default::default()
        }
    }

    pub fn webhook(order_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            order_id: order_id.into(),
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_push(&self) -> bool {
        !self.body.is_empty()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// Everything recovered from the provider once funds are captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub payment_name: String,
    pub product_name: String,
    pub product_display_name: String,
    pub provider_name: String,
    pub price: Decimal,
    pub currency: String,
}

impl Settlement {
    pub fn new(
        payment_name: impl Into<String>,
        identity: ProductIdentity,
        price: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            payment_name: payment_name.into(),
            product_name: identity.product_name,
            product_display_name: identity.product_display_name,
            provider_name: identity.provider_name,
            price,
            currency: currency.into().to_ascii_uppercase(),
        }
    }

    /// Builds a settlement from a native metadata record plus the amount the
    /// provider reports as captured.
    pub fn from_metadata(
        metadata: &PaymentMetadata,
        price: Decimal,
        currency: impl Into<String>,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(
            metadata.require_payment_name()?,
            metadata.require_identity()?,
            price,
            currency,
        ))
    }
}

/// Output of a reconciliation check.
///
/// `settlement` is present exactly when `payment_status` is `Paid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub payment_status: PaymentState,
    pub order_id: String,
    /// Diagnostic for non-paid outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
}

impl NotifyResult {
    fn unsettled(
        payment_status: PaymentState,
        order_id: impl Into<String>,
        notify_message: Option<String>,
    ) -> Self {
        Self {
            payment_status,
            order_id: order_id.into(),
            notify_message,
            settlement: None,
        }
    }

    pub fn created(order_id: impl Into<String>) -> Self {
        Self::unsettled(PaymentState::Created, order_id, None)
    }

    pub fn canceled(order_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::unsettled(PaymentState::Canceled, order_id, Some(message.into()))
    }

    pub fn timeout(order_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::unsettled(PaymentState::Timeout, order_id, Some(message.into()))
    }

    pub fn error(order_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::unsettled(PaymentState::Error, order_id, Some(message.into()))
    }

    /// Fail-closed result for a provider status missing from the mapping table.
    pub fn unexpected_status(order_id: impl Into<String>, status: &str) -> Self {
        Self::error(order_id, format!("unexpected provider status: {status}"))
    }

    pub fn paid(order_id: impl Into<String>, settlement: Settlement) -> Self {
        Self {
            payment_status: PaymentState::Paid,
            order_id: order_id.into(),
            notify_message: None,
            settlement: Some(settlement),
        }
    }

    pub fn payment_name(&self) -> Option<&str> {
        self.settlement.as_ref().map(|s| s.payment_name.as_str())
    }

    pub fn product_name(&self) -> Option<&str> {
        self.settlement.as_ref().map(|s| s.product_name.as_str())
    }

    pub fn product_display_name(&self) -> Option<&str> {
        self.settlement
            .as_ref()
            .map(|s| s.product_display_name.as_str())
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.settlement.as_ref().map(|s| s.provider_name.as_str())
    }

    pub fn price(&self) -> Option<Decimal> {
        self.settlement.as_ref().map(|s| s.price)
    }

    pub fn currency(&self) -> Option<&str> {
        self.settlement.as_ref().map(|s| s.currency.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invoice DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request for an electronic invoice of a settled payment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub payment_name: String,
    pub person_name: String,
    pub person_id_card: String,
    pub person_email: String,
    pub person_phone: String,
    /// `"Individual"` or `"Organization"`
    pub invoice_type: String,
    pub invoice_title: String,
    pub invoice_tax_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pay_req_metadata_uses_compact_price() {
        let req = PayReq {
            provider_name: "stripe-main".into(),
            product_name: "p1".into(),
            product_display_name: "Plan One".into(),
            payment_name: "pay-123".into(),
            price: Decimal::new(1000, 2),
            currency: "usd".into(),
            ..Default::default()
        };
        let metadata = req.metadata().unwrap();
        assert_eq!(metadata.price.as_deref(), Some("10"));
        assert_eq!(metadata.currency.as_deref(), Some("USD"));
        assert_eq!(metadata.require_identity().unwrap(), req.identity());
    }

    #[test]
    fn test_notify_request_headers_are_case_insensitive() {
        let req = NotifyRequest::webhook("cs_1", b"{}".to_vec())
            .with_header("Stripe-Signature", "t=1,v1=ab");
        assert!(req.is_push());
        assert_eq!(req.header("stripe-signature"), Some("t=1,v1=ab"));
        assert_eq!(req.header("STRIPE-SIGNATURE"), Some("t=1,v1=ab"));
        assert!(!NotifyRequest::poll("cs_1").is_push());
    }

    #[test]
    fn test_unsettled_result_carries_no_product_fields() {
        let result = NotifyResult::created("cs_1");
        assert_eq!(result.payment_status, PaymentState::Created);
        assert_eq!(result.order_id, "cs_1");
        assert!(result.product_name().is_none());
        assert!(result.price().is_none());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("settlement").is_none());
    }

    #[test]
    fn test_unexpected_status_is_error() {
        let result = NotifyResult::unexpected_status("o1", "mystery");
        assert_eq!(result.payment_status, PaymentState::Error);
        assert_eq!(
            result.notify_message.as_deref(),
            Some("unexpected provider status: mystery")
        );
    }

    #[test]
    fn test_paid_result_exposes_settlement() {
        let settlement = Settlement::new(
            "pay-123",
            ProductIdentity::new("p1", "Plan One", "stripe-main"),
            Decimal::new(1050, 2),
            "usd",
        );
        let result = NotifyResult::paid("cs_1", settlement);
        assert_eq!(result.payment_name(), Some("pay-123"));
        assert_eq!(result.product_display_name(), Some("Plan One"));
        assert_eq!(result.provider_name(), Some("stripe-main"));
        assert_eq!(result.price(), Some(Decimal::new(1050, 2)));
        assert_eq!(result.currency(), Some("USD"));
    }
}
