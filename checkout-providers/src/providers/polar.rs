//! Polar checkouts.
//!
//! Reads from [`Credentials`]: `client_secret` (organization access token),
//! `mode`, and `webhook_secret` (Standard Webhooks secret).

use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider,
    ProviderError, Settlement,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{ensure_same_order, now_unix, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::{Credentials, RunMode};
use crate::security;

const NAME: &str = "Polar";
const SANDBOX_BASE: &str = "https://sandbox-api.polar.sh";
const LIVE_BASE: &str = "https://api.polar.sh";
const CHECKOUT_UPDATED: &str = "checkout.updated";

#[derive(Debug, Clone)]
pub struct PolarConfig {
    pub access_token: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl PolarConfig {
    pub fn new(access_token: impl Into<String>, mode: RunMode) -> Self {
        let base_url = match mode {
            RunMode::Sandbox => SANDBOX_BASE,
            RunMode::Production => LIVE_BASE,
        };
        Self {
            access_token: access_token.into(),
            webhook_secret: None,
            base_url: base_url.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct Checkout {
    id: String,
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    total_amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

pub struct PolarProvider {
    config: PolarConfig,
    api: ApiClient,
}

impl PolarProvider {
    pub fn new(config: PolarConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = PolarConfig::new(
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.mode,
        );
        if let Some(base_url) = &creds.base_url {
            config = config.with_base_url(base_url);
        }
        config.webhook_secret = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    fn verify_push(&self, req: &NotifyRequest) -> Result<(), ProviderError> {
        let secret = webhook_secret(&self.config.webhook_secret, NAME)?;
        let id = required_header(req, NAME, "webhook-id")?;
        let timestamp = required_header(req, NAME, "webhook-timestamp")?;
        let signatures = required_header(req, NAME, "webhook-signature")?;
        security::verify_standard_webhook(id, timestamp, signatures, &req.body, secret, now_unix())
            .map_err(|e| {
                warn!(error = %e, "Rejected Polar webhook");
                ProviderError::verification(NAME, e)
            })?;

        let event: WebhookEvent =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        if event.kind != CHECKOUT_UPDATED {
            return Err(ProviderError::InvalidRequest(format!(
                "{NAME}: unsupported webhook event type {}",
                event.kind
            )));
        }
        info!(event_type = %event.kind, "Verified Polar webhook");
        ensure_same_order(NAME, &req.order_id, &event.data.id)
    }
}

/// `confirmed` means the payment is still being processed; only
/// `succeeded` settles.
fn map_checkout(checkout: Checkout) -> Result<NotifyResult, ProviderError> {
    match checkout.status.as_str() {
        "open" | "confirmed" => Ok(NotifyResult::created(checkout.id)),
        "expired" => Ok(NotifyResult::timeout(checkout.id, "Checkout expired")),
        "failed" => Ok(NotifyResult::error(checkout.id, "Payment failed")),
        "succeeded" => {
            let metadata = PaymentMetadata::from_json(checkout.metadata.as_ref());
            let minor = checkout
                .total_amount
                .or(checkout.amount)
                .ok_or_else(|| ProviderError::decode(NAME, "succeeded checkout without amount"))?;
            let currency = checkout
                .currency
                .ok_or_else(|| ProviderError::decode(NAME, "succeeded checkout without currency"))?;
            let price = Money::from_minor_units(minor, &currency)?;
            let settlement =
                Settlement::from_metadata(&metadata, price.amount(), price.currency())?;
            Ok(NotifyResult::paid(checkout.id, settlement))
        }
        other => Ok(NotifyResult::unexpected_status(checkout.id, other)),
    }
}

#[async_trait]
impl PaymentProvider for PolarProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let mut body = json!({
            "products": [req.product_name],
            "amount": money.to_minor_units()?,
            "success_url": req.return_url,
            "metadata": req.metadata()?.to_map(),
        });
        if !req.payer_email.is_empty() {
            body["customer_email"] = json!(req.payer_email);
        }
        if !req.payer_name.is_empty() {
            body["customer_name"] = json!(req.payer_name);
        }

        let checkout: Checkout = self
            .api
            .send_json(
                self.api
                    .post("/v1/checkouts/")
                    .bearer_auth(&self.config.access_token)
                    .json(&body),
            )
            .await?;
        let pay_url = checkout
            .url
            .ok_or_else(|| ProviderError::decode(NAME, "checkout without url"))?;
        info!(checkout_id = %checkout.id, "Created Polar checkout");
        Ok(PayResp {
            pay_url,
            order_id: checkout.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let checkout: Checkout = self
            .api
            .send_json(
                self.api
                    .get(&format!("/v1/checkouts/{}", req.order_id))
                    .bearer_auth(&self.config.access_token),
            )
            .await?;
        map_checkout(checkout)
    }
}
