//! Stripe Checkout adapter.
//!
//! Reads from [`Credentials`]: `client_secret` (secret API key) and
//! `webhook_secret` (endpoint signing secret).

use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider,
    ProviderError, Settlement,
};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{ensure_same_order, now_unix, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::Credentials;
use crate::security;

const NAME: &str = "Stripe";
const API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: None,
            base_url: API_BASE.to_string(),
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
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    id: String,
}

pub struct StripeProvider {
    config: StripeConfig,
    api: ApiClient,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config =
            StripeConfig::new(creds.require(NAME, "client_secret", &creds.client_secret)?)
                .with_base_url(creds.endpoint(API_BASE));
        config.webhook_secret = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    fn session_form(req: &PayReq) -> Result<Vec<(String, String)>, ProviderError> {
        let money = req.money()?;
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), req.return_url.clone()),
            ("cancel_url".to_string(), req.return_url.clone()),
            ("client_reference_id".to_string(), req.payment_name.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                money.currency().to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                money.to_minor_units()?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                req.product_display_name.clone(),
            ),
        ];
        if !req.product_description.is_empty() {
            form.push((
                "line_items[0][price_data][product_data][description]".to_string(),
                req.product_description.clone(),
            ));
        }
        if !req.product_image.is_empty() {
            form.push((
                "line_items[0][price_data][product_data][images][0]".to_string(),
                req.product_image.clone(),
            ));
        }
        if !req.payer_email.is_empty() {
            form.push(("customer_email".to_string(), req.payer_email.clone()));
        }
        for (key, value) in req.metadata()?.to_map() {
            form.push((format!("metadata[{key}]"), value));
        }
        Ok(form)
    }

    async fn get_session(&self, id: &str) -> Result<CheckoutSession, ProviderError> {
        self.api
            .send_json(
                self.api
                    .get(&format!("/v1/checkout/sessions/{id}"))
                    .bearer_auth(&self.config.secret_key),
            )
            .await
    }

    fn verify_push(&self, req: &NotifyRequest) -> Result<(), ProviderError> {
        let secret = webhook_secret(&self.config.webhook_secret, NAME)?;
        let header = required_header(req, NAME, "stripe-signature")?;
        security::verify_stripe_signature(header, &req.body, secret, now_unix()).map_err(|e| {
            warn!(error = %e, "Rejected Stripe webhook");
            ProviderError::verification(NAME, e)
        })?;

        let event: Event =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        info!(event_type = %event.kind, "Verified Stripe webhook");
        ensure_same_order(NAME, &req.order_id, &event.data.object.id)
    }
}

/// Session status and payment status must both agree before funds count.
fn map_session(session: CheckoutSession) -> Result<NotifyResult, ProviderError> {
    let status = session.status.as_deref().unwrap_or_default();
    let payment_status = session.payment_status.as_deref().unwrap_or_default();
    match (status, payment_status) {
        ("open", _) => Ok(NotifyResult::created(session.id)),
        ("expired", _) => Ok(NotifyResult::timeout(session.id, "Checkout session expired")),
        ("complete", "unpaid") => Ok(NotifyResult::created(session.id)),
        ("complete", "paid") => {
            let metadata = PaymentMetadata::from_json(session.metadata.as_ref());
            let amount = session
                .amount_total
                .ok_or_else(|| ProviderError::decode(NAME, "paid session without amount_total"))?;
            let currency = session
                .currency
                .ok_or_else(|| ProviderError::decode(NAME, "paid session without currency"))?;
            let price = Money::from_minor_units(amount, &currency)?;
            let settlement =
                Settlement::from_metadata(&metadata, price.amount(), price.currency())?;
            Ok(NotifyResult::paid(session.id, settlement))
        }
        ("complete", other) => Ok(NotifyResult::unexpected_status(
            session.id,
            &format!("complete/{other}"),
        )),
        (other, _) => Ok(NotifyResult::unexpected_status(session.id, other)),
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let form = Self::session_form(req)?;
        let session: CheckoutSession = self
            .api
            .send_json(
                self.api
                    .post("/v1/checkout/sessions")
                    .bearer_auth(&self.config.secret_key)
                    .form(&form),
            )
            .await?;

        let pay_url = session
            .url
            .ok_or_else(|| ProviderError::decode(NAME, "checkout session without url"))?;
        info!(session_id = %session.id, "Created Stripe checkout session");
        Ok(PayResp {
            pay_url,
            order_id: session.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let session = self.get_session(&req.order_id).await?;
        map_session(session)
    }
}
