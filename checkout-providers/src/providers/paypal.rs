//! PayPal Orders v2 adapter.
//!
//! Reads from [`Credentials`]: `client_id`, `client_secret`, `mode`, and
//! `webhook_secret` (the webhook id used for remote signature verification).
//!
//! PayPal has no durable metadata map, so the product identity rides in the
//! purchase unit's `custom_id` as an attach string.

use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    NotifyRequest, NotifyResult, PayReq, PayResp, PaymentProvider, ProductIdentity,
    ProviderError, Settlement,
};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{ensure_same_order, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::{Credentials, RunMode};
use crate::token::{AccessToken, TokenCache};

const NAME: &str = "PayPal";
const SANDBOX_BASE: &str = "https://api-m.sandbox.paypal.com";
const LIVE_BASE: &str = "https://api-m.paypal.com";
/// `custom_id` is capped at 127 characters.
const CUSTOM_ID_LIMIT: usize = 127;

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl PayPalConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        mode: RunMode,
    ) -> Self {
        let base_url = match mode {
            RunMode::Sandbox => SANDBOX_BASE,
            RunMode::Production => LIVE_BASE,
        };
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            webhook_id: None,
            base_url: base_url.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_webhook_id(mut self, webhook_id: impl Into<String>) -> Self {
        self.webhook_id = Some(webhook_id.into());
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
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    reference_id: Option<String>,
    #[serde(default)]
    custom_id: Option<String>,
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    status: String,
    amount: Amount,
    #[serde(default)]
    status_details: Option<StatusDetails>,
}

#[derive(Debug, Deserialize)]
struct StatusDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    currency_code: String,
    value: Decimal,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_type: String,
    resource: WebhookResource,
}

#[derive(Debug, Deserialize)]
struct WebhookResource {
    id: String,
    #[serde(default)]
    supplementary_data: Option<SupplementaryData>,
}

#[derive(Debug, Deserialize)]
struct SupplementaryData {
    related_ids: RelatedIds,
}

#[derive(Debug, Deserialize)]
struct RelatedIds {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

pub struct PayPalProvider {
    config: PayPalConfig,
    api: ApiClient,
    tokens: TokenCache,
}

impl PayPalProvider {
    pub fn new(config: PayPalConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self {
            config,
            api,
            tokens: TokenCache::new(),
        })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = PayPalConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.mode,
        );
        if let Some(base_url) = &creds.base_url {
            config = config.with_base_url(base_url);
        }
        config.webhook_id = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        self.tokens
            .get_or_refresh(|| async {
                let resp: TokenResponse = self
                    .api
                    .send_json(
                        self.api
                            .post("/v1/oauth2/token")
                            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                            .form(&[("grant_type", "client_credentials")]),
                    )
                    .await?;
                Ok::<_, ProviderError>(AccessToken::expiring_in(
                    resp.access_token,
                    resp.expires_in,
                ))
            })
            .await
    }

    async fn get_order(&self, token: &str, id: &str) -> Result<Order, ProviderError> {
        self.api
            .send_json(
                self.api
                    .get(&format!("/v2/checkout/orders/{id}"))
                    .bearer_auth(token),
            )
            .await
    }

    /// Captures an approved order, then re-reads it. The capture answer is a
    /// minimal representation without purchase units. A capture that already
    /// happened is not an error.
    async fn capture(&self, token: &str, id: &str) -> Result<Order, ProviderError> {
        let (status, body) = self
            .api
            .send_raw(
                self.api
                    .post(&format!("/v2/checkout/orders/{id}/capture"))
                    .bearer_auth(token)
                    .header("PayPal-Request-Id", format!("{id}-capture"))
                    .json(&json!({})),
            )
            .await?;

        if status.is_success() {
            info!(order_id = id, "Captured PayPal order");
        } else if status == StatusCode::UNPROCESSABLE_ENTITY
            && body.contains("ORDER_ALREADY_CAPTURED")
        {
            debug!(order_id = id, "PayPal order already captured");
        } else {
            return Err(self.api.status_error(status, body));
        }
        self.get_order(token, id).await
    }

    async fn verify_push(&self, req: &NotifyRequest, token: &str) -> Result<(), ProviderError> {
        let webhook_id = webhook_secret(&self.config.webhook_id, NAME)?;
        let event_value: serde_json::Value =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        let event: WebhookEvent = serde_json::from_value(event_value.clone())
            .map_err(|e| ProviderError::decode(NAME, e))?;

        let body = json!({
            "auth_algo": required_header(req, NAME, "paypal-auth-algo")?,
            "cert_url": required_header(req, NAME, "paypal-cert-url")?,
            "transmission_id": required_header(req, NAME, "paypal-transmission-id")?,
            "transmission_sig": required_header(req, NAME, "paypal-transmission-sig")?,
            "transmission_time": required_header(req, NAME, "paypal-transmission-time")?,
            "webhook_id": webhook_id,
            "webhook_event": event_value,
        });
        let verdict: VerifyResponse = self
            .api
            .send_json(
                self.api
                    .post("/v1/notifications/verify-webhook-signature")
                    .bearer_auth(token)
                    .json(&body),
            )
            .await?;
        if verdict.verification_status != "SUCCESS" {
            warn!(status = %verdict.verification_status, "Rejected PayPal webhook");
            return Err(ProviderError::verification(
                NAME,
                format!("verification_status {}", verdict.verification_status),
            ));
        }

        info!(event_type = %event.event_type, "Verified PayPal webhook");
        let order_id = event
            .resource
            .supplementary_data
            .map(|d| d.related_ids.order_id)
            .unwrap_or(event.resource.id);
        ensure_same_order(NAME, &req.order_id, &order_id)
    }
}

/// Order status first, then the capture status of the first purchase unit.
fn map_order(order: Order) -> Result<NotifyResult, ProviderError> {
    match order.status.as_str() {
        "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => {
            return Ok(NotifyResult::created(order.id));
        }
        "VOIDED" => return Ok(NotifyResult::canceled(order.id, "Order voided")),
        "COMPLETED" => {}
        other => return Ok(NotifyResult::unexpected_status(order.id, other)),
    }

    let unit = order
        .purchase_units
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::decode(NAME, "completed order without purchase units"))?;
    let capture = unit
        .payments
        .and_then(|p| p.captures.into_iter().next())
        .ok_or_else(|| ProviderError::decode(NAME, "completed order without a capture"))?;

    match capture.status.as_str() {
        "COMPLETED" => {}
        "PENDING" => return Ok(NotifyResult::created(order.id)),
        "DECLINED" | "FAILED" => {
            let reason = capture
                .status_details
                .and_then(|d| d.reason)
                .unwrap_or_else(|| capture.status.clone());
            return Ok(NotifyResult::error(order.id, format!("Capture {reason}")));
        }
        "REFUNDED" | "PARTIALLY_REFUNDED" => {
            return Ok(NotifyResult::canceled(order.id, format!("Capture {}", capture.status)));
        }
        other => return Ok(NotifyResult::unexpected_status(order.id, other)),
    }

    let custom_id = unit
        .custom_id
        .ok_or_else(|| ProviderError::decode(NAME, "captured order without custom_id"))?;
    let identity = ProductIdentity::decode(&custom_id)?;
    let payment_name = unit
        .reference_id
        .ok_or_else(|| ProviderError::decode(NAME, "captured order without reference_id"))?;
    let settlement = Settlement::new(
        payment_name,
        identity,
        capture.amount.value,
        capture.amount.currency_code,
    );
    Ok(NotifyResult::paid(order.id, settlement))
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let custom_id = req.identity().encode()?;
        if custom_id.chars().count() > CUSTOM_ID_LIMIT {
            return Err(ProviderError::InvalidRequest(format!(
                "{NAME}: product identity exceeds {CUSTOM_ID_LIMIT} characters"
            )));
        }
        let description: String = req.product_display_name.chars().take(127).collect();

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": req.payment_name,
                "description": description,
                "custom_id": custom_id,
                "amount": {
                    "currency_code": money.currency(),
                    "value": money.to_fixed_string()?,
                },
            }],
            "application_context": {
                "return_url": req.return_url,
                "cancel_url": req.return_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let token = self.access_token().await?;
        let order: Order = self
            .api
            .send_json(
                self.api
                    .post("/v2/checkout/orders")
                    .bearer_auth(&token)
                    .json(&body),
            )
            .await?;

        let pay_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone())
            .ok_or_else(|| ProviderError::decode(NAME, "order without approve link"))?;
        info!(order_id = %order.id, "Created PayPal order");
        Ok(PayResp {
            pay_url,
            order_id: order.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        let token = self.access_token().await?;
        if req.is_push() {
            self.verify_push(req, &token).await?;
        }

        let order = self.get_order(&token, &req.order_id).await?;
        let order = if order.status == "APPROVED" {
            self.capture(&token, &req.order_id).await?
        } else {
            order
        };
        map_order(order)
    }
}
