//! FastSpring sessions.
//!
//! Reads from [`Credentials`]: `client_id` / `client_secret` (API user and
//! password), `host` (storefront path, e.g. `shop.onfastspring.com/popup-shop`)
//! and `webhook_secret` (HMAC secret).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider, ProviderError,
    Settlement,
};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::{json_amount, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::Credentials;
use crate::security;

const NAME: &str = "FastSpring";
const API_BASE: &str = "https://api.fastspring.com";

#[derive(Debug, Clone)]
pub struct FastSpringConfig {
    pub username: String,
    pub password: String,
    pub storefront: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl FastSpringConfig {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        storefront: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            storefront: storefront.into().trim_matches('/').to_string(),
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
struct Session {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    total: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookBatch {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    #[serde(default)]
    id: Option<String>,
}

pub struct FastSpringProvider {
    config: FastSpringConfig,
    api: ApiClient,
}

impl FastSpringProvider {
    pub fn new(config: FastSpringConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = FastSpringConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.require(NAME, "host", &creds.host)?,
        )
        .with_base_url(creds.endpoint(API_BASE));
        config.webhook_secret = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    fn verify_push(&self, req: &NotifyRequest) -> Result<(), ProviderError> {
        let secret = webhook_secret(&self.config.webhook_secret, NAME)?;
        let signature = required_header(req, NAME, "x-fs-signature")?;
        if !security::verify_webhook_signature_base64(&req.body, signature, secret.as_bytes()) {
            warn!("Rejected FastSpring webhook");
            return Err(ProviderError::verification(NAME, "signature mismatch"));
        }

        let batch: WebhookBatch =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        let event = batch
            .events
            .iter()
            .find(|e| e.data.id.as_deref() == Some(req.order_id.as_str()))
            .ok_or_else(|| {
                ProviderError::InvalidRequest(format!(
                    "{NAME}: webhook does not mention order {}",
                    req.order_id
                ))
            })?;
        info!(event_type = %event.kind, "Verified FastSpring webhook");
        Ok(())
    }

    /// `None` when the order does not exist yet.
    async fn get_order(&self, id: &str) -> Result<Option<Order>, ProviderError> {
        let (status, body) = self
            .api
            .send_raw(
                self.api
                    .get(&format!("/orders/{id}"))
                    .basic_auth(&self.config.username, Some(&self.config.password)),
            )
            .await?;
        match status {
            StatusCode::NOT_FOUND => {
                debug!("FastSpring order not created yet");
                Ok(None)
            }
            s if s.is_success() => self.api.decode(&body).map(Some),
            s => Err(self.api.status_error(s, body)),
        }
    }
}

fn map_order(order_id: &str, order: Option<Order>) -> Result<NotifyResult, ProviderError> {
    let order = match order {
        Some(order) if order.completed => order,
        _ => return Ok(NotifyResult::created(order_id)),
    };

    let metadata = PaymentMetadata::from_json(order.tags.as_ref());
    let total = order
        .total
        .ok_or_else(|| ProviderError::decode(NAME, "completed order without total"))?;
    let currency = order
        .currency
        .ok_or_else(|| ProviderError::decode(NAME, "completed order without currency"))?;
    let settlement = Settlement::from_metadata(&metadata, total, currency)?;
    Ok(NotifyResult::paid(order_id, settlement))
}

#[async_trait]
impl PaymentProvider for FastSpringProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let price = BTreeMap::from([(money.currency().to_string(), json_amount(NAME, &money)?)]);
        let mut body = json!({
            "items": [{
                "product": req.product_name,
                "quantity": 1,
                "pricing": { "price": price },
            }],
            "tags": req.metadata()?.to_map(),
        });
        if !req.payer_email.is_empty() || !req.payer_name.is_empty() {
            body["account"] = json!({
                "contact": { "email": req.payer_email, "first": req.payer_name },
            });
        }

        let session: Session = self
            .api
            .send_json(
                self.api
                    .post("/sessions")
                    .basic_auth(&self.config.username, Some(&self.config.password))
                    .json(&body),
            )
            .await?;
        info!(session_id = %session.id, "Created FastSpring session");
        Ok(PayResp {
            pay_url: format!("https://{}/session/{}", self.config.storefront, session.id),
            order_id: session.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let order = self.get_order(&req.order_id).await?;
        map_order(&req.order_id, order)
    }
}
