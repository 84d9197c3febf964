//! Paddle Billing transactions with non-catalog prices.
//!
//! Reads from [`Credentials`]: `client_secret` (API key), `mode`, and
//! `webhook_secret` (notification destination secret).

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

const NAME: &str = "Paddle";
const SANDBOX_BASE: &str = "https://sandbox-api.paddle.com";
const LIVE_BASE: &str = "https://api.paddle.com";

#[derive(Debug, Clone)]
pub struct PaddleConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl PaddleConfig {
    pub fn new(api_key: impl Into<String>, mode: RunMode) -> Self {
        let base_url = match mode {
            RunMode::Sandbox => SANDBOX_BASE,
            RunMode::Production => LIVE_BASE,
        };
        Self {
            api_key: api_key.into(),
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
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: String,
    status: String,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    custom_data: Option<serde_json::Value>,
    #[serde(default)]
    checkout: Option<TransactionCheckout>,
    #[serde(default)]
    details: Option<TransactionDetails>,
}

#[derive(Debug, Deserialize)]
struct TransactionCheckout {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionDetails {
    totals: Totals,
}

/// Amounts are strings of minor units.
#[derive(Debug, Deserialize)]
struct Totals {
    total: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event_type: String,
    data: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

pub struct PaddleProvider {
    config: PaddleConfig,
    api: ApiClient,
}

impl PaddleProvider {
    pub fn new(config: PaddleConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = PaddleConfig::new(
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
        let header = required_header(req, NAME, "paddle-signature")?;
        security::verify_paddle_signature(header, &req.body, secret, now_unix()).map_err(|e| {
            warn!(error = %e, "Rejected Paddle webhook");
            ProviderError::verification(NAME, e)
        })?;

        let event: WebhookEvent =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        info!(event_type = %event.event_type, "Verified Paddle webhook");
        ensure_same_order(NAME, &req.order_id, &event.data.id)
    }
}

fn map_transaction(tx: Transaction) -> Result<NotifyResult, ProviderError> {
    match tx.status.as_str() {
        "draft" | "ready" | "billed" => Ok(NotifyResult::created(tx.id)),
        "canceled" => Ok(NotifyResult::canceled(tx.id, "Transaction canceled")),
        "past_due" => Ok(NotifyResult::error(tx.id, "Payment past due")),
        "completed" | "paid" => {
            let metadata = PaymentMetadata::from_json(tx.custom_data.as_ref());
            let total = tx
                .details
                .map(|d| d.totals.total)
                .ok_or_else(|| ProviderError::decode(NAME, "paid transaction without totals"))?;
            let minor: i64 = total.parse().map_err(|_| {
                ProviderError::decode(NAME, format!("total {total} is not an integer"))
            })?;
            let currency = tx
                .currency_code
                .ok_or_else(|| ProviderError::decode(NAME, "paid transaction without currency"))?;
            let price = Money::from_minor_units(minor, &currency)?;
            let settlement =
                Settlement::from_metadata(&metadata, price.amount(), price.currency())?;
            Ok(NotifyResult::paid(tx.id, settlement))
        }
        other => Ok(NotifyResult::unexpected_status(tx.id, other)),
    }
}

#[async_trait]
impl PaymentProvider for PaddleProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let custom_data = req.metadata()?.to_map();
        let body = json!({
            "items": [{
                "quantity": 1,
                "price": {
                    "description": req.product_display_name,
                    "name": req.product_display_name,
                    "tax_mode": "account_setting",
                    "unit_price": {
                        "amount": money.to_minor_units()?.to_string(),
                        "currency_code": money.currency(),
                    },
                    "product": {
                        "name": req.product_display_name,
                        "description": req.product_description,
                        "tax_category": "standard",
                        "image_url": (!req.product_image.is_empty()).then_some(&req.product_image),
                    },
                },
            }],
            "custom_data": custom_data,
            "checkout": { "url": req.return_url },
        });

        let created: Envelope<Transaction> = self
            .api
            .send_json(
                self.api
                    .post("/transactions")
                    .bearer_auth(&self.config.api_key)
                    .json(&body),
            )
            .await?;
        let tx = created.data;
        let pay_url = tx
            .checkout
            .and_then(|c| c.url)
            .ok_or_else(|| ProviderError::decode(NAME, "transaction without checkout url"))?;
        info!(transaction_id = %tx.id, "Created Paddle transaction");
        Ok(PayResp {
            pay_url,
            order_id: tx.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let fetched: Envelope<Transaction> = self
            .api
            .send_json(
                self.api
                    .get(&format!("/transactions/{}", req.order_id))
                    .bearer_auth(&self.config.api_key),
            )
            .await?;
        map_transaction(fetched.data)
    }
}
