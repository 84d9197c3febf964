//! Airwallex payment intents with the hosted checkout page.
//!
//! Reads from [`Credentials`]: `client_id`, `client_secret` (API key),
//! `mode`, and `webhook_secret`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkout_types::{
    NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider, ProviderError,
    Settlement,
};
use reqwest::Url;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{ensure_same_order, json_amount, now_unix, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::{Credentials, RunMode};
use crate::security;
use crate::token::{AccessToken, TokenCache};

const NAME: &str = "Airwallex";
const SANDBOX_API: &str = "https://api-demo.airwallex.com/api/v1";
const SANDBOX_CHECKOUT: &str = "https://checkout-demo.airwallex.com";
const LIVE_API: &str = "https://api.airwallex.com/api/v1";
const LIVE_CHECKOUT: &str = "https://checkout.airwallex.com";

#[derive(Debug, Clone)]
pub struct AirwallexConfig {
    pub client_id: String,
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub checkout_url: String,
    pub timeout: Duration,
}

impl AirwallexConfig {
    pub fn new(client_id: impl Into<String>, api_key: impl Into<String>, mode: RunMode) -> Self {
        let (base_url, checkout_url) = match mode {
            RunMode::Sandbox => (SANDBOX_API, SANDBOX_CHECKOUT),
            RunMode::Production => (LIVE_API, LIVE_CHECKOUT),
        };
        Self {
            client_id: client_id.into(),
            api_key: api_key.into(),
            webhook_secret: None,
            base_url: base_url.to_string(),
            checkout_url: checkout_url.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
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
struct LoginResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIntent {
    id: String,
    client_secret: String,
    merchant_order_id: String,
}

#[derive(Debug, Deserialize)]
struct IntentList {
    #[serde(default)]
    items: Vec<Intent>,
}

#[derive(Debug, Deserialize)]
struct Intent {
    status: String,
    merchant_order_id: String,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    latest_payment_attempt: Option<PaymentAttempt>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PaymentAttempt {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    name: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    merchant_order_id: String,
}

/// Login responses use `+0000` offsets, which RFC 3339 does not allow.
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, ProviderError> {
    let fixed = raw.replacen("+0000", "+00:00", 1);
    DateTime::parse_from_rfc3339(&fixed)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ProviderError::decode(NAME, format!("token expiry {raw}: {e}")))
}

pub struct AirwallexProvider {
    config: AirwallexConfig,
    api: ApiClient,
    tokens: TokenCache,
}

impl AirwallexProvider {
    pub fn new(config: AirwallexConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self {
            config,
            api,
            tokens: TokenCache::new(),
        })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = AirwallexConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.mode,
        );
        if let Some(base_url) = &creds.base_url {
            config = config.with_base_url(base_url);
        }
        config.webhook_secret = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        self.tokens
            .get_or_refresh(|| async {
                let resp: LoginResponse = self
                    .api
                    .send_json(
                        self.api
                            .post("/authentication/login")
                            .header("x-client-id", &self.config.client_id)
                            .header("x-api-key", &self.config.api_key)
                            .json(&json!({})),
                    )
                    .await?;
                let expires_at = parse_expiry(&resp.expires_at)?;
                Ok::<_, ProviderError>(AccessToken::new(resp.token, expires_at))
            })
            .await
    }

    async fn authorized<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let token = self.access_token().await?;
        self.api.send_json(request.bearer_auth(token)).await
    }

    fn checkout_url(&self, intent: &CreatedIntent, req: &PayReq) -> Result<String, ProviderError> {
        // The hosted page routes on the fragment, so the query is built
        // separately and appended after `#/standalone/checkout?`.
        let mut scratch = Url::parse("https://checkout.invalid/")
            .map_err(|e| ProviderError::Config(format!("{NAME}: {e}")))?;
        scratch
            .query_pairs_mut()
            .append_pair("intent_id", &intent.id)
            .append_pair("client_secret", &intent.client_secret)
            .append_pair("mode", "payment")
            .append_pair("currency", &req.currency)
            .append_pair("amount", &req.money()?.to_compact_string())
            .append_pair("successUrl", &req.return_url)
            .append_pair("failUrl", &req.return_url);
        Ok(format!(
            "{}/#/standalone/checkout?{}",
            self.config.checkout_url.trim_end_matches('/'),
            scratch.query().unwrap_or_default()
        ))
    }

    async fn intent_by_order(&self, order_id: &str) -> Result<Intent, ProviderError> {
        let list: IntentList = self
            .authorized(
                self.api
                    .get("/pa/payment_intents/")
                    .query(&[("merchant_order_id", order_id)]),
            )
            .await?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::decode(NAME, format!("no payment intent for {order_id}")))
    }

    fn verify_push(&self, req: &NotifyRequest) -> Result<(), ProviderError> {
        let secret = webhook_secret(&self.config.webhook_secret, NAME)?;
        let timestamp = required_header(req, NAME, "x-timestamp")?;
        let signature = required_header(req, NAME, "x-signature")?;

        // Milliseconds since the epoch.
        let millis: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| ProviderError::verification(NAME, "malformed x-timestamp"))?;
        security::check_timestamp(millis / 1000, now_unix())
            .map_err(|e| ProviderError::verification(NAME, e))?;

        let mut payload = timestamp.as_bytes().to_vec();
        payload.extend_from_slice(&req.body);
        if !security::verify_webhook_signature(&payload, signature, secret) {
            warn!("Rejected Airwallex webhook");
            return Err(ProviderError::verification(NAME, "signature mismatch"));
        }

        let event: WebhookEvent =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        info!(event = %event.name, "Verified Airwallex webhook");
        ensure_same_order(NAME, &req.order_id, &event.data.object.merchant_order_id)
    }
}

/// Intent status first, then the latest attempt must show captured funds.
fn map_intent(intent: Intent) -> Result<NotifyResult, ProviderError> {
    let order_id = intent.merchant_order_id.clone();
    match intent.status.as_str() {
        "PENDING" | "REQUIRES_PAYMENT_METHOD" | "REQUIRES_CUSTOMER_ACTION" | "REQUIRES_CAPTURE" => {
            return Ok(NotifyResult::created(order_id));
        }
        "CANCELLED" => return Ok(NotifyResult::canceled(order_id, "Payment intent cancelled")),
        "EXPIRED" => return Ok(NotifyResult::timeout(order_id, "Payment intent expired")),
        "SUCCEEDED" => {}
        other => return Ok(NotifyResult::unexpected_status(order_id, other)),
    }

    if let Some(attempt) = &intent.latest_payment_attempt {
        match attempt.status.as_str() {
            "PAID" | "SETTLED" => {}
            "CANCELLED" | "EXPIRED" | "RECEIVED" | "AUTHENTICATION_REDIRECTED" | "AUTHORIZED"
            | "CAPTURE_REQUESTED" => return Ok(NotifyResult::created(order_id)),
            other => {
                return Ok(NotifyResult::unexpected_status(
                    order_id,
                    &format!("attempt {other}"),
                ));
            }
        }
    }

    let metadata = PaymentMetadata::from_json(intent.metadata.as_ref());
    let settlement = Settlement::from_metadata(&metadata, intent.amount, intent.currency)?;
    Ok(NotifyResult::paid(order_id, settlement))
}

#[async_trait]
impl PaymentProvider for AirwallexProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let body = json!({
            "request_id": req.payment_name,
            "merchant_order_id": req.payment_name,
            "amount": json_amount(NAME, &money)?,
            "currency": money.currency(),
            "metadata": req.metadata()?.to_map(),
            "order": {
                "products": [{
                    "name": req.product_display_name,
                    "quantity": 1,
                    "desc": req.product_description,
                    "image_url": req.product_image,
                }],
            },
            "customer": {
                "merchant_customer_id": req.payer_id,
                "email": req.payer_email,
                "first_name": req.payer_name,
            },
        });

        let intent: CreatedIntent = self
            .authorized(self.api.post("/pa/payment_intents/create").json(&body))
            .await?;
        let pay_url = self.checkout_url(&intent, req)?;
        info!(intent_id = %intent.id, "Created Airwallex payment intent");
        Ok(PayResp {
            pay_url,
            order_id: intent.merchant_order_id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let intent = self.intent_by_order(&req.order_id).await?;
        map_intent(intent)
    }
}
