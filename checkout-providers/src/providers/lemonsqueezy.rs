//! Lemon Squeezy hosted checkouts.
//!
//! Reads from [`Credentials`]: `client_id` (numeric store id),
//! `client_secret` (API key) and `webhook_secret` (signing secret).
//!
//! A checkout object never reports payment. Orders carry the checkout's
//! custom data instead, so both a poll and a webhook settle from the store
//! order whose `payment_name` matches the checkout's.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkout_types::{
    Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider,
    ProviderError, Settlement,
};
use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{ensure_same_order, required_header, webhook_secret};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::Credentials;
use crate::security;

const NAME: &str = "Lemon Squeezy";
const API_BASE: &str = "https://api.lemonsqueezy.com";
const JSON_API: &str = "application/vnd.api+json";

#[derive(Debug, Clone)]
pub struct LemonSqueezyConfig {
    pub store_id: u64,
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl LemonSqueezyConfig {
    pub fn new(store_id: &str, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let store_id = store_id.trim().parse().map_err(|_| {
            ProviderError::Config(format!(
                "{NAME}: invalid store id {store_id:?}, expected a number"
            ))
        })?;
        Ok(Self {
            store_id,
            api_key: api_key.into(),
            webhook_secret: None,
            base_url: API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
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
struct Document<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Checkout {
    id: String,
    attributes: CheckoutAttributes,
}

#[derive(Debug, Deserialize)]
struct CheckoutAttributes {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    checkout_data: Option<CheckoutData>,
}

#[derive(Debug, Deserialize)]
struct CheckoutData {
    #[serde(default)]
    custom: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderEvent {
    meta: EventMeta,
    data: Order,
}

#[derive(Debug, Deserialize)]
struct EventMeta {
    event_name: String,
    #[serde(default)]
    custom_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Order {
    #[serde(rename = "type")]
    kind: String,
    attributes: OrderAttributes,
}

/// Store order as listed by `GET /v1/orders`.
#[derive(Debug, Deserialize)]
struct ListedOrder {
    #[serde(default)]
    meta: Option<ListedOrderMeta>,
    attributes: OrderAttributes,
}

#[derive(Debug, Deserialize)]
struct ListedOrderMeta {
    #[serde(default)]
    custom_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderAttributes {
    status: String,
    /// Minor units.
    total: i64,
    currency: String,
}

pub struct LemonSqueezyProvider {
    config: LemonSqueezyConfig,
    api: ApiClient,
}

impl LemonSqueezyProvider {
    pub fn new(config: LemonSqueezyConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = LemonSqueezyConfig::new(
            &creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
        )?
        .with_base_url(creds.endpoint(API_BASE));
        config.webhook_secret = Credentials::optional(&creds.webhook_secret);
        Self::new(config)
    }

    fn json_api(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, JSON_API)
            .header(CONTENT_TYPE, JSON_API)
    }

    async fn get_checkout(&self, id: &str) -> Result<Checkout, ProviderError> {
        let doc: Document<Checkout> = self
            .api
            .send_json(self.json_api(self.api.get(&format!("/v1/checkouts/{id}"))))
            .await?;
        Ok(doc.data)
    }

    /// Finds the store order opened for `payment_name`, if the buyer got
    /// that far.
    async fn find_order(
        &self,
        payment_name: &str,
    ) -> Result<Option<(PaymentMetadata, OrderAttributes)>, ProviderError> {
        let store_id = self.config.store_id.to_string();
        let doc: Document<Vec<ListedOrder>> = self
            .api
            .send_json(
                self.json_api(self.api.get("/v1/orders"))
                    .query(&[("filter[store_id]", store_id.as_str()), ("page[size]", "100")]),
            )
            .await?;
        Ok(doc.data.into_iter().find_map(|order| {
            let custom = order.meta.as_ref().and_then(|m| m.custom_data.as_ref());
            let metadata = PaymentMetadata::from_json(custom);
            (metadata.payment_name.as_deref() == Some(payment_name))
                .then_some((metadata, order.attributes))
        }))
    }

    fn verify_event(&self, req: &NotifyRequest) -> Result<OrderEvent, ProviderError> {
        let secret = webhook_secret(&self.config.webhook_secret, NAME)?;
        let signature = required_header(req, NAME, "x-signature")?;
        if !security::verify_webhook_signature(&req.body, signature, secret) {
            warn!("Rejected Lemon Squeezy webhook");
            return Err(ProviderError::verification(NAME, "signature mismatch"));
        }
        let event: OrderEvent =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        if event.data.kind != "orders" {
            return Err(ProviderError::InvalidRequest(format!(
                "{NAME}: {} event does not describe an order",
                event.meta.event_name
            )));
        }
        info!(event = %event.meta.event_name, "Verified Lemon Squeezy webhook");
        Ok(event)
    }
}

fn checkout_metadata(checkout: &Checkout) -> PaymentMetadata {
    PaymentMetadata::from_json(
        checkout
            .attributes
            .checkout_data
            .as_ref()
            .and_then(|d| d.custom.as_ref()),
    )
}

/// State of a checkout no order has been opened for yet.
fn map_checkout(checkout: &Checkout, now: DateTime<Utc>) -> NotifyResult {
    match checkout.attributes.expires_at {
        Some(expires_at) if expires_at <= now => {
            NotifyResult::timeout(&checkout.id, "Checkout expired")
        }
        _ => NotifyResult::created(&checkout.id),
    }
}

fn map_order(
    order_id: &str,
    metadata: &PaymentMetadata,
    order: OrderAttributes,
) -> Result<NotifyResult, ProviderError> {
    match order.status.as_str() {
        "paid" => {
            let price = Money::from_minor_units(order.total, &order.currency)?;
            let settlement = Settlement::from_metadata(metadata, price.amount(), price.currency())?;
            Ok(NotifyResult::paid(order_id, settlement))
        }
        "pending" => Ok(NotifyResult::created(order_id)),
        "failed" => Ok(NotifyResult::error(order_id, "Payment failed")),
        "refunded" | "partial_refund" => Ok(NotifyResult::canceled(order_id, "Order refunded")),
        other => Ok(NotifyResult::unexpected_status(order_id, other)),
    }
}

#[async_trait]
impl PaymentProvider for LemonSqueezyProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let variant_id: u64 = req.product_name.trim().parse().map_err(|_| {
            ProviderError::InvalidRequest(format!(
                "{NAME}: product name {:?} must be a numeric variant id",
                req.product_name
            ))
        })?;
        let body = json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "product_options": {
                        "name": req.product_display_name,
                        "description": req.product_description,
                        "redirect_url": req.return_url,
                    },
                    "checkout_data": {
                        "email": req.payer_email,
                        "name": req.payer_name,
                        "custom": req.metadata()?.to_map(),
                    },
                },
                "relationships": {
                    "store": {
                        "data": { "type": "stores", "id": self.config.store_id.to_string() }
                    },
                    "variant": { "data": { "type": "variants", "id": variant_id.to_string() } },
                },
            },
        });

        let doc: Document<Checkout> = self
            .api
            .send_json(self.json_api(self.api.post("/v1/checkouts")).json(&body))
            .await?;
        let checkout = doc.data;
        let pay_url = checkout
            .attributes
            .url
            .ok_or_else(|| ProviderError::decode(NAME, "checkout without url"))?;
        info!(checkout_id = %checkout.id, "Created Lemon Squeezy checkout");
        Ok(PayResp {
            pay_url,
            order_id: checkout.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if !req.is_push() {
            let checkout = self.get_checkout(&req.order_id).await?;
            let expected = checkout_metadata(&checkout);
            return match self.find_order(expected.require_payment_name()?).await? {
                Some((metadata, order)) => map_order(&req.order_id, &metadata, order),
                None => Ok(map_checkout(&checkout, Utc::now())),
            };
        }

        let event = self.verify_event(req)?;
        let metadata = PaymentMetadata::from_json(event.meta.custom_data.as_ref());

        // Orders do not reference their checkout, so tie them together
        // through the payment name both carry.
        let checkout = self.get_checkout(&req.order_id).await?;
        let expected = checkout_metadata(&checkout);
        ensure_same_order(
            NAME,
            expected.require_payment_name()?,
            metadata.require_payment_name()?,
        )?;
        map_order(&req.order_id, &metadata, event.data.attributes)
    }
}
