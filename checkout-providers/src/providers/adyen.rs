//! Adyen Checkout payment links.
//!
//! Reads from [`Credentials`]: `client_id` (merchant account),
//! `client_secret` (API key), `host` (live URL prefix, production only),
//! `mode`, and `webhook_secret` (notification HMAC key, hex).

use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentMetadata, PaymentProvider,
    ProviderError, Settlement,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::webhook_secret;
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::{Credentials, RunMode};
use crate::security;

const NAME: &str = "Adyen";
const TEST_BASE: &str = "https://checkout-test.adyen.com";
const API_VERSION: &str = "v71";

#[derive(Debug, Clone)]
pub struct AdyenConfig {
    pub merchant_account: String,
    pub api_key: String,
    pub hmac_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl AdyenConfig {
    /// Live endpoints are account specific, so production needs the
    /// merchant's URL prefix.
    pub fn new(
        merchant_account: impl Into<String>,
        api_key: impl Into<String>,
        mode: RunMode,
        live_prefix: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let base_url = match (mode, live_prefix) {
            (RunMode::Sandbox, _) => TEST_BASE.to_string(),
            (RunMode::Production, Some(prefix)) => {
                format!("https://{prefix}-checkout-live.adyenpayments.com/checkout")
            }
            (RunMode::Production, None) => {
                return Err(ProviderError::Config(format!(
                    "{NAME}: production mode requires the live URL prefix in host"
                )));
            }
        };
        Ok(Self {
            merchant_account: merchant_account.into(),
            api_key: api_key.into(),
            hmac_key: None,
            base_url,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_hmac_key(mut self, key: impl Into<String>) -> Result<Self, ProviderError> {
        let key = key.into();
        hex::decode(&key)
            .map_err(|e| ProviderError::Config(format!("{NAME}: HMAC key is not hex: {e}")))?;
        self.hmac_key = Some(key);
        Ok(self)
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
struct PaymentLink {
    id: String,
    status: String,
    #[serde(default)]
    url: Option<String>,
    amount: Amount,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    notification_items: Vec<NotificationItemWrapper>,
}

#[derive(Debug, Deserialize)]
struct NotificationItemWrapper {
    #[serde(rename = "NotificationRequestItem")]
    item: NotificationItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationItem {
    psp_reference: String,
    #[serde(default)]
    original_reference: String,
    merchant_account_code: String,
    merchant_reference: String,
    amount: Amount,
    event_code: String,
    success: String,
    #[serde(default)]
    additional_data: std::collections::HashMap<String, String>,
}

impl NotificationItem {
    fn verify(&self, hex_key: &str) -> Result<(), security::SignatureError> {
        let value = self.amount.value.to_string();
        let fields = [
            self.psp_reference.as_str(),
            self.original_reference.as_str(),
            self.merchant_account_code.as_str(),
            self.merchant_reference.as_str(),
            value.as_str(),
            self.amount.currency.as_str(),
            self.event_code.as_str(),
            self.success.as_str(),
        ];
        let signature = self
            .additional_data
            .get("hmacSignature")
            .ok_or(security::SignatureError::Missing("hmacSignature"))?;
        security::verify_adyen_item(&fields, hex_key, signature)
    }

    fn payment_link_id(&self) -> Option<&str> {
        self.additional_data.get("paymentLinkId").map(String::as_str)
    }
}

pub struct AdyenProvider {
    config: AdyenConfig,
    api: ApiClient,
}

impl AdyenProvider {
    pub fn new(config: AdyenConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let prefix = Credentials::optional(&creds.host);
        let mut config = AdyenConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.mode,
            prefix.as_deref(),
        )?;
        if let Some(key) = Credentials::optional(&creds.webhook_secret) {
            config = config.with_hmac_key(key)?;
        }
        if let Some(base_url) = &creds.base_url {
            config = config.with_base_url(base_url);
        }
        Self::new(config)
    }

    fn path(resource: &str) -> String {
        format!("/{API_VERSION}/{resource}")
    }

    async fn get_link(&self, id: &str) -> Result<PaymentLink, ProviderError> {
        self.api
            .send_json(
                self.api
                    .get(&Self::path(&format!("paymentLinks/{id}")))
                    .header("X-API-Key", &self.config.api_key),
            )
            .await
    }

    /// Every item in the batch must carry a valid HMAC; the one for this
    /// payment link must be present.
    fn verify_push(&self, req: &NotifyRequest) -> Result<(), ProviderError> {
        let hex_key = webhook_secret(&self.config.hmac_key, NAME)?;
        let notification: Notification =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;

        let mut matched = false;
        for wrapper in &notification.notification_items {
            let item = &wrapper.item;
            item.verify(hex_key).map_err(|e| {
                warn!(
                    psp_reference = %item.psp_reference,
                    error = %e,
                    "Rejected Adyen notification item"
                );
                ProviderError::verification(NAME, e)
            })?;
            if item.payment_link_id() == Some(req.order_id.as_str()) {
                info!(
                    event_code = %item.event_code,
                    success = %item.success,
                    "Verified Adyen notification"
                );
                matched = true;
            }
        }
        if !matched {
            return Err(ProviderError::InvalidRequest(format!(
                "{NAME}: notification does not mention payment link {}",
                req.order_id
            )));
        }
        Ok(())
    }
}

fn map_link(link: PaymentLink) -> Result<NotifyResult, ProviderError> {
    match link.status.as_str() {
        "active" | "paymentPending" => Ok(NotifyResult::created(link.id)),
        "expired" => Ok(NotifyResult::timeout(link.id, "Payment link expired")),
        "canceled" => Ok(NotifyResult::canceled(link.id, "Payment cancelled")),
        "refused" => Ok(NotifyResult::error(link.id, "Payment refused")),
        "completed" | "paid" => {
            let metadata = PaymentMetadata::from_json(link.metadata.as_ref());
            let price = Money::from_minor_units(link.amount.value, &link.amount.currency)?;
            let settlement =
                Settlement::from_metadata(&metadata, price.amount(), price.currency())?;
            Ok(NotifyResult::paid(link.id, settlement))
        }
        other => Ok(NotifyResult::unexpected_status(link.id, other)),
    }
}

#[async_trait]
impl PaymentProvider for AdyenProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let mut body = json!({
            "amount": {
                "value": money.to_minor_units()?,
                "currency": money.currency(),
            },
            "merchantAccount": self.config.merchant_account,
            "reference": req.payment_name,
            "returnUrl": req.return_url,
            "description": req.product_display_name,
            "metadata": req.metadata()?.to_map(),
        });
        if !req.payer_email.is_empty() {
            body["shopperEmail"] = json!(req.payer_email);
        }

        let link: PaymentLink = self
            .api
            .send_json(
                self.api
                    .post(&Self::path("paymentLinks"))
                    .header("X-API-Key", &self.config.api_key)
                    .json(&body),
            )
            .await?;
        let pay_url = link
            .url
            .ok_or_else(|| ProviderError::decode(NAME, "payment link without url"))?;
        info!(link_id = %link.id, "Created Adyen payment link");
        Ok(PayResp {
            pay_url,
            order_id: link.id,
            ..Default::default()
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        if req.is_push() {
            self.verify_push(req)?;
        }
        let link = self.get_link(&req.order_id).await?;
        map_link(link)
    }

    fn response_error(&self, err: Option<&ProviderError>) -> String {
        match err {
            None => "[accepted]".to_string(),
            Some(e) => format!("fail: {e}"),
        }
    }
}
