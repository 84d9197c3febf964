//! GC government payment gateway.
//!
//! Reads from [`Credentials`]: `client_id` (merchant code, `xmpch`),
//! `client_secret` (MD5 signing secret) and `host` (gateway URL).
//!
//! Every call is one JSON envelope POSTed to the gateway URL. The business
//! payload travels base64-encoded in `data` and the envelope is signed with
//! the legacy MD5 scheme in both directions.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use checkout_types::{
    InvoiceRequest, Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentProvider,
    ProductIdentity, ProviderError, Settlement,
};
use reqwest::header::CONTENT_TYPE;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::ensure_same_order;
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::Credentials;
use crate::security;

const NAME: &str = "GC";
const VERSION: &str = "1.4";
const CURRENCY: &str = "CNY";
const SUCCESS: &str = "SUCCESS";

#[derive(Clone)]
pub struct GcConfig {
    pub xmpch: String,
    pub secret_key: String,
    pub host: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcConfig")
            .field("xmpch", &self.xmpch)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl GcConfig {
    pub fn new(
        xmpch: impl Into<String>,
        secret_key: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            xmpch: xmpch.into(),
            secret_key: secret_key.into(),
            host: host.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a> {
    op: &'a str,
    xmpch: &'a str,
    version: &'a str,
    data: String,
    requesttime: String,
    sign: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    op: String,
    #[serde(default)]
    xmpch: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    return_code: String,
    #[serde(default)]
    return_msg: String,
    #[serde(default)]
    data: String,
    #[serde(default)]
    notifytime: String,
    #[serde(default)]
    sign: String,
}

impl ResponseEnvelope {
    fn signed_fields(&self) -> Vec<(&str, &str)> {
        [
            ("op", self.op.as_str()),
            ("xmpch", self.xmpch.as_str()),
            ("version", self.version.as_str()),
            ("return_code", self.return_code.as_str()),
            ("return_msg", self.return_msg.as_str()),
            ("data", self.data.as_str()),
            ("notifytime", self.notifytime.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .collect()
    }
}

#[derive(Debug, Deserialize)]
struct OrderCreated {
    payurl: String,
    #[serde(default)]
    jylsh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderState {
    orderno: String,
    orderstate: String,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    remark1: Option<String>,
    #[serde(default)]
    statedesc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceIssued {
    url: String,
}

pub struct GcProvider {
    config: GcConfig,
    api: ApiClient,
}

impl GcProvider {
    pub fn new(config: GcConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.host, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let host = match &creds.base_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => creds.require(NAME, "host", &creds.host)?,
        };
        let config = GcConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            host,
        );
        Self::new(config)
    }

    fn envelope<'a>(
        &'a self,
        op: &'a str,
        payload: &serde_json::Value,
        requesttime: String,
    ) -> RequestEnvelope<'a> {
        let data = STANDARD.encode(payload.to_string());
        let sign = security::sign_md5(
            [
                ("data", data.as_str()),
                ("op", op),
                ("requesttime", requesttime.as_str()),
                ("version", VERSION),
                ("xmpch", self.config.xmpch.as_str()),
            ],
            &self.config.secret_key,
        );
        RequestEnvelope {
            op,
            xmpch: &self.config.xmpch,
            version: VERSION,
            data,
            requesttime,
            sign,
        }
    }

    /// Checks the envelope signature and decodes its `data` payload.
    fn open<T: DeserializeOwned>(&self, envelope: &ResponseEnvelope) -> Result<T, ProviderError> {
        if !security::verify_md5(
            envelope.signed_fields(),
            &self.config.secret_key,
            &envelope.sign,
        ) {
            warn!(op = %envelope.op, "Rejected GC envelope with bad sign");
            return Err(ProviderError::verification(NAME, "envelope sign mismatch"));
        }
        let raw = STANDARD
            .decode(envelope.data.trim())
            .map_err(|e| ProviderError::decode(NAME, format!("data is not base64: {e}")))?;
        serde_json::from_slice(&raw).map_err(|e| ProviderError::decode(NAME, e))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        payload: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let requesttime = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let envelope = self.envelope(op, &payload, requesttime);
        let body = serde_json::to_string(&envelope).map_err(|e| ProviderError::decode(NAME, e))?;
        debug!(op, "Calling GC gateway");

        let (status, text) = self
            .api
            .send_raw(
                self.api
                    .post("")
                    .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
                    .body(body),
            )
            .await?;
        if !status.is_success() {
            return Err(self.api.status_error(status, text));
        }

        let response: ResponseEnvelope = self.api.decode(&text)?;
        if response.return_code != SUCCESS {
            return Err(ProviderError::provider(
                NAME,
                format!("{}: {}", response.return_code, response.return_msg),
            ));
        }
        self.open(&response)
    }
}

/// `orderstate`: 0 unpaid, 1 paid, 2 canceled, 3 failed.
fn map_order(order_id: &str, order: OrderState) -> Result<NotifyResult, ProviderError> {
    match order.orderstate.as_str() {
        "1" => {}
        "0" => return Ok(NotifyResult::created(order_id)),
        "2" => return Ok(NotifyResult::canceled(order_id, "Order canceled")),
        "3" => {
            let reason = order.statedesc.unwrap_or_else(|| "payment failed".to_string());
            return Ok(NotifyResult::error(order_id, reason));
        }
        other => return Ok(NotifyResult::unexpected_status(order_id, other)),
    }

    let remark = order
        .remark1
        .ok_or_else(|| ProviderError::decode(NAME, "paid order without remark1"))?;
    let identity = ProductIdentity::decode(&remark)?;
    let amount = order
        .amount
        .ok_or_else(|| ProviderError::decode(NAME, "paid order without amount"))?;
    let price: Decimal = Money::parse(&amount, CURRENCY)?.amount();
    let settlement = Settlement::new(order.orderno, identity, price, CURRENCY);
    Ok(NotifyResult::paid(order_id, settlement))
}

#[async_trait]
impl PaymentProvider for GcProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let payload = json!({
            "orderdate": chrono::Local::now().format("%Y%m%d%H%M%S").to_string(),
            "orderno": req.payment_name,
            "amount": money.to_compact_string(),
            "payerid": req.payer_id,
            "payername": req.payer_name,
            "xmpch": self.config.xmpch,
            "return_url": req.return_url,
            "notify_url": req.notify_url,
            "remark1": req.identity().encode()?,
        });

        let created: OrderCreated = self.call("OrderCreate", payload).await?;
        info!("Created GC order");

        let mut attach_info = BTreeMap::new();
        if let Some(jylsh) = created.jylsh {
            attach_info.insert("jylsh".to_string(), jylsh);
        }
        Ok(PayResp {
            pay_url: created.payurl,
            order_id: req.payment_name.clone(),
            attach_info,
        })
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        let order: OrderState = if req.is_push() {
            let envelope: ResponseEnvelope =
                serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
            let order: OrderState = self.open(&envelope)?;
            ensure_same_order(NAME, &req.order_id, &order.orderno)?;
            order
        } else {
            self.call(
                "OrderQuery",
                json!({ "xmpch": self.config.xmpch, "orderno": req.order_id }),
            )
            .await?
        };
        map_order(&req.order_id, order)
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name))]
    async fn get_invoice(&self, req: &InvoiceRequest) -> Result<String, ProviderError> {
        let payload = json!({
            "xmpch": self.config.xmpch,
            "orderno": req.payment_name,
            "payername": req.person_name,
            "payerid": req.person_id_card,
            "email": req.person_email,
            "phone": req.person_phone,
            "invoicetype": req.invoice_type,
            "invoicetitle": req.invoice_title,
            "taxid": req.invoice_tax_id,
        });
        let issued: InvoiceIssued = self.call("InvoiceEBillByOrder", payload).await?;
        info!("Issued GC e-bill");
        Ok(issued.url)
    }
}
