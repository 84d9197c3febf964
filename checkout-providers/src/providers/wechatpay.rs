//! WeChat Pay API v3 adapter (platform public key mode).
//!
//! Reads from [`Credentials`]:
//! - `client_id`: merchant id (mchid)
//! - `client_id2`: app id
//! - `client_secret`: APIv3 key, 32 bytes
//! - `app_certificate`: merchant certificate serial number
//! - `app_private_key`: merchant private key, PEM
//! - `cert_public_key`: platform public key, PEM
//! - `client_secret2`: platform public key id; when set, webhooks must carry it
//!
//! Outbound requests are RSA-signed. Inbound notifications are verified
//! against the platform key first and only then decrypted with the APIv3 key.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use checkout_types::{
    Money, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentEnv, PaymentProvider,
    ProductIdentity, ProviderError, Settlement,
};
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{ensure_same_order, now_unix, required_header};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::registry::Credentials;
use crate::security;

const NAME: &str = "WeChat Pay";
const API_BASE: &str = "https://api.mch.weixin.qq.com";
/// `attach` is capped at 128 characters.
const ATTACH_LIMIT: usize = 128;
const AEAD_ALGORITHM: &str = "AEAD_AES_256_GCM";

#[derive(Clone)]
pub struct WeChatPayConfig {
    pub mch_id: String,
    pub app_id: String,
    pub api_v3_key: String,
    pub merchant_serial_no: String,
    pub merchant_key: RsaPrivateKey,
    pub platform_key: RsaPublicKey,
    pub platform_key_id: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for WeChatPayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeChatPayConfig")
            .field("mch_id", &self.mch_id)
            .field("app_id", &self.app_id)
            .field("merchant_serial_no", &self.merchant_serial_no)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl WeChatPayConfig {
    /// Parses the key material; malformed PEM or a wrong-sized APIv3 key is
    /// a configuration error.
    pub fn new(
        mch_id: impl Into<String>,
        app_id: impl Into<String>,
        api_v3_key: impl Into<String>,
        merchant_serial_no: impl Into<String>,
        merchant_key_pem: &str,
        platform_key_pem: &str,
    ) -> Result<Self, ProviderError> {
        let api_v3_key = api_v3_key.into();
        if api_v3_key.len() != 32 {
            return Err(ProviderError::Config(format!(
                "{NAME}: APIv3 key must be 32 bytes, got {}",
                api_v3_key.len()
            )));
        }
        let merchant_key = RsaPrivateKey::from_pkcs8_pem(merchant_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(merchant_key_pem))
            .map_err(|e| ProviderError::Config(format!("{NAME}: merchant private key: {e}")))?;
        let platform_key = RsaPublicKey::from_public_key_pem(platform_key_pem)
            .map_err(|e| ProviderError::Config(format!("{NAME}: platform public key: {e}")))?;

        Ok(Self {
            mch_id: mch_id.into(),
            app_id: app_id.into(),
            api_v3_key,
            merchant_serial_no: merchant_serial_no.into(),
            merchant_key,
            platform_key,
            platform_key_id: None,
            base_url: API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_platform_key_id(mut self, id: impl Into<String>) -> Self {
        self.platform_key_id = Some(id.into());
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
struct NativeResponse {
    code_url: String,
}

#[derive(Debug, Deserialize)]
struct JsapiResponse {
    prepay_id: String,
}

#[derive(Debug, Deserialize)]
struct NotifyEnvelope {
    #[serde(default)]
    event_type: String,
    resource: NotifyResource,
}

#[derive(Debug, Deserialize)]
struct NotifyResource {
    algorithm: String,
    ciphertext: String,
    nonce: String,
    #[serde(default)]
    associated_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    out_trade_no: String,
    trade_state: String,
    #[serde(default)]
    trade_state_desc: Option<String>,
    #[serde(default)]
    attach: Option<String>,
    #[serde(default)]
    amount: Option<TransactionAmount>,
}

#[derive(Debug, Deserialize)]
struct TransactionAmount {
    total: i64,
    #[serde(default)]
    currency: Option<String>,
}

pub struct WeChatPayProvider {
    config: WeChatPayConfig,
    api: ApiClient,
}

fn nonce_str() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

impl WeChatPayProvider {
    pub fn new(config: WeChatPayConfig) -> Result<Self, ProviderError> {
        let api = ApiClient::new(NAME, &config.base_url, config.timeout)?;
        Ok(Self { config, api })
    }

    pub fn from_credentials(creds: &Credentials) -> Result<Self, ProviderError> {
        let mut config = WeChatPayConfig::new(
            creds.require(NAME, "client_id", &creds.client_id)?,
            creds.require(NAME, "client_id2", &creds.client_id2)?,
            creds.require(NAME, "client_secret", &creds.client_secret)?,
            creds.require(NAME, "app_certificate", &creds.app_certificate)?,
            &creds.require(NAME, "app_private_key", &creds.app_private_key)?,
            &creds.require(NAME, "cert_public_key", &creds.cert_public_key)?,
        )?
        .with_base_url(creds.endpoint(API_BASE));
        config.platform_key_id = Credentials::optional(&creds.client_secret2);
        Self::new(config)
    }

    /// `Authorization` value for one request.
    fn authorization(&self, method: &Method, path: &str, body: &str) -> String {
        let timestamp = now_unix();
        let nonce = nonce_str();
        let message = format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body}\n");
        let signature = security::rsa_sign(&self.config.merchant_key, message.as_bytes());
        format!(
            r#"WECHATPAY2-SHA256-RSA2048 mchid="{}",nonce_str="{}",signature="{}",timestamp="{}",serial_no="{}""#,
            self.config.mch_id, nonce, signature, timestamp, self.config.merchant_serial_no
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProviderError> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let auth = self.authorization(&method, path, &body);
        let mut request = self
            .api
            .request(method, path)
            .header(AUTHORIZATION, auth)
            .header(ACCEPT, "application/json");
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }
        self.api.send_json(request).await
    }

    /// Parameters the WeChat in-app browser's JS bridge needs to open the
    /// wallet for a prepaid order.
    fn bridge_params(&self, prepay_id: &str) -> BTreeMap<String, String> {
        let time_stamp = now_unix().to_string();
        let nonce = nonce_str();
        let package = format!("prepay_id={prepay_id}");
        let message = format!(
            "{}\n{}\n{}\n{}\n",
            self.config.app_id, time_stamp, nonce, package
        );
        let pay_sign = security::rsa_sign(&self.config.merchant_key, message.as_bytes());

        BTreeMap::from([
            ("appId".to_string(), self.config.app_id.clone()),
            ("timeStamp".to_string(), time_stamp),
            ("nonceStr".to_string(), nonce),
            ("package".to_string(), package),
            ("signType".to_string(), "RSA".to_string()),
            ("paySign".to_string(), pay_sign),
        ])
    }

    /// Verifies then decrypts a notification. Nothing in the body is read
    /// before the signature checks out.
    fn open_notification(&self, req: &NotifyRequest) -> Result<Transaction, ProviderError> {
        let reject = |e: security::SignatureError| {
            warn!(error = %e, "Rejected WeChat Pay notification");
            ProviderError::verification(NAME, e)
        };

        let timestamp = required_header(req, NAME, "wechatpay-timestamp")?;
        let nonce = required_header(req, NAME, "wechatpay-nonce")?;
        let signature = required_header(req, NAME, "wechatpay-signature")?;
        if let Some(expected) = &self.config.platform_key_id {
            let serial = required_header(req, NAME, "wechatpay-serial")?;
            if serial != expected {
                return Err(ProviderError::verification(
                    NAME,
                    format!("unknown platform key {serial}"),
                ));
            }
        }
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| reject(security::SignatureError::Malformed("timestamp")))?;
        security::check_timestamp(ts, now_unix()).map_err(reject)?;

        let body = req.body_str().map_err(|e| ProviderError::verification(NAME, e))?;
        let message = format!("{timestamp}\n{nonce}\n{body}\n");
        security::rsa_verify(&self.config.platform_key, message.as_bytes(), signature)
            .map_err(reject)?;

        let envelope: NotifyEnvelope =
            serde_json::from_slice(&req.body).map_err(|e| ProviderError::decode(NAME, e))?;
        if envelope.resource.algorithm != AEAD_ALGORITHM {
            return Err(ProviderError::verification(
                NAME,
                format!("unsupported algorithm {}", envelope.resource.algorithm),
            ));
        }
        let plaintext = security::aes_gcm_open(
            self.config.api_v3_key.as_bytes(),
            &envelope.resource.nonce,
            envelope.resource.associated_data.as_deref().unwrap_or_default(),
            &envelope.resource.ciphertext,
        )
        .map_err(reject)?;
        info!(event_type = %envelope.event_type, "Verified WeChat Pay notification");

        let transaction: Transaction =
            serde_json::from_slice(&plaintext).map_err(|e| ProviderError::decode(NAME, e))?;
        ensure_same_order(NAME, &req.order_id, &transaction.out_trade_no)?;
        Ok(transaction)
    }
}

fn map_transaction(order_id: &str, tx: Transaction) -> Result<NotifyResult, ProviderError> {
    match tx.trade_state.as_str() {
        "SUCCESS" => {}
        "NOTPAY" | "USERPAYING" => return Ok(NotifyResult::created(order_id)),
        "CLOSED" | "REVOKED" => {
            return Ok(NotifyResult::canceled(order_id, format!("Trade {}", tx.trade_state)));
        }
        "REFUND" => return Ok(NotifyResult::canceled(order_id, "Trade refunded")),
        "PAYERROR" => {
            let reason = tx
                .trade_state_desc
                .unwrap_or_else(|| "payment failed".to_string());
            return Ok(NotifyResult::error(order_id, reason));
        }
        other => return Ok(NotifyResult::unexpected_status(order_id, other)),
    }

    let attach = tx
        .attach
        .ok_or_else(|| ProviderError::decode(NAME, "paid transaction without attach"))?;
    let identity = ProductIdentity::decode(&attach)?;
    let amount = tx
        .amount
        .ok_or_else(|| ProviderError::decode(NAME, "paid transaction without amount"))?;
    let currency = amount.currency.unwrap_or_else(|| "CNY".to_string());
    let price = Money::from_minor_units(amount.total, &currency)?;
    let settlement = Settlement::new(tx.out_trade_no, identity, price.amount(), price.currency());
    Ok(NotifyResult::paid(order_id, settlement))
}

#[async_trait]
impl PaymentProvider for WeChatPayProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip(self, req), fields(payment_name = %req.payment_name, env = ?req.payment_env))]
    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        let money = req.money()?;
        let attach = req.identity().encode()?;
        if attach.chars().count() > ATTACH_LIMIT {
            return Err(ProviderError::InvalidRequest(format!(
                "{NAME}: product identity exceeds {ATTACH_LIMIT} characters"
            )));
        }

        let mut body = json!({
            "appid": self.config.app_id,
            "mchid": self.config.mch_id,
            "description": req.product_display_name,
            "out_trade_no": req.payment_name,
            "attach": attach,
            "notify_url": req.notify_url,
            "amount": {
                "total": money.to_minor_units()?,
                "currency": money.currency(),
            },
        });

        let resp = match req.payment_env {
            PaymentEnv::WechatBrowser => {
                if req.payer_id.trim().is_empty() {
                    return Err(ProviderError::InvalidRequest(format!(
                        "{NAME}: in-wallet payment requires the payer openid"
                    )));
                }
                body["payer"] = json!({ "openid": req.payer_id });
                let prepay: JsapiResponse = self
                    .call(Method::POST, "/v3/pay/transactions/jsapi", Some(body))
                    .await?;
                PayResp {
                    pay_url: String::new(),
                    order_id: req.payment_name.clone(),
                    attach_info: self.bridge_params(&prepay.prepay_id),
                }
            }
            PaymentEnv::Default => {
                let native: NativeResponse = self
                    .call(Method::POST, "/v3/pay/transactions/native", Some(body))
                    .await?;
                PayResp {
                    pay_url: native.code_url,
                    order_id: req.payment_name.clone(),
                    ..Default::default()
                }
            }
        };
        info!("Created WeChat Pay order");
        Ok(resp)
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, push = req.is_push()))]
    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        let transaction = if req.is_push() {
            self.open_notification(req)?
        } else {
            let path = format!(
                "/v3/pay/transactions/out-trade-no/{}?mchid={}",
                req.order_id, self.config.mch_id
            );
            self.call(Method::GET, &path, None).await?
        };
        map_transaction(&req.order_id, transaction)
    }

    fn response_error(&self, err: Option<&ProviderError>) -> String {
        let reply = match err {
            None => json!({ "code": "SUCCESS", "message": "" }),
            Some(e) => json!({ "code": "FAIL", "message": e.to_string() }),
        };
        reply.to_string()
    }
}
