//! Provider registry: builds the matching adapter from a provider type and
//! a generic credential bundle.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use checkout_types::{
    InvoiceRequest, NotifyRequest, NotifyResult, PayReq, PayResp, PaymentProvider, ProviderError,
};

use crate::providers::{
    AdyenProvider, AirwallexProvider, FastSpringProvider, GcProvider, InternalProvider,
    LemonSqueezyProvider, PaddleProvider, PayPalProvider, PolarProvider, StripeProvider,
    WeChatPayProvider,
};

/// Every gateway the registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Dummy,
    Balance,
    Stripe,
    PayPal,
    WeChatPay,
    Gc,
    Airwallex,
    Adyen,
    Paddle,
    LemonSqueezy,
    FastSpring,
    Polar,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 12] = [
        ProviderKind::Dummy,
        ProviderKind::Balance,
        ProviderKind::Stripe,
        ProviderKind::PayPal,
        ProviderKind::WeChatPay,
        ProviderKind::Gc,
        ProviderKind::Airwallex,
        ProviderKind::Adyen,
        ProviderKind::Paddle,
        ProviderKind::LemonSqueezy,
        ProviderKind::FastSpring,
        ProviderKind::Polar,
    ];
}

impl AsRef<str> for ProviderKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::Dummy => "Dummy",
            Self::Balance => "Balance",
            Self::Stripe => "Stripe",
            Self::PayPal => "PayPal",
            Self::WeChatPay => "WeChat Pay",
            Self::Gc => "GC",
            Self::Airwallex => "Airwallex",
            Self::Adyen => "Adyen",
            Self::Paddle => "Paddle",
            Self::LemonSqueezy => "Lemon Squeezy",
            Self::FastSpring => "FastSpring",
            Self::Polar => "Polar",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_ref().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProviderError::Config(format!("unknown provider type: {s}")))
    }
}

/// Sandbox or live endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Sandbox,
    Production,
}

impl FromStr for RunMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "test" | "dev" => Ok(RunMode::Sandbox),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(ProviderError::Config(format!(
                "invalid run mode: {other}. Use 'sandbox' or 'production'"
            ))),
        }
    }
}

/// Generic credential bundle. Each adapter documents which fields it reads.
#[derive(Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub client_id2: String,
    pub client_secret2: String,
    pub app_certificate: String,
    pub app_private_key: String,
    pub cert_public_key: String,
    pub host: String,
    pub webhook_secret: String,
    pub mode: RunMode,
    /// Replaces the gateway endpoint, e.g. to point at a local mock.
    pub base_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_id2", &self.client_id2)
            .field("host", &self.host)
            .field("mode", &self.mode)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Returns a trimmed credential or a configuration error naming it.
    pub(crate) fn require(
        &self,
        provider: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<String, ProviderError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ProviderError::Config(format!(
                "{provider}: missing required credential {field}"
            )));
        }
        Ok(value.to_string())
    }

    pub(crate) fn endpoint(&self, default: &str) -> String {
        self.base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    pub(crate) fn optional(value: &str) -> Option<String> {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }
}

/// One constructed adapter. Dispatches the port trait to the variant.
pub enum Provider {
    Internal(InternalProvider),
    Stripe(StripeProvider),
    PayPal(PayPalProvider),
    WeChatPay(WeChatPayProvider),
    Gc(GcProvider),
    Airwallex(AirwallexProvider),
    Adyen(AdyenProvider),
    Paddle(PaddleProvider),
    LemonSqueezy(LemonSqueezyProvider),
    FastSpring(FastSpringProvider),
    Polar(PolarProvider),
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Provider").field(&self.inner().name()).finish()
    }
}

/// Build the adapter for `kind`.
///
/// Credentials are validated and key material parsed here, so a bad store
/// id or unreadable certificate fails before any checkout is attempted.
///
/// # Examples
///
/// ```ignore
/// let creds = Credentials {
///     client_secret: "sk_test_...".into(),
///     webhook_secret: "whsec_...".into(),
///     ..Default::default()
/// };
/// let provider = build_provider(ProviderKind::Stripe, &creds)?;
/// let resp = provider.pay(&req).await?;
/// ```
pub fn build_provider(kind: ProviderKind, creds: &Credentials) -> Result<Provider, ProviderError> {
    let provider = match kind {
        ProviderKind::Dummy => Provider::Internal(InternalProvider::dummy()),
        ProviderKind::Balance => Provider::Internal(InternalProvider::balance()),
        ProviderKind::Stripe => Provider::Stripe(StripeProvider::from_credentials(creds)?),
        ProviderKind::PayPal => Provider::PayPal(PayPalProvider::from_credentials(creds)?),
        ProviderKind::WeChatPay => {
            Provider::WeChatPay(WeChatPayProvider::from_credentials(creds)?)
        }
        ProviderKind::Gc => Provider::Gc(GcProvider::from_credentials(creds)?),
        ProviderKind::Airwallex => {
            Provider::Airwallex(AirwallexProvider::from_credentials(creds)?)
        }
        ProviderKind::Adyen => Provider::Adyen(AdyenProvider::from_credentials(creds)?),
        ProviderKind::Paddle => Provider::Paddle(PaddleProvider::from_credentials(creds)?),
        ProviderKind::LemonSqueezy => {
            Provider::LemonSqueezy(LemonSqueezyProvider::from_credentials(creds)?)
        }
        ProviderKind::FastSpring => {
            Provider::FastSpring(FastSpringProvider::from_credentials(creds)?)
        }
        ProviderKind::Polar => Provider::Polar(PolarProvider::from_credentials(creds)?),
    };
    tracing::info!(provider = %kind, mode = ?creds.mode, "Built payment provider");
    Ok(provider)
}

impl Provider {
    fn inner(&self) -> &dyn PaymentProvider {
        match self {
            Provider::Internal(p) => p,
            Provider::Stripe(p) => p,
            Provider::PayPal(p) => p,
            Provider::WeChatPay(p) => p,
            Provider::Gc(p) => p,
            Provider::Airwallex(p) => p,
            Provider::Adyen(p) => p,
            Provider::Paddle(p) => p,
            Provider::LemonSqueezy(p) => p,
            Provider::FastSpring(p) => p,
            Provider::Polar(p) => p,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Implement PaymentProvider for Provider (delegation)
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PaymentProvider for Provider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    async fn pay(&self, req: &PayReq) -> Result<PayResp, ProviderError> {
        self.inner().pay(req).await
    }

    async fn notify(&self, req: &NotifyRequest) -> Result<NotifyResult, ProviderError> {
        self.inner().notify(req).await
    }

    async fn get_invoice(&self, req: &InvoiceRequest) -> Result<String, ProviderError> {
        self.inner().get_invoice(req).await
    }

    fn response_error(&self, err: Option<&ProviderError>) -> String {
        self.inner().response_error(err)
    }
}
