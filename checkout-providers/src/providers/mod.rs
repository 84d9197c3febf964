//! One adapter per external gateway.

mod adyen;
mod airwallex;
mod fastspring;
mod gc;
mod internal;
mod lemonsqueezy;
mod paddle;
mod paypal;
mod polar;
mod stripe;
mod wechatpay;

pub use adyen::{AdyenConfig, AdyenProvider};
pub use airwallex::{AirwallexConfig, AirwallexProvider};
pub use fastspring::{FastSpringConfig, FastSpringProvider};
pub use gc::{GcConfig, GcProvider};
pub use internal::InternalProvider;
pub use lemonsqueezy::{LemonSqueezyConfig, LemonSqueezyProvider};
pub use paddle::{PaddleConfig, PaddleProvider};
pub use paypal::{PayPalConfig, PayPalProvider};
pub use polar::{PolarConfig, PolarProvider};
pub use stripe::{StripeConfig, StripeProvider};
pub use wechatpay::{WeChatPayConfig, WeChatPayProvider};

use checkout_types::{Money, NotifyRequest, ProviderError};

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Fetches a header the webhook must carry; its absence is a verification
/// failure.
pub(crate) fn required_header<'a>(
    req: &'a NotifyRequest,
    provider: &'static str,
    name: &'static str,
) -> Result<&'a str, ProviderError> {
    req.header(name)
        .ok_or_else(|| ProviderError::verification(provider, format!("missing {name} header")))
}

/// Webhook secret that push verification needs; absent means every push is
/// rejected.
pub(crate) fn webhook_secret<'a>(
    secret: &'a Option<String>,
    provider: &'static str,
) -> Result<&'a str, ProviderError> {
    secret.as_deref().ok_or_else(|| {
        ProviderError::verification(provider, "no webhook secret configured; push rejected")
    })
}

/// A verified webhook must describe the order being reconciled.
pub(crate) fn ensure_same_order(
    provider: &'static str,
    expected: &str,
    found: &str,
) -> Result<(), ProviderError> {
    if expected != found {
        return Err(ProviderError::InvalidRequest(format!(
            "{provider}: webhook is for {found}, not {expected}"
        )));
    }
    Ok(())
}

/// Major-unit amount as a JSON number, for gateways that reject decimal
/// strings.
pub(crate) fn json_amount(
    provider: &'static str,
    money: &Money,
) -> Result<serde_json::Value, ProviderError> {
    money
        .to_compact_string()
        .parse::<serde_json::Number>()
        .map(serde_json::Value::Number)
        .map_err(|e| ProviderError::decode(provider, e))
}
