//! Typed payment metadata.
//!
//! Gateways with a native metadata field get this record serialized into a
//! flat string map. It is decoded back on reconciliation, and a settled
//! payment without its identity fields is a reconciliation error.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::attach::ProductIdentity;
use crate::error::CodecError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    /// Compact decimal string, e.g. `"10.5"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl PaymentMetadata {
    /// Flattens into the string map most gateway APIs accept.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        [
            ("payment_name", &self.payment_name),
            ("product_name", &self.product_name),
            ("product_display_name", &self.product_display_name),
            ("provider_name", &self.provider_name),
            ("price", &self.price),
            ("currency", &self.currency),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| (k.to_string(), v.clone())))
        .collect()
    }

    /// Reads the record back from a gateway's JSON metadata object.
    ///
    /// Unknown keys are ignored; a missing or non-object value yields an
    /// empty record, which `require_*` then rejects.
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn require_payment_name(&self) -> Result<&str, CodecError> {
        self.payment_name
            .as_deref()
            .ok_or(CodecError::MissingMetadata("payment_name"))
    }

    /// Returns the product identity, failing on the first absent field.
    pub fn require_identity(&self) -> Result<ProductIdentity, CodecError> {
        let product_name = self
            .product_name
            .as_deref()
            .ok_or(CodecError::MissingMetadata("product_name"))?;
        let product_display_name = self
            .product_display_name
            .as_deref()
            .ok_or(CodecError::MissingMetadata("product_display_name"))?;
        let provider_name = self
            .provider_name
            .as_deref()
            .ok_or(CodecError::MissingMetadata("provider_name"))?;
        Ok(ProductIdentity::new(
            product_name,
            product_display_name,
            provider_name,
        ))
    }

    /// Price and currency as recorded at checkout time.
    pub fn require_price(&self) -> Result<(Decimal, String), CodecError> {
        let price = self
            .price
            .as_deref()
            .ok_or(CodecError::MissingMetadata("price"))?;
        let currency = self
            .currency
            .as_deref()
            .ok_or(CodecError::MissingMetadata("currency"))?;
        let price = price
            .parse::<Decimal>()
            .map_err(|e| CodecError::InvalidPrice(format!("{price}: {e}")))?;
        Ok((price, currency.to_string()))
    }

    /// Encodes the record as an opaque URL-safe token.
    ///
    /// Internal settlement providers use this as their order id so that a
    /// later lookup needs no local storage.
    pub fn to_token(&self) -> Result<String, CodecError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CodecError::InvalidOrderToken(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn from_token(token: &str) -> Result<Self, CodecError> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| CodecError::InvalidOrderToken(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| CodecError::InvalidOrderToken(e.to_string()))
    }
}
