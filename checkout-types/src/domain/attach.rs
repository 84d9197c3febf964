//! Attach-string codec.
//!
//! Some gateways only carry one opaque string through a checkout (WeChat's
//! `attach`, PayPal's `custom_id`, GC's `remark1`). The product identity is
//! packed into that string and unpacked on the way back.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Reserved separator between the three identity fields.
pub const ATTACH_SEPARATOR: char = '|';

/// The three identity strings every settled payment must carry back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub product_name: String,
    pub product_display_name: String,
    pub provider_name: String,
}

impl ProductIdentity {
    pub fn new(
        product_name: impl Into<String>,
        product_display_name: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            product_display_name: product_display_name.into(),
            provider_name: provider_name.into(),
        }
    }

    /// Joins the fields with [`ATTACH_SEPARATOR`].
    ///
    /// A field containing the separator would not decode back to itself, so
    /// it is rejected here instead.
    pub fn encode(&self) -> Result<String, CodecError> {
        for (field, value) in [
            ("product_name", &self.product_name),
            ("product_display_name", &self.product_display_name),
            ("provider_name", &self.provider_name),
        ] {
            if value.contains(ATTACH_SEPARATOR) {
                return Err(CodecError::AttachSeparator {
                    field,
                    separator: ATTACH_SEPARATOR,
                });
            }
        }

        Ok([
            self.product_name.as_str(),
            self.product_display_name.as_str(),
            self.provider_name.as_str(),
        ]
        .join(&ATTACH_SEPARATOR.to_string()))
    }

    /// Splits an attach string. Anything other than exactly three tokens is
    /// an error.
    pub fn decode(attach: &str) -> Result<Self, CodecError> {
        let tokens: Vec<&str> = attach.split(ATTACH_SEPARATOR).collect();
        match tokens.as_slice() {
            [product_name, product_display_name, provider_name] => Ok(Self::new(
                *product_name,
                *product_display_name,
                *provider_name,
            )),
            _ => Err(CodecError::AttachTokenCount(tokens.len())),
        }
    }
}
