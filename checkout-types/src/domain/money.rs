//! Decimal price with an ISO 4217 currency code, and its unit conversions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Minor-unit exponent every conversion in this crate assumes.
const SUPPORTED_EXPONENT: u32 = 2;

/// Returns the ISO 4217 minor-unit exponent for currencies known to differ
/// from 2. Everything else is reported as 2.
///
/// This is only used to refuse conversions that would be mis-scaled; it is
/// not a general exponent table.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        "CLF" | "UYW" => 4,
        _ => SUPPORTED_EXPONENT,
    }
}

/// A checkout price in major units (e.g. `10.50`) with its currency code.
///
/// The amount is held as a `Decimal`, so no floating-point rounding can creep
/// in between the caller and the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: String,
}

impl Money {
    /// Creates a new Money value. The currency code is upper-cased.
    pub fn new(amount: Decimal, currency: impl AsRef<str>) -> Result<Self, CodecError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CodecError::NegativePrice(amount.to_string()));
        }
        Ok(Self {
            amount,
            currency: currency.as_ref().trim().to_ascii_uppercase(),
        })
    }

    /// Parses a major-unit decimal string such as `"10.50"`.
    pub fn parse(amount: &str, currency: impl AsRef<str>) -> Result<Self, CodecError> {
        let amount = Decimal::from_str(amount.trim())
            .map_err(|e| CodecError::InvalidPrice(format!("{amount}: {e}")))?;
        Self::new(amount, currency)
    }

    /// Builds a value from an integer minor-unit amount (e.g. `1050` cents).
    pub fn from_minor_units(minor: i64, currency: impl AsRef<str>) -> Result<Self, CodecError> {
        let currency = currency.as_ref();
        check_exponent(currency)?;
        Self::new(Decimal::new(minor, SUPPORTED_EXPONENT), currency)
    }

    /// Returns the amount in major units.
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the upper-cased currency code.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Converts to integer minor units, rounding half away from zero at two
    /// decimals.
    pub fn to_minor_units(&self) -> Result<i64, CodecError> {
        check_exponent(&self.currency)?;
        (self.rounded() * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| CodecError::PriceOutOfRange(self.amount.to_string()))
    }

    /// Fixed two-decimal string, e.g. `"10.00"`.
    pub fn to_fixed_string(&self) -> Result<String, CodecError> {
        check_exponent(&self.currency)?;
        let mut rounded = self.rounded();
        rounded.rescale(SUPPORTED_EXPONENT);
        Ok(rounded.to_string())
    }

    /// Compact decimal string with trailing zeros and a dangling point
    /// removed: `10.00` becomes `"10"`, `10.50` becomes `"10.5"`.
    pub fn to_compact_string(&self) -> String {
        self.rounded().normalize().to_string()
    }

    fn rounded(&self) -> Decimal {
        self.amount
            .round_dp_with_strategy(SUPPORTED_EXPONENT, RoundingStrategy::MidpointAwayFromZero)
    }
}

fn check_exponent(currency: &str) -> Result<(), CodecError> {
    let exponent = minor_unit_exponent(currency);
    if exponent != SUPPORTED_EXPONENT {
        return Err(CodecError::UnsupportedCurrencyExponent {
            currency: currency.to_ascii_uppercase(),
            exponent,
        });
    }
    Ok(())
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_compact_string(), self.currency)
    }
}
