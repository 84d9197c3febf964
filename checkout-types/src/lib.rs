//! # Checkout Types
//!
//! Domain types and the provider port trait for the checkout engine.
//! This crate has ZERO external IO dependencies - only data structures,
//! conversion rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the engine:
//! - `domain/` - Pure domain types (Money, PaymentState, ProductIdentity, PaymentMetadata)
//! - `ports/` - The `PaymentProvider` trait every gateway adapter implements
//! - `dto/` - Values crossing the adapter boundary (PayReq, PayResp, NotifyResult)
//! - `error/` - Codec and provider error types

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    ATTACH_SEPARATOR, Money, PaymentMetadata, PaymentState, ProductIdentity, minor_unit_exponent,
};
pub use dto::*;
pub use error::{CodecError, ProviderError};
pub use ports::PaymentProvider;
