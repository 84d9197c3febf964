//! # Checkout Providers
//!
//! Gateway adapters (implementations of the `PaymentProvider` port) and the
//! registry that builds them from a generic credential bundle.
//!
//! ## Architecture
//!
//! - `providers/` - One adapter per gateway, each owning its typed config
//! - `registry` - `ProviderKind`, `Credentials`, `build_provider` and the `Provider` enum
//! - `http` - Shared `reqwest` plumbing with timeouts and error mapping
//! - `token` - Cached short-lived bearer tokens
//! - `security` - Request signing and webhook verification helpers

pub mod http;
pub mod providers;
pub mod registry;
pub mod security;
pub mod token;

pub use registry::{Credentials, Provider, ProviderKind, RunMode, build_provider};
