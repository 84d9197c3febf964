//! Port traits (interfaces for adapters).
//!
//! These are the contracts that gateway adapters must implement.
//! Callers depend on these traits, not concrete implementations.

mod provider;

pub use provider::PaymentProvider;
