//! Domain models for the checkout engine.

pub mod attach;
pub mod metadata;
pub mod money;
pub mod state;

pub use attach::{ATTACH_SEPARATOR, ProductIdentity};
pub use metadata::PaymentMetadata;
pub use money::{Money, minor_unit_exponent};
pub use state::PaymentState;
