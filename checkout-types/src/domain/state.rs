use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Canonical lifecycle state of one checkout attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentState {
    #[default]
    Created,
    Paid,
    Canceled,
    Timeout,
    Error,
}

impl PaymentState {
    /// Everything except `Created` is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created)
    }

    /// A terminal state may only be reported again, never replaced.
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        !self.is_terminal() || *self == next
    }
}

impl AsRef<str> for PaymentState {
    fn as_ref(&self) -> &str {
        match self {
            Self::Created => "Created",
            Self::Paid => "Paid",
            Self::Canceled => "Canceled",
            Self::Timeout => "Timeout",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Paid" => Ok(Self::Paid),
            "Canceled" => Ok(Self::Canceled),
            "Timeout" => Ok(Self::Timeout),
            "Error" => Ok(Self::Error),
            other => Err(format!("unknown payment state: {other}")),
        }
    }
}
