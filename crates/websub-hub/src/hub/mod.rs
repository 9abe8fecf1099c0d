//! WebSub protocol core: request validation and verification of intent.

pub mod validator;
pub mod verifier;

use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

pub use validator::{validate, ValidationError};
pub use verifier::{IntentVerifier, VerificationOutcome};

/// Requested subscription mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized result of validating one inbound subscription request.
///
/// Always fully populated and valid once produced by the validator;
/// invalid states never reach the verifier or the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub callback: Url,
    pub topic: Url,
    pub mode: Mode,
    /// Requested lease length; `None` means the hub default applies.
    pub lease_seconds: Option<u64>,
    pub secret: Option<String>,
    /// When validation began. Leases count from this instant.
    pub received_at: DateTime<Utc>,
}

/// Compute a lease expiry, saturating instead of overflowing for
/// absurdly large lease values.
pub fn lease_expiry(start: DateTime<Utc>, lease_seconds: u64) -> DateTime<Utc> {
    i64::try_from(lease_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
