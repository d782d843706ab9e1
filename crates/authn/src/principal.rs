//! Authenticated principals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a principal's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalSource {
    /// A session token issued by this service.
    Local,
    /// A token issued by the external identity provider.
    External,
}

/// The outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Subject the token was issued to.
    pub subject: String,
    /// Token id (`jti`). Always set for local sessions.
    pub token_id: Option<String>,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Which verifier accepted the token.
    pub source: PrincipalSource,
    /// Provider session id (`sid`), external tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Principal {
    /// Returns `true` if the identity came from the external provider.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.source == PrincipalSource::External
    }

    /// Remaining validity at `now`, or `None` once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}
