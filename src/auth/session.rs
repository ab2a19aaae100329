//! Session and token types

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Token payload returned by the auth service on login, register and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
}

/// Identity record attached to a session. Display-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
}

/// The process-wide authenticated state.
///
/// Empty (all fields `None`) when anonymous. The access token is attached to
/// outbound calls; the refresh token is used solely to obtain a new pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute instant the access token becomes invalid, epoch milliseconds.
    pub expires_at: Option<u64>,
    pub user: Option<User>,
}

impl Session {
    /// Build a session from a fresh token grant, computing the absolute
    /// expiry from the grant's relative lifetime.
    pub fn from_grant(grant: &TokenGrant, user: Option<User>) -> Self {
        Self {
            access_token: Some(grant.access_token.clone()),
            refresh_token: Some(grant.refresh_token.clone()),
            expires_at: Some(now_millis() + grant.expires_in * 1000),
            user,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Whether the access token is already past its expiry.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => now_millis() >= exp,
            None => false,
        }
    }

    /// Whether the access token expires within the given lead time. True for
    /// already-expired tokens; false when no expiry is recorded.
    pub fn expires_within(&self, lead: Duration) -> bool {
        match self.expires_at {
            Some(exp) => now_millis() + lead.as_millis() as u64 >= exp,
            None => false,
        }
    }

    /// Milliseconds until expiry, zero if already past.
    pub fn millis_until_expiry(&self) -> Option<u64> {
        self.expires_at.map(|exp| exp.saturating_sub(now_millis()))
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
