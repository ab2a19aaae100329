//! Authentication module for the EventBook platform
//!
//! Defines the session/token types, the auth service gateway and the
//! error kinds the session lifecycle is built on.

pub mod gateway;
pub mod session;

pub use gateway::{AuthGateway, HttpAuthGateway};
pub use session::{Session, TokenGrant, User};

/// Error kinds of the auth core.
///
/// `Clone` because a refresh outcome is shared between every caller that
/// attached to the in-flight operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// Login or register rejected by the auth service. Surfaced directly to
    /// the user; never ends an existing session.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The access token failed verification.
    #[error("access token rejected by auth service")]
    TokenInvalid,

    /// Refresh rejected or failed en route. Terminal for the current
    /// session: the user has to log in again.
    #[error("session expired, please log in again: {0}")]
    RefreshFailed(String),

    /// Auth service unreachable within the bounded timeout.
    #[error("auth service unreachable: {0}")]
    NetworkTimeout(String),
}
