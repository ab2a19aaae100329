//! Auth service gateway: login, register, verify and refresh calls

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::session::TokenGrant;
use super::AuthError;

/// Bound on every auth service call. A gateway that does not answer within
/// this window is reported as unreachable, never awaited indefinitely.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// The auth service operations the session core depends on.
///
/// Kept behind a trait so the session manager can be driven by a scripted
/// gateway in tests.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError>;
    async fn register(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError>;
    async fn verify(&self, access_token: &str) -> Result<(), AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;
}

/// HTTP implementation against the auth service's JSON API.
pub struct HttpAuthGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| AuthError::NetworkTimeout(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("auth POST {}", url);

        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::NetworkTimeout(format!("POST {url}: {e}")))
    }
}

/// Extract the error detail from a 4xx auth service response body, falling
/// back to the HTTP status line.
async fn error_detail(resp: reqwest::Response) -> String {
    let status = resp.status();
    let detail = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from));
    detail.unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .post("/login", json!({ "email": email, "password": password }))
            .await?;

        if !resp.status().is_success() {
            return Err(AuthError::InvalidCredentials(error_detail(resp).await));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::NetworkTimeout(format!("bad login response: {e}")))
    }

    async fn register(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .post("/register", json!({ "email": email, "password": password }))
            .await?;

        if !resp.status().is_success() {
            return Err(AuthError::InvalidCredentials(error_detail(resp).await));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::NetworkTimeout(format!("bad register response: {e}")))
    }

    async fn verify(&self, access_token: &str) -> Result<(), AuthError> {
        let resp = self.post("/verify", json!({ "token": access_token })).await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::TokenInvalid)
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .post("/refresh", json!({ "refresh_token": refresh_token }))
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::RefreshFailed(error_detail(resp).await));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("bad refresh response: {e}")))
    }
}

/// Scripted gateway for driving the session manager in tests.
#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{AuthError, AuthGateway, TokenGrant};

    pub fn grant(access: &str, refresh: &str, expires_in: u64) -> TokenGrant {
        TokenGrant {
            access_token: access.into(),
            refresh_token: refresh.into(),
            expires_in,
        }
    }

    /// Plays back queued results per operation and counts calls. An empty
    /// queue means the default outcome: `Ok` for verify, an error otherwise.
    #[derive(Default)]
    pub struct ScriptedGateway {
        login_results: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
        refresh_results: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
        verify_results: Mutex<VecDeque<Result<(), AuthError>>>,
        refresh_delay: Option<Duration>,
        pub login_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub verify_calls: AtomicUsize,
    }

    impl ScriptedGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_login(self, result: Result<TokenGrant, AuthError>) -> Self {
            self.login_results.lock().unwrap().push_back(result);
            self
        }

        pub fn with_refresh(self, result: Result<TokenGrant, AuthError>) -> Self {
            self.refresh_results.lock().unwrap().push_back(result);
            self
        }

        pub fn with_verify(self, result: Result<(), AuthError>) -> Self {
            self.verify_results.lock().unwrap().push_back(result);
            self
        }

        /// Hold each refresh call open for `delay`, so concurrent callers
        /// pile up on the in-flight operation.
        pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
            self.refresh_delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl AuthGateway for ScriptedGateway {
        async fn login(&self, email: &str, _password: &str) -> Result<TokenGrant, AuthError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            self.login_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::InvalidCredentials(format!("no login scripted for {email}"))))
        }

        async fn register(&self, email: &str, password: &str) -> Result<TokenGrant, AuthError> {
            self.login(email, password).await
        }

        async fn verify(&self, _access_token: &str) -> Result<(), AuthError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verify_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.refresh_delay {
                tokio::time::sleep(delay).await;
            }
            self.refresh_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AuthError::RefreshFailed("no refresh scripted".into())))
        }
    }
}
