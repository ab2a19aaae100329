//! Authenticated HTTP client for platform services
//!
//! Wraps reqwest::Client with bearer-token injection and a single
//! refresh-and-retry on 401 responses.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Method, StatusCode};

use crate::session::SessionManager;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client scoped to one service base URL. Attaches the current access token
/// to every request; a 401 triggers one session refresh and one retry with
/// the new token, a second 401 is surfaced as a final failure.
pub struct ApiClient {
    http: reqwest::Client,
    session: SessionManager,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: SessionManager) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            session,
            base_url: base_url.into(),
        })
    }

    /// GET request to the service (bearer auth when logged in).
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.execute(Method::GET, path, None).await
    }

    /// POST request to the service (bearer auth when logged in).
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        self.execute(Method::POST, path, Some(body)).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let token = self.session.session().access_token;
        let resp = self.dispatch(&method, &url, body, token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_response(resp, &url).await;
        }

        // One refresh, one retry. A refresh failure propagates instead of
        // the original 401.
        tracing::debug!("401 from {}, refreshing session", url);
        let session = self
            .session
            .refresh()
            .await
            .context("session refresh after 401 failed")?;

        let retry = self
            .dispatch(&method, &url, body, session.access_token)
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            bail!("401 Unauthorized for {} after token refresh", url);
        }
        check_response(retry, &url).await
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>,
        token: Option<String>,
    ) -> Result<reqwest::Response> {
        let mut req = self.http.request(method.clone(), url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .with_context(|| format!("{method} {url} failed"))
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::auth::gateway::testing::{grant, ScriptedGateway};
    use crate::auth::session::now_millis;
    use crate::auth::Session;
    use crate::session::SessionConfig;
    use crate::store::SessionStore;

    /// Read a full HTTP/1.1 request (headers plus content-length body).
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let body_len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Canned-response HTTP stub. Serves one connection per queued
    /// response and reports each raw request through the channel.
    async fn spawn_stub(responses: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for canned in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                tx.send(read_request(&mut stream).await).unwrap();
                stream.write_all(canned.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), rx)
    }

    const UNAUTHORIZED: &str =
        "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const OK_EMPTY_LIST: &str =
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]";

    fn authed_manager(gateway: Arc<ScriptedGateway>) -> SessionManager {
        let store = SessionStore::in_memory();
        store.set(Session {
            access_token: Some("AT1".into()),
            refresh_token: Some("RT1".into()),
            expires_at: Some(now_millis() + 1_800_000),
            user: None,
        });
        SessionManager::new(gateway, store, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_request_carries_bearer_token() {
        let (base, mut requests) = spawn_stub(vec![OK_EMPTY_LIST]).await;
        let manager = authed_manager(Arc::new(ScriptedGateway::new()));
        let client = ApiClient::new(base, manager).unwrap();

        client.get("/events").await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("GET /events"));
        assert!(request.to_lowercase().contains("authorization: bearer at1"));
    }

    #[tokio::test]
    async fn test_anonymous_request_has_no_auth_header() {
        let (base, mut requests) = spawn_stub(vec![OK_EMPTY_LIST]).await;
        let manager = SessionManager::new(
            Arc::new(ScriptedGateway::new()),
            SessionStore::in_memory(),
            SessionConfig::default(),
        );
        let client = ApiClient::new(base, manager).unwrap();

        client.get("/events").await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(!request.to_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries_with_new_token() {
        let (base, mut requests) = spawn_stub(vec![UNAUTHORIZED, OK_EMPTY_LIST]).await;
        let gateway =
            Arc::new(ScriptedGateway::new().with_refresh(Ok(grant("AT2", "RT2", 1800))));
        let manager = authed_manager(gateway.clone());
        let client = ApiClient::new(base, manager.clone()).unwrap();

        let resp = client.get("/my-bookings").await.unwrap();
        assert!(resp.status().is_success());

        let first = requests.recv().await.unwrap();
        let second = requests.recv().await.unwrap();
        assert!(first.to_lowercase().contains("authorization: bearer at1"));
        assert!(second.to_lowercase().contains("authorization: bearer at2"));
        assert_eq!(gateway.refresh_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(manager.session().access_token.as_deref(), Some("AT2"));
        assert_eq!(manager.session().refresh_token.as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn test_second_401_is_final_failure() {
        let (base, _requests) = spawn_stub(vec![UNAUTHORIZED, UNAUTHORIZED]).await;
        let gateway =
            Arc::new(ScriptedGateway::new().with_refresh(Ok(grant("AT2", "RT2", 1800))));
        let manager = authed_manager(gateway.clone());
        let client = ApiClient::new(base, manager).unwrap();

        let err = client.get("/my-bookings").await.unwrap_err();

        assert!(err.to_string().contains("after token refresh"));
        assert_eq!(
            gateway.refresh_calls.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "no second refresh after the retry"
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates_instead_of_the_401() {
        let (base, _requests) = spawn_stub(vec![UNAUTHORIZED]).await;
        let gateway = Arc::new(ScriptedGateway::new()); // refresh not scripted: it fails
        let manager = authed_manager(gateway);
        let client = ApiClient::new(base, manager.clone()).unwrap();

        let err = client.get("/my-bookings").await.unwrap_err();

        assert!(err.to_string().contains("session refresh after 401 failed"));
        // Refresh failure closed the session.
        assert!(!manager.session().is_authenticated());
    }

    #[tokio::test]
    async fn test_non_401_error_is_reported_with_status() {
        let (base, _requests) = spawn_stub(vec![
            "HTTP/1.1 400 Bad Request\r\ncontent-length: 26\r\nconnection: close\r\n\r\nNot enough seats available",
        ])
        .await;
        let manager = authed_manager(Arc::new(ScriptedGateway::new()));
        let client = ApiClient::new(base, manager).unwrap();

        let err = client.get("/events").await.unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("HTTP 400"));
        assert!(msg.contains("Not enough seats available"));
    }
}
