//! Session lifecycle management
//!
//! Owns the session state machine: login/register populate the store,
//! a watchdog task keeps the access token alive (proactive refresh near
//! expiry, periodic verification, inactivity logout) and a single-flight
//! guard collapses concurrent refresh triggers into one gateway call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::{AuthError, AuthGateway, Session, User};
use crate::store::SessionStore;

/// Timer settings. Tests shrink these to drive the lifecycle quickly.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of the watchdog tick, and thus of the periodic liveness check.
    pub verify_interval: Duration,
    /// Refresh proactively once the token expires within this lead.
    pub refresh_lead: Duration,
    /// Log out after this long without an observed user interaction.
    pub inactivity_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_interval: Duration::from_secs(60),
            refresh_lead: Duration::from_secs(5 * 60),
            inactivity_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Observable lifecycle state.
///
/// ```text
///   Anonymous ──(login ok)──→ Authenticated ──(near expiry / 401 / verify fail)──→ Refreshing
///       ↑                          ↑  │                                               │
///       │                          │  └──(expiry passed, no refresh yet)→ Expired ────┤
///       └──(logout, inactivity,    └───────────────(refresh ok)──────────────────────┤
///           refresh failure)←─────────────────────(refresh failure)──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    Refreshing,
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::Expired => "expired",
        };
        f.write_str(s)
    }
}

type RefreshFlight = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

struct Inner {
    gateway: Arc<dyn AuthGateway>,
    store: SessionStore,
    config: SessionConfig,
    phase: Mutex<SessionState>,
    last_activity: Mutex<Instant>,
    last_error: Mutex<Option<AuthError>>,
    login_pending: AtomicBool,
    /// Bumped on every install/clear; a refresh result is discarded when the
    /// session changed underneath it.
    epoch: AtomicU64,
    refresh_flight: Mutex<Option<RefreshFlight>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn install_session(&self, session: Session) {
        let mut phase = self.phase.lock().unwrap();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.set(session);
        *phase = SessionState::Authenticated;
        *self.last_error.lock().unwrap() = None;
    }

    /// Install only if no logout or fresh login happened since `epoch` was
    /// observed; whoever changed the session in between wins.
    fn install_session_if_current(&self, session: Session, epoch: u64) -> bool {
        let mut phase = self.phase.lock().unwrap();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.set(session);
        *phase = SessionState::Authenticated;
        *self.last_error.lock().unwrap() = None;
        true
    }

    /// Clear everything: store, state, pending flight, timers. Idempotent.
    fn close_session(&self) {
        {
            let mut phase = self.phase.lock().unwrap();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *phase = SessionState::Anonymous;
            self.store.clear();
            self.refresh_flight.lock().unwrap().take();
        }
        if let Some(handle) = self.watchdog.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Handle to the process-wide session lifecycle. Cheap to clone; all clones
/// drive the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn AuthGateway>, store: SessionStore, config: SessionConfig) -> Self {
        let phase = if store.get().is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        };

        Self {
            inner: Arc::new(Inner {
                gateway,
                store,
                config,
                phase: Mutex::new(phase),
                last_activity: Mutex::new(Instant::now()),
                last_error: Mutex::new(None),
                login_pending: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                refresh_flight: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.store.get()
    }

    /// Observe session changes (login, refresh, logout).
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.store.subscribe()
    }

    pub fn state(&self) -> SessionState {
        let phase = *self.inner.phase.lock().unwrap();
        if phase == SessionState::Authenticated && self.inner.store.get().is_expired() {
            return SessionState::Expired;
        }
        phase
    }

    /// True while a login/register call or a refresh is outstanding.
    pub fn is_loading(&self) -> bool {
        self.inner.login_pending.load(Ordering::SeqCst)
            || self.inner.refresh_flight.lock().unwrap().is_some()
    }

    /// The most recent auth failure, cleared on the next successful
    /// login/refresh.
    pub fn last_error(&self) -> Option<AuthError> {
        self.inner.last_error.lock().unwrap().clone()
    }

    /// Authenticate against the auth service. On success the new session
    /// replaces any existing one; no prior logout is required. On failure
    /// the gateway error is returned unchanged and existing state is kept.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.inner.login_pending.store(true, Ordering::SeqCst);
        let result = self.inner.gateway.login(email, password).await;
        self.inner.login_pending.store(false, Ordering::SeqCst);

        match result {
            Ok(grant) => {
                let session = Session::from_grant(
                    &grant,
                    Some(User {
                        email: email.to_string(),
                    }),
                );
                self.inner.install_session(session.clone());
                self.record_activity();
                tracing::info!("logged in as {}", email);
                Ok(session)
            }
            Err(err) => {
                *self.inner.last_error.lock().unwrap() = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Create an account and start a session with the returned tokens.
    pub async fn register(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.inner.login_pending.store(true, Ordering::SeqCst);
        let result = self.inner.gateway.register(email, password).await;
        self.inner.login_pending.store(false, Ordering::SeqCst);

        match result {
            Ok(grant) => {
                let session = Session::from_grant(
                    &grant,
                    Some(User {
                        email: email.to_string(),
                    }),
                );
                self.inner.install_session(session.clone());
                self.record_activity();
                tracing::info!("registered as {}", email);
                Ok(session)
            }
            Err(err) => {
                *self.inner.last_error.lock().unwrap() = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Exchange the refresh token for a new token pair.
    ///
    /// Single-flight: at most one gateway refresh is in flight system-wide.
    /// Callers arriving while one is pending attach to it and observe the
    /// same outcome. On failure the session is closed and every waiter gets
    /// the refresh error.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let flight = {
            let mut slot = self.inner.refresh_flight.lock().unwrap();
            if let Some(flight) = slot.as_ref() {
                flight.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let flight: RefreshFlight = async move {
                    let result = run_refresh(&inner).await;
                    inner.refresh_flight.lock().unwrap().take();
                    result
                }
                .boxed()
                .shared();
                *slot = Some(flight.clone());
                flight
            }
        };
        flight.await
    }

    /// Liveness-check the current access token. A rejected token is
    /// recovered locally by refreshing; with no refresh token available the
    /// session is closed instead.
    pub async fn verify(&self) -> Result<(), AuthError> {
        let session = self.session();
        let Some(token) = session.access_token.clone() else {
            return Ok(());
        };

        match self.inner.gateway.verify(&token).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!("token verification failed: {err}");
                if session.refresh_token.is_some() {
                    self.refresh().await.map(|_| ())
                } else {
                    self.logout();
                    Err(err)
                }
            }
        }
    }

    /// End the session: clear the store, drop pending timers. Safe to call
    /// from any state, any number of times.
    pub fn logout(&self) {
        self.inner.close_session();
        tracing::info!("logged out");
    }

    /// Note a user interaction, deferring the inactivity logout.
    pub fn record_activity(&self) {
        *self.inner.last_activity.lock().unwrap() = Instant::now();
    }

    /// Spawn the watchdog: one periodic task handling inactivity logout,
    /// proactive refresh near expiry and token verification. No-op if
    /// already running. Cancelled by logout and on drop of the last handle.
    pub fn start(&self) {
        let mut slot = self.inner.watchdog.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.verify_interval;
        *slot = Some(tokio::spawn(watchdog_loop(weak, interval)));
    }

    /// One watchdog pass, in priority order: inactivity, expiry, liveness.
    async fn tick(&self) {
        let session = self.session();
        if !session.is_authenticated() {
            return;
        }

        let idle = self.inner.last_activity.lock().unwrap().elapsed();
        if idle >= self.inner.config.inactivity_timeout {
            tracing::info!("no activity for {:?}, logging out", idle);
            self.logout();
            return;
        }

        if session.expires_within(self.inner.config.refresh_lead) {
            // Covers the expired case too: an expired session refreshes
            // immediately instead of waiting for a request to fail.
            let _ = self.refresh().await;
            return;
        }

        // Verification failures are handled inside verify(); nothing to
        // surface from the periodic check itself.
        let _ = self.verify().await;
    }
}

async fn run_refresh(inner: &Arc<Inner>) -> Result<Session, AuthError> {
    let epoch = inner.epoch.load(Ordering::SeqCst);
    let current = inner.store.get();

    let Some(refresh_token) = current.refresh_token.clone() else {
        tracing::warn!("refresh requested with no refresh token, closing session");
        inner.close_session();
        let err = AuthError::RefreshFailed("no refresh token available".into());
        *inner.last_error.lock().unwrap() = Some(err.clone());
        return Err(err);
    };

    *inner.phase.lock().unwrap() = SessionState::Refreshing;
    tracing::info!("refreshing access token");

    match inner.gateway.refresh(&refresh_token).await {
        Ok(grant) => {
            let session = Session::from_grant(&grant, current.user);
            if inner.install_session_if_current(session.clone(), epoch) {
                tracing::info!("access token refreshed");
                Ok(session)
            } else {
                // A logout or fresh login won the race; its state stands.
                Err(AuthError::RefreshFailed(
                    "session changed during refresh".into(),
                ))
            }
        }
        Err(err) => {
            tracing::warn!("token refresh failed: {err}");
            inner.close_session();
            *inner.last_error.lock().unwrap() = Some(err.clone());
            Err(err)
        }
    }
}

async fn watchdog_loop(weak: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        SessionManager { inner }.tick().await;
    }
}
