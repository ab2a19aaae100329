//! Durable session storage
//!
//! Holds the current session in memory, mirrors it to a TOML file under the
//! user config directory and notifies observers on every change. The session
//! manager is the only writer; everything else reads snapshots or subscribes.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::auth::{Session, User};

/// On-disk layout: four string-valued entries, written together and cleared
/// together. The identity record is stored as a JSON string for TOML compat.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    token: Option<String>,
    refresh_token: Option<String>,
    /// Epoch millis as string.
    token_expiry: Option<String>,
    user: Option<String>,
}

impl PersistedSession {
    fn from_session(session: &Session) -> Self {
        Self {
            token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            token_expiry: session.expires_at.map(|e| e.to_string()),
            user: session
                .user
                .as_ref()
                .and_then(|u| serde_json::to_string(u).ok()),
        }
    }

    fn into_session(self) -> Session {
        Session {
            access_token: self.token,
            refresh_token: self.refresh_token,
            expires_at: self.token_expiry.and_then(|e| e.parse().ok()),
            user: self
                .user
                .as_deref()
                .and_then(|u| serde_json::from_str::<User>(u).ok()),
        }
    }
}

struct StoreInner {
    /// `None` for an in-memory store (tests).
    path: Option<PathBuf>,
    state: Mutex<Session>,
    tx: watch::Sender<Session>,
}

/// Process-wide session store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Open the store at the default location, rehydrating any persisted
    /// session into memory. No network access: a rehydrated token is handed
    /// back as-is and is only trusted once the session manager validates it.
    pub fn open() -> Result<Self> {
        Self::open_at(Self::default_path()?)
    }

    /// Open the store backed by the given file.
    pub fn open_at(path: PathBuf) -> Result<Self> {
        let session = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read session file")?;
            let persisted: PersistedSession =
                toml::from_str(&content).context("Failed to parse session file")?;
            persisted.into_session()
        } else {
            Session::default()
        };

        if session.is_authenticated() {
            tracing::debug!("rehydrated persisted session");
        }

        let (tx, _) = watch::channel(session.clone());
        Ok(Self {
            inner: Arc::new(StoreInner {
                path: Some(path),
                state: Mutex::new(session),
                tx,
            }),
        })
    }

    /// Store with no backing file. Used in tests.
    pub fn in_memory() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(StoreInner {
                path: None,
                state: Mutex::new(Session::default()),
                tx,
            }),
        }
    }

    fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "eventbook-cli", "eventbook-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("session.toml"))
    }

    /// Snapshot of the current session. Never partially written: the whole
    /// record is replaced under the lock.
    pub fn get(&self) -> Session {
        self.inner.state.lock().unwrap().clone()
    }

    /// Replace the whole session, persist it and notify observers.
    pub fn set(&self, session: Session) {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = session.clone();
            self.persist(&state);
        }
        self.inner.tx.send_replace(session);
    }

    /// Clear every field and remove the persisted entries.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            *state = Session::default();
            if let Some(path) = &self.inner.path {
                if path.exists() {
                    if let Err(e) = fs::remove_file(path) {
                        tracing::warn!("failed to remove session file: {e}");
                    }
                }
            }
        }
        self.inner.tx.send_replace(Session::default());
    }

    /// Observe session changes. The receiver yields the value current at
    /// subscription time, then every subsequent set/clear.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.tx.subscribe()
    }

    /// Write the session file with owner-only permissions (contains tokens).
    /// Persistence failures are logged, not fatal: memory stays the source
    /// of truth for the running process.
    fn persist(&self, session: &Session) {
        let Some(path) = &self.inner.path else {
            return;
        };

        let result = (|| -> Result<()> {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).context("Failed to create config directory")?;
            }
            let content = toml::to_string_pretty(&PersistedSession::from_session(session))
                .context("Failed to serialize session")?;
            fs::write(path, content).context("Failed to write session file")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o600);
                fs::set_permissions(path, perms).context("Failed to set session file permissions")?;
            }

            Ok(())
        })();

        if let Err(e) = result {
            tracing::warn!("session not persisted: {e:#}");
        }
    }
}
