//! Session manager (C9): single-active-session lifecycle, narrowed
//! from a multi-session registry down to one active slot plus a
//! monotonic counter.

use super::state::Session;
use crate::adapter::{Adapter, CdpAdapter, DapAdapter};
use crate::config::LaunchConfig;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

fn build_adapter(kind: &str) -> Result<Arc<dyn Adapter>> {
    match kind {
        "python" => Ok(Arc::new(DapAdapter::new())),
        "node" => Ok(Arc::new(CdpAdapter::new())),
        other => Err(Error::AdapterNotFound(other.to_string())),
    }
}

/// Owns at most one active session at a time. Creating
/// a new session terminates any prior one.
pub struct SessionManager {
    active: RwLock<Option<Arc<Session>>>,
    counter: AtomicU64,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            counter: AtomicU64::new(0),
        }
    }

    /// Tears down any prior session, resolves the adapter
    /// type (explicit or auto-detected), builds and starts the new
    /// session, and installs the `on_stopped` listener that keeps
    /// `Session::stopped_*` in sync *before* `start` runs so the initial
    /// pause can never race past it.
    pub async fn create(&self, config: LaunchConfig) -> Result<Arc<Session>> {
        config.validate()?;

        // Step 1: any prior session is stopped first, errors swallowed.
        let _ = self.stop().await;

        // Step 2: resolve the adapter type.
        let kind = match &config.r#type {
            Some(t) if !t.is_empty() => t.clone(),
            _ => crate::adapter::detect_family(config.program.as_deref(), config.module.as_deref())?.to_string(),
        };

        // Step 3: instantiate via the type registry.
        let adapter = build_adapter(&kind)?;

        // Step 4: allocate the session id.
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("session-{n}");
        info!(session_id = %id, kind, "creating debug session");

        let session = Arc::new(Session::new(id.clone(), adapter.clone()));

        // Step 5: install the stopped-state listener before `start`, so
        // the entry-point pause (armed inside `start`) is always
        // observed by the session, not just by the caller awaiting
        // `wait_for_initial_pause`.
        let session_for_listener = session.clone();
        adapter
            .on_stopped(Box::new(move |result| {
                let session = session_for_listener.clone();
                if result.terminated {
                    tokio::spawn(async move { session.mark_resumed().await });
                } else {
                    let thread_id = result.thread_id;
                    let reason = result.reason.clone();
                    tokio::spawn(async move { session.mark_stopped(thread_id, Some(reason)).await });
                }
            }))
            .await;

        *self.active.write().await = Some(session.clone());

        // Step 6: start the adapter. On failure, roll the active slot
        // back so a half-started session never masquerades as active.
        if let Err(e) = adapter.start(&config).await {
            *self.active.write().await = None;
            return Err(e);
        }

        Ok(session)
    }

    /// Returns the active session, or `NoActiveSession` if there isn't one.
    pub async fn require_active(&self) -> Result<Arc<Session>> {
        self.active.read().await.clone().ok_or(Error::NoActiveSession)
    }

    /// Disconnects the adapter (errors swallowed), clears the
    /// active slot. Idempotent — returns the stopped session's id, if any.
    pub async fn stop(&self) -> Result<Option<String>> {
        let session = self.active.write().await.take();
        match session {
            Some(session) => {
                if let Err(e) = session.adapter.disconnect().await {
                    warn!(session_id = %session.id, "disconnect errored, ignoring: {e}");
                }
                Ok(Some(session.id.clone()))
            }
            None => Ok(None),
        }
    }

    /// In a single-active-session manager this is the
    /// same operation as `stop`.
    pub async fn stop_all(&self) -> Result<Option<String>> {
        self.stop().await
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|s| s.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(program: &str) -> LaunchConfig {
        LaunchConfig {
            program: Some(program.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn require_active_fails_with_no_session() {
        let manager = SessionManager::new();
        let err = manager.require_active().await.unwrap_err();
        assert!(matches!(err, Error::NoActiveSession));
    }

    #[tokio::test]
    async fn stop_is_idempotent_with_no_session() {
        let manager = SessionManager::new();
        assert!(manager.stop().await.unwrap().is_none());
        assert!(manager.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_unknown_adapter_type() {
        let manager = SessionManager::new();
        let mut config = config_for("/tmp/a.py");
        config.r#type = Some("ruby".to_string());
        let err = manager.create(config).await.unwrap_err();
        assert!(matches!(err, Error::AdapterNotFound(kind) if kind == "ruby"));
    }

    #[tokio::test]
    async fn create_rejects_undetectable_type() {
        let manager = SessionManager::new();
        let err = manager.create(config_for("/tmp/a.txt")).await.unwrap_err();
        assert!(matches!(err, Error::UndetectableType(_)));
    }

    #[tokio::test]
    async fn create_rejects_invalid_launch_config() {
        let manager = SessionManager::new();
        let err = manager.create(LaunchConfig::default()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn failed_start_rolls_back_the_active_slot() {
        let manager = SessionManager::new();
        // No real debugpy/node is guaranteed present in the test
        // environment, so `start()` fails one way or another (missing
        // prerequisite, spawn failure, or port/discovery timeout); in
        // every case the active slot must not be left pointing at a
        // half-started session.
        let _ = manager.create(config_for("/tmp/a.py")).await;
        let err = manager.require_active().await.unwrap_err();
        assert!(matches!(err, Error::NoActiveSession));
    }
}
