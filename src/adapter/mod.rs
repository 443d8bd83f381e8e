pub mod cdp_adapter;
pub mod dap_adapter;

pub use cdp_adapter::CdpAdapter;
pub use dap_adapter::DapAdapter;

use crate::config::{LaunchConfig, SourceBreakpointRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::warn;

const STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// A location the debuggee is paused at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLocation {
    pub file: String,
    pub line: i64,
    pub column: Option<i64>,
    pub name: Option<String>,
}

/// Outcome of any operation that causes (or observes) a pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResult {
    pub reason: String,
    pub thread_id: Option<i64>,
    pub location: Option<StopLocation>,
    pub terminated: bool,
}

impl StopResult {
    pub fn terminated() -> Self {
        Self {
            reason: "terminated".to_string(),
            thread_id: None,
            location: None,
            terminated: true,
        }
    }

    fn entry() -> Self {
        Self {
            reason: "entry".to_string(),
            thread_id: None,
            location: None,
            terminated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrameInfo {
    pub id: i64,
    pub name: String,
    pub file: Option<String>,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointResult {
    pub line: i64,
    pub verified: bool,
    pub id: Option<String>,
    pub message: Option<String>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

type StopListener = Arc<dyn Fn(StopResult) + Send + Sync>;

/// Implements the stop-synchronization protocol: a listener must be
/// registered before the resume command that will trigger it is written to
/// the wire, or the pause event can arrive and be discarded unobserved.
///
/// Distinct from the persistent `on_stopped` subscriber list: `arm`/`wait`
/// model a single in-flight "the next pause resolves this one future"
/// exchange, while `listeners` are notified of every pause for as long as
/// they're registered (used by the session manager to track `stopped_*`).
#[derive(Default)]
pub struct StopSync {
    pending: Mutex<Option<oneshot::Sender<StopResult>>>,
    listeners: RwLock<Vec<StopListener>>,
    initial_pause_consumed: AtomicBool,
}

impl StopSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next-pause waiter. Must be called before writing the
    /// resume/step command.
    pub async fn arm(&self) -> oneshot::Receiver<StopResult> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            warn!("StopSync: arming over an already-armed listener; only one step/continue may be in flight");
        }
        *pending = Some(tx);
        rx
    }

    /// Called from the adapter's persistent protocol event handler
    /// (`stopped` / `Debugger.paused`) with the decoded stop result.
    /// Resolves the armed waiter, if any, and notifies every persistent
    /// listener.
    pub async fn fire(&self, result: StopResult) {
        if let Some(tx) = self.pending.lock().await.take() {
            let _ = tx.send(result.clone());
        }
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener(result.clone());
        }
    }

    /// Wait for the armed listener to resolve, a child-process exit, or the
    /// 30s timeout. `exit_rx` is consumed at most once and should fire a
    /// terminated stop result when the debuggee process exits.
    pub async fn wait(
        &self,
        rx: oneshot::Receiver<StopResult>,
        exit_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<StopResult> {
        let timeout = tokio::time::sleep(STOP_TIMEOUT);
        tokio::pin!(timeout);

        if let Some(exit_rx) = exit_rx {
            tokio::select! {
                result = rx => result.map_err(|_| Error::ConnectionClosed),
                _ = exit_rx => Ok(StopResult::terminated()),
                _ = &mut timeout => Err(Error::Timeout("waiting for debugger to stop".to_string())),
            }
        } else {
            tokio::select! {
                result = rx => result.map_err(|_| Error::ConnectionClosed),
                _ = &mut timeout => Err(Error::Timeout("waiting for debugger to stop".to_string())),
            }
        }
    }

    pub async fn add_listener<F>(&self, listener: F)
    where
        F: Fn(StopResult) + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Arc::new(listener));
    }

    /// Idempotent: the first call waits for `rx` (armed during `start`);
    /// every later call returns a sentinel "entry" result without touching
    /// the wire.
    pub async fn wait_for_initial_pause(&self, rx: oneshot::Receiver<StopResult>) -> Result<StopResult> {
        if self.initial_pause_consumed.swap(true, Ordering::SeqCst) {
            return Ok(StopResult::entry());
        }
        self.wait(rx, None).await
    }
}

/// The uniform operation set every adapter (DAP or CDP) exposes.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn start(&self, config: &LaunchConfig) -> Result<()>;
    async fn wait_for_initial_pause(&self) -> Result<StopResult>;
    async fn set_breakpoints(
        &self,
        file: &str,
        breakpoints: Vec<SourceBreakpointRequest>,
    ) -> Result<Vec<BreakpointResult>>;
    async fn continue_execution(&self, thread_id: Option<i64>) -> Result<StopResult>;
    async fn step_over(&self, thread_id: Option<i64>) -> Result<StopResult>;
    async fn step_in(&self, thread_id: Option<i64>) -> Result<StopResult>;
    async fn step_out(&self, thread_id: Option<i64>) -> Result<StopResult>;
    async fn get_call_stack(&self, thread_id: Option<i64>) -> Result<Vec<StackFrameInfo>>;
    async fn get_variables(
        &self,
        frame_id: Option<i64>,
        scope: Option<String>,
        max_depth: Option<i64>,
    ) -> Result<Vec<VariableInfo>>;
    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<String>;
    async fn disconnect(&self) -> Result<()>;
    async fn on_stopped(&self, cb: Box<dyn Fn(StopResult) + Send + Sync>);
}

/// `type` → adapter-constructor registry consulted by the session manager.
/// Only the Python/debugpy and Node/CDP families are registered; anything
/// else is an `AdapterNotFound` error.
pub fn detect_family(program: Option<&str>, module: Option<&str>) -> Result<&'static str> {
    let path = program
        .or(module)
        .ok_or_else(|| Error::Configuration("program or module is required".to_string()))?;

    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match ext {
        "py" => Ok("python"),
        "js" | "ts" | "mjs" | "cjs" | "tsx" | "jsx" => Ok("node"),
        _ => Err(Error::UndetectableType(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_family_maps_known_extensions() {
        assert_eq!(detect_family(Some("/tmp/a.py"), None).unwrap(), "python");
        assert_eq!(detect_family(Some("/tmp/a.js"), None).unwrap(), "node");
        assert_eq!(detect_family(Some("/tmp/a.tsx"), None).unwrap(), "node");
    }

    #[test]
    fn detect_family_rejects_unknown_and_empty() {
        assert!(matches!(
            detect_family(Some("/tmp/a.txt"), None),
            Err(Error::UndetectableType(_))
        ));
        assert!(matches!(
            detect_family(Some("/tmp/a.rs"), None),
            Err(Error::UndetectableType(_))
        ));
        assert!(matches!(detect_family(None, None), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn stop_sync_wait_for_initial_pause_is_idempotent() {
        let sync = StopSync::new();
        let rx = sync.arm().await;
        sync.fire(StopResult {
            reason: "entry".to_string(),
            thread_id: Some(1),
            location: None,
            terminated: false,
        })
        .await;

        let first = sync.wait_for_initial_pause(rx).await.unwrap();
        assert_eq!(first.thread_id, Some(1));

        // Second call must not touch the wire again; it returns the sentinel.
        let (_tx, rx2) = oneshot::channel();
        let second = sync.wait_for_initial_pause(rx2).await.unwrap();
        assert_eq!(second.reason, "entry");
        assert!(second.thread_id.is_none());
    }

    #[tokio::test]
    async fn stop_sync_times_out_when_nothing_fires() {
        let sync = StopSync::new();
        let (_tx, rx) = oneshot::channel::<StopResult>();
        // Don't hold the process hostage for 30s in a unit test: race a
        // short local timeout against `wait`'s internal one by dropping
        // the sender immediately, which resolves the channel with an
        // error rather than exercising the real timeout path.
        drop(_tx);
        let result = sync.wait(rx, None).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn stop_sync_fire_notifies_persistent_listeners() {
        let sync = Arc::new(StopSync::new());
        let seen = Arc::new(Mutex::new(false));
        let seen2 = seen.clone();
        sync.add_listener(move |_| {
            let seen2 = seen2.clone();
            tokio::spawn(async move { *seen2.lock().await = true });
        })
        .await;

        sync.fire(StopResult {
            reason: "breakpoint".to_string(),
            thread_id: Some(1),
            location: None,
            terminated: false,
        })
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(*seen.lock().await);
    }
}
