//! High-level operation surface (C10): the caller-visible operation set,
//! mapped thinly onto the session manager and phase registry. One method
//! per named tool, deserializing/serializing at the boundary, exposed as
//! a plain async API rather than JSON-RPC dispatch.

use super::manager::SessionManager;
use super::state::ListedBreakpoint;
use crate::adapter::{BreakpointResult, StackFrameInfo, StopResult, VariableInfo};
use crate::config::{LaunchConfig, SourceBreakpointRequest};
use crate::phase::{Phase, PhaseRegistry, PhaseState};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Thin façade over `SessionManager` and `PhaseRegistry` implementing
/// the caller-visible operation names.
pub struct OperationSurface {
    manager: Arc<SessionManager>,
    phases: Arc<PhaseRegistry>,
}

impl OperationSurface {
    pub fn new(manager: Arc<SessionManager>, phases: Arc<PhaseRegistry>) -> Self {
        Self { manager, phases }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn phases(&self) -> &Arc<PhaseRegistry> {
        &self.phases
    }

    pub async fn start_debug_session(&self, config: LaunchConfig) -> Result<StartedSession> {
        let session = self.manager.create(config).await?;
        let stop = session.adapter.wait_for_initial_pause().await?;
        Ok(StartedSession {
            session_id: session.id.clone(),
            stopped_at: stop,
        })
    }

    /// Idempotent: disconnecting an already-stopped session is not
    /// an error. Also clears that session's phase state, since the two
    /// per-session registries are torn down together.
    pub async fn stop_debug_session(&self) -> Result<()> {
        if let Some(session_id) = self.manager.stop().await? {
            self.phases.clear(&session_id).await;
        }
        Ok(())
    }

    /// Merge the caller's list into the file's registry by
    /// line, send the merged list to the adapter, and store back the
    /// adapter-reported verified/id/corrected-line fields.
    pub async fn set_breakpoints(
        &self,
        file: &str,
        breakpoints: Vec<SourceBreakpointRequest>,
    ) -> Result<Vec<ListedBreakpoint>> {
        let session = self.manager.require_active().await?;
        let merged = session.merge_breakpoints(file, breakpoints).await;
        let adapter_requests = crate::session::state::Session::to_adapter_requests(&merged);

        let results: Vec<BreakpointResult> = session.adapter.set_breakpoints(file, adapter_requests).await?;
        let stored = session.apply_breakpoint_results(file, results).await;
        Ok(stored.iter().map(ListedBreakpoint::from).collect())
    }

    /// `lines: None` clears the file entirely (sends an
    /// empty list to the adapter); `Some(lines)` drops just those lines
    /// and re-sends the remainder.
    pub async fn remove_breakpoints(&self, file: &str, lines: Option<Vec<i64>>) -> Result<Vec<ListedBreakpoint>> {
        let session = self.manager.require_active().await?;
        let remaining = session.remove_breakpoints(file, lines.as_deref()).await;
        let adapter_requests = crate::session::state::Session::to_adapter_requests(&remaining);

        let results = session.adapter.set_breakpoints(file, adapter_requests).await?;
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let stored = session.apply_breakpoint_results(file, results).await;
        Ok(stored.iter().map(ListedBreakpoint::from).collect())
    }

    /// Across all files known to the session.
    pub async fn list_breakpoints(&self) -> Result<HashMap<String, Vec<ListedBreakpoint>>> {
        let session = self.manager.require_active().await?;
        Ok(session.list_breakpoints().await)
    }

    pub async fn continue_execution(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let session = self.manager.require_active().await?;
        session.mark_resumed().await;
        let result = session.adapter.continue_execution(thread_id).await?;
        Ok(result)
    }

    pub async fn step_over(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let session = self.manager.require_active().await?;
        session.mark_resumed().await;
        session.adapter.step_over(thread_id).await
    }

    pub async fn step_into(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let session = self.manager.require_active().await?;
        session.mark_resumed().await;
        session.adapter.step_in(thread_id).await
    }

    pub async fn step_out(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let session = self.manager.require_active().await?;
        session.mark_resumed().await;
        session.adapter.step_out(thread_id).await
    }

    pub async fn get_call_stack(&self, thread_id: Option<i64>) -> Result<Vec<StackFrameInfo>> {
        let session = self.manager.require_active().await?;
        session.adapter.get_call_stack(thread_id).await
    }

    pub async fn get_variables(
        &self,
        frame_id: Option<i64>,
        scope: Option<String>,
        max_depth: Option<i64>,
    ) -> Result<Vec<VariableInfo>> {
        let session = self.manager.require_active().await?;
        session.adapter.get_variables(frame_id, scope, max_depth).await
    }

    pub async fn evaluate_expression(&self, expression: &str, frame_id: Option<i64>) -> Result<String> {
        let session = self.manager.require_active().await?;
        session.adapter.evaluate(expression, frame_id).await
    }

    /// `session_id` identifies the caller's phase-workflow session —
    /// distinct from (and typically outliving) any particular debug
    /// session id, since phases like PLANNING/CODING apply before
    /// `start_debug_session` is ever called.
    pub async fn transition_phase(&self, session_id: &str, to: Phase, reason: Option<String>) -> Result<PhaseState> {
        self.phases.transition(session_id, to, reason).await
    }

    pub async fn is_tool_allowed(&self, session_id: &str, tool_id: &str) -> bool {
        self.phases.is_tool_allowed(session_id, tool_id).await
    }
}

/// Result of `start_debug_session`: the new session's id plus the
/// initial stop (entry pause or breakpoint, depending on the adapter).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StartedSession {
    pub session_id: String,
    pub stopped_at: StopResult,
}
