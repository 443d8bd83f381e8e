//! Debug-workflow phase machine (C11): a six-phase ring gating which
//! high-level operations are legal at any point during an interactive
//! session, backed by a `Copy`-able enum and a `HashMap`-keyed registry
//! of per-session state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A node in the interactive workflow's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Planning,
    Coding,
    Breakpointing,
    Debugging,
    Explaining,
    Confirming,
}

impl Phase {
    /// The ring has exactly one successor per phase.
    pub const fn successor(self) -> Phase {
        match self {
            Phase::Planning => Phase::Coding,
            Phase::Coding => Phase::Breakpointing,
            Phase::Breakpointing => Phase::Debugging,
            Phase::Debugging => Phase::Explaining,
            Phase::Explaining => Phase::Confirming,
            Phase::Confirming => Phase::Planning,
        }
    }

    /// Tool allowlist for this phase.
    /// `transition` is legal in every phase and is included in each row.
    pub fn allowed_tools(self) -> &'static [&'static str] {
        match self {
            Phase::Planning => &["read", "glob", "grep", "task", "transition"],
            Phase::Coding => &[
                "read",
                "glob",
                "grep",
                "edit",
                "write",
                "bash",
                "apply_patch",
                "transition",
            ],
            Phase::Breakpointing => &[
                "set_breakpoints",
                "remove_breakpoints",
                "list_breakpoints",
                "read",
                "transition",
            ],
            Phase::Debugging => &[
                "start_debug_session",
                "continue",
                "step_over",
                "step_into",
                "step_out",
                "get_variables",
                "get_call_stack",
                "evaluate",
                "list_breakpoints",
                "transition",
            ],
            Phase::Explaining => &["transition"],
            Phase::Confirming => &["stop_debug_session", "transition"],
        }
    }

    pub fn is_tool_allowed(self, tool_id: &str) -> bool {
        self.allowed_tools().contains(&tool_id)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Planning => "PLANNING",
            Phase::Coding => "CODING",
            Phase::Breakpointing => "BREAKPOINTING",
            Phase::Debugging => "DEBUGGING",
            Phase::Explaining => "EXPLAINING",
            Phase::Confirming => "CONFIRMING",
        };
        write!(f, "{name}")
    }
}

/// Per-session phase state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub session_id: String,
    pub current_phase: Phase,
    pub current_step: u64,
    pub total_steps: Option<u64>,
    pub step_descriptions: Vec<String>,
    pub auto_confirm: bool,
}

impl PhaseState {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            current_phase: Phase::Planning,
            current_step: 0,
            total_steps: None,
            step_descriptions: Vec::new(),
            auto_confirm: false,
        }
    }
}

/// Process-wide registry of phase states keyed by session id. Has no
/// GC: callers must call
/// `clear` when a session ends.
#[derive(Default)]
pub struct PhaseRegistry {
    states: RwLock<HashMap<String, PhaseState>>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing state for `session_id`, creating a fresh one
    /// (PLANNING, step 0) if none exists yet.
    pub async fn get_or_create(&self, session_id: &str) -> PhaseState {
        let mut states = self.states.write().await;
        states
            .entry(session_id.to_string())
            .or_insert_with(|| PhaseState::new(session_id.to_string()))
            .clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<PhaseState> {
        self.states.read().await.get(session_id).cloned()
    }

    /// The only transition legal from every phase: the ring's single
    /// successor edge. `current_step` advances exactly on the
    /// `CONFIRMING -> PLANNING` edge; every other edge preserves it.
    pub async fn transition(&self, session_id: &str, to: Phase, reason: Option<String>) -> Result<PhaseState> {
        let mut states = self.states.write().await;
        let state = states
            .entry(session_id.to_string())
            .or_insert_with(|| PhaseState::new(session_id.to_string()));

        let successor = state.current_phase.successor();
        if to != successor {
            return Err(Error::PhaseTransition(format!(
                "Cannot transition from {} to {to}. Valid transitions: {successor}",
                state.current_phase
            )));
        }

        if state.current_phase == Phase::Confirming && to == Phase::Planning {
            state.current_step += 1;
        }

        debug!(
            session_id,
            from = %state.current_phase,
            to = %to,
            reason = reason.as_deref().unwrap_or(""),
            "phase transition"
        );
        state.current_phase = to;
        Ok(state.clone())
    }

    pub async fn is_tool_allowed(&self, session_id: &str, tool_id: &str) -> bool {
        match self.states.read().await.get(session_id) {
            Some(state) => state.current_phase.is_tool_allowed(tool_id),
            // No phase state yet means the workflow hasn't started; a
            // fresh session starts in PLANNING.
            None => Phase::Planning.is_tool_allowed(tool_id),
        }
    }

    /// Must be called when a session ends; the registry has no GC.
    pub async fn clear(&self, session_id: &str) {
        if self.states.write().await.remove(session_id).is_some() {
            info!(session_id, "phase state cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_forms_a_ring() {
        assert_eq!(Phase::Planning.successor(), Phase::Coding);
        assert_eq!(Phase::Coding.successor(), Phase::Breakpointing);
        assert_eq!(Phase::Breakpointing.successor(), Phase::Debugging);
        assert_eq!(Phase::Debugging.successor(), Phase::Explaining);
        assert_eq!(Phase::Explaining.successor(), Phase::Confirming);
        assert_eq!(Phase::Confirming.successor(), Phase::Planning);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected_with_valid_successor_named() {
        let registry = PhaseRegistry::new();
        registry.get_or_create("s1").await;
        let err = registry
            .transition("s1", Phase::Debugging, None)
            .await
            .unwrap_err();
        match err {
            Error::PhaseTransition(msg) => {
                assert!(msg.contains("Cannot transition from CODING to DEBUGGING") || msg.contains("PLANNING"));
            }
            other => panic!("expected PhaseTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn s3_phase_gating_scenario() {
        let registry = PhaseRegistry::new();
        let state = registry.transition("s1", Phase::Coding, None).await.unwrap();
        assert_eq!(state.current_phase, Phase::Coding);
        assert_eq!(state.current_step, 0);

        let err = registry.transition("s1", Phase::Debugging, None).await.unwrap_err();
        assert!(matches!(err, Error::PhaseTransition(msg) if msg == "Cannot transition from CODING to DEBUGGING. Valid transitions: BREAKPOINTING"));
    }

    #[tokio::test]
    async fn current_step_increments_only_on_confirming_to_planning_edge() {
        let registry = PhaseRegistry::new();
        registry.transition("s1", Phase::Coding, None).await.unwrap();
        registry.transition("s1", Phase::Breakpointing, None).await.unwrap();
        registry.transition("s1", Phase::Debugging, None).await.unwrap();
        registry.transition("s1", Phase::Explaining, None).await.unwrap();
        let state = registry.transition("s1", Phase::Confirming, None).await.unwrap();
        assert_eq!(state.current_step, 0);

        let state = registry.transition("s1", Phase::Planning, None).await.unwrap();
        assert_eq!(state.current_step, 1);
    }

    #[tokio::test]
    async fn property_4_step_equals_completed_confirming_to_planning_edges() {
        let registry = PhaseRegistry::new();
        let sequence = [
            Phase::Coding,
            Phase::Breakpointing,
            Phase::Debugging,
            Phase::Explaining,
            Phase::Confirming,
            Phase::Planning,
        ];
        let mut completed_cycles = 0u64;
        for _ in 0..3 {
            for &phase in &sequence {
                let state = registry.transition("s1", phase, None).await.unwrap();
                if phase == Phase::Planning {
                    completed_cycles += 1;
                    assert_eq!(state.current_step, completed_cycles);
                }
            }
        }
    }

    #[test]
    fn tool_allowlists_match_the_authoritative_table() {
        assert!(Phase::Planning.is_tool_allowed("read"));
        assert!(!Phase::Planning.is_tool_allowed("edit"));
        assert!(Phase::Coding.is_tool_allowed("write"));
        assert!(Phase::Breakpointing.is_tool_allowed("set_breakpoints"));
        assert!(Phase::Debugging.is_tool_allowed("evaluate"));
        assert!(Phase::Explaining.is_tool_allowed("transition"));
        assert!(!Phase::Explaining.is_tool_allowed("read"));
        assert!(Phase::Confirming.is_tool_allowed("stop_debug_session"));
        // transition is legal in every phase.
        for phase in [
            Phase::Planning,
            Phase::Coding,
            Phase::Breakpointing,
            Phase::Debugging,
            Phase::Explaining,
            Phase::Confirming,
        ] {
            assert!(phase.is_tool_allowed("transition"));
        }
    }

    #[tokio::test]
    async fn clear_removes_session_and_is_idempotent() {
        let registry = PhaseRegistry::new();
        registry.get_or_create("s1").await;
        assert!(registry.get("s1").await.is_some());
        registry.clear("s1").await;
        assert!(registry.get("s1").await.is_none());
        // Calling again must not panic or error.
        registry.clear("s1").await;
    }

    #[tokio::test]
    async fn get_or_create_returns_existing_state_unmodified() {
        let registry = PhaseRegistry::new();
        registry.transition("s1", Phase::Coding, None).await.unwrap();
        let state = registry.get_or_create("s1").await;
        assert_eq!(state.current_phase, Phase::Coding);
    }
}
