use debug_orchestrator::{Error, Phase, PhaseRegistry};

#[tokio::test]
async fn fresh_session_starts_in_planning_and_allows_read_only_tools() {
    let registry = PhaseRegistry::new();
    let state = registry.get_or_create("wf-1").await;
    assert_eq!(state.current_phase, Phase::Planning);
    assert!(registry.is_tool_allowed("wf-1", "read").await);
    assert!(!registry.is_tool_allowed("wf-1", "edit").await);
}

#[tokio::test]
async fn a_full_loop_around_the_ring_advances_the_step_counter_once() {
    let registry = PhaseRegistry::new();
    registry.transition("wf-1", Phase::Coding, None).await.unwrap();
    registry.transition("wf-1", Phase::Breakpointing, None).await.unwrap();
    registry.transition("wf-1", Phase::Debugging, None).await.unwrap();
    registry.transition("wf-1", Phase::Explaining, None).await.unwrap();
    let state = registry
        .transition("wf-1", Phase::Confirming, Some("ready to loop".to_string()))
        .await
        .unwrap();
    assert_eq!(state.current_step, 0);

    let state = registry.transition("wf-1", Phase::Planning, None).await.unwrap();
    assert_eq!(state.current_step, 1);
    assert_eq!(state.current_phase, Phase::Planning);
}

#[tokio::test]
async fn skipping_ahead_in_the_ring_is_rejected() {
    let registry = PhaseRegistry::new();
    registry.transition("wf-1", Phase::Coding, None).await.unwrap();

    let err = registry
        .transition("wf-1", Phase::Debugging, None)
        .await
        .unwrap_err();
    match err {
        Error::PhaseTransition(msg) => {
            assert_eq!(msg, "Cannot transition from CODING to DEBUGGING. Valid transitions: BREAKPOINTING");
        }
        other => panic!("expected PhaseTransition, got {other:?}"),
    }

    // The rejected attempt must not have moved the phase.
    let state = registry.get("wf-1").await.unwrap();
    assert_eq!(state.current_phase, Phase::Coding);
}

#[tokio::test]
async fn debugging_tools_are_only_allowed_in_the_debugging_phase() {
    let registry = PhaseRegistry::new();
    assert!(!registry.is_tool_allowed("wf-1", "continue").await);

    registry.transition("wf-1", Phase::Coding, None).await.unwrap();
    registry.transition("wf-1", Phase::Breakpointing, None).await.unwrap();
    registry.transition("wf-1", Phase::Debugging, None).await.unwrap();
    assert!(registry.is_tool_allowed("wf-1", "continue").await);
    assert!(registry.is_tool_allowed("wf-1", "evaluate").await);

    registry.transition("wf-1", Phase::Explaining, None).await.unwrap();
    assert!(!registry.is_tool_allowed("wf-1", "continue").await);
}

#[tokio::test]
async fn clearing_a_session_resets_it_to_a_fresh_planning_state() {
    let registry = PhaseRegistry::new();
    registry.transition("wf-1", Phase::Coding, None).await.unwrap();
    registry.clear("wf-1").await;

    let state = registry.get_or_create("wf-1").await;
    assert_eq!(state.current_phase, Phase::Planning);
    assert_eq!(state.current_step, 0);
}

#[tokio::test]
async fn independent_sessions_do_not_share_phase_state() {
    let registry = PhaseRegistry::new();
    registry.transition("a", Phase::Coding, None).await.unwrap();

    let state_b = registry.get_or_create("b").await;
    assert_eq!(state_b.current_phase, Phase::Planning);

    let state_a = registry.get("a").await.unwrap();
    assert_eq!(state_a.current_phase, Phase::Coding);
}
