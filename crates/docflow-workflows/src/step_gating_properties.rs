//! Property-based tests for step gating
//! A step starts only when every predecessor is completed or saved, completes
//! only from running, and a rejected transition never mutates state

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::WorkflowError;
    use crate::models::{StepArtifact, StepStatus, WorkflowState};
    use crate::pipeline::Pipeline;
    use crate::state::WorkflowStateMachine;
    use proptest::prelude::*;

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::NotStarted),
            Just(StepStatus::Running),
            Just(StepStatus::Completed),
            Just(StepStatus::Failed),
            Just(StepStatus::Saved),
        ]
    }

    fn artifact() -> StepArtifact {
        StepArtifact::Opaque {
            version: 1,
            payload: serde_json::json!({"ok": true}),
        }
    }

    fn machine_with(statuses: &[StepStatus]) -> WorkflowStateMachine {
        let pipeline = Arc::new(Pipeline::documentation_default());
        let mut state = WorkflowState::new("prop", pipeline.step_ids());
        for (i, status) in statuses.iter().enumerate() {
            let id = i as u32 + 1;
            state.step_statuses.insert(id, *status);
            if status.is_done() {
                state.step_results.insert(id, artifact());
            }
        }
        WorkflowStateMachine::from_state(pipeline, state).unwrap()
    }

    proptest! {
        #[test]
        fn prop_start_gated_by_predecessor(
            statuses in prop::collection::vec(arb_status(), 5),
            step in 1u32..=5,
        ) {
            let mut machine = machine_with(&statuses);
            let before = machine.state().clone();
            let own = statuses[step as usize - 1];
            let predecessor_done = step == 1 || statuses[step as usize - 2].is_done();

            let result = machine.start_step(step);

            if !predecessor_done {
                let is_dependency_error = matches!(result, Err(WorkflowError::DependencyNotMet { .. }));
                prop_assert!(is_dependency_error);
                prop_assert_eq!(machine.state(), &before);
            } else if own == StepStatus::Running {
                let is_running_error = matches!(result, Err(WorkflowError::AlreadyRunning(_)));
                prop_assert!(is_running_error);
                prop_assert_eq!(machine.state(), &before);
            } else {
                prop_assert!(result.is_ok());
                prop_assert_eq!(machine.status(step).unwrap(), StepStatus::Running);
            }
        }

        #[test]
        fn prop_complete_only_from_running(
            statuses in prop::collection::vec(arb_status(), 5),
            step in 1u32..=5,
        ) {
            let mut machine = machine_with(&statuses);
            let before = machine.state().clone();
            let own = statuses[step as usize - 1];

            let result = machine.complete_step(step, artifact());

            if own == StepStatus::Running {
                prop_assert!(result.is_ok());
                prop_assert_eq!(machine.status(step).unwrap(), StepStatus::Completed);
                prop_assert!(machine.state().current_step_index >= before.current_step_index);
                prop_assert!(machine.state().current_step_index >= step);
            } else {
                let is_transition_error = matches!(result, Err(WorkflowError::InvalidTransition(_)));
                prop_assert!(is_transition_error);
                prop_assert_eq!(machine.state(), &before);
            }
        }

        #[test]
        fn prop_progress_matches_done_steps(statuses in prop::collection::vec(arb_status(), 5)) {
            let machine = machine_with(&statuses);
            let done = statuses.iter().filter(|s| s.is_done()).count();

            let progress = machine.get_progress();

            prop_assert_eq!(progress.completed, done);
            prop_assert_eq!(progress.is_complete, done == 5);
            prop_assert_eq!(progress.percentage, (done as u32) * 20);
        }
    }
}
