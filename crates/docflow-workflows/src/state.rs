//! Per-project step state machine

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{
    SavedArtifact, StepArtifact, StepFailure, StepId, StepStatus, WorkflowState,
};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressTracker, StepProgress};

/// Tracks step statuses of one project under the pipeline's dependency gates
///
/// Transitions per step:
/// - `NotStarted | Completed | Saved | Failed` to `Running` via [`start_step`](Self::start_step)
/// - `Running` to `Completed` or `Failed`
/// - `Completed` to `Saved` once the caller has persisted the artifact
///
/// Every rejected transition leaves the state untouched.
#[derive(Debug, Clone)]
pub struct WorkflowStateMachine {
    pipeline: Arc<Pipeline>,
    state: WorkflowState,
}

impl WorkflowStateMachine {
    /// Create a fresh state machine for a project
    pub fn new(pipeline: Arc<Pipeline>, project_key: impl Into<String>) -> Self {
        let state = WorkflowState::new(project_key, pipeline.step_ids());
        WorkflowStateMachine { pipeline, state }
    }

    /// Rebuild from a previously captured state
    pub fn from_state(pipeline: Arc<Pipeline>, state: WorkflowState) -> WorkflowResult<Self> {
        Self::validate_state(&pipeline, &state)?;
        Ok(WorkflowStateMachine { pipeline, state })
    }

    /// Current state
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Pipeline the state is gated by
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Status of a declared step
    pub fn status(&self, step_id: StepId) -> WorkflowResult<StepStatus> {
        self.state
            .status(step_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Step not found: {}", step_id)))
    }

    /// Mark a step as running
    pub fn start_step(&mut self, step_id: StepId) -> WorkflowResult<()> {
        let status = self.status(step_id)?;

        let missing = self.pipeline.unmet_dependencies(step_id, &self.state)?;
        if !missing.is_empty() {
            warn!(
                project = %self.state.project_key,
                step = step_id,
                ?missing,
                "Step blocked by unfinished predecessors"
            );
            return Err(WorkflowError::DependencyNotMet {
                step: step_id,
                missing,
            });
        }

        if status == StepStatus::Running {
            return Err(WorkflowError::AlreadyRunning(step_id));
        }

        let now = Utc::now();
        self.state.step_statuses.insert(step_id, StepStatus::Running);
        self.state.step_started_at.insert(step_id, now);
        self.state.updated_at = now;

        info!(
            project = %self.state.project_key,
            step = step_id,
            previous = ?status,
            "Step started"
        );
        Ok(())
    }

    /// Mark a running step as completed and store its artifact
    pub fn complete_step(&mut self, step_id: StepId, result: StepArtifact) -> WorkflowResult<()> {
        self.require_status(step_id, StepStatus::Running, "complete")?;

        self.state.step_statuses.insert(step_id, StepStatus::Completed);
        self.state.step_results.insert(step_id, result);
        self.state.saved_artifacts.remove(&step_id);
        self.state.current_step_index = self.state.current_step_index.max(step_id);
        self.state.updated_at = Utc::now();

        info!(
            project = %self.state.project_key,
            step = step_id,
            current_step_index = self.state.current_step_index,
            "Step completed"
        );
        Ok(())
    }

    /// Mark a running step as failed
    ///
    /// Artifacts from earlier runs stay in place; the step can be started
    /// again explicitly.
    pub fn fail_step(&mut self, step_id: StepId, message: impl Into<String>) -> WorkflowResult<()> {
        self.require_status(step_id, StepStatus::Running, "fail")?;

        let now = Utc::now();
        let message = message.into();
        self.state.step_statuses.insert(step_id, StepStatus::Failed);
        self.state.last_error = Some(StepFailure {
            step_id,
            message: message.clone(),
            failed_at: now,
        });
        self.state.updated_at = now;

        warn!(
            project = %self.state.project_key,
            step = step_id,
            error = %message,
            "Step failed"
        );
        Ok(())
    }

    /// Record that a completed step's artifact was persisted
    pub fn mark_step_saved(
        &mut self,
        step_id: StepId,
        location: impl Into<String>,
    ) -> WorkflowResult<()> {
        let status = self.status(step_id)?;
        if !status.is_done() {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot mark step {} saved from {:?}",
                step_id, status
            )));
        }

        let now = Utc::now();
        let location = location.into();
        self.state.step_statuses.insert(step_id, StepStatus::Saved);
        self.state.saved_artifacts.insert(
            step_id,
            SavedArtifact {
                location: location.clone(),
                saved_at: now,
            },
        );
        self.state.updated_at = now;

        debug!(
            project = %self.state.project_key,
            step = step_id,
            location = %location,
            "Step artifact saved"
        );
        Ok(())
    }

    /// Fail unless `step_id` is running
    ///
    /// Reports unmet predecessors first so callers can tell an out-of-order
    /// request from a step that merely was not started.
    pub fn ensure_running(&self, step_id: StepId) -> WorkflowResult<()> {
        let status = self.status(step_id)?;
        if status == StepStatus::Running {
            return Ok(());
        }

        let missing = self.pipeline.unmet_dependencies(step_id, &self.state)?;
        if !missing.is_empty() {
            return Err(WorkflowError::DependencyNotMet {
                step: step_id,
                missing,
            });
        }

        Err(WorkflowError::InvalidTransition(format!(
            "step {} is {:?}, not running",
            step_id, status
        )))
    }

    /// Step progress snapshot
    pub fn get_progress(&self) -> StepProgress {
        ProgressTracker::step_progress(&self.pipeline, &self.state)
    }

    /// Every declared step is completed or saved
    pub fn is_complete(&self) -> bool {
        self.state.step_statuses.values().all(|s| s.is_done())
    }

    /// Steps that may start now
    pub fn ready_steps(&self) -> Vec<StepId> {
        self.pipeline.ready_steps(&self.state)
    }

    /// Discard all progress, keeping the project key
    pub fn reset(&mut self) {
        self.state = WorkflowState::new(self.state.project_key.clone(), self.pipeline.step_ids());
    }

    fn require_status(
        &self,
        step_id: StepId,
        expected: StepStatus,
        action: &str,
    ) -> WorkflowResult<()> {
        let status = self.status(step_id)?;
        if status != expected {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot {} step {} in {:?} status",
                action, step_id, status
            )));
        }
        Ok(())
    }

    /// Validate state integrity against the pipeline
    pub fn validate_state(pipeline: &Pipeline, state: &WorkflowState) -> WorkflowResult<()> {
        if state.project_key.is_empty() {
            return Err(WorkflowError::StateError(
                "Project key cannot be empty".to_string(),
            ));
        }

        for id in pipeline.step_ids() {
            if !state.step_statuses.contains_key(&id) {
                return Err(WorkflowError::StateError(format!(
                    "Declared step {} has no status",
                    id
                )));
            }
        }

        for id in state.step_statuses.keys() {
            if pipeline.step(*id).is_none() {
                return Err(WorkflowError::StateError(format!(
                    "State references undeclared step {}",
                    id
                )));
            }
        }

        for (id, status) in &state.step_statuses {
            if status.is_done() && !state.step_results.contains_key(id) {
                return Err(WorkflowError::StateError(format!(
                    "Completed step {} has no result",
                    id
                )));
            }
        }

        Ok(())
    }
}
