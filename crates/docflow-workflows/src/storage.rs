//! Workflow snapshots and their on-disk store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docflow_common::{list_json_stems, load_json, remove_json, save_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::WorkflowState;
use crate::pipeline::Pipeline;
use crate::queue::TaskQueueManager;
use crate::registry::ProjectSession;
use crate::state::WorkflowStateMachine;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable copy of a project session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSnapshot {
    /// Format version
    pub version: u32,
    /// Workflow identifier
    pub workflow_id: String,
    /// Project key
    pub project_key: String,
    /// Step state
    pub state: WorkflowState,
    /// Queue state, including retired queue ids
    pub queues: TaskQueueManager,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    /// Capture a session
    pub fn capture(session: &ProjectSession) -> Self {
        WorkflowSnapshot {
            version: SNAPSHOT_VERSION,
            workflow_id: session.workflow_id.clone(),
            project_key: session.project_key.clone(),
            state: session.machine.state().clone(),
            queues: session.queues.clone(),
            created_at: session.created_at,
            taken_at: Utc::now(),
        }
    }

    /// Rebuild a session, validating the snapshot against `pipeline`
    pub fn into_session(self, pipeline: Arc<Pipeline>) -> WorkflowResult<ProjectSession> {
        if self.version != SNAPSHOT_VERSION {
            return Err(WorkflowError::StateError(format!(
                "Unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        validate_workflow_id(&self.workflow_id)?;
        if self.state.project_key != self.project_key
            || self.queues.project_key() != self.project_key
        {
            return Err(WorkflowError::StateError(format!(
                "Snapshot {} mixes project keys",
                self.workflow_id
            )));
        }

        Ok(ProjectSession {
            workflow_id: self.workflow_id,
            project_key: self.project_key,
            machine: WorkflowStateMachine::from_state(pipeline, self.state)?,
            queues: self.queues,
            created_at: self.created_at,
        })
    }
}

/// Directory of JSON snapshots, one file per workflow
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SnapshotStore { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the snapshot of `workflow_id`
    pub fn path_for(&self, workflow_id: &str) -> WorkflowResult<PathBuf> {
        validate_workflow_id(workflow_id)?;
        Ok(self.dir.join(format!("{}.json", workflow_id)))
    }

    /// Write a snapshot atomically
    pub fn save(&self, snapshot: &WorkflowSnapshot) -> WorkflowResult<PathBuf> {
        let path = self.path_for(&snapshot.workflow_id)?;
        save_json_atomic(&path, snapshot)?;

        info!(
            workflow_id = %snapshot.workflow_id,
            path = %path.display(),
            "Workflow snapshot saved"
        );
        Ok(path)
    }

    /// Read a snapshot
    pub fn load(&self, workflow_id: &str) -> WorkflowResult<WorkflowSnapshot> {
        let path = self.path_for(workflow_id)?;
        let snapshot: WorkflowSnapshot = load_json(&path)?;
        debug!(workflow_id = %workflow_id, path = %path.display(), "Workflow snapshot loaded");
        Ok(snapshot)
    }

    /// Whether a snapshot exists
    pub fn exists(&self, workflow_id: &str) -> bool {
        self.path_for(workflow_id)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Delete a snapshot; missing files are not an error
    pub fn delete(&self, workflow_id: &str) -> WorkflowResult<()> {
        let path = self.path_for(workflow_id)?;
        if remove_json(&path)? {
            info!(workflow_id = %workflow_id, "Workflow snapshot deleted");
        }
        Ok(())
    }

    /// Workflow ids with a stored snapshot
    pub fn list(&self) -> WorkflowResult<Vec<String>> {
        Ok(list_json_stems(&self.dir)?)
    }
}

fn validate_workflow_id(workflow_id: &str) -> WorkflowResult<()> {
    let valid = !workflow_id.is_empty()
        && workflow_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(WorkflowError::StateError(format!(
            "Invalid workflow id: {:?}",
            workflow_id
        )));
    }
    Ok(())
}
