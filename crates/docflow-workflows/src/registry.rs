//! Per-project session store

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult};
use crate::pipeline::Pipeline;
use crate::queue::TaskQueueManager;
use crate::state::WorkflowStateMachine;

/// Everything the engine keeps for one project
#[derive(Debug, Clone)]
pub struct ProjectSession {
    /// Workflow identifier handed to callers
    pub workflow_id: String,
    /// Project key the session was created for
    pub project_key: String,
    /// Step state
    pub machine: WorkflowStateMachine,
    /// Task queue of the current step invocation
    pub queues: TaskQueueManager,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ProjectSession {
    /// Fresh session with a new workflow id
    pub fn new(project_key: impl Into<String>, pipeline: Arc<Pipeline>) -> Self {
        let project_key = project_key.into();
        ProjectSession {
            workflow_id: Uuid::new_v4().to_string(),
            machine: WorkflowStateMachine::new(pipeline, project_key.clone()),
            queues: TaskQueueManager::new(project_key.clone()),
            project_key,
            created_at: Utc::now(),
        }
    }

    /// Discard step state and the current queue together
    pub fn reset(&mut self) {
        self.machine.reset();
        self.queues.discard();
        info!(
            workflow_id = %self.workflow_id,
            project = %self.project_key,
            "Workflow reset"
        );
    }
}

/// Shared, lockable session
pub type SessionHandle = Arc<Mutex<ProjectSession>>;

/// Store of project sessions keyed by workflow id and project key
///
/// Implementations must never hold an internal lock while a caller holds a
/// session lock, so operations on different projects proceed independently.
pub trait ProjectRegistry: Send + Sync {
    /// Session for `project_key`, created on first use
    fn get_or_create(&self, project_key: &str, pipeline: &Arc<Pipeline>) -> SessionHandle;

    /// Session by workflow id
    fn get(&self, workflow_id: &str) -> WorkflowResult<SessionHandle>;

    /// Session by project key
    fn find_by_project(&self, project_key: &str) -> Option<SessionHandle>;

    /// Insert a restored session, replacing any session of the same project
    fn insert(&self, session: ProjectSession) -> SessionHandle;

    /// Drop a session
    fn remove(&self, workflow_id: &str) -> Option<SessionHandle>;

    /// All workflow ids
    fn workflow_ids(&self) -> Vec<String>;

    /// Number of sessions
    fn len(&self) -> usize;

    /// No sessions
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded in-memory registry
///
/// Lock order is always `by_project` before `sessions`.
#[derive(Default)]
pub struct InMemoryProjectRegistry {
    by_project: DashMap<String, String>,
    sessions: DashMap<String, SessionHandle>,
}

impl InMemoryProjectRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectRegistry for InMemoryProjectRegistry {
    fn get_or_create(&self, project_key: &str, pipeline: &Arc<Pipeline>) -> SessionHandle {
        let mut entry = self
            .by_project
            .entry(project_key.to_string())
            .or_insert_with(String::new);

        if let Some(handle) = self.sessions.get(entry.value()) {
            return handle.value().clone();
        }

        let session = ProjectSession::new(project_key, pipeline.clone());
        let workflow_id = session.workflow_id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(workflow_id.clone(), handle.clone());
        *entry.value_mut() = workflow_id.clone();

        info!(project = %project_key, workflow_id = %workflow_id, "Workflow created");
        handle
    }

    fn get(&self, workflow_id: &str) -> WorkflowResult<SessionHandle> {
        self.sessions
            .get(workflow_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| WorkflowError::NotFound(format!("Workflow not found: {}", workflow_id)))
    }

    fn find_by_project(&self, project_key: &str) -> Option<SessionHandle> {
        let workflow_id = self.by_project.get(project_key)?;
        self.sessions.get(workflow_id.value()).map(|h| h.value().clone())
    }

    fn insert(&self, session: ProjectSession) -> SessionHandle {
        let project_key = session.project_key.clone();
        let workflow_id = session.workflow_id.clone();
        let handle = Arc::new(Mutex::new(session));

        let mut entry = self
            .by_project
            .entry(project_key.clone())
            .or_insert_with(String::new);
        if !entry.value().is_empty() && *entry.value() != workflow_id {
            self.sessions.remove(entry.value());
        }
        self.sessions.insert(workflow_id.clone(), handle.clone());
        *entry.value_mut() = workflow_id.clone();

        debug!(project = %project_key, workflow_id = %workflow_id, "Workflow inserted");
        handle
    }

    fn remove(&self, workflow_id: &str) -> Option<SessionHandle> {
        let (_, handle) = self.sessions.remove(workflow_id)?;
        // Session lock may be held by the caller
        self.by_project.retain(|_, id| id.as_str() != workflow_id);

        debug!(workflow_id = %workflow_id, "Workflow removed");
        Some(handle)
    }

    fn workflow_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
