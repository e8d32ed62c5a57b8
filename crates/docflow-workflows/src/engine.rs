//! Workflow engine facade

use std::path::PathBuf;
use std::sync::Arc;

use docflow_config::{BatchingConfig, EngineConfig, QueueConfig};
use tracing::{debug, info};

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{
    CompletionData, QueueOptions, StepArtifact, StepId, StepStatus, Task, WorkItem,
    WorkflowState,
};
use crate::pipeline::Pipeline;
use crate::progress::{ProgressTracker, WorkflowProgress};
use crate::queue::{NextTask, QueueSummary, TaskCompletion};
use crate::registry::{InMemoryProjectRegistry, ProjectRegistry, ProjectSession};
use crate::storage::{SnapshotStore, WorkflowSnapshot};
use crate::tokens::estimate_tokens_from_len;

/// Central coordinator for per-project workflows
///
/// Every operation locks only the session of the workflow it targets, so
/// callers working on different projects never wait on each other. Nothing
/// here blocks on I/O except [`persist`](Self::persist) and
/// [`resume`](Self::resume).
pub struct WorkflowEngine {
    pipeline: Arc<Pipeline>,
    registry: Arc<dyn ProjectRegistry>,
    batching: BatchingConfig,
    queue_defaults: QueueConfig,
    store: Option<SnapshotStore>,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(Pipeline::documentation_default())
    }
}

impl WorkflowEngine {
    /// Engine over `pipeline` with an in-memory registry and default limits
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_registry(pipeline, Arc::new(InMemoryProjectRegistry::new()))
    }

    /// Engine backed by a custom registry
    pub fn with_registry(pipeline: Pipeline, registry: Arc<dyn ProjectRegistry>) -> Self {
        WorkflowEngine {
            pipeline: Arc::new(pipeline),
            registry,
            batching: BatchingConfig::default(),
            queue_defaults: QueueConfig::default(),
            store: None,
        }
    }

    /// Engine built from validated configuration
    pub fn from_config(config: &EngineConfig) -> WorkflowResult<Self> {
        config.validate()?;

        let pipeline = match &config.pipeline {
            Some(steps) => Pipeline::from_config(steps)?,
            None => Pipeline::documentation_default(),
        };

        info!(
            steps = pipeline.len(),
            token_budget = config.batching.token_budget,
            max_items_per_batch = config.batching.max_items_per_batch,
            state_dir = %config.storage.state_dir.display(),
            "Workflow engine configured"
        );

        Ok(Self::new(pipeline)
            .with_batching(config.batching.clone())
            .with_queue_defaults(config.queue.clone())
            .with_store(SnapshotStore::new(config.storage.state_dir.clone())))
    }

    /// Replace the default batching limits
    pub fn with_batching(mut self, batching: BatchingConfig) -> Self {
        self.batching = batching;
        self
    }

    /// Replace the default queue options
    pub fn with_queue_defaults(mut self, queue: QueueConfig) -> Self {
        self.queue_defaults = queue;
        self
    }

    /// Attach a snapshot store
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Pipeline every workflow follows
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Default batching limits
    pub fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    /// Get or create the workflow of `project_key`
    pub fn create_workflow(&self, project_key: &str) -> WorkflowResult<String> {
        if project_key.trim().is_empty() {
            return Err(WorkflowError::ConfigurationError(
                "project key cannot be empty".to_string(),
            ));
        }

        let handle = self.registry.get_or_create(project_key, &self.pipeline);
        let workflow_id = handle.lock().workflow_id.clone();
        Ok(workflow_id)
    }

    /// Workflow id of a project, if one exists
    pub fn find_workflow(&self, project_key: &str) -> Option<String> {
        self.registry
            .find_by_project(project_key)
            .map(|h| h.lock().workflow_id.clone())
    }

    /// All known workflow ids
    pub fn workflow_ids(&self) -> Vec<String> {
        self.registry.workflow_ids()
    }

    /// Mark a step as running
    pub fn start_step(&self, workflow_id: &str, step_id: StepId) -> WorkflowResult<()> {
        self.with_session(workflow_id, |s| s.machine.start_step(step_id))
    }

    /// Mark a running step as completed
    pub fn complete_step(
        &self,
        workflow_id: &str,
        step_id: StepId,
        result: StepArtifact,
    ) -> WorkflowResult<()> {
        self.with_session(workflow_id, |s| s.machine.complete_step(step_id, result))
    }

    /// Complete a step only if it is still running
    ///
    /// Check and transition happen under one session lock; returns whether
    /// the step was completed by this call.
    pub fn complete_step_if_running(
        &self,
        workflow_id: &str,
        step_id: StepId,
        result: StepArtifact,
    ) -> WorkflowResult<bool> {
        self.with_session(workflow_id, |s| {
            if s.machine.status(step_id)? != StepStatus::Running {
                return Ok(false);
            }
            s.machine.complete_step(step_id, result)?;
            Ok(true)
        })
    }

    /// Mark a running step as failed
    pub fn fail_step(
        &self,
        workflow_id: &str,
        step_id: StepId,
        message: impl Into<String>,
    ) -> WorkflowResult<()> {
        let message = message.into();
        self.with_session(workflow_id, |s| s.machine.fail_step(step_id, message))
    }

    /// Record where a completed step's artifact was persisted
    pub fn mark_step_saved(
        &self,
        workflow_id: &str,
        step_id: StepId,
        location: impl Into<String>,
    ) -> WorkflowResult<()> {
        let location = location.into();
        self.with_session(workflow_id, |s| s.machine.mark_step_saved(step_id, location))
    }

    /// Copy of the workflow state
    pub fn get_workflow_state(&self, workflow_id: &str) -> WorkflowResult<WorkflowState> {
        self.with_session(workflow_id, |s| Ok(s.machine.state().clone()))
    }

    /// Step and task progress
    pub fn get_workflow_progress(&self, workflow_id: &str) -> WorkflowResult<WorkflowProgress> {
        self.with_session(workflow_id, |s| {
            Ok(WorkflowProgress {
                step_progress: s.machine.get_progress(),
                task_progress: s.queues.progress(),
            })
        })
    }

    /// One-line status
    pub fn format_status(&self, workflow_id: &str) -> WorkflowResult<String> {
        Ok(ProgressTracker::format_status(
            &self.get_workflow_progress(workflow_id)?,
        ))
    }

    /// Build a work item, estimating tokens with the configured ratio
    pub fn work_item(
        &self,
        path: impl Into<String>,
        category: impl Into<String>,
        importance: i64,
        content: &str,
    ) -> WorkItem {
        WorkItem::from_content(
            path,
            category,
            importance,
            content,
            self.batching.chars_per_token,
        )
    }

    /// Build a work item from a file size, without reading the file
    pub fn sized_work_item(
        &self,
        path: impl Into<String>,
        category: impl Into<String>,
        importance: i64,
        len: u64,
    ) -> WorkItem {
        let tokens = estimate_tokens_from_len(len, self.batching.chars_per_token);
        WorkItem::new(path, category, importance, tokens)
    }

    /// Pack `items` into a new task queue
    pub fn create_task_queue(
        &self,
        workflow_id: &str,
        items: Vec<WorkItem>,
        token_budget: usize,
        max_items_per_batch: usize,
        options: QueueOptions,
    ) -> WorkflowResult<QueueSummary> {
        self.with_session(workflow_id, |s| {
            if let Some(step_id) = options.step_id {
                s.machine.ensure_running(step_id)?;
            }
            s.queues
                .create_queue(items, token_budget, max_items_per_batch, &options)
        })
    }

    /// Pack `items` with the configured limits and queue options
    pub fn create_task_queue_with_defaults(
        &self,
        workflow_id: &str,
        items: Vec<WorkItem>,
        step_id: Option<StepId>,
    ) -> WorkflowResult<QueueSummary> {
        let options = QueueOptions {
            step_id,
            include_analysis_task: self.queue_defaults.analysis_task,
            include_summary_task: self.queue_defaults.summary_task,
        };
        self.create_task_queue(
            workflow_id,
            items,
            self.batching.token_budget,
            self.batching.max_items_per_batch,
            options,
        )
    }

    /// Hand out the next pending task
    pub fn get_next_task(&self, workflow_id: &str) -> WorkflowResult<NextTask> {
        self.with_session(workflow_id, |s| s.queues.get_next_task())
    }

    /// Acknowledge a handed-out task
    pub fn complete_task(
        &self,
        workflow_id: &str,
        task_id: &str,
        data: CompletionData,
    ) -> WorkflowResult<TaskCompletion> {
        self.with_session(workflow_id, |s| s.queues.complete_task(task_id, data))
    }

    /// Put a failed or stuck task back to pending
    pub fn requeue(&self, workflow_id: &str, task_id: &str) -> WorkflowResult<Task> {
        self.with_session(workflow_id, |s| s.queues.requeue(task_id))
    }

    /// Discard step state and the current queue atomically
    pub fn reset_workflow(&self, workflow_id: &str) -> WorkflowResult<()> {
        self.with_session(workflow_id, |s| {
            s.reset();
            Ok(())
        })
    }

    /// Drop a workflow from memory
    pub fn evict_workflow(&self, workflow_id: &str) -> WorkflowResult<()> {
        if self.registry.remove(workflow_id).is_none() {
            return Err(WorkflowError::NotFound(format!(
                "Workflow not found: {}",
                workflow_id
            )));
        }

        debug!(workflow_id = %workflow_id, "Workflow evicted");
        Ok(())
    }

    /// Serializable copy of a workflow
    pub fn snapshot(&self, workflow_id: &str) -> WorkflowResult<WorkflowSnapshot> {
        self.with_session(workflow_id, |s| Ok(WorkflowSnapshot::capture(s)))
    }

    /// Install a snapshot, replacing any workflow of the same project
    pub fn restore(&self, snapshot: WorkflowSnapshot) -> WorkflowResult<String> {
        let session: ProjectSession = snapshot.into_session(self.pipeline.clone())?;
        let workflow_id = session.workflow_id.clone();
        let project_key = session.project_key.clone();
        self.registry.insert(session);

        info!(workflow_id = %workflow_id, project = %project_key, "Workflow restored");
        Ok(workflow_id)
    }

    /// Write a workflow snapshot to the configured store
    pub fn persist(&self, workflow_id: &str) -> WorkflowResult<PathBuf> {
        let snapshot = self.snapshot(workflow_id)?;
        self.store()?.save(&snapshot)
    }

    /// Load a workflow snapshot from the configured store and restore it
    pub fn resume(&self, workflow_id: &str) -> WorkflowResult<String> {
        let snapshot = self.store()?.load(workflow_id)?;
        self.restore(snapshot)
    }

    fn store(&self) -> WorkflowResult<&SnapshotStore> {
        self.store.as_ref().ok_or_else(|| {
            WorkflowError::ConfigurationError("no snapshot store configured".to_string())
        })
    }

    fn with_session<T>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut ProjectSession) -> WorkflowResult<T>,
    ) -> WorkflowResult<T> {
        let handle = self.registry.get(workflow_id)?;
        let mut session = handle.lock();
        f(&mut session)
    }
}
