//! Core data models for workflows, batches and tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::queue::FinalSummary;
use crate::tokens::estimate_tokens;

/// Identifier of a declared pipeline step
pub type StepId = u32;

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not been started
    NotStarted,
    /// Step is running
    Running,
    /// Step completed; its artifact is held in memory
    Completed,
    /// Step failed; may be started again explicitly
    Failed,
    /// Step completed and its artifact was persisted by the caller
    Saved,
}

impl StepStatus {
    /// Whether the step satisfies a dependency gate
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Saved)
    }
}

/// Artifact produced by a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepArtifact {
    /// Outcome of draining a task queue
    QueueSummary(FinalSummary),
    /// Generated document text
    Document {
        /// Document title
        title: String,
        /// Document body
        content: String,
    },
    /// Payload whose shape is owned by the caller
    Opaque {
        /// Caller-defined schema version
        version: u32,
        /// Payload
        payload: serde_json::Value,
    },
}

/// Where a completed step's artifact was persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedArtifact {
    /// Caller supplied location (path, URL, key)
    pub location: String,
    /// When the step was marked saved
    pub saved_at: DateTime<Utc>,
}

/// Most recent step failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    /// Failed step
    pub step_id: StepId,
    /// Failure message
    pub message: String,
    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

/// Per-project workflow state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    /// Project the state belongs to
    pub project_key: String,
    /// Status of every declared step
    pub step_statuses: BTreeMap<StepId, StepStatus>,
    /// Artifacts of completed steps
    pub step_results: BTreeMap<StepId, StepArtifact>,
    /// Persisted artifact locations of saved steps
    #[serde(default)]
    pub saved_artifacts: BTreeMap<StepId, SavedArtifact>,
    /// Start time of the latest run of each step
    #[serde(default)]
    pub step_started_at: BTreeMap<StepId, DateTime<Utc>>,
    /// Highest completed step id; only a reset lowers it
    pub current_step_index: StepId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Most recent failure
    pub last_error: Option<StepFailure>,
}

impl WorkflowState {
    /// Create a state with every given step not started
    pub fn new(project_key: impl Into<String>, steps: impl IntoIterator<Item = StepId>) -> Self {
        let now = Utc::now();
        WorkflowState {
            project_key: project_key.into(),
            step_statuses: steps
                .into_iter()
                .map(|id| (id, StepStatus::NotStarted))
                .collect(),
            step_results: BTreeMap::new(),
            saved_artifacts: BTreeMap::new(),
            step_started_at: BTreeMap::new(),
            current_step_index: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Status of a step, if declared
    pub fn status(&self, step_id: StepId) -> Option<StepStatus> {
        self.step_statuses.get(&step_id).copied()
    }
}

/// A unit of discovered work (usually one source file)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    /// Stable identifier
    pub id: String,
    /// Project-relative path
    pub path: String,
    /// Producer-defined category (e.g. "source", "config", "docs")
    pub category: String,
    /// Priority score; higher is processed first
    pub importance: i64,
    /// Approximate token count of the item's content
    pub estimated_tokens: usize,
}

impl WorkItem {
    /// Create a work item whose id is its path
    pub fn new(
        path: impl Into<String>,
        category: impl Into<String>,
        importance: i64,
        estimated_tokens: usize,
    ) -> Self {
        let path = path.into();
        WorkItem {
            id: path.clone(),
            path,
            category: category.into(),
            importance,
            estimated_tokens,
        }
    }

    /// Create a work item, estimating tokens from its content
    pub fn from_content(
        path: impl Into<String>,
        category: impl Into<String>,
        importance: i64,
        content: &str,
        chars_per_token: usize,
    ) -> Self {
        Self::new(
            path,
            category,
            importance,
            estimate_tokens(content, chars_per_token),
        )
    }

    /// Replace the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A token-budget-bounded group of work items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    /// Batch identifier, unique within a queue
    pub batch_id: String,
    /// 1-based position in packing order
    pub sequence_number: usize,
    /// Items in priority order
    pub items: Vec<WorkItem>,
    /// Sum of the items' estimated tokens
    pub total_estimated_tokens: usize,
    /// Single item larger than the budget
    pub is_singleton_overflow: bool,
}

/// Status of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be pulled
    Pending,
    /// Handed to a caller
    InProgress,
    /// Acknowledged as done
    Completed,
    /// Acknowledged as failed
    Failed,
}

impl TaskStatus {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// What a task stands for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One work item of a batch
    Item,
    /// Bookkeeping task placed before the first batch
    Analysis,
    /// Bookkeeping task placed after the last batch
    Summary,
}

/// The atomic, trackable unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Task identifier, unique across queues
    pub task_id: String,
    /// Item or synthetic marker
    pub kind: TaskKind,
    /// Position in the queue (0-based)
    pub sequence: usize,
    /// Work item for [`TaskKind::Item`] tasks
    pub work_item: Option<WorkItem>,
    /// Owning batch for [`TaskKind::Item`] tasks
    pub batch_id: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Notes from the latest acknowledgment
    pub completion_notes: Option<String>,
    /// Output from the latest acknowledgment
    pub output: Option<serde_json::Value>,
    /// Number of times the task was handed out
    pub attempts: u32,
    /// When the task was last handed out
    pub started_at: Option<DateTime<Utc>>,
    /// When the task was last acknowledged
    pub finished_at: Option<DateTime<Utc>>,
}

/// Acknowledgment payload for a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionData {
    /// `false` marks the task failed
    #[serde(default = "default_success")]
    pub success: bool,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Processor output
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

impl CompletionData {
    /// Successful acknowledgment
    pub fn success() -> Self {
        CompletionData {
            success: true,
            notes: None,
            output: None,
        }
    }

    /// Failed acknowledgment with a reason
    pub fn failure(reason: impl Into<String>) -> Self {
        CompletionData {
            success: false,
            notes: Some(reason.into()),
            output: None,
        }
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Attach output
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }
}

impl Default for CompletionData {
    fn default() -> Self {
        Self::success()
    }
}

/// Options for building a task queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueOptions {
    /// Step the queue works for
    #[serde(default)]
    pub step_id: Option<StepId>,
    /// Add an analysis task before the first batch
    #[serde(default)]
    pub include_analysis_task: bool,
    /// Add a summary task after the last batch
    #[serde(default)]
    pub include_summary_task: bool,
}

impl QueueOptions {
    /// Options bound to a step
    pub fn for_step(step_id: StepId) -> Self {
        QueueOptions {
            step_id: Some(step_id),
            ..Default::default()
        }
    }

    /// Request the analysis and summary bookkeeping tasks
    pub fn with_bookkeeping(mut self) -> Self {
        self.include_analysis_task = true;
        self.include_summary_task = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_has_all_steps_not_started() {
        let state = WorkflowState::new("atlas", [1, 2, 3]);
        assert_eq!(state.project_key, "atlas");
        assert_eq!(state.step_statuses.len(), 3);
        assert!(state
            .step_statuses
            .values()
            .all(|s| *s == StepStatus::NotStarted));
        assert_eq!(state.current_step_index, 0);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_step_status_done() {
        assert!(StepStatus::Completed.is_done());
        assert!(StepStatus::Saved.is_done());
        assert!(!StepStatus::Failed.is_done());
        assert!(!StepStatus::Running.is_done());
    }

    #[test]
    fn test_work_item_from_content() {
        let item = WorkItem::from_content("src/lib.rs", "source", 10, "fn main() {}", 4);
        assert_eq!(item.id, "src/lib.rs");
        assert_eq!(item.estimated_tokens, 3);
    }

    #[test]
    fn test_completion_data_defaults_to_success() {
        let data: CompletionData = serde_json::from_str("{}").unwrap();
        assert!(data.success);
        assert!(data.notes.is_none());
    }

    #[test]
    fn test_artifact_serializes_with_kind_tag() {
        let artifact = StepArtifact::Document {
            title: "Overview".to_string(),
            content: "# Overview".to_string(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["kind"], "document");
    }

    #[test]
    fn test_state_round_trips_with_integer_step_keys() {
        let mut state = WorkflowState::new("atlas", [1, 2]);
        state.step_statuses.insert(1, StepStatus::Completed);
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(1), Some(StepStatus::Completed));
        assert_eq!(back.status(2), Some(StepStatus::NotStarted));
    }
}
