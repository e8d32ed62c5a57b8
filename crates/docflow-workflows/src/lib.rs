#![warn(missing_docs)]

//! DocFlow workflows
//!
//! Gates documentation pipeline steps on their predecessors, packs discovered
//! work items into token-budget batches, and hands the resulting tasks out
//! one at a time through resumable, per-project queues.

pub mod batch;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod state;
pub mod storage;
pub mod tokens;

#[cfg(test)]
mod batch_packing_properties;

#[cfg(test)]
mod queue_exhaustion_properties;

#[cfg(test)]
mod step_gating_properties;

pub use batch::{pack, BatchPacker};
pub use engine::WorkflowEngine;
pub use error::{WorkflowError, WorkflowResult};
pub use models::{
    Batch, CompletionData, QueueOptions, SavedArtifact, StepArtifact, StepFailure, StepId,
    StepStatus, Task, TaskKind, TaskStatus, WorkItem, WorkflowState,
};
pub use pipeline::{Pipeline, StepDefinition};
pub use progress::{ProgressTracker, StepProgress, TaskProgress, WorkflowProgress};
pub use queue::{
    FailedTask, FinalSummary, NextTask, QueueSummary, TaskCompletion, TaskQueue,
    TaskQueueManager,
};
pub use registry::{InMemoryProjectRegistry, ProjectRegistry, ProjectSession, SessionHandle};
pub use runner::{BatchProcessor, QueueRunner, RunOutcome, RunReport};
pub use state::WorkflowStateMachine;
pub use storage::{SnapshotStore, WorkflowSnapshot, SNAPSHOT_VERSION};
pub use tokens::{estimate_tokens, estimate_tokens_from_len, DEFAULT_CHARS_PER_TOKEN};
