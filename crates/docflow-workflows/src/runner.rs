//! Async driver that drains a task queue through a processor

use std::time::Duration;

use async_trait::async_trait;
use docflow_common::format_error;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::WorkflowEngine;
use crate::error::WorkflowResult;
use crate::models::{CompletionData, StepArtifact, StepId, Task, TaskStatus};
use crate::queue::{FinalSummary, NextTask};

/// Port for whatever turns a task into output (model call, test double, stub)
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Process one task
    ///
    /// An `Err` is recorded as a failed task; the run continues.
    async fn process(&self, task: &Task) -> WorkflowResult<CompletionData>;
}

/// Why a run stopped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every task is completed or failed
    Completed {
        /// Queue outcome
        final_summary: FinalSummary,
    },
    /// Tasks handed out elsewhere are still unacknowledged
    Blocked {
        /// Tasks still in progress
        in_progress: usize,
    },
    /// The per-run task limit was reached
    Paused {
        /// Tasks still pending
        pending: usize,
    },
}

/// Result of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    /// Tasks processed by this run
    pub processed: usize,
    /// Tasks this run acknowledged as failed
    pub failed: usize,
    /// Why the run stopped
    pub outcome: RunOutcome,
    /// Step completed with the queue summary, if any
    pub step_completed: Option<StepId>,
}

/// Pulls tasks, hands them to a [`BatchProcessor`] and acknowledges them
#[derive(Debug, Clone)]
pub struct QueueRunner {
    complete_step_on_exhaustion: bool,
    task_timeout: Option<Duration>,
    max_tasks: Option<usize>,
}

impl Default for QueueRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRunner {
    /// Runner that completes the bound step once the queue is exhausted
    pub fn new() -> Self {
        QueueRunner {
            complete_step_on_exhaustion: true,
            task_timeout: None,
            max_tasks: None,
        }
    }

    /// Whether to complete the bound step on exhaustion
    pub fn complete_step_on_exhaustion(mut self, enabled: bool) -> Self {
        self.complete_step_on_exhaustion = enabled;
        self
    }

    /// Fail tasks whose processing exceeds `timeout`
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Stop after processing `max` tasks
    pub fn with_max_tasks(mut self, max: usize) -> Self {
        self.max_tasks = Some(max);
        self
    }

    /// Drain the current queue of `workflow_id`
    pub async fn run(
        &self,
        engine: &WorkflowEngine,
        workflow_id: &str,
        processor: &dyn BatchProcessor,
    ) -> WorkflowResult<RunReport> {
        let mut processed = 0;
        let mut failed = 0;

        loop {
            if let Some(max) = self.max_tasks {
                if processed >= max {
                    let pending = engine
                        .get_workflow_progress(workflow_id)?
                        .task_progress
                        .map(|p| p.pending)
                        .unwrap_or(0);
                    if pending > 0 {
                        info!(workflow_id = %workflow_id, processed, pending, "Run paused");
                        return Ok(RunReport {
                            processed,
                            failed,
                            outcome: RunOutcome::Paused { pending },
                            step_completed: None,
                        });
                    }
                }
            }

            match engine.get_next_task(workflow_id)? {
                NextTask::Task { task, .. } => {
                    let data = self.process(processor, &task).await;
                    let ack = engine.complete_task(workflow_id, &task.task_id, data)?;
                    processed += 1;
                    if ack.completed_task.status == TaskStatus::Failed {
                        failed += 1;
                    }
                    tokio::task::yield_now().await;
                }
                NextTask::Blocked { in_progress, .. } => {
                    warn!(
                        workflow_id = %workflow_id,
                        in_progress,
                        "Run stopped, tasks outstanding elsewhere"
                    );
                    return Ok(RunReport {
                        processed,
                        failed,
                        outcome: RunOutcome::Blocked { in_progress },
                        step_completed: None,
                    });
                }
                NextTask::Completed { final_summary } => {
                    let step_completed = self.finish_step(engine, workflow_id, &final_summary)?;
                    info!(
                        workflow_id = %workflow_id,
                        processed,
                        failed,
                        step = ?step_completed,
                        "Run completed"
                    );
                    return Ok(RunReport {
                        processed,
                        failed,
                        outcome: RunOutcome::Completed { final_summary },
                        step_completed,
                    });
                }
            }
        }
    }

    async fn process(&self, processor: &dyn BatchProcessor, task: &Task) -> CompletionData {
        let result = match self.task_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, processor.process(task)).await {
                Ok(result) => result,
                Err(_) => {
                    return CompletionData::failure(format!(
                        "processing timed out after {:?}",
                        timeout
                    ))
                }
            },
            None => processor.process(task).await,
        };

        result.unwrap_or_else(|e| {
            debug!(task_id = %task.task_id, "Processor error recorded as failure");
            CompletionData::failure(format_error(&e))
        })
    }

    fn finish_step(
        &self,
        engine: &WorkflowEngine,
        workflow_id: &str,
        summary: &FinalSummary,
    ) -> WorkflowResult<Option<StepId>> {
        if !self.complete_step_on_exhaustion {
            return Ok(None);
        }
        let Some(step_id) = summary.step_id else {
            return Ok(None);
        };

        // Another runner on the same queue may have completed it first
        let completed = engine.complete_step_if_running(
            workflow_id,
            step_id,
            StepArtifact::QueueSummary(summary.clone()),
        )?;
        Ok(completed.then_some(step_id))
    }
}
