//! Progress aggregation over workflow state and task queues

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{StepId, StepStatus, Task, TaskStatus, WorkflowState};
use crate::pipeline::Pipeline;

/// Step-level progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepProgress {
    /// Status of every declared step
    pub statuses: BTreeMap<StepId, StepStatus>,
    /// Steps completed or saved
    pub completed: usize,
    /// Steps currently failed
    pub failed: usize,
    /// Steps currently running
    pub running: usize,
    /// Declared steps
    pub total: usize,
    /// Progress percentage (0-100)
    pub percentage: u32,
    /// Every declared step is completed or saved
    pub is_complete: bool,
    /// Highest completed step id
    pub current_step_index: StepId,
}

/// Task-level progress of one queue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    /// Tasks in the queue
    pub total: usize,
    /// Tasks waiting to be pulled
    pub pending: usize,
    /// Tasks handed out and not yet acknowledged
    pub in_progress: usize,
    /// Tasks acknowledged as done
    pub completed: usize,
    /// Tasks acknowledged as failed
    pub failed: usize,
    /// Completed tasks as a percentage (0-100)
    pub percentage: u32,
}

impl TaskProgress {
    /// No task is pending or in progress
    pub fn is_exhausted(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }
}

/// Combined progress of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowProgress {
    /// Step progress
    pub step_progress: StepProgress,
    /// Progress of the current queue, if any
    pub task_progress: Option<TaskProgress>,
}

/// Stateless progress calculations
pub struct ProgressTracker;

impl ProgressTracker {
    /// Rounded percentage (0-100), 0 when `total` is 0
    pub fn percentage(done: usize, total: usize) -> u32 {
        if total == 0 {
            return 0;
        }

        let pct = (done as f64 * 100.0 / total as f64).round() as u32;
        pct.min(100)
    }

    /// Aggregate step statuses against the pipeline
    pub fn step_progress(pipeline: &Pipeline, state: &WorkflowState) -> StepProgress {
        let statuses: BTreeMap<StepId, StepStatus> = pipeline
            .step_ids()
            .map(|id| (id, state.status(id).unwrap_or(StepStatus::NotStarted)))
            .collect();

        let count = |pred: fn(&StepStatus) -> bool| statuses.values().filter(|s| pred(s)).count();
        let completed = count(StepStatus::is_done);
        let failed = count(|s| *s == StepStatus::Failed);
        let running = count(|s| *s == StepStatus::Running);
        let total = statuses.len();

        StepProgress {
            completed,
            failed,
            running,
            total,
            percentage: Self::percentage(completed, total),
            is_complete: total > 0 && completed == total,
            current_step_index: state.current_step_index,
            statuses,
        }
    }

    /// Count tasks by status
    pub fn task_progress(tasks: &[Task]) -> TaskProgress {
        let mut progress = TaskProgress {
            total: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            match task.status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::InProgress => progress.in_progress += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
            }
        }

        progress.percentage = Self::percentage(progress.completed, progress.total);
        progress
    }

    /// One-line human readable status
    pub fn format_status(progress: &WorkflowProgress) -> String {
        let steps = &progress.step_progress;
        let mut line = format!(
            "steps {}/{} ({}%)",
            steps.completed, steps.total, steps.percentage
        );

        if steps.running > 0 {
            line.push_str(&format!(", {} running", steps.running));
        }
        if steps.failed > 0 {
            line.push_str(&format!(", {} failed", steps.failed));
        }

        if let Some(tasks) = &progress.task_progress {
            line.push_str(&format!(
                " | tasks {}/{} ({}%), {} pending, {} in progress",
                tasks.completed, tasks.total, tasks.percentage, tasks.pending, tasks.in_progress
            ));
            if tasks.failed > 0 {
                line.push_str(&format!(", {} failed", tasks.failed));
            }
        }

        line
    }
}
