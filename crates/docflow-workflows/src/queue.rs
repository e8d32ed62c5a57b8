//! Task queues built from packed batches

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::BatchPacker;
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{
    CompletionData, QueueOptions, StepId, Task, TaskKind, TaskStatus, WorkItem,
};
use crate::progress::{ProgressTracker, TaskProgress};

/// Shape of a freshly created queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSummary {
    /// Queue identifier
    pub queue_id: String,
    /// Step the queue is bound to
    pub step_id: Option<StepId>,
    /// All tasks, including bookkeeping tasks
    pub total_tasks: usize,
    /// Tasks carrying a work item
    pub item_tasks: usize,
    /// Number of packed batches
    pub batch_count: usize,
    /// Batches holding a single oversized item
    pub overflow_batches: usize,
    /// Sum of all items' estimated tokens
    pub total_estimated_tokens: usize,
}

/// A task acknowledged as failed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedTask {
    /// Task identifier
    pub task_id: String,
    /// Work item the task carried, if any
    pub work_item_id: Option<String>,
    /// Failure notes
    pub notes: Option<String>,
}

/// Outcome of an exhausted queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalSummary {
    /// Queue identifier
    pub queue_id: String,
    /// Step the queue was bound to
    pub step_id: Option<StepId>,
    /// All tasks
    pub total_tasks: usize,
    /// Tasks acknowledged as done
    pub completed_tasks: usize,
    /// Tasks acknowledged as failed
    pub failed_tasks: Vec<FailedTask>,
    /// Number of packed batches
    pub batch_count: usize,
    /// Sum of all items' estimated tokens
    pub total_estimated_tokens: usize,
    /// Latest acknowledgment time
    pub completed_at: Option<DateTime<Utc>>,
}

/// Answer to a pull
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NextTask {
    /// A task was handed out and is now in progress
    Task {
        /// The task
        task: Task,
        /// Queue progress after the hand-out
        progress: TaskProgress,
    },
    /// Nothing pending, but handed-out tasks are still unacknowledged
    Blocked {
        /// Tasks still in progress
        in_progress: usize,
        /// Queue progress
        progress: TaskProgress,
    },
    /// Every task is completed or failed
    Completed {
        /// Queue outcome
        final_summary: FinalSummary,
    },
}

impl NextTask {
    /// Queue is exhausted
    pub fn is_completed(&self) -> bool {
        matches!(self, NextTask::Completed { .. })
    }

    /// Queue waits for outstanding acknowledgments
    pub fn is_blocked(&self) -> bool {
        matches!(self, NextTask::Blocked { .. })
    }

    /// Handed-out task, if any
    pub fn task(&self) -> Option<&Task> {
        match self {
            NextTask::Task { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Answer to an acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletion {
    /// The acknowledged task as it now stands
    pub completed_task: Task,
    /// Queue progress after the acknowledgment
    pub progress: TaskProgress,
    /// At least one task is still pending
    pub next_task_available: bool,
    /// The acknowledgment repeated an earlier one and changed nothing
    pub duplicate: bool,
}

/// Ordered tasks for one step invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskQueue {
    /// Queue identifier
    pub queue_id: String,
    /// Owning project
    pub project_key: String,
    /// Step the queue works for
    pub step_id: Option<StepId>,
    /// Tasks in hand-out order
    pub tasks: Vec<Task>,
    /// Number of packed batches
    pub batch_count: usize,
    /// Batches holding a single oversized item
    pub overflow_batches: usize,
    /// Sum of all items' estimated tokens
    pub total_estimated_tokens: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl TaskQueue {
    /// Pack `items` and flatten the batches into tasks
    pub fn build(
        project_key: impl Into<String>,
        items: Vec<WorkItem>,
        token_budget: usize,
        max_items_per_batch: usize,
        options: &QueueOptions,
    ) -> WorkflowResult<Self> {
        let batches = BatchPacker::new(token_budget, max_items_per_batch)?.pack(items);
        let queue_id = Uuid::new_v4().to_string();

        let mut tasks = Vec::new();
        let mut push = |kind: TaskKind, work_item: Option<WorkItem>, batch_id: Option<String>| {
            let sequence = tasks.len();
            tasks.push(Task {
                task_id: format!("{}/{:04}", queue_id, sequence),
                kind,
                sequence,
                work_item,
                batch_id,
                status: TaskStatus::Pending,
                completion_notes: None,
                output: None,
                attempts: 0,
                started_at: None,
                finished_at: None,
            });
        };

        if options.include_analysis_task {
            push(TaskKind::Analysis, None, None);
        }
        for batch in &batches {
            for item in &batch.items {
                push(TaskKind::Item, Some(item.clone()), Some(batch.batch_id.clone()));
            }
        }
        if options.include_summary_task {
            push(TaskKind::Summary, None, None);
        }

        Ok(TaskQueue {
            queue_id,
            project_key: project_key.into(),
            step_id: options.step_id,
            tasks,
            batch_count: batches.len(),
            overflow_batches: batches.iter().filter(|b| b.is_singleton_overflow).count(),
            total_estimated_tokens: batches.iter().map(|b| b.total_estimated_tokens).sum(),
            created_at: Utc::now(),
        })
    }

    /// Shape of the queue
    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            queue_id: self.queue_id.clone(),
            step_id: self.step_id,
            total_tasks: self.tasks.len(),
            item_tasks: self
                .tasks
                .iter()
                .filter(|t| t.kind == TaskKind::Item)
                .count(),
            batch_count: self.batch_count,
            overflow_batches: self.overflow_batches,
            total_estimated_tokens: self.total_estimated_tokens,
        }
    }

    /// Current progress
    pub fn progress(&self) -> TaskProgress {
        ProgressTracker::task_progress(&self.tasks)
    }

    /// No task is pending or in progress
    pub fn is_exhausted(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    /// Outcome of the queue as it stands
    pub fn final_summary(&self) -> FinalSummary {
        FinalSummary {
            queue_id: self.queue_id.clone(),
            step_id: self.step_id,
            total_tasks: self.tasks.len(),
            completed_tasks: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            failed_tasks: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| FailedTask {
                    task_id: t.task_id.clone(),
                    work_item_id: t.work_item.as_ref().map(|w| w.id.clone()),
                    notes: t.completion_notes.clone(),
                })
                .collect(),
            batch_count: self.batch_count,
            total_estimated_tokens: self.total_estimated_tokens,
            completed_at: self.tasks.iter().filter_map(|t| t.finished_at).max(),
        }
    }

    /// Look up a task
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

/// Owns the current queue of one project and remembers retired queue ids
///
/// An exhausted queue stays current until it is replaced or discarded, so
/// the final summary can be pulled repeatedly and late duplicate
/// acknowledgments still resolve. A task id is `<queue_id>/<sequence>`, so
/// retiring a queue costs one entry no matter how many tasks it held.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskQueueManager {
    project_key: String,
    current: Option<TaskQueue>,
    #[serde(default)]
    retired_queue_ids: BTreeSet<String>,
}

impl TaskQueueManager {
    /// Create a manager without a queue
    pub fn new(project_key: impl Into<String>) -> Self {
        TaskQueueManager {
            project_key: project_key.into(),
            current: None,
            retired_queue_ids: BTreeSet::new(),
        }
    }

    /// Owning project
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// Current queue
    pub fn current(&self) -> Option<&TaskQueue> {
        self.current.as_ref()
    }

    /// Number of queues retired by replacement or discard
    pub fn retired_queue_count(&self) -> usize {
        self.retired_queue_ids.len()
    }

    /// Progress of the current queue
    pub fn progress(&self) -> Option<TaskProgress> {
        self.current.as_ref().map(TaskQueue::progress)
    }

    /// Build a new queue, replacing an exhausted one
    pub fn create_queue(
        &mut self,
        items: Vec<WorkItem>,
        token_budget: usize,
        max_items_per_batch: usize,
        options: &QueueOptions,
    ) -> WorkflowResult<QueueSummary> {
        if let Some(current) = &self.current {
            if !current.is_exhausted() {
                return Err(WorkflowError::InvalidTransition(format!(
                    "queue {} still has outstanding tasks",
                    current.queue_id
                )));
            }
        }

        let queue = TaskQueue::build(
            self.project_key.clone(),
            items,
            token_budget,
            max_items_per_batch,
            options,
        )?;
        self.discard();

        let summary = queue.summary();
        info!(
            project = %self.project_key,
            queue_id = %summary.queue_id,
            step = ?summary.step_id,
            tasks = summary.total_tasks,
            batches = summary.batch_count,
            overflow_batches = summary.overflow_batches,
            "Task queue created"
        );

        self.current = Some(queue);
        Ok(summary)
    }

    /// Hand out the first pending task
    pub fn get_next_task(&mut self) -> WorkflowResult<NextTask> {
        let queue = self.current_mut()?;

        let Some(index) = queue
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Pending)
        else {
            let progress = queue.progress();
            if progress.in_progress > 0 {
                return Ok(NextTask::Blocked {
                    in_progress: progress.in_progress,
                    progress,
                });
            }
            return Ok(NextTask::Completed {
                final_summary: queue.final_summary(),
            });
        };

        let task = &mut queue.tasks[index];
        task.status = TaskStatus::InProgress;
        task.attempts += 1;
        task.started_at = Some(Utc::now());
        let task = task.clone();

        debug!(
            queue_id = %queue.queue_id,
            task_id = %task.task_id,
            attempt = task.attempts,
            "Task handed out"
        );

        Ok(NextTask::Task {
            task,
            progress: queue.progress(),
        })
    }

    /// Acknowledge a handed-out task
    pub fn complete_task(
        &mut self,
        task_id: &str,
        data: CompletionData,
    ) -> WorkflowResult<TaskCompletion> {
        let index = self.locate(task_id)?;
        let queue = self.current_mut()?;
        let task = &mut queue.tasks[index];

        let duplicate = match (task.status, data.success) {
            (TaskStatus::Completed, _) | (TaskStatus::Failed, false) => true,
            (TaskStatus::InProgress, success) => {
                task.status = if success {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                task.completion_notes = data.notes;
                task.output = data.output;
                task.finished_at = Some(Utc::now());
                false
            }
            (status, _) => {
                return Err(WorkflowError::InvalidTransition(format!(
                    "cannot acknowledge task {} in {:?} status",
                    task_id, status
                )));
            }
        };

        let completed_task = task.clone();
        if duplicate {
            debug!(task_id = %task_id, "Duplicate acknowledgment ignored");
        } else if completed_task.status == TaskStatus::Failed {
            warn!(
                task_id = %task_id,
                notes = ?completed_task.completion_notes,
                "Task failed"
            );
        } else {
            debug!(task_id = %task_id, "Task completed");
        }

        let progress = queue.progress();
        Ok(TaskCompletion {
            completed_task,
            next_task_available: progress.pending > 0,
            progress,
            duplicate,
        })
    }

    /// Put a failed or in-progress task back to pending
    pub fn requeue(&mut self, task_id: &str) -> WorkflowResult<Task> {
        let index = self.locate(task_id)?;
        let queue = self.current_mut()?;
        let task = &mut queue.tasks[index];

        match task.status {
            TaskStatus::Pending => {}
            TaskStatus::Failed | TaskStatus::InProgress => {
                debug!(task_id = %task_id, previous = ?task.status, "Task requeued");
                task.status = TaskStatus::Pending;
                task.finished_at = None;
            }
            TaskStatus::Completed => {
                return Err(WorkflowError::InvalidTransition(format!(
                    "cannot requeue completed task {}",
                    task_id
                )));
            }
        }

        Ok(task.clone())
    }

    /// Drop the current queue; its task ids become stale
    pub fn discard(&mut self) {
        if let Some(queue) = self.current.take() {
            debug!(
                project = %self.project_key,
                queue_id = %queue.queue_id,
                "Task queue retired"
            );
            self.retired_queue_ids.insert(queue.queue_id);
        }
    }

    fn current_mut(&mut self) -> WorkflowResult<&mut TaskQueue> {
        let project = &self.project_key;
        self.current
            .as_mut()
            .ok_or_else(|| WorkflowError::NotFound(format!("No task queue for project {}", project)))
    }

    fn locate(&self, task_id: &str) -> WorkflowResult<usize> {
        if let Some(index) = self
            .current
            .as_ref()
            .and_then(|q| q.tasks.iter().position(|t| t.task_id == task_id))
        {
            return Ok(index);
        }

        let retired = task_id
            .rsplit_once('/')
            .map(|(queue_id, _)| self.retired_queue_ids.contains(queue_id))
            .unwrap_or(false);
        if retired {
            return Err(WorkflowError::StaleTask(task_id.to_string()));
        }

        Err(WorkflowError::NotFound(format!("Task not found: {}", task_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(tokens: &[usize]) -> Vec<WorkItem> {
        tokens
            .iter()
            .enumerate()
            .map(|(i, t)| WorkItem::new(format!("src/f{}.rs", i), "source", 0, *t))
            .collect()
    }

    fn manager_with(tokens: &[usize], options: QueueOptions) -> TaskQueueManager {
        let mut manager = TaskQueueManager::new("atlas");
        manager.create_queue(items(tokens), 1000, 3, &options).unwrap();
        manager
    }

    fn pull(manager: &mut TaskQueueManager) -> Task {
        manager.get_next_task().unwrap().task().cloned().unwrap()
    }

    #[test]
    fn test_create_queue_summary() {
        let mut manager = TaskQueueManager::new("atlas");
        let summary = manager
            .create_queue(
                items(&[400, 400, 400, 5000]),
                1000,
                3,
                &QueueOptions::for_step(3).with_bookkeeping(),
            )
            .unwrap();

        assert_eq!(summary.total_tasks, 6);
        assert_eq!(summary.item_tasks, 4);
        assert_eq!(summary.batch_count, 3);
        assert_eq!(summary.overflow_batches, 1);
        assert_eq!(summary.total_estimated_tokens, 6200);
        assert_eq!(summary.step_id, Some(3));
    }

    #[test]
    fn test_bookkeeping_tasks_bracket_items() {
        let manager = manager_with(&[10, 10], QueueOptions::default().with_bookkeeping());
        let tasks = &manager.current().unwrap().tasks;

        assert_eq!(tasks.first().unwrap().kind, TaskKind::Analysis);
        assert_eq!(tasks.last().unwrap().kind, TaskKind::Summary);
        assert!(tasks[1..3].iter().all(|t| t.kind == TaskKind::Item));
        assert_eq!(tasks[1].batch_id.as_deref(), Some("batch-0001"));
    }

    #[test]
    fn test_next_task_flips_to_in_progress() {
        let mut manager = manager_with(&[10, 10], QueueOptions::default());

        match manager.get_next_task().unwrap() {
            NextTask::Task { task, progress } => {
                assert_eq!(task.status, TaskStatus::InProgress);
                assert_eq!(task.attempts, 1);
                assert_eq!(task.sequence, 0);
                assert_eq!(progress.in_progress, 1);
                assert_eq!(progress.pending, 1);
            }
            other => panic!("expected a task, got {:?}", other),
        }
    }

    #[test]
    fn test_blocked_while_work_outstanding() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let task = pull(&mut manager);

        let next = manager.get_next_task().unwrap();
        assert!(next.is_blocked());
        assert!(!next.is_completed());

        manager
            .complete_task(&task.task_id, CompletionData::success())
            .unwrap();
        assert!(manager.get_next_task().unwrap().is_completed());
    }

    #[test]
    fn test_completion_is_repeatable() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let task = pull(&mut manager);
        manager
            .complete_task(&task.task_id, CompletionData::success())
            .unwrap();

        let first = manager.get_next_task().unwrap();
        let second = manager.get_next_task().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let mut manager = manager_with(&[10, 10], QueueOptions::default());
        let task = pull(&mut manager);

        let first = manager
            .complete_task(&task.task_id, CompletionData::success().with_notes("ok"))
            .unwrap();
        let second = manager
            .complete_task(&task.task_id, CompletionData::failure("late"))
            .unwrap();

        assert!(!first.duplicate);
        assert!(first.next_task_available);
        assert!(second.duplicate);
        assert_eq!(second.progress.completed, 1);
        assert_eq!(second.completed_task.status, TaskStatus::Completed);
        assert_eq!(second.completed_task.completion_notes.as_deref(), Some("ok"));
    }

    #[test]
    fn test_failed_task_does_not_block_queue() {
        let mut manager = manager_with(&[10, 10], QueueOptions::default());
        let first = pull(&mut manager);
        manager
            .complete_task(&first.task_id, CompletionData::failure("parse error"))
            .unwrap();

        let second = pull(&mut manager);
        manager
            .complete_task(&second.task_id, CompletionData::success())
            .unwrap();

        match manager.get_next_task().unwrap() {
            NextTask::Completed { final_summary } => {
                assert_eq!(final_summary.completed_tasks, 1);
                assert_eq!(final_summary.failed_tasks.len(), 1);
                assert_eq!(final_summary.failed_tasks[0].task_id, first.task_id);
                assert_eq!(
                    final_summary.failed_tasks[0].notes.as_deref(),
                    Some("parse error")
                );
                assert!(final_summary.completed_at.is_some());
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_acks() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let task = pull(&mut manager);
        manager
            .complete_task(&task.task_id, CompletionData::failure("boom"))
            .unwrap();

        let again = manager
            .complete_task(&task.task_id, CompletionData::failure("boom"))
            .unwrap();
        assert!(again.duplicate);

        assert!(matches!(
            manager.complete_task(&task.task_id, CompletionData::success()),
            Err(WorkflowError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_ack_pending_task_rejected() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let id = manager.current().unwrap().tasks[0].task_id.clone();

        assert!(matches!(
            manager.complete_task(&id, CompletionData::success()),
            Err(WorkflowError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_requeue() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let task = pull(&mut manager);
        manager
            .complete_task(&task.task_id, CompletionData::failure("flaky"))
            .unwrap();

        let requeued = manager.requeue(&task.task_id).unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert_eq!(requeued.attempts, 1);

        // pending is a no-op
        assert_eq!(
            manager.requeue(&task.task_id).unwrap().status,
            TaskStatus::Pending
        );

        let again = pull(&mut manager);
        assert_eq!(again.attempts, 2);
        manager
            .complete_task(&again.task_id, CompletionData::success())
            .unwrap();
        assert!(matches!(
            manager.requeue(&again.task_id),
            Err(WorkflowError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_create_over_unfinished_queue_rejected() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let result = manager.create_queue(items(&[10]), 1000, 3, &QueueOptions::default());
        assert!(matches!(result, Err(WorkflowError::InvalidTransition(_))));
    }

    #[test]
    fn test_replaced_queue_ids_are_stale() {
        let mut manager = manager_with(&[10], QueueOptions::default());
        let task = pull(&mut manager);
        manager
            .complete_task(&task.task_id, CompletionData::success())
            .unwrap();

        manager
            .create_queue(items(&[10]), 1000, 3, &QueueOptions::default())
            .unwrap();

        assert!(matches!(
            manager.complete_task(&task.task_id, CompletionData::success()),
            Err(WorkflowError::StaleTask(_))
        ));
        assert!(matches!(
            manager.complete_task("nope", CompletionData::success()),
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_retiring_keeps_one_entry_per_queue() {
        let mut manager = TaskQueueManager::new("atlas");
        let mut old_ids = Vec::new();

        for _ in 0..20 {
            manager
                .create_queue(items(&[10; 50]), 1000, 3, &QueueOptions::default())
                .unwrap();
            let queue = manager.current().unwrap();
            old_ids.extend(queue.tasks.iter().map(|t| t.task_id.clone()));
            manager.discard();
        }

        assert_eq!(manager.retired_queue_count(), 20);
        for task_id in &old_ids {
            assert!(matches!(
                manager.complete_task(task_id, CompletionData::success()),
                Err(WorkflowError::StaleTask(_))
            ));
        }

        let encoded = serde_json::to_string(&manager).unwrap();
        assert!(!encoded.contains(&old_ids[0]));
        let decoded: TaskQueueManager = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(
            decoded.locate(&old_ids[0]),
            Err(WorkflowError::StaleTask(_))
        ));
    }

    #[test]
    fn test_no_queue() {
        let mut manager = TaskQueueManager::new("atlas");
        assert!(matches!(
            manager.get_next_task(),
            Err(WorkflowError::NotFound(_))
        ));
        assert!(manager.progress().is_none());
    }

    #[test]
    fn test_empty_queue_completes_immediately() {
        let mut manager = manager_with(&[], QueueOptions::default());
        assert!(manager.get_next_task().unwrap().is_completed());
    }

    #[test]
    fn test_invalid_limits_keep_current_queue() {
        let mut manager = manager_with(&[], QueueOptions::default());
        let queue_id = manager.current().unwrap().queue_id.clone();

        let result = manager.create_queue(items(&[10]), 0, 3, &QueueOptions::default());

        assert!(matches!(result, Err(WorkflowError::ConfigurationError(_))));
        assert_eq!(manager.current().unwrap().queue_id, queue_id);
    }
}
