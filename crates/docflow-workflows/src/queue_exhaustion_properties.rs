//! Property-based tests for queue exhaustion
//! A queue of N tasks reports completion on the (N+1)-th pull, never earlier,
//! and repeated acknowledgments never inflate counts

#[cfg(test)]
mod tests {
    use crate::models::{CompletionData, QueueOptions, TaskStatus, WorkItem};
    use crate::queue::{NextTask, TaskQueueManager};
    use proptest::prelude::*;

    fn manager(tokens: &[usize], bookkeeping: bool) -> TaskQueueManager {
        let items = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| WorkItem::new(format!("f{}", i), "source", 0, *t))
            .collect();
        let options = if bookkeeping {
            QueueOptions::default().with_bookkeeping()
        } else {
            QueueOptions::default()
        };

        let mut manager = TaskQueueManager::new("prop");
        manager.create_queue(items, 500, 4, &options).unwrap();
        manager
    }

    proptest! {
        #[test]
        fn prop_completion_after_n_pulls(
            tokens in prop::collection::vec(1usize..800, 0..30),
            bookkeeping in any::<bool>(),
            failures in prop::collection::vec(any::<bool>(), 30),
        ) {
            let mut manager = manager(&tokens, bookkeeping);
            let total = manager.current().unwrap().tasks.len();

            for i in 0..total {
                let next = manager.get_next_task().unwrap();
                prop_assert!(!next.is_completed());
                let task = next.task().cloned().unwrap();

                let data = if failures[i % failures.len()] {
                    CompletionData::failure("x")
                } else {
                    CompletionData::success()
                };
                manager.complete_task(&task.task_id, data).unwrap();
            }

            match manager.get_next_task().unwrap() {
                NextTask::Completed { final_summary } => {
                    prop_assert_eq!(final_summary.total_tasks, total);
                    prop_assert_eq!(
                        final_summary.completed_tasks + final_summary.failed_tasks.len(),
                        total
                    );
                }
                other => prop_assert!(false, "expected completion, got {:?}", other),
            }
        }

        #[test]
        fn prop_duplicate_acks_are_noops(
            tokens in prop::collection::vec(1usize..800, 1..20),
            repeats in 1usize..4,
        ) {
            let mut manager = manager(&tokens, false);
            let total = manager.current().unwrap().tasks.len();

            for _ in 0..total {
                let task = manager.get_next_task().unwrap().task().cloned().unwrap();
                manager
                    .complete_task(&task.task_id, CompletionData::success())
                    .unwrap();

                for _ in 0..repeats {
                    let again = manager
                        .complete_task(&task.task_id, CompletionData::success())
                        .unwrap();
                    prop_assert!(again.duplicate);
                    prop_assert_eq!(again.completed_task.status, TaskStatus::Completed);
                }
            }

            let progress = manager.progress().unwrap();
            prop_assert_eq!(progress.completed, total);
            prop_assert_eq!(progress.percentage, 100);
        }

        #[test]
        fn prop_no_completion_while_outstanding(tokens in prop::collection::vec(1usize..800, 1..20)) {
            let mut manager = manager(&tokens, false);
            let total = manager.current().unwrap().tasks.len();

            let mut handed_out = Vec::new();
            for _ in 0..total {
                handed_out.push(manager.get_next_task().unwrap().task().cloned().unwrap());
            }

            for task in &handed_out {
                prop_assert!(manager.get_next_task().unwrap().is_blocked());
                manager
                    .complete_task(&task.task_id, CompletionData::success())
                    .unwrap();
            }

            prop_assert!(manager.get_next_task().unwrap().is_completed());
        }
    }
}
