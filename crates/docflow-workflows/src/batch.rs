//! Token-budget batch packing

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{Batch, WorkItem};

/// Packs prioritized work items into token-budget-bounded batches
///
/// First-fit greedy over items sorted by descending importance:
/// - Items keep their original relative order among equal importance
/// - A batch closes when the next item would exceed the token budget or the
///   item limit
/// - An item larger than the whole budget gets a batch of its own, flagged
///   as overflow, so arbitrarily large inputs still make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPacker {
    token_budget: usize,
    max_items_per_batch: usize,
}

impl BatchPacker {
    /// Create a packer, rejecting zero limits
    pub fn new(token_budget: usize, max_items_per_batch: usize) -> WorkflowResult<Self> {
        if token_budget == 0 {
            return Err(WorkflowError::ConfigurationError(
                "token budget must be greater than 0".to_string(),
            ));
        }
        if max_items_per_batch == 0 {
            return Err(WorkflowError::ConfigurationError(
                "max items per batch must be greater than 0".to_string(),
            ));
        }

        Ok(BatchPacker {
            token_budget,
            max_items_per_batch,
        })
    }

    /// Token budget per batch
    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Item limit per batch
    pub fn max_items_per_batch(&self) -> usize {
        self.max_items_per_batch
    }

    /// Pack `items` into an ordered sequence of batches
    pub fn pack(&self, mut items: Vec<WorkItem>) -> Vec<Batch> {
        // sort_by is stable, ties keep input order
        items.sort_by(|a, b| b.importance.cmp(&a.importance));

        let mut batches = Vec::new();
        let mut current: Vec<WorkItem> = Vec::new();
        let mut current_tokens = 0usize;

        for item in items {
            if item.estimated_tokens > self.token_budget {
                Self::close(&mut batches, &mut current, &mut current_tokens, false);
                current_tokens = item.estimated_tokens;
                current.push(item);
                Self::close(&mut batches, &mut current, &mut current_tokens, true);
                continue;
            }

            let exceeds_budget =
                current_tokens.saturating_add(item.estimated_tokens) > self.token_budget;
            let batch_full = current.len() >= self.max_items_per_batch;
            if !current.is_empty() && (exceeds_budget || batch_full) {
                Self::close(&mut batches, &mut current, &mut current_tokens, false);
            }

            current_tokens += item.estimated_tokens;
            current.push(item);
        }

        Self::close(&mut batches, &mut current, &mut current_tokens, false);

        tracing::debug!(
            batches = batches.len(),
            token_budget = self.token_budget,
            max_items_per_batch = self.max_items_per_batch,
            "Packed work items"
        );

        batches
    }

    fn close(
        batches: &mut Vec<Batch>,
        current: &mut Vec<WorkItem>,
        current_tokens: &mut usize,
        overflow: bool,
    ) {
        if current.is_empty() {
            return;
        }

        let sequence_number = batches.len() + 1;
        batches.push(Batch {
            batch_id: format!("batch-{:04}", sequence_number),
            sequence_number,
            items: std::mem::take(current),
            total_estimated_tokens: *current_tokens,
            is_singleton_overflow: overflow,
        });
        *current_tokens = 0;
    }
}

/// Pack `items` with the given limits
pub fn pack(
    items: Vec<WorkItem>,
    token_budget: usize,
    max_items_per_batch: usize,
) -> WorkflowResult<Vec<Batch>> {
    Ok(BatchPacker::new(token_budget, max_items_per_batch)?.pack(items))
}
