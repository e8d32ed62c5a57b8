//! Property-based tests for batch packing
//! Budget, item limit and priority order hold for arbitrary inputs

#[cfg(test)]
mod tests {
    use crate::batch::pack;
    use crate::models::WorkItem;
    use proptest::prelude::*;

    fn arb_items() -> impl Strategy<Value = Vec<WorkItem>> {
        prop::collection::vec((-50i64..50, 0usize..3000), 0..60).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (importance, tokens))| {
                    WorkItem::new(format!("src/file_{}.rs", i), "source", importance, tokens)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_batches_respect_budget(items in arb_items(), budget in 1usize..2000, max in 1usize..10) {
            let batches = pack(items, budget, max).unwrap();

            for batch in &batches {
                let sum: usize = batch.items.iter().map(|i| i.estimated_tokens).sum();
                prop_assert_eq!(sum, batch.total_estimated_tokens);

                if batch.is_singleton_overflow {
                    prop_assert_eq!(batch.items.len(), 1);
                    prop_assert!(batch.items[0].estimated_tokens > budget);
                } else {
                    prop_assert!(batch.total_estimated_tokens <= budget);
                    prop_assert!(!batch.items.is_empty());
                    prop_assert!(batch.items.len() <= max);
                }
            }
        }

        #[test]
        fn prop_every_item_packed_once(items in arb_items(), budget in 1usize..2000, max in 1usize..10) {
            let mut expected: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            let batches = pack(items, budget, max).unwrap();

            let mut packed: Vec<String> = batches
                .iter()
                .flat_map(|b| b.items.iter().map(|i| i.id.clone()))
                .collect();

            expected.sort();
            packed.sort();
            prop_assert_eq!(expected, packed);
        }

        #[test]
        fn prop_priority_order_is_stable(items in arb_items(), budget in 1usize..2000, max in 1usize..10) {
            let mut expected = items.clone();
            expected.sort_by(|a, b| b.importance.cmp(&a.importance));

            let packed: Vec<WorkItem> = pack(items, budget, max)
                .unwrap()
                .into_iter()
                .flat_map(|b| b.items)
                .collect();

            prop_assert_eq!(packed, expected);
        }

        #[test]
        fn prop_sequence_numbers_are_contiguous(items in arb_items(), budget in 1usize..2000, max in 1usize..10) {
            let batches = pack(items, budget, max).unwrap();
            for (i, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.sequence_number, i + 1);
                prop_assert_eq!(&batch.batch_id, &format!("batch-{:04}", i + 1));
            }
        }
    }
}
