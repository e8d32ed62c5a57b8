//! Shared fixtures for the docflow end-to-end tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docflow_workflows::{
    BatchProcessor, CompletionData, Task, TaskKind, WorkItem, WorkflowEngine, WorkflowError,
    WorkflowResult,
};

/// Source files of a small fictional project: (path, category, importance, content)
pub const SAMPLE_PROJECT: &[(&str, &str, i64, &str)] = &[
    ("src/lib.rs", "source", 100, "pub mod parser;\npub mod render;\n"),
    ("src/parser.rs", "source", 80, "pub fn parse(input: &str) -> Vec<String> { input.split(',').map(String::from).collect() }\n"),
    ("src/render.rs", "source", 60, "pub fn render(items: &[String]) -> String { items.join(\"\\n\") }\n"),
    ("Cargo.toml", "config", 40, "[package]\nname = \"sample\"\nversion = \"0.1.0\"\n"),
    ("README.md", "docs", 20, "# Sample\n\nParses and renders comma separated lists.\n"),
];

/// Work items for [`SAMPLE_PROJECT`], token counts estimated by the engine
pub fn sample_items(engine: &WorkflowEngine) -> Vec<WorkItem> {
    SAMPLE_PROJECT
        .iter()
        .map(|(path, category, importance, content)| {
            engine.work_item(*path, *category, *importance, content)
        })
        .collect()
}

/// Deterministic processor that "documents" each item by path
#[derive(Default)]
pub struct DocumentingProcessor {
    calls: AtomicUsize,
    reject_category: Option<String>,
}

impl DocumentingProcessor {
    /// Processor that succeeds for every task
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor that errors on items of `category`
    pub fn rejecting(category: impl Into<String>) -> Self {
        DocumentingProcessor {
            calls: AtomicUsize::new(0),
            reject_category: Some(category.into()),
        }
    }

    /// Number of tasks processed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchProcessor for DocumentingProcessor {
    async fn process(&self, task: &Task) -> WorkflowResult<CompletionData> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let Some(item) = &task.work_item else {
            let label = match task.kind {
                TaskKind::Analysis => "analysis",
                TaskKind::Summary => "summary",
                TaskKind::Item => "item",
            };
            return Ok(CompletionData::success().with_notes(label));
        };

        if self.reject_category.as_deref() == Some(item.category.as_str()) {
            return Err(WorkflowError::Processing(format!(
                "{} files are not documented",
                item.category
            )));
        }

        Ok(CompletionData::success().with_output(serde_json::json!({
            "path": item.path,
            "section": format!("## {}", item.path),
        })))
    }
}
