//! Shared utilities for docflow crates
//!
//! Logging initialisation on top of `tracing-subscriber` and JSON snapshot
//! persistence used by the workflow engine.

pub mod json_store;
pub mod logging;

pub use json_store::{
    list_json_stems, load_json, remove_json, save_json_atomic, JsonStoreError, JsonStoreResult,
};
pub use logging::{format_error, LogLevel, LogOptions};
