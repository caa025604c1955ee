//! Built-in kits that mages hand to the model.
//!
//! Every kit that accepts a path routes it through [`crate::bounds::validate_path`] before
//! touching the filesystem.
pub mod fs;
pub mod image;
pub mod shell;

use serde_json::{Map, Value};

use crate::errors::ToolError;

/// Build a structured tool output from `(key, value)` pairs
pub(crate) fn structured<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

pub(crate) fn io_failure(action: &str, target: &std::path::Path, err: std::io::Error) -> ToolError {
    ToolError::ExecutionError(format!("failed to {} '{}': {}", action, target.display(), err))
}
