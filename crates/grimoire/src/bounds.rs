//! Project bounds: the allow-listed directory roots a path-accepting tool must stay inside.
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ToolError, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBounds {
    pub name: String,
    pub description: String,
    pub abs_path: PathBuf,
}

impl ProjectBounds {
    pub fn new<N, D, P>(name: N, description: D, abs_path: P) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            abs_path: abs_path.into(),
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Follow symlinks as far as the path exists, then re-attach the missing tail
fn resolve_existing(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        if let Ok(resolved) = existing.canonicalize() {
            return tail.iter().rev().fold(resolved, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn violation(message: String) -> ToolError {
    ToolError::PathViolation(message)
}

/// Validate `candidate` against `projects`, returning its absolute form.
///
/// Relative and `~` paths are rejected outright. With no bounds configured any absolute
/// path is accepted. Otherwise the path, after symlink resolution, must sit inside one
/// of the project roots.
pub fn validate_path(projects: &[ProjectBounds], candidate: &str) -> ToolResult<PathBuf> {
    let candidate = if candidate.is_empty() { "." } else { candidate };

    if candidate.starts_with("./") || candidate.starts_with("../") {
        return Err(violation(format!(
            "relative paths like '{}' are not allowed. Use absolute paths starting with / (e.g., /home/user/project/file.txt)",
            candidate
        )));
    }
    if candidate.starts_with('~') {
        return Err(violation(format!(
            "tilde expansion in '{}' is not supported. Use absolute paths starting with / (e.g., /home/user/project/file.txt)",
            candidate
        )));
    }

    let path = Path::new(candidate);
    let abs_path = if path.is_absolute() {
        normalize(path)
    } else if candidate == "." {
        std::env::current_dir()
            .map_err(|e| ToolError::Internal(format!("could not resolve current directory: {}", e)))?
    } else if let (Some(first), false) = (projects.first(), candidate.contains('/')) {
        return Err(violation(format!(
            "'{}' appears to be a relative path. Use absolute path like: {}",
            candidate,
            first.abs_path.join(candidate).display()
        )));
    } else {
        return Err(violation(format!(
            "path '{}' must be absolute (starting with /). Example: /home/user/project/{}",
            candidate, candidate
        )));
    };

    if projects.is_empty() {
        return Ok(abs_path);
    }

    let resolved = resolve_existing(&abs_path);
    for project in projects {
        let root = project
            .abs_path
            .canonicalize()
            .map_err(|e| {
                violation(format!(
                    "could not resolve project path '{}': {}",
                    project.abs_path.display(),
                    e
                ))
            })?;
        if resolved.starts_with(&root) {
            return Ok(abs_path);
        }
    }

    let allowed = projects
        .iter()
        .map(|p| format!("{} ({})", p.abs_path.display(), p.name))
        .collect::<Vec<_>>()
        .join(", ");
    let suggestion = path
        .file_name()
        .map(|name| format!("\nDid you mean: {}", projects[0].abs_path.join(name).display()))
        .unwrap_or_default();

    Err(violation(format!(
        "path '{}' is not within allowed directories: {}{}\nAlways use full absolute paths when working with files",
        candidate, allowed, suggestion
    )))
}
