//! Mages are small orchestration loops, each bound to one tool kit and one system preamble.
//!
//! They are created by a [`Portal`](portal::Portal) and share the loop in [`engine`]; the
//! variant modules only describe what makes each mage different.
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{MageError, MageResult};

pub mod engine;
pub mod fs;
pub mod image;
pub mod portal;
pub mod shell;
pub mod tasks;

pub use engine::{run_tool_loop, LoopSettings, MageEngine, MageProfile, ResultStrategy};
pub use portal::{Portal, PortalConfig, PortalSettings};

#[async_trait]
pub trait Mage: Send + Sync {
    fn name(&self) -> &str;

    /// Drop the chat history, context messages and accumulated result
    async fn reset(&self) -> MageResult<()>;

    /// Add a system message sent ahead of every later command
    async fn add_to_context(&self, context: &str) -> MageResult<()>;

    /// Run `command` to completion and return the accumulated result
    async fn execute(&self, cancel: &CancellationToken, command: &str) -> MageResult<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MageVariant {
    Filesystem,
    Image,
    Shell,
}

impl MageVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            MageVariant::Filesystem => "filesystem",
            MageVariant::Image => "image",
            MageVariant::Shell => "shell",
        }
    }
}

impl fmt::Display for MageVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MageVariant {
    type Err = MageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" | "file" => Ok(MageVariant::Filesystem),
            "image" | "vision" => Ok(MageVariant::Image),
            "shell" => Ok(MageVariant::Shell),
            other => Err(MageError::UnknownVariant(other.to_string())),
        }
    }
}
