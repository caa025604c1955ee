//! Kits whose tools delegate to mages, letting a top-level model hand work down.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::portal::Portal;
use super::{Mage, MageVariant};
use crate::errors::{MageError, MageResult, ToolError, ToolResult};
use crate::kit::{parse_arguments, Kit, KitTool, ToolExecutor, ToolOutput};
use crate::models::tool::Tool;
use crate::prompt_template::Prompt;
use crate::toolkits::fs::LARGE_FILE_THRESHOLD;
use crate::toolkits::image::DEFAULT_IMAGE_QUERY;

pub const MAGE_KIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const UNIFIED_MAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a mage under a deadline. The token is cancelled when the deadline passes.
async fn execute_with_deadline(
    mage: &dyn Mage,
    command: &str,
    deadline: Duration,
) -> Result<MageResult<String>, tokio::time::error::Elapsed> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    tokio::time::timeout(deadline, mage.execute(&cancel, command)).await
}

/// Kit delegating to pre-built image and filesystem mages
pub fn mage_kit(
    image_mage: Option<Arc<dyn Mage>>,
    fs_mage: Option<Arc<dyn Mage>>,
) -> MageResult<Kit> {
    Kit::builder("mage")
        .with_tool(KitTool::new(
            Tool::new(
                "analyze_image_with_mage",
                "Use the image mage to analyze an image and answer questions about it",
                json!({
                    "type": "object",
                    "properties": {
                        "image_path": {"type": "string", "description": "Path to the image file to analyze"},
                        "query": {
                            "type": "string",
                            "description": "Question or instruction about the image (e.g., 'identify the objects')"
                        }
                    },
                    "required": ["image_path", "query"]
                }),
            ),
            ImageDelegate { mage: image_mage },
        ))
        .with_tool(KitTool::new(
            Tool::new(
                "execute_filesystem_operation",
                "Use the filesystem mage to read, write, list or analyze files. Large files are chunked or summarized by the mage.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "The filesystem task in plain language (e.g., 'summarize the large.log file')"
                        }
                    },
                    "required": ["command"]
                }),
            ),
            FilesystemDelegate { mage: fs_mage },
        ))
        .build()
}

#[derive(Deserialize)]
struct ImageDelegateArgs {
    #[serde(default)]
    image_path: String,
    #[serde(default)]
    query: String,
}

struct ImageDelegate {
    mage: Option<Arc<dyn Mage>>,
}

#[async_trait]
impl ToolExecutor for ImageDelegate {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        let args: ImageDelegateArgs = parse_arguments(arguments)?;
        if args.image_path.is_empty() {
            return Err(ToolError::InvalidParameters("image_path is required".to_string()));
        }
        let query = if args.query.is_empty() {
            DEFAULT_IMAGE_QUERY
        } else {
            args.query.as_str()
        };
        let mage = self
            .mage
            .as_deref()
            .ok_or_else(|| ToolError::ExecutionError("image mage not available".to_string()))?;

        let command = format!(
            "Please analyze the image at path '{}' and {}",
            args.image_path, query
        );
        match execute_with_deadline(mage, &command, MAGE_KIT_TIMEOUT).await {
            Ok(Ok(result)) => Ok(ToolOutput::Text(result)),
            Ok(Err(err)) => Err(ToolError::ExecutionError(format!(
                "image mage execution failed: {}",
                err
            ))),
            Err(_) => Err(ToolError::ExecutionError(
                "image mage execution failed: deadline exceeded".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct CommandArgs {
    #[serde(default)]
    command: String,
}

struct FilesystemDelegate {
    mage: Option<Arc<dyn Mage>>,
}

#[async_trait]
impl ToolExecutor for FilesystemDelegate {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        let args: CommandArgs = parse_arguments(arguments)?;
        if args.command.is_empty() {
            return Err(ToolError::InvalidParameters("command is required".to_string()));
        }
        let mage = self
            .mage
            .as_deref()
            .ok_or_else(|| ToolError::ExecutionError("filesystem mage not available".to_string()))?;

        match execute_with_deadline(mage, &args.command, MAGE_KIT_TIMEOUT).await {
            Ok(Ok(result)) => Ok(ToolOutput::Text(result)),
            Ok(Err(err)) => Err(ToolError::ExecutionError(format!(
                "filesystem mage execution failed: {}",
                err
            ))),
            Err(_) => Err(ToolError::ExecutionError(
                "filesystem mage execution failed: deadline exceeded".to_string(),
            )),
        }
    }
}

/// Kit with a single `task_mage` tool that summons a fresh mage of any variant per call
pub fn unified_mage_kit(portal: Portal) -> MageResult<Kit> {
    Kit::builder("unified_mage")
        .with_tool(KitTool::new(
            Tool::new(
                "task_mage",
                "Task a specialized mage. Available mages: 'filesystem' for file operations, 'image' for image analysis, 'shell' for running commands.",
                json!({
                    "type": "object",
                    "properties": {
                        "mage_type": {
                            "type": "string",
                            "enum": ["filesystem", "image", "shell"],
                            "description": "Which mage to task"
                        },
                        "command": {
                            "type": "string",
                            "description": "The task for the mage, e.g. 'analyze and summarize /abs/path/large.log' or 'describe /abs/path/shot.png'"
                        }
                    },
                    "required": ["mage_type", "command"]
                }),
            ),
            TaskMage { portal },
        ))
        .build()
}

/// Role message seeded into a freshly summoned mage
fn role_context(variant: MageVariant) -> MageResult<String> {
    let rendered = match variant {
        MageVariant::Filesystem => Prompt::FsMageRole.render(&json!({
            "large_file_kb": LARGE_FILE_THRESHOLD / 1024,
        }))?,
        MageVariant::Image => Prompt::ImageMageRole.render(&json!({}))?,
        MageVariant::Shell => Prompt::ShellMageRole.render(&json!({}))?,
    };
    Ok(rendered)
}

#[derive(Deserialize)]
struct TaskMageArgs {
    mage_type: String,
    command: String,
}

struct TaskMage {
    portal: Portal,
}

#[async_trait]
impl ToolExecutor for TaskMage {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        let args: TaskMageArgs = parse_arguments(arguments)?;
        let variant: MageVariant = args.mage_type.parse().map_err(|_| {
            ToolError::InvalidParameters(format!(
                "unknown mage type: {}. Available types: 'filesystem', 'image', 'shell'",
                args.mage_type
            ))
        })?;

        let mage = self.portal.summon(variant).map_err(|e| {
            ToolError::ExecutionError(format!("failed to summon {} mage: {}", variant, e))
        })?;
        let context = role_context(variant)
            .map_err(|e| ToolError::Internal(format!("failed to add context: {}", e)))?;
        mage.add_to_context(&context)
            .await
            .map_err(|e| ToolError::Internal(format!("failed to add context: {}", e)))?;

        info!(mage = %variant, command = %args.command, "executing mage task");
        match execute_with_deadline(mage.as_ref(), &args.command, UNIFIED_MAGE_TIMEOUT).await {
            Ok(Ok(result)) => Ok(ToolOutput::Text(result)),
            Ok(Err(MageError::Cancelled)) => Err(ToolError::ExecutionError(
                "mage execution cancelled: execution cancelled".to_string(),
            )),
            Ok(Err(err)) => Err(ToolError::ExecutionError(format!(
                "mage execution failed: {}",
                err
            ))),
            Err(_) => Err(ToolError::ExecutionError(
                "mage execution cancelled: deadline exceeded".to_string(),
            )),
        }
    }
}
