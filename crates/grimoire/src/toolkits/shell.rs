use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use super::structured;
use crate::bounds::{validate_path, ProjectBounds};
use crate::errors::{MageResult, ToolError, ToolResult};
use crate::kit::{parse_arguments, Kit, KitTool, ToolExecutor, ToolOutput};
use crate::models::tool::Tool;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 300;

/// What the kit knows about the host it runs commands on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    /// Shell name, e.g. `bash`
    pub shell: String,
    pub shell_path: PathBuf,
    pub is_windows: bool,
}

impl Platform {
    pub fn detect() -> Self {
        let is_windows = cfg!(windows);
        let shell_path = if is_windows {
            PathBuf::from("cmd.exe")
        } else {
            std::env::var_os("SHELL")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/bin/sh"))
        };
        let shell = shell_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sh".to_string());

        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            shell,
            shell_path,
            is_windows,
        }
    }

    fn command(&self, script: &str) -> Command {
        let mut command = Command::new(&self.shell_path);
        if self.is_windows {
            command.arg("/C");
        } else {
            command.arg("-c");
        }
        command.arg(script);
        command
    }
}

/// Shell kit: run commands and inspect the host
pub fn shell_kit(bounds: &[ProjectBounds]) -> MageResult<Kit> {
    let platform = Platform::detect();
    Kit::builder("shell")
        .with_tool(KitTool::new(
            execute_command_declaration(&platform),
            ExecuteCommand {
                platform: platform.clone(),
                bounds: bounds.to_vec(),
            },
        ))
        .with_tool(working_directory_tool())
        .with_tool(system_info_tool(platform))
        .build()
}

fn execute_command_declaration(platform: &Platform) -> Tool {
    Tool::new(
        "execute_command",
        format!(
            "Execute a shell command on {} using {}. Commands run with a timeout.",
            platform.os, platform.shell
        ),
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": format!("The command to execute, in {} syntax", platform.shell)
                },
                "working_dir": {
                    "type": "string",
                    "description": "Absolute working directory for the command (optional, must be within project bounds)"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "description": format!(
                        "Command timeout in seconds. Default: {}, max: {}",
                        DEFAULT_COMMAND_TIMEOUT_SECS, MAX_COMMAND_TIMEOUT_SECS
                    )
                }
            },
            "required": ["command"]
        }),
    )
}

#[derive(Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// Clamp a requested timeout into `1..=MAX_COMMAND_TIMEOUT_SECS`, defaulting when unset or zero
fn effective_timeout(requested: Option<u64>) -> Duration {
    let secs = match requested {
        Some(0) | None => DEFAULT_COMMAND_TIMEOUT_SECS,
        Some(secs) => secs.min(MAX_COMMAND_TIMEOUT_SECS),
    };
    Duration::from_secs(secs)
}

struct ExecuteCommand {
    platform: Platform,
    bounds: Vec<ProjectBounds>,
}

#[async_trait]
impl ToolExecutor for ExecuteCommand {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        let args: ExecuteArgs = parse_arguments(arguments)?;
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidParameters("command must not be empty".to_string()));
        }

        let working_dir = match args.working_dir.as_deref().filter(|d| !d.is_empty()) {
            Some(dir) => Some(validate_path(&self.bounds, dir)?),
            None => None,
        };
        let timeout = effective_timeout(args.timeout_seconds);

        let mut command = self.platform.command(&args.command);
        command.kill_on_drop(true);
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }

        debug!(command = %args.command, ?working_dir, ?timeout, "running shell command");
        let started = Instant::now();
        let (stdout, stderr, exit_code) = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => (
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                output.status.code().unwrap_or(-1),
            ),
            Ok(Err(err)) => {
                return Err(ToolError::ExecutionError(format!(
                    "failed to start command: {}",
                    err
                )))
            }
            Err(_) => {
                warn!(command = %args.command, ?timeout, "shell command timed out");
                (
                    String::new(),
                    format!("command timed out after {} seconds", timeout.as_secs()),
                    -1,
                )
            }
        };

        Ok(ToolOutput::Structured(structured([
            ("command", json!(args.command)),
            ("stdout", json!(stdout)),
            ("stderr", json!(stderr)),
            ("exit_code", json!(exit_code)),
            ("duration_ms", json!(started.elapsed().as_millis() as u64)),
        ])))
    }
}

#[derive(Deserialize)]
struct WorkingDirectoryArgs {
    #[serde(default)]
    list_contents: Option<bool>,
}

fn list_names(dir: &Path) -> (Vec<String>, Vec<String>) {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(format!("{}/", name));
            } else {
                files.push(name);
            }
        }
    }
    dirs.sort();
    files.sort();
    (dirs, files)
}

fn working_directory_tool() -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "get_working_directory",
            "Get the current working directory and optionally list its contents",
            json!({
                "type": "object",
                "properties": {
                    "list_contents": {"type": "boolean", "description": "List directory contents. Default: true"}
                }
            }),
        ),
        |args| {
            let args: WorkingDirectoryArgs = parse_arguments(args)?;
            let cwd = std::env::current_dir().map_err(|e| {
                ToolError::ExecutionError(format!("failed to get working directory: {}", e))
            })?;

            let mut result = structured([("path", json!(cwd.display().to_string()))]);
            if args.list_contents.unwrap_or(true) {
                let (dirs, files) = list_names(&cwd);
                result.insert("directories".to_string(), json!(dirs));
                result.insert("files".to_string(), json!(files));
            }
            Ok(ToolOutput::Structured(result))
        },
    )
}

fn system_info_tool(platform: Platform) -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "get_system_info",
            "Get system and platform information",
            json!({"type": "object", "properties": {}}),
        ),
        move |_| {
            let path_dirs: Vec<String> = std::env::var_os("PATH")
                .map(|p| {
                    std::env::split_paths(&p)
                        .map(|d| d.display().to_string())
                        .collect()
                })
                .unwrap_or_default();
            let num_cpu = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);

            Ok(ToolOutput::Structured(structured([
                (
                    "platform",
                    serde_json::to_value(&platform)
                        .map_err(|e| ToolError::Internal(e.to_string()))?,
                ),
                ("num_cpu", json!(num_cpu)),
                ("path_dirs", Value::from(path_dirs)),
            ])))
        },
    )
}
