use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{io_failure, structured};
use crate::bounds::{validate_path, ProjectBounds};
use crate::errors::{MageResult, ToolError, ToolResult};
use crate::kit::{parse_arguments, Kit, KitTool, ToolOutput};
use crate::models::tool::Tool;

/// Files larger than this are previewed rather than returned whole
pub const LARGE_FILE_THRESHOLD: u64 = 400 * 1024;

/// Bytes shown from each end of a previewed file
const PREVIEW_CHUNK: u64 = 100 * 1024;

const DEFAULT_CHUNK_LINES: usize = 1000;

/// Line counting is skipped above this size
const LINE_COUNT_LIMIT: u64 = 10 * 1024 * 1024;

#[derive(Deserialize)]
struct PathArgs {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct ChunkArgs {
    path: String,
    start_line: Option<usize>,
    end_line: Option<usize>,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Filesystem kit: read, chunked read, write, list and analyze, all confined to `bounds`
pub fn fs_kit(bounds: &[ProjectBounds]) -> MageResult<Kit> {
    Kit::builder("filesystem")
        .with_tool(read_file_tool(bounds.to_vec()))
        .with_tool(read_file_chunk_tool(bounds.to_vec()))
        .with_tool(write_file_tool(bounds.to_vec()))
        .with_tool(list_directory_tool(bounds.to_vec()))
        .with_tool(analyze_file_tool(bounds.to_vec()))
        .build()
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": description}
        },
        "required": ["path"]
    })
}

fn format_timestamp(time: std::io::Result<SystemTime>) -> String {
    time.map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub(crate) fn human_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = size as f64;
    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes / KB)
    } else {
        format!("{} bytes", size)
    }
}

fn megabytes(size: u64) -> f64 {
    size as f64 / (1024.0 * 1024.0)
}

fn require_file(path: &Path) -> ToolResult<fs::Metadata> {
    let metadata = fs::metadata(path).map_err(|e| io_failure("stat file", path, e))?;
    if metadata.is_dir() {
        return Err(ToolError::ExecutionError(format!(
            "path '{}' is a directory, not a file",
            path.display()
        )));
    }
    Ok(metadata)
}

fn read_file_tool(bounds: Vec<ProjectBounds>) -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "read_file",
            format!(
                "Read the contents of a file. Files over {} KB are returned as a head and tail preview; use read_file_chunk for those.",
                LARGE_FILE_THRESHOLD / 1024
            ),
            path_schema("Absolute path to the file (e.g., /home/user/project/file.txt)"),
        ),
        move |args| {
            let args: PathArgs = parse_arguments(args)?;
            let path = validate_path(&bounds, &args.path)?;
            let metadata = require_file(&path)?;

            if metadata.len() <= LARGE_FILE_THRESHOLD {
                let content = fs::read(&path).map_err(|e| io_failure("read file", &path, e))?;
                return Ok(ToolOutput::Text(String::from_utf8_lossy(&content).into_owned()));
            }
            preview_large_file(&path, metadata.len()).map(ToolOutput::Text)
        },
    )
}

fn preview_large_file(path: &Path, size: u64) -> ToolResult<String> {
    let mut file = fs::File::open(path).map_err(|e| io_failure("open file", path, e))?;

    let mut head = Vec::with_capacity(PREVIEW_CHUNK as usize);
    (&mut file)
        .take(PREVIEW_CHUNK)
        .read_to_end(&mut head)
        .map_err(|e| io_failure("read beginning of", path, e))?;

    let mut tail = Vec::with_capacity(PREVIEW_CHUNK as usize);
    file.seek(SeekFrom::Start(size.saturating_sub(PREVIEW_CHUNK)))
        .map_err(|e| io_failure("seek in", path, e))?;
    file.read_to_end(&mut tail)
        .map_err(|e| io_failure("read end of", path, e))?;

    let lines = count_lines(path).unwrap_or(0);
    let omitted = size.saturating_sub((head.len() + tail.len()) as u64);

    Ok(format!(
        "File: {path}\n\
         Size: {size} bytes ({mb:.2} MB)\n\
         Lines: {lines}\n\n\
         WARNING: This file is too large to read entirely (exceeds {limit} bytes). Showing beginning and end portions only.\n\
         Use read_file_chunk with start_line and end_line to read specific sections.\n\n\
         ========== BEGINNING OF FILE (first {head_len} bytes) ==========\n\
         {head}\n\n\
         ========== [TRUNCATED - {omitted} bytes omitted] ==========\n\n\
         ========== END OF FILE (last {tail_len} bytes) ==========\n\
         {tail}\n\
         ========== END OF FILE ==========",
        path = path.display(),
        size = size,
        mb = megabytes(size),
        lines = lines,
        limit = LARGE_FILE_THRESHOLD,
        head_len = head.len(),
        head = String::from_utf8_lossy(&head),
        omitted = omitted,
        tail_len = tail.len(),
        tail = String::from_utf8_lossy(&tail),
    ))
}

fn count_lines(path: &Path) -> std::io::Result<usize> {
    let content = fs::read(path)?;
    Ok(String::from_utf8_lossy(&content).lines().count())
}

fn read_file_chunk_tool(bounds: Vec<ProjectBounds>) -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "read_file_chunk",
            "Read a range of lines from a file. Use this for files too large for read_file.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path to the file"},
                    "start_line": {"type": "integer", "description": "First line to read, 1-based. Default: 1"},
                    "end_line": {"type": "integer", "description": "Last line to read, inclusive. Default: start_line + 999"}
                },
                "required": ["path"]
            }),
        ),
        move |args| {
            let args: ChunkArgs = parse_arguments(args)?;
            let start = args.start_line.unwrap_or(1).max(1);
            let end = args
                .end_line
                .unwrap_or_else(|| start.saturating_add(DEFAULT_CHUNK_LINES - 1));
            if end < start {
                return Err(ToolError::InvalidParameters(
                    "end_line must be greater than or equal to start_line".to_string(),
                ));
            }

            let path = validate_path(&bounds, &args.path)?;
            require_file(&path)?;
            let content = fs::read(&path).map_err(|e| io_failure("read file", &path, e))?;
            let content = String::from_utf8_lossy(&content);
            let lines: Vec<&str> = content.lines().collect();
            let total = lines.len();

            if start > total {
                return Err(ToolError::ExecutionError(format!(
                    "no lines found in the specified range (file has {} lines)",
                    total
                )));
            }
            let last = end.min(total);

            let mut text = format!(
                "File: {}\nLines {}-{} of {}:\n",
                path.display(),
                start,
                last,
                total
            );
            text.push_str(&lines[start - 1..last].join("\n"));
            if last < total {
                text.push_str(&format!("\n\n[{} more lines remaining]", total - last));
            }
            Ok(ToolOutput::Text(text))
        },
    )
}

fn write_file_tool(bounds: Vec<ProjectBounds>) -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "write_file",
            "Write content to a file, creating it and any missing parent directories",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path to the file"},
                    "content": {"type": "string", "description": "Content to write"}
                },
                "required": ["path", "content"]
            }),
        ),
        move |args| {
            let args: WriteArgs = parse_arguments(args)?;
            let path = validate_path(&bounds, &args.path)?;

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_failure("create directory", parent, e))?;
            }
            fs::write(&path, &args.content).map_err(|e| io_failure("write file", &path, e))?;

            Ok(ToolOutput::Text(format!(
                "Successfully wrote {} bytes to {}",
                args.content.len(),
                path.display()
            )))
        },
    )
}

fn list_directory_tool(bounds: Vec<ProjectBounds>) -> KitTool {
    let description = if bounds.is_empty() {
        "List contents of a directory".to_string()
    } else {
        let roots: Vec<String> = bounds
            .iter()
            .map(|b| format!("{} ({})", b.abs_path.display(), b.name))
            .collect();
        format!(
            "List contents of a directory within the project. Available directories: {}",
            roots.join(", ")
        )
    };

    KitTool::from_fn(
        Tool::new(
            "list_directory",
            description,
            path_schema("Absolute path to the directory"),
        ),
        move |args| {
            let args: PathArgs = parse_arguments(args)?;
            let path = validate_path(&bounds, &args.path)?;
            let entries = fs::read_dir(&path).map_err(|e| io_failure("read directory", &path, e))?;

            let mut directories = Vec::new();
            let mut files = Vec::new();
            let mut total = 0;
            for entry in entries.flatten() {
                total += 1;
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let item = json!({
                    "name": entry.file_name().to_string_lossy(),
                    "size_bytes": metadata.len(),
                    "modified": format_timestamp(metadata.modified()),
                });
                if metadata.is_dir() {
                    directories.push(item);
                } else {
                    files.push(item);
                }
            }

            Ok(ToolOutput::Structured(structured([
                ("path", json!(path.display().to_string())),
                ("directories", Value::Array(directories)),
                ("files", Value::Array(files)),
                ("total_items", json!(total)),
            ])))
        },
    )
}

fn analyze_file_tool(bounds: Vec<ProjectBounds>) -> KitTool {
    KitTool::from_fn(
        Tool::new(
            "analyze_file",
            "Analyze a file to get its size, modification time, line count and how best to read it",
            path_schema("Absolute path to the file to analyze"),
        ),
        move |args| {
            let args: PathArgs = parse_arguments(args)?;
            let path = validate_path(&bounds, &args.path)?;
            let metadata = require_file(&path)?;
            let size = metadata.len();

            let mut result = structured([
                ("path", json!(path.display().to_string())),
                ("size_bytes", json!(size)),
                ("size_human", json!(human_size(size))),
                ("modified", json!(format_timestamp(metadata.modified()))),
                ("readonly", json!(metadata.permissions().readonly())),
            ]);

            if size < LINE_COUNT_LIMIT {
                if let Ok(lines) = count_lines(&path) {
                    result.insert("line_count".to_string(), json!(lines));
                }
            }

            if size > LARGE_FILE_THRESHOLD {
                result.insert(
                    "warning".to_string(),
                    json!(format!(
                        "This file is too large to read entirely ({:.2} MB). Use 'read_file_chunk' to read specific portions.",
                        megabytes(size)
                    )),
                );
                result.insert(
                    "recommendation".to_string(),
                    json!("Use 'read_file_chunk' with start_line and end_line parameters to read specific sections"),
                );
            } else {
                result.insert("can_read_fully".to_string(), json!(true));
            }

            Ok(ToolOutput::Structured(result))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::ToolOutcome;
    use crate::models::message::ToolCall;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        kit: Kit,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let kit = fs_kit(&[ProjectBounds::new("proj", "test project", root)]).unwrap();
            Self { dir, kit }
        }

        fn path(&self, name: &str) -> String {
            self.dir
                .path()
                .canonicalize()
                .unwrap()
                .join(name)
                .display()
                .to_string()
        }

        async fn call(&self, name: &str, args: Value) -> ToolOutcome {
            self.kit
                .call(&ToolCall::new("c1", name, args.to_string()))
                .await
        }
    }

    #[test]
    fn test_kit_declares_all_tools() {
        let kit = fs_kit(&[]).unwrap();
        let names: Vec<&str> = kit.get_tools().iter().map(Tool::name).collect();
        assert_eq!(
            names,
            vec!["read_file", "read_file_chunk", "write_file", "list_directory", "analyze_file"]
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let fx = Fixture::new();
        let target = fx.path("nested/dir/notes.txt");

        let outcome = fx
            .call("write_file", json!({"path": target, "content": "hello"}))
            .await;
        assert_eq!(
            outcome.content(),
            format!("Successfully wrote 5 bytes to {}", target)
        );

        let outcome = fx.call("read_file", json!({"path": target})).await;
        assert_eq!(outcome.content(), "hello");
    }

    #[tokio::test]
    async fn test_read_outside_bounds_is_rejected() {
        let fx = Fixture::new();
        let outcome = fx.call("read_file", json!({"path": "/etc/hostname"})).await;
        assert!(matches!(outcome.result, Err(ToolError::PathViolation(_))));
        assert!(outcome.content().starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_read_directory_is_an_error() {
        let fx = Fixture::new();
        let outcome = fx.call("read_file", json!({"path": fx.path("")})).await;
        assert!(outcome.content().contains("is a directory, not a file"));
    }

    #[tokio::test]
    async fn test_large_file_is_previewed() {
        let fx = Fixture::new();
        let target = fx.path("big.txt");
        let line = "x".repeat(99) + "\n";
        fs::write(&target, line.repeat(5000)).unwrap();

        let text = fx.call("read_file", json!({"path": target})).await.content();
        assert!(text.contains("Size: 500000 bytes"));
        assert!(text.contains("Lines: 5000"));
        assert!(text.contains("BEGINNING OF FILE (first 102400 bytes)"));
        assert!(text.contains("[TRUNCATED - 295200 bytes omitted]"));
        assert!(text.len() < 250_000);
    }

    #[tokio::test]
    async fn test_read_file_chunk_ranges() {
        let fx = Fixture::new();
        let target = fx.path("lines.txt");
        let body: Vec<String> = (1..=10).map(|i| format!("line {}", i)).collect();
        fs::write(&target, body.join("\n")).unwrap();

        let text = fx
            .call("read_file_chunk", json!({"path": target, "start_line": 3, "end_line": 4}))
            .await
            .content();
        assert_eq!(
            text,
            format!("File: {}\nLines 3-4 of 10:\nline 3\nline 4\n\n[6 more lines remaining]", target)
        );

        let text = fx
            .call("read_file_chunk", json!({"path": target, "start_line": 9}))
            .await
            .content();
        assert!(text.ends_with("line 9\nline 10"));

        let outcome = fx
            .call("read_file_chunk", json!({"path": target, "start_line": 20}))
            .await;
        assert!(outcome.content().contains("file has 10 lines"));

        let outcome = fx
            .call("read_file_chunk", json!({"path": target, "start_line": 5, "end_line": 2}))
            .await;
        assert!(matches!(outcome.result, Err(ToolError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_read_file_chunk_start_near_max() {
        let fx = Fixture::new();
        let target = fx.path("lines.txt");
        fs::write(&target, "one\ntwo\n").unwrap();

        let outcome = fx
            .call("read_file_chunk", json!({"path": target, "start_line": u64::MAX}))
            .await;
        assert!(matches!(outcome.result, Err(ToolError::ExecutionError(_))));
        assert!(outcome.content().contains("file has 2 lines"));
    }

    #[tokio::test]
    async fn test_list_directory_splits_files_and_dirs() {
        let fx = Fixture::new();
        fs::create_dir(fx.path("sub")).unwrap();
        fs::write(fx.path("a.txt"), "abc").unwrap();

        let outcome = fx.call("list_directory", json!({"path": fx.path("")})).await;
        let Ok(ToolOutput::Structured(map)) = outcome.result else {
            panic!("expected structured output");
        };
        assert_eq!(map["total_items"], 2);
        assert_eq!(map["directories"][0]["name"], "sub");
        assert_eq!(map["files"][0]["name"], "a.txt");
        assert_eq!(map["files"][0]["size_bytes"], 3);
    }

    #[tokio::test]
    async fn test_analyze_file_recommends_chunking() {
        let fx = Fixture::new();
        let small = fx.path("small.txt");
        fs::write(&small, "one\ntwo\n").unwrap();
        let big = fx.path("big.bin");
        fs::write(&big, vec![b'a'; (LARGE_FILE_THRESHOLD + 1) as usize]).unwrap();

        let Ok(ToolOutput::Structured(map)) = fx.call("analyze_file", json!({"path": small})).await.result else {
            panic!("expected structured output");
        };
        assert_eq!(map["line_count"], 2);
        assert_eq!(map["size_human"], "8 bytes");
        assert_eq!(map["can_read_fully"], true);

        let Ok(ToolOutput::Structured(map)) = fx.call("analyze_file", json!({"path": big})).await.result else {
            panic!("expected structured output");
        };
        assert!(map.get("can_read_fully").is_none());
        assert!(map["recommendation"].as_str().unwrap().contains("read_file_chunk"));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(2048), "2.00 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }
}
