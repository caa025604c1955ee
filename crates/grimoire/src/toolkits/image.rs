use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bounds::{validate_path, ProjectBounds};
use crate::conversation::Conversation;
use crate::errors::{MageResult, ToolError, ToolResult};
use crate::kit::{parse_arguments, Kit, KitTool, ToolExecutor, ToolOutput};
use crate::models::tool::Tool;
use crate::providers::base::{Provider, RequestOptions};
use crate::providers::configs::{RetryConfig, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::providers::utils::read_image_file;

pub const DEFAULT_IMAGE_QUERY: &str = "describe what you see in detail";

const VISION_SYSTEM_PROMPT: &str = "You are a helpful assistant that analyzes images. \
Your only task is to analyze the image and return an in-depth description of it, \
detailed yet concise, so a higher-order model can act on what you saw.";

/// Vision requests are slow and heavily rate limited, so they back off from 2s up to 60s
pub fn image_retry_config() -> RetryConfig {
    RetryConfig::default().with_delays(Duration::from_secs(2), Duration::from_secs(60))
}

/// Image kit: a single `analyze_image` tool backed by its own vision conversation
pub fn image_kit(
    provider: Arc<dyn Provider>,
    model: &str,
    bounds: &[ProjectBounds],
) -> MageResult<Kit> {
    Kit::builder("image")
        .with_tool(KitTool::new(
            Tool::new(
                "analyze_image",
                "Analyze an image file using a vision model and get a detailed description",
                json!({
                    "type": "object",
                    "properties": {
                        "image_path": {
                            "type": "string",
                            "description": "Absolute path to the image file (png or jpeg)"
                        },
                        "query": {
                            "type": "string",
                            "description": "Question or instruction about the image (e.g., 'What text is visible?')"
                        }
                    },
                    "required": ["image_path"]
                }),
            ),
            AnalyzeImage {
                provider,
                model: model.to_string(),
                bounds: bounds.to_vec(),
            },
        ))
        .build()
}

#[derive(Deserialize)]
struct AnalyzeArgs {
    image_path: String,
    #[serde(default)]
    query: Option<String>,
}

struct AnalyzeImage {
    provider: Arc<dyn Provider>,
    model: String,
    bounds: Vec<ProjectBounds>,
}

#[async_trait]
impl ToolExecutor for AnalyzeImage {
    async fn execute(&self, arguments: &[u8]) -> ToolResult<ToolOutput> {
        let args: AnalyzeArgs = parse_arguments(arguments)?;
        let query = args
            .query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_QUERY.to_string());

        let path = validate_path(&self.bounds, &args.image_path)?;
        let (encoded, mime_type) =
            read_image_file(&path).map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let mut conversation = Conversation::new(self.provider.clone(), self.model.clone());
        conversation
            .add_system_message(VISION_SYSTEM_PROMPT)
            .add_complex_user_message(&query, &encoded, mime_type, Some("high"));

        info!(image = %path.display(), model = %self.model, "analyzing image");
        let reply = conversation
            .send(
                &CancellationToken::new(),
                DEFAULT_TEMPERATURE,
                DEFAULT_MAX_TOKENS,
                RequestOptions::new(),
            )
            .await
            .map_err(|e| ToolError::ExecutionError(format!("vision model error: {}", e)))?;

        reply
            .text()
            .map(|text| ToolOutput::Text(text.to_string()))
            .ok_or_else(|| ToolError::ExecutionError("vision model returned no text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::models::message::{ContentItem, Message, MessageContent, ToolCall};
    use crate::providers::mock::{MockProvider, MockReply};

    fn write_png(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.canonicalize().unwrap().join("shot.png");
        std::fs::write(&path, b"not really a png").unwrap();
        path
    }

    #[test]
    fn test_image_retry_profile() {
        let config = image_retry_config();
        assert_eq!(config.initial_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_analyze_image_sends_one_complex_message() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path());
        let provider = MockProvider::new(vec![Message::assistant("a cat on a mat")]);
        let bounds = [ProjectBounds::new("proj", "", dir.path().canonicalize().unwrap())];
        let kit = image_kit(Arc::new(provider.clone()), "grok-vision", &bounds).unwrap();

        let args = json!({"image_path": image.display().to_string()}).to_string();
        let outcome = kit.call(&ToolCall::new("c1", "analyze_image", args)).await;
        assert_eq!(outcome.content(), "a cat on a mat");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "grok-vision");
        let user = &requests[0].messages[1];
        let Some(MessageContent::Items(items)) = &user.content else {
            panic!("expected typed items");
        };
        assert_eq!(items[0], ContentItem::text(DEFAULT_IMAGE_QUERY));
        match &items[1] {
            ContentItem::ImageUrl { image_url } => {
                assert!(image_url.url.starts_with("data:image/png;base64,"));
                assert_eq!(image_url.detail.as_deref(), Some("high"));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_analyze_image_path_outside_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(Vec::<Message>::new());
        let bounds = [ProjectBounds::new("proj", "", dir.path().canonicalize().unwrap())];
        let kit = image_kit(Arc::new(provider.clone()), "m", &bounds).unwrap();

        let outcome = kit
            .call(&ToolCall::new("c1", "analyze_image", r#"{"image_path":"/etc/shot.png"}"#))
            .await;
        assert!(matches!(outcome.result, Err(ToolError::PathViolation(_))));
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_image_provider_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_png(dir.path());
        let provider = MockProvider::new(vec![MockReply::Error(ClientError::NoResponseChoices)]);
        let kit = image_kit(Arc::new(provider), "m", &[]).unwrap();

        let args = json!({"image_path": image.display().to_string(), "query": "what?"}).to_string();
        let outcome = kit.call(&ToolCall::new("c1", "analyze_image", args)).await;
        assert_eq!(
            outcome.content(),
            "Error: Tool execution failed: vision model error: no response choices returned"
        );
    }
}
