use serde::{Deserialize, Serialize};

use super::null_as_default;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The function half of a tool call: the tool name and its raw JSON argument string
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: String,
}

/// A request from the model to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn arguments(&self) -> &[u8] {
        self.function.arguments.as_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultItem {
    pub tool_call_id: String,
    pub content: String,
}

/// One typed piece of a structured message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    ToolCall { tool_call: ToolCall },
    ToolResult { tool_result: ToolResultItem },
}

impl ContentItem {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentItem::Text { text: text.into() }
    }

    /// Reference an image by URL; the detail level defaults to `auto`
    pub fn image_url<S: Into<String>>(url: S, detail: Option<&str>) -> Self {
        ContentItem::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: Some(detail.unwrap_or("auto").to_string()),
            },
        }
    }

    /// Embed base64 image data, wrapping it in a data URL unless it already is one
    pub fn image_base64(data: &str, mime_type: &str, detail: Option<&str>) -> Self {
        let url = if data.starts_with("data:") {
            data.to_string()
        } else {
            format!("data:{};base64,{}", mime_type, data)
        };
        Self::image_url(url, detail)
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        ContentItem::ToolCall {
            tool_call: ToolCall::new(id, name, arguments),
        }
    }

    pub fn tool_result<I: Into<String>, C: Into<String>>(tool_call_id: I, content: C) -> Self {
        ContentItem::ToolResult {
            tool_result: ToolResultItem {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            },
        }
    }
}

/// A message body is either plain text or an ordered list of typed items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Items(Vec<ContentItem>),
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<Vec<ContentItem>> for MessageContent {
    fn from(items: Vec<ContentItem>) -> Self {
        MessageContent::Items(items)
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new<C: Into<MessageContent>>(role: Role, content: C) -> Self {
        Message {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system<S: Into<String>>(text: S) -> Self {
        Self::new(Role::System, text.into())
    }

    pub fn user<S: Into<String>>(text: S) -> Self {
        Self::new(Role::User, text.into())
    }

    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Self::new(Role::Assistant, text.into())
    }

    /// A user message built from typed items, e.g. text plus an embedded image
    pub fn user_items(items: Vec<ContentItem>) -> Self {
        Self::new(Role::User, items)
    }

    /// The answer to a tool call, linked back to it by id
    pub fn tool_result<I: Into<String>, S: Into<String>>(tool_call_id: I, content: S) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }

    /// Add a tool call to an assistant message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The plain-text body, if the content is text rather than typed items
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(MessageContent::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Approximate payload size of this message in bytes
    pub fn size_bytes(&self) -> usize {
        let content = match &self.content {
            Some(MessageContent::Text(text)) => text.len(),
            Some(MessageContent::Items(items)) => {
                serde_json::to_vec(items).map(|v| v.len()).unwrap_or(0)
            }
            None => 0,
        };
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|tc| tc.id.len() + tc.kind.len() + tc.function.name.len() + tc.function.arguments.len())
            .sum();

        content
            + self.role.as_str().len()
            + self.name.as_deref().map_or(0, str::len)
            + self.tool_call_id.as_deref().map_or(0, str::len)
            + calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_serialization() {
        let message = Message::tool_result("call_1", "42");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "content": "42", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn test_assistant_tool_call_with_null_content() {
        let raw = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_123",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}
            }]
        });

        let message: Message = serde_json::from_value(raw).unwrap();
        assert!(message.content.is_none());
        assert!(message.text().is_none());
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name(), "get_weather");
        assert_eq!(message.tool_calls[0].arguments(), b"{\"location\":\"Paris\"}");
    }

    #[test]
    fn test_null_tool_calls_read_as_empty() {
        let raw = json!({"role": "assistant", "content": "hi", "tool_calls": null});
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.text(), Some("hi"));
        assert!(!message.has_tool_calls());

        let raw = json!({
            "role": "assistant",
            "tool_calls": [{"id": "call_1", "function": {"name": "ls", "arguments": null}}]
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(message.tool_calls[0].name(), "ls");
        assert_eq!(message.tool_calls[0].function.arguments, "");
    }

    #[test]
    fn test_complex_user_message() {
        let message = Message::user_items(vec![
            ContentItem::text("What is in this picture?"),
            ContentItem::image_base64("aGVsbG8=", "image/png", None),
        ]);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["content"][0], json!({"type": "text", "text": "What is in this picture?"}));
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/png;base64,aGVsbG8="
        );
        assert_eq!(value["content"][1]["image_url"]["detail"], "auto");
        assert!(message.text().is_none());
    }

    #[test]
    fn test_image_base64_keeps_existing_data_url() {
        let item = ContentItem::image_base64("data:image/jpeg;base64,abc", "image/png", Some("high"));
        match item {
            ContentItem::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/jpeg;base64,abc");
                assert_eq!(image_url.detail.as_deref(), Some("high"));
            }
            _ => panic!("Expected image item"),
        }
    }

    #[test]
    fn test_size_bytes_counts_tool_calls() {
        let message = Message::assistant("").with_tool_call(ToolCall::new("id", "ls", "{}"));
        // role(9) + id(2) + type(8) + name(2) + args(2)
        assert_eq!(message.size_bytes(), 9 + 2 + 8 + 2 + 2);
    }
}
