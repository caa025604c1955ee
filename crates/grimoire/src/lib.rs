pub mod agent;
pub mod bounds;
pub mod conversation;
pub mod errors;
pub mod kit;
pub mod mage;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod toolkits;

pub use agent::{Agent, AgentConfig, Observer, UsageStats};
pub use conversation::Conversation;
pub use errors::{ClientError, MageError, MageResult, ToolError, ToolResult};
pub use kit::{Kit, KitTool, ToolOutcome, ToolOutput};
pub use mage::{Mage, MageVariant, Portal, PortalConfig};
