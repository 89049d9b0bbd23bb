pub mod dispatcher;
pub mod mcp;
pub mod registry;

pub use dispatcher::{ToolDispatcher, DEFAULT_MAX_CONCURRENT_TOOLS};
pub use mcp::{connect_all, McpClient};
pub use registry::{Tool, ToolCollaborator, ToolError, ToolRegistry, ToolSpec};
