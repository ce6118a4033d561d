mod init_error;
mod mcp_error;
mod tool_error;

pub use init_error::InitError;
pub use mcp_error::{ErrorCode, McpError};
pub use tool_error::{ToolError, ToolErrorKind, Violation};
