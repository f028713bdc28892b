//! MCP (Model Context Protocol) client side: the tool session the verifier
//! uses to inspect and query the live database.
//!
//! - `types`: JSON-RPC and MCP payloads, launch spec
//! - `rpc`: newline-delimited JSON-RPC channel
//! - `session`: stdio session lifecycle and the `ToolSession` seam

mod error;
mod rpc;
mod session;
mod types;

pub use error::SessionError;
pub use rpc::JsonRpcChannel;
pub use session::{
    tool_definition, SessionConnector, StdioConnector, StdioToolSession, ToolSession,
    MAX_TOOL_DESCRIPTION_BYTES,
};
pub use types::{LaunchSpec, McpCallToolResponse, McpContent, McpToolDescriptor, MCP_PROTOCOL_VERSION};
