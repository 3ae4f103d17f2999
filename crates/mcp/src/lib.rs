//! MCP stdio server for qq-agent.
//!
//! - JSON-RPC 2.0 message types (`types`)
//! - Line-delimited stdio peer with server-to-client request correlation (`transport`)
//! - Request loop answering `initialize`, `tools/list` and `tools/call` (`server`)
//! - The QQ tools themselves (`tools`)
//! - Context summarization through client-side sampling (`sampling`)

pub mod error;
pub mod sampling;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use {
    error::{Error, Result},
    sampling::SamplingSummarizer,
    server::McpServer,
    tools::{McpTool, ToolContext, ToolRegistry},
    transport::Peer,
};
