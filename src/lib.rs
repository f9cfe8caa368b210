#![forbid(unsafe_code)]

//! Model Context Protocol tool server that routes JSON-RPC calls to live
//! event-stream and NDJSON sessions, falling back to synchronous replies.

pub mod config;
pub mod errors;
pub mod mcp;

pub use config::ServerConfig;
pub use errors::{AppError, Result};
