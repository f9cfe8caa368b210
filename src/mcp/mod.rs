//! Model Context Protocol server layer.

pub mod connection;
pub mod dispatch;
pub mod framing;
pub mod handler;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod sink;
pub mod tools;
