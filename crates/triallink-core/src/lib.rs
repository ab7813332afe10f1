//! triallink-core - process-backed tool invocation for a database agent
//!
//! Spawns an external tool server, speaks line-delimited JSON over its
//! stdio, discovers the tools it advertises, and exposes them as typed,
//! schema-validated callables. One client owns one child process; the
//! session lives from a successful handshake to an explicit stop or a
//! transport failure.

pub mod client;
pub mod config;
pub mod rpc;
pub mod tools;

pub use client::catalog::{ParamKind, ParamSchema, ParamSpec, ToolDescriptor};
pub use client::{ClientState, ToolClient};
pub use config::{ClientConfig, ServerConfig};
pub use rpc::{RpcError, SpawnConfig};
pub use tools::{register_remote_tools, RemoteTool, Tool, ToolRegistry, ToolResult};
