//! Request/response plumbing over a child process's standard streams
//!
//! One JSON object per line in each direction. The transport owns the
//! process and its pipes; the dispatcher owns correlation state and the
//! single reader loop.

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod transport;

pub use dispatch::RequestDispatcher;
pub use error::{Result, RpcError};
pub use protocol::{ErrorCode, ErrorPayload, Request, Response};
pub use transport::{ProcessTransport, SpawnConfig, Transport};
