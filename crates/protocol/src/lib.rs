//! Wire protocol between the bridge and a scripting host.
//!
//! The host (for example a JavaScript runtime) implements tool functions;
//! the bridge reaches them over newline-delimited JSON-RPC 2.0, usually on
//! the host process's stdio.
//!
//! # Example
//!
//! ```no_run
//! use protocol::{HostConfig, HostLink};
//! use std::collections::HashMap;
//!
//! # async fn example() -> protocol::Result<()> {
//! let config = HostConfig {
//!     name: "node".to_string(),
//!     command: "node".to_string(),
//!     args: vec!["tools-host.js".to_string()],
//!     env: HashMap::new(),
//! };
//!
//! let host = HostLink::spawn(config).await?;
//! let info = host.initialize().await?;
//! for function in &info.functions {
//!     println!("Function: {}", function.name);
//! }
//!
//! let pending = host
//!     .call_function("weather_tool", serde_json::json!({ "city": "Tokyo" }))
//!     .await?;
//! let result = pending.wait().await?;
//! println!("{result}");
//!
//! host.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod link;
mod protocol;

pub use error::{Error, Result};
pub use link::{DEFAULT_TIMEOUT, HostConfig, HostLink, MAX_FRAME_SIZE, PendingReply};
pub use protocol::{
    CALL_FUNCTION, CallFunctionParams, ClientInfo, ErrorInfo, FUNCTION_ERROR_CODE, FunctionInfo,
    HostInfo, HostMessage, INITIALIZE, INITIALIZED, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, SHUTDOWN,
};
