//! Tool registration, dispatch and invocation.

mod dispatch;
mod host;
mod registry;
mod tool;
pub mod types;

pub use dispatch::{Function, PendingResult};
pub use host::RemoteFunction;
pub use registry::ToolBridge;
pub use tool::Tool;
pub use types::{ToolDefinition, ToolSpec};
