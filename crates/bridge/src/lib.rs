//! Toolbridge: tool invocation and response streaming between a scripting
//! runtime and a generative model runtime.
//!
//! # Overview
//!
//! The crate is organized around these concepts:
//!
//! - **ToolDefinition**: a named async function with declaratively typed
//!   arguments ([`PropertySchema`]).
//! - **Tool**: a definition compiled for the model, with its
//!   [`GenerationSchema`] built once.
//! - **ToolBridge**: the registry the model runtime calls back through, by
//!   function name. Implementations may be in-process closures or functions
//!   of a scripting host reached over [`protocol::HostLink`].
//! - **Session**: a conversation with a [`LanguageModel`] that streams its
//!   response token by token, one response at a time.
//!
//! Payloads cross the boundary as [`AnyMap`]s; failures cross it as
//! [`ErrorInfo`] with a stable code.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bridge::{
//!     AnyMap, PropertySchema, ScriptedModel, Session, SessionConfig, Step, ToolBridge,
//!     ToolDefinition,
//! };
//! use indexmap::IndexMap;
//!
//! # async fn example() -> bridge::Result<()> {
//! let weather = ToolDefinition::new(
//!     "weather_tool",
//!     "Get current weather for a city",
//!     IndexMap::from([("city".to_string(), PropertySchema::string())]),
//!     |args: AnyMap| async move {
//!         let city: String = args.get("city")?;
//!         Ok::<_, bridge::Error>(AnyMap::new().with("city", city).with("temperature", 72.0))
//!     },
//! );
//!
//! let model = ScriptedModel::new().otherwise(vec![Step::token("It is sunny.")]);
//! let session = Session::new(
//!     &model,
//!     SessionConfig::default().with_tool(weather),
//!     Arc::new(ToolBridge::new()),
//! )?;
//!
//! let answer = session
//!     .stream_response("Weather in Tokyo?", |so_far| println!("{so_far}"))
//!     .await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod any_map;
mod config;
mod error;
pub mod marshal;
pub mod model;
pub mod schema;
mod session;
pub mod tools;

pub use any_map::{AnyMap, AnyMapError, AnyValue, FromAnyValue};
pub use config::{BridgeConfig, BridgeSettings, ConfigError, HostSettings, SessionSettings};
pub use error::{Cause, Error, Result, UNKNOWN_ERROR};
pub use model::{
    GeneratedContent, LanguageModel, ModelError, ModelSession, ScriptedModel, Step, TokenStream,
};
pub use protocol::ErrorInfo;
pub use schema::{GenerationSchema, GenerationType, PropertyKind, PropertySchema};
pub use session::{
    DEFAULT_INSTRUCTIONS, Session, SessionConfig, SessionId, StreamPhase, StreamState,
};
pub use tools::{Function, PendingResult, RemoteFunction, Tool, ToolBridge, ToolDefinition, ToolSpec};
