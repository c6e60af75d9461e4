//! The seam to the generative model runtime.
//!
//! The model itself is opaque: given instructions, a prompt and a set of
//! tools it produces a token stream, calling tools along the way.

pub mod errors;
mod scripted;
pub mod types;

pub use errors::ModelError;
pub use scripted::{ScriptedModel, ScriptedSession, Step};
pub use types::{GeneratedContent, LanguageModel, ModelSession, TokenStream};
