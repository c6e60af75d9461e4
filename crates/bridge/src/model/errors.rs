use thiserror::Error;

/// Errors raised by a model runtime.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The runtime could not open a session.
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// Generation failed mid-stream.
    #[error("generation failed: {0}")]
    Generation(String),

    /// A tool the model invoked failed with a bridge error.
    #[error(transparent)]
    Tool(Box<crate::Error>),
}
