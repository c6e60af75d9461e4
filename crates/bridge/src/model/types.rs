use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde_json::{Map, Value};

use super::errors::ModelError;
use crate::tools::Tool;

/// Token deltas produced by one response.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// Structured content in the model runtime's native form: JSON text.
///
/// Tool arguments arrive as generated content and tool results are handed
/// back as generated content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedContent {
    json: String,
}

impl GeneratedContent {
    /// Wrap JSON text as produced by the model. The text is not checked.
    pub fn from_json(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }

    /// Build an object from ordered properties.
    pub fn from_properties(properties: Map<String, Value>) -> Self {
        Self {
            json: Value::Object(properties).to_string(),
        }
    }

    pub fn json_string(&self) -> &str {
        &self.json
    }

    /// Parse the content as a JSON object, if it is one.
    pub fn properties(&self) -> Option<Map<String, Value>> {
        match serde_json::from_str(&self.json) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// A generative model runtime.
pub trait LanguageModel: Send + Sync {
    type Session: ModelSession;

    /// Open a session primed with `instructions` that may call `tools`.
    fn open_session(
        &self,
        instructions: &str,
        tools: &[Arc<Tool>],
    ) -> Result<Self::Session, ModelError>;
}

/// One open conversation with a model runtime.
pub trait ModelSession: Send + Sync + 'static {
    /// Start generating a response to `prompt`.
    ///
    /// The stream yields deltas; tools are invoked by the runtime while the
    /// stream is being polled. Dropping the stream abandons the response.
    fn stream_response(&self, prompt: &str) -> TokenStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn properties_keep_order() {
        let mut map = Map::new();
        map.insert("z".into(), json!(1.0));
        map.insert("a".into(), json!("x"));
        let content = GeneratedContent::from_properties(map.clone());
        assert_eq!(content.json_string(), r#"{"z":1.0,"a":"x"}"#);
        assert_eq!(content.properties(), Some(map));
    }

    #[test]
    fn non_objects_have_no_properties() {
        assert_eq!(GeneratedContent::from_json("[1]").properties(), None);
        assert_eq!(GeneratedContent::from_json("{oops").properties(), None);
        assert_eq!(GeneratedContent::default().json_string(), "");
    }
}
