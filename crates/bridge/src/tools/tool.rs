//! Tools adapted for the model runtime.

use std::sync::Arc;

use tracing::debug;

use super::dispatch::{LocalFunction, call_failure, settle};
use super::types::{Implementation, ToolDefinition, ToolSpec};
use super::ToolBridge;
use crate::error::{Error, Result};
use crate::marshal;
use crate::model::GeneratedContent;
use crate::schema::GenerationSchema;

enum Invoker {
    Direct(LocalFunction),
    Bridged,
}

/// A [`ToolDefinition`] compiled for the model runtime.
///
/// The generation schema is built once, here, and reused for every call.
pub struct Tool {
    name: String,
    description: String,
    schema: GenerationSchema,
    invoker: Invoker,
    bridge: Arc<ToolBridge>,
}

impl Tool {
    /// Compile `definition`. Fails with [`Error::SchemaCreation`] when its
    /// arguments cannot be translated.
    pub fn new(definition: ToolDefinition, bridge: Arc<ToolBridge>) -> Result<Self> {
        let schema = GenerationSchema::translate(&definition.name, &definition.arguments)?;
        let invoker = match definition.implementation {
            Implementation::Direct(handler) => Invoker::Direct(LocalFunction::new(
                definition.name.clone(),
                handler,
                bridge.executor().cloned(),
            )),
            Implementation::Bridged => Invoker::Bridged,
        };

        Ok(Self {
            name: definition.name,
            description: definition.description,
            schema,
            invoker,
            bridge,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &GenerationSchema {
        &self.schema
    }

    /// The tool as described to the model.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.schema.to_json_schema(),
        }
    }

    /// Check generated arguments against the schema without calling anything.
    pub fn validate_arguments(&self, arguments: &GeneratedContent) -> Result<()> {
        let text = arguments.json_string().trim();
        if text.is_empty() {
            return self.schema.validate(&serde_json::Map::new());
        }
        let properties = arguments.properties().ok_or_else(|| {
            Error::ArgumentParsing(format!("tool '{}': arguments are not a JSON object", self.name))
        })?;
        self.schema.validate(&properties)
    }

    /// Run the tool on generated arguments and return its generated output.
    pub async fn call(&self, arguments: GeneratedContent) -> Result<GeneratedContent> {
        let arguments = marshal::content_to_any_map(&arguments);
        debug!(tool = %self.name, arguments = arguments.len(), "tool invoked");

        let result = match &self.invoker {
            Invoker::Direct(function) => {
                settle(
                    &self.name,
                    function,
                    arguments,
                    self.bridge.call_timeout(),
                    call_failure,
                )
                .await?
            }
            Invoker::Bridged => self.bridge.call(&self.name, arguments).await?,
        };
        Ok(marshal::any_map_to_content(&result))
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any_map::AnyMap;
    use crate::error::Cause;
    use crate::schema::PropertySchema;
    use indexmap::IndexMap;
    use serde_json::json;

    fn city_args() -> IndexMap<String, PropertySchema> {
        IndexMap::from([(
            "city".to_string(),
            PropertySchema::string().with_description("City name"),
        )])
    }

    #[tokio::test]
    async fn direct_call_round_trips_content() {
        let definition = ToolDefinition::new("echo", "Echo the city", city_args(), |args: AnyMap| async move {
            let city: String = args.get("city")?;
            Ok::<_, Error>(AnyMap::new().with("city", city).with("length", 5.0))
        });
        let tool = Tool::new(definition, Arc::new(ToolBridge::new())).unwrap();

        let out = tool
            .call(GeneratedContent::from_json(r#"{"city":"Paris"}"#))
            .await
            .unwrap();
        assert_eq!(out.json_string(), r#"{"city":"Paris","length":5.0}"#);
    }

    #[tokio::test]
    async fn direct_failures_are_call_errors() {
        let definition = ToolDefinition::new("broken", "Always fails", IndexMap::new(), |_args: AnyMap| async {
            Err::<AnyMap, Cause>("backend offline".into())
        });
        let tool = Tool::new(definition, Arc::new(ToolBridge::new())).unwrap();

        let err = tool.call(GeneratedContent::default()).await.unwrap_err();
        assert_eq!(err.code(), "TOOL_CALL_ERROR");
    }

    #[tokio::test]
    async fn bridged_tools_look_up_by_name() {
        let bridge = Arc::new(ToolBridge::new());
        let tool = Tool::new(
            ToolDefinition::bridged("lookup", "Bridged lookup", city_args()),
            Arc::clone(&bridge),
        )
        .unwrap();

        let err = tool.call(GeneratedContent::default()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTool(ref name) if name == "lookup"));

        bridge.register("lookup", |args: AnyMap| async move {
            Ok::<_, Error>(AnyMap::new().with("found", args.has("city")))
        });
        let out = tool
            .call(GeneratedContent::from_json(r#"{"city":"Oslo"}"#))
            .await
            .unwrap();
        assert_eq!(out.json_string(), r#"{"found":true}"#);
    }

    #[test]
    fn construction_fails_on_bad_schema() {
        let args: IndexMap<String, PropertySchema> = serde_json::from_value(json!({
            "code": {"type": "string", "constraints": {"pattern": "[a-"}}
        }))
        .unwrap();
        let err = Tool::new(
            ToolDefinition::bridged("bad", "Bad pattern", args),
            Arc::new(ToolBridge::new()),
        )
        .unwrap_err();
        assert_eq!(err.code(), "SCHEMA_CREATION_ERROR");
    }

    #[test]
    fn validation_and_spec() {
        let tool = Tool::new(
            ToolDefinition::bridged("weather_tool", "Get weather", city_args()),
            Arc::new(ToolBridge::new()),
        )
        .unwrap();

        tool.validate_arguments(&GeneratedContent::from_json(r#"{"city":"Tokyo"}"#))
            .unwrap();
        for bad in ["", "{}", "[]", r#"{"city":3}"#] {
            let err = tool
                .validate_arguments(&GeneratedContent::from_json(bad))
                .unwrap_err();
            assert_eq!(err.code(), "ARGUMENT_PARSING_ERROR", "{bad}");
        }

        let spec = tool.spec();
        assert_eq!(spec.name, "weather_tool");
        assert_eq!(spec.schema["required"], json!(["city"]));
        assert_eq!(spec.schema["properties"]["city"]["description"], json!("City name"));
    }
}
