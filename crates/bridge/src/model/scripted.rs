//! A deterministic model runtime that replays scripted responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use serde_json::Value;
use tracing::debug;

use super::errors::ModelError;
use super::types::{GeneratedContent, LanguageModel, ModelSession, TokenStream};
use crate::error::Error;
use crate::tools::Tool;

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    /// Emit a token delta.
    Token(String),
    /// Validate `arguments` against the tool's schema, call it, and emit the
    /// result's JSON text.
    CallTool { name: String, arguments: Value },
    /// Fail the stream with a generation error.
    Fail(String),
}

impl Step {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token(text.into())
    }

    pub fn call_tool(name: impl Into<String>, arguments: Value) -> Self {
        Self::CallTool {
            name: name.into(),
            arguments,
        }
    }
}

/// Replays a fixed script per prompt.
///
/// Prompts without a script get the fallback script, which is empty unless
/// set with [`otherwise`](Self::otherwise).
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    scripts: HashMap<String, Vec<Step>>,
    fallback: Vec<Step>,
    step_delay: Option<Duration>,
    unavailable: Option<String>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `prompt` with `steps`.
    pub fn on_prompt(mut self, prompt: impl Into<String>, steps: Vec<Step>) -> Self {
        self.scripts.insert(prompt.into(), steps);
        self
    }

    /// Respond to every other prompt with `steps`.
    pub fn otherwise(mut self, steps: Vec<Step>) -> Self {
        self.fallback = steps;
        self
    }

    /// Pause before each step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Refuse to open sessions.
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }
}

impl LanguageModel for ScriptedModel {
    type Session = ScriptedSession;

    fn open_session(
        &self,
        instructions: &str,
        tools: &[Arc<Tool>],
    ) -> Result<Self::Session, ModelError> {
        if let Some(reason) = &self.unavailable {
            return Err(ModelError::Unavailable(reason.clone()));
        }
        Ok(ScriptedSession {
            model: self.clone(),
            instructions: instructions.to_string(),
            tools: tools.to_vec(),
        })
    }
}

/// A session opened on a [`ScriptedModel`].
pub struct ScriptedSession {
    model: ScriptedModel,
    instructions: String,
    tools: Vec<Arc<Tool>>,
}

impl ScriptedSession {
    /// Instructions the session was opened with.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

impl ModelSession for ScriptedSession {
    fn stream_response(&self, prompt: &str) -> TokenStream {
        let steps = self
            .model
            .scripts
            .get(prompt)
            .unwrap_or(&self.model.fallback)
            .clone();
        let delay = self.model.step_delay;
        let tools = self.tools.clone();

        Box::pin(stream! {
            for step in steps {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match step {
                    Step::Token(text) => yield Ok(text),
                    Step::Fail(reason) => {
                        yield Err(ModelError::Generation(reason));
                        break;
                    }
                    Step::CallTool { name, arguments } => {
                        match invoke(&tools, &name, &arguments).await {
                            Ok(output) => yield Ok(output.json_string().to_string()),
                            Err(e) => {
                                yield Err(ModelError::Tool(Box::new(e)));
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

async fn invoke(tools: &[Arc<Tool>], name: &str, arguments: &Value) -> crate::Result<GeneratedContent> {
    let tool = tools
        .iter()
        .find(|t| t.name() == name)
        .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

    let content = GeneratedContent::from_json(arguments.to_string());
    tool.validate_arguments(&content)?;
    debug!(tool = name, "scripted model calling tool");
    tool.call(content).await
}
