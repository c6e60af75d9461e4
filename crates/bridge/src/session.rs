//! Session management and response streaming.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::model::{LanguageModel, ModelSession};
use crate::tools::{Tool, ToolBridge, ToolDefinition};
use crate::{Error, Result};

/// Instructions used when a session is created without any.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant";

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a session is created with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub instructions: Option<String>,
    /// Base instructions when `instructions` is unset.
    pub default_instructions: String,
    pub tools: Vec<ToolDefinition>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: None,
            default_instructions: DEFAULT_INSTRUCTIONS.to_string(),
            tools: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }
}

/// Where the current (or last) stream stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Snapshot of a session's streaming state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub phase: StreamPhase,
    pub content: String,
    pub cancelled: bool,
}

/// In-flight bookkeeping. `cancel`, `close` and the start of a stream all
/// take this lock, so none of them can land between the others' steps.
#[derive(Debug, Default)]
struct Control {
    responding: bool,
    closed: bool,
    token: CancellationToken,
}

/// Clears the in-flight flag when the stream ends, however it ends.
struct Responding<'a>(&'a Mutex<Control>);

impl Drop for Responding<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).responding = false;
    }
}

/// A conversation with a model that may call tools.
///
/// At most one response streams at a time.
pub struct Session<M: LanguageModel> {
    id: SessionId,
    instructions: String,
    tools: Vec<Arc<Tool>>,
    model: M::Session,
    control: Mutex<Control>,
    state: Mutex<StreamState>,
}

impl<M: LanguageModel> Session<M> {
    /// Compile the configured tools and open a model session.
    ///
    /// Fails with [`Error::SchemaCreation`] for a bad or duplicated tool and
    /// with [`Error::SessionNotInitialized`] when the model refuses.
    pub fn new(model: &M, config: SessionConfig, bridge: Arc<ToolBridge>) -> Result<Self> {
        let id = SessionId::new();

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(config.tools.len());
        for definition in config.tools {
            if !seen.insert(definition.name.clone()) {
                return Err(Error::SchemaCreation(format!(
                    "duplicate tool name '{}'",
                    definition.name
                )));
            }
            tools.push(Arc::new(Tool::new(definition, Arc::clone(&bridge))?));
        }

        let base = config
            .instructions
            .unwrap_or(config.default_instructions);
        let instructions = enhanced_instructions(&base, &tools);

        let model = model.open_session(&instructions, &tools).map_err(|e| {
            warn!(session = %id, error = %e, "model session could not be opened");
            Error::SessionNotInitialized
        })?;

        info!(session = %id, tools = tools.len(), "session created");
        Ok(Self {
            id,
            instructions,
            tools,
            model,
            control: Mutex::new(Control::default()),
            state: Mutex::new(StreamState::default()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The instructions the model was given, tool list included.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools(&self) -> &[Arc<Tool>] {
        &self.tools
    }

    /// Whether a response is streaming right now.
    pub fn is_responding(&self) -> bool {
        self.control().responding
    }

    pub fn state(&self) -> StreamState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stream a response to `prompt`.
    ///
    /// `on_token` receives the whole content generated so far after every
    /// token. Returns the final content, or the content up to the point of
    /// [`cancel`](Self::cancel).
    pub async fn stream_response<F>(&self, prompt: &str, mut on_token: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let (_responding, token) = {
            let mut control = self.control();
            if control.responding {
                return Err(Error::StreamInProgress);
            }
            if control.closed {
                return Err(Error::SessionNotInitialized);
            }
            if prompt.trim().is_empty() {
                return Ok(String::new());
            }

            control.responding = true;
            control.token = CancellationToken::new();
            self.update(|state| {
                *state = StreamState {
                    phase: StreamPhase::Streaming,
                    ..StreamState::default()
                }
            });
            (Responding(&self.control), control.token.clone())
        };

        let span = info_span!("stream_response", session = %self.id);
        async move {
            debug!(prompt_len = prompt.len(), "stream started");
            let mut stream = self.model.stream_response(prompt);
            let mut content = String::new();

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        self.update(|state| {
                            state.phase = StreamPhase::Cancelled;
                            state.cancelled = true;
                        });
                        info!(chars = content.len(), "stream cancelled");
                        return Ok(content);
                    }
                    next = stream.next() => match next {
                        Some(Ok(delta)) => {
                            content.push_str(&delta);
                            self.update(|state| state.content.clone_from(&content));
                            if !token.is_cancelled() {
                                on_token(&content);
                            }
                        }
                        Some(Err(e)) => {
                            self.update(|state| state.phase = StreamPhase::Failed);
                            warn!(error = %e, "stream failed");
                            return Err(Error::from(e));
                        }
                        None => {
                            self.update(|state| state.phase = StreamPhase::Completed);
                            debug!(chars = content.len(), "stream completed");
                            return Ok(content);
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Stop the response in flight, if any.
    pub fn cancel(&self) {
        let control = self.control();
        if !control.responding {
            debug!(session = %self.id, "cancel with no stream in flight");
            return;
        }
        control.token.cancel();
        self.update(|state| {
            if state.phase == StreamPhase::Streaming {
                state.cancelled = true;
            }
        });
    }

    /// Return to `Idle` with no content.
    pub fn reset(&self) -> Result<()> {
        let control = self.control();
        if control.responding {
            return Err(Error::StreamInProgress);
        }
        self.update(|state| *state = StreamState::default());
        Ok(())
    }

    /// Stop any response in flight and refuse further prompts.
    pub fn close(&self) {
        {
            let mut control = self.control();
            control.closed = true;
            control.token.cancel();
        }
        info!(session = %self.id, "session closed");
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut StreamState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

fn enhanced_instructions(base: &str, tools: &[Arc<Tool>]) -> String {
    if tools.is_empty() {
        return base.to_string();
    }
    let listing = tools
        .iter()
        .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{base}. You have access to these tools:\n{listing}")
}

impl<M: LanguageModel> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tools", &self.tools.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
