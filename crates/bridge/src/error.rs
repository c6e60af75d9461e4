use protocol::ErrorInfo;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::any_map::AnyMapError;
use crate::model::ModelError;

/// A foreign failure carried inside a taxonomy error.
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Code used when a failure fits no other kind.
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Every failure the bridge reports to its caller.
///
/// Each variant has a stable [`code`](Error::code) so the scripting side can
/// branch without parsing messages.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("language model session is not initialized")]
    SessionNotInitialized,

    #[error("tool call failed: {0}")]
    ToolCall(#[source] Cause),

    #[error("tool '{tool}' execution failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Cause,
    },

    #[error("failed to create tool schema: {0}")]
    SchemaCreation(String),

    #[error("failed to parse tool arguments: {0}")]
    ArgumentParsing(String),

    #[error("failed to parse tool response: {0}")]
    ResponseParsing(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("session streaming failed: {0}")]
    SessionStreaming(#[source] Cause),

    #[error("another stream is already in progress")]
    StreamInProgress,

    /// A known kind of failure rebuilt from what the other runtime reported.
    ///
    /// `info` is kept as received and is what [`Error::to_error_info`]
    /// hands back; [`Error::kind`] gives the typed failure.
    #[error("{}", .info.message)]
    Remote { kind: Box<Error>, info: ErrorInfo },

    /// A failure reported by the other runtime with a code we do not know.
    #[error("{message}")]
    Unknown {
        code: String,
        message: String,
        details: Option<Map<String, Value>>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable identifier for this kind of failure.
    pub fn code(&self) -> &str {
        match self {
            Self::SessionNotInitialized => "SESSION_NOT_INITIALIZED",
            Self::ToolCall(_) => "TOOL_CALL_ERROR",
            Self::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Self::SchemaCreation(_) => "SCHEMA_CREATION_ERROR",
            Self::ArgumentParsing(_) => "ARGUMENT_PARSING_ERROR",
            Self::ResponseParsing(_) => "RESPONSE_PARSING_ERROR",
            Self::UnknownTool(_) => "UNKNOWN_TOOL_ERROR",
            Self::SessionStreaming(_) => "SESSION_STREAMING_ERROR",
            Self::StreamInProgress => "STREAM_IN_PROGRESS",
            Self::Remote { kind, .. } => kind.code(),
            Self::Unknown { code, .. } => code.as_str(),
        }
    }

    /// The typed failure, looking through one rebuilt from the wire.
    pub fn kind(&self) -> &Error {
        match self {
            Self::Remote { kind, .. } => kind,
            other => other,
        }
    }

    /// Wrap a failing tool implementation, keeping typed errors as they are.
    pub fn tool_execution(tool: impl Into<String>, cause: Cause) -> Self {
        match cause.downcast::<Self>() {
            Ok(typed) => *typed,
            Err(source) => Self::ToolExecution {
                tool: tool.into(),
                source,
            },
        }
    }

    /// Wrap a failing call mechanism, keeping typed errors as they are.
    pub fn tool_call(cause: Cause) -> Self {
        match cause.downcast::<Self>() {
            Ok(typed) => *typed,
            Err(source) => Self::ToolCall(source),
        }
    }

    /// Wrap a streaming failure, keeping typed errors as they are.
    pub fn session_streaming(cause: Cause) -> Self {
        match cause.downcast::<Self>() {
            Ok(typed) => *typed,
            Err(source) => Self::SessionStreaming(source),
        }
    }

    /// Structured form for crossing the runtime boundary.
    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.code(), self.to_string());
        match self {
            Self::Remote { info, .. } => info.clone(),
            Self::SessionNotInitialized | Self::StreamInProgress => info,
            Self::ToolCall(cause) | Self::SessionStreaming(cause) => {
                info.with_detail("cause", cause.to_string())
            }
            Self::ToolExecution { tool, source } => info
                .with_detail("toolName", tool.as_str())
                .with_detail("cause", source.to_string()),
            Self::SchemaCreation(reason)
            | Self::ArgumentParsing(reason)
            | Self::ResponseParsing(reason) => info.with_detail("reason", reason.as_str()),
            Self::UnknownTool(tool) => info.with_detail("toolName", tool.as_str()),
            Self::Unknown { details, .. } => ErrorInfo {
                details: details.clone(),
                ..info
            },
        }
    }

    /// Rebuild an error that crossed the boundary.
    ///
    /// Known codes come back as [`Error::Remote`] around the matching kind,
    /// with `info` untouched. Other codes survive as [`Error::Unknown`].
    pub fn from_error_info(info: ErrorInfo) -> Self {
        match Self::known_kind(&info) {
            Some(kind) => Self::Remote {
                kind: Box::new(kind),
                info,
            },
            None => Self::Unknown {
                code: info.code,
                message: info.message,
                details: info.details,
            },
        }
    }

    fn known_kind(info: &ErrorInfo) -> Option<Self> {
        let detail = |key: &str| {
            info.details
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let cause = || -> Cause { detail("cause").unwrap_or_else(|| info.message.clone()).into() };
        let reason = || detail("reason").unwrap_or_else(|| info.message.clone());

        let kind = match info.code.as_str() {
            "SESSION_NOT_INITIALIZED" => Self::SessionNotInitialized,
            "TOOL_CALL_ERROR" => Self::ToolCall(cause()),
            "TOOL_EXECUTION_ERROR" => Self::ToolExecution {
                tool: detail("toolName").unwrap_or_default(),
                source: cause(),
            },
            "SCHEMA_CREATION_ERROR" => Self::SchemaCreation(reason()),
            "ARGUMENT_PARSING_ERROR" => Self::ArgumentParsing(reason()),
            "RESPONSE_PARSING_ERROR" => Self::ResponseParsing(reason()),
            "UNKNOWN_TOOL_ERROR" => {
                Self::UnknownTool(detail("toolName").unwrap_or_else(|| info.message.clone()))
            }
            "SESSION_STREAMING_ERROR" => Self::SessionStreaming(cause()),
            "STREAM_IN_PROGRESS" => Self::StreamInProgress,
            _ => return None,
        };
        Some(kind)
    }

    /// Convert whatever the other runtime threw.
    ///
    /// Accepts an `ErrorInfo`-shaped object, a string holding one as JSON,
    /// or anything else; unrecognized payloads become `UNKNOWN_ERROR` with
    /// the payload kept under `details.originalError`.
    pub fn from_native(payload: Value) -> Self {
        if let Some(info) = ErrorInfo::from_value(&payload) {
            return Self::from_error_info(info);
        }

        let message = match &payload {
            Value::String(text) => {
                if let Some(info) = serde_json::from_str::<Value>(text)
                    .ok()
                    .as_ref()
                    .and_then(ErrorInfo::from_value)
                {
                    return Self::from_error_info(info);
                }
                text.clone()
            }
            Value::Object(object) => object
                .get("message")
                .or_else(|| object.get("localizedDescription"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            _ => "an unknown error occurred".to_string(),
        };

        let code = payload
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_ERROR)
            .to_string();

        let mut details = Map::new();
        details.insert("originalError".to_string(), payload);
        Self::Unknown {
            code,
            message,
            details: Some(details),
        }
    }
}

impl From<AnyMapError> for Error {
    fn from(e: AnyMapError) -> Self {
        Self::ArgumentParsing(e.to_string())
    }
}

impl From<ModelError> for Error {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Tool(typed) => *typed,
            other => Self::SessionStreaming(Box::new(other)),
        }
    }
}
