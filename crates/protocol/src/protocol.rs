//! Bridge wire types (JSON-RPC 2.0 based).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Handshake sent by the bridge once the host is connected.
pub const INITIALIZE: &str = "bridge/initialize";
/// Notification sent after a successful handshake.
pub const INITIALIZED: &str = "notifications/initialized";
/// Invoke a function implemented by the host.
pub const CALL_FUNCTION: &str = "functions/call";
/// Best-effort notification before the host is torn down.
pub const SHUTDOWN: &str = "shutdown";

/// JSON-RPC error code used by hosts for a function that failed.
pub const FUNCTION_ERROR_CODE: i32 = -32000;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: impl Serialize) -> Self {
        self.params = Some(serde_json::to_value(params).unwrap_or(Value::Null));
        self
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A successful response carrying `result`.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// A failed response carrying `error`.
    pub fn failure(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Returns the result if successful, or an error.
    ///
    /// A missing `result` is treated as `null`; hosts written against
    /// lenient JSON-RPC libraries omit it for void methods.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(error) = self.error {
            Err(error)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any frame the host may send to the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Wrap a structured bridge error for the wire.
    pub fn from_info(info: &ErrorInfo) -> Self {
        Self {
            code: FUNCTION_ERROR_CODE,
            message: info.message.clone(),
            data: serde_json::to_value(info).ok(),
        }
    }

    /// The structured error carried in `data`, if the host sent one.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.data.as_ref().and_then(ErrorInfo::from_value)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code}] {message}")
    }
}

impl std::error::Error for JsonRpcError {}

/// Request ID (can be string or number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Structured error crossing the runtime boundary.
///
/// Callers branch on `code`, a stable identifier such as
/// `UNKNOWN_TOOL_ERROR`, rather than parsing `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Add one entry to `details`.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Read an `ErrorInfo` out of an arbitrary payload.
    ///
    /// Only objects with string `code` and `message` fields qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let code = object.get("code")?.as_str()?;
        let message = object.get("message")?.as_str()?;
        let details = object.get("details").and_then(Value::as_object).cloned();
        Some(Self {
            code: code.to_string(),
            message: message.to_string(),
            details,
        })
    }
}

// --- Bridge-specific types ---

/// Handshake params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: "2025-06-01".to_string(),
            client_info: ClientInfo {
                name: "toolbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Identity of the bridge, sent during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Handshake result: who the host is and what it implements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub host_info: HostInfo,
    #[serde(default)]
    pub functions: Vec<FunctionInfo>,
}

/// Host identity returned during the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A function the host is able to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Params for `functions/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFunctionParams {
    pub name: String,
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_request() {
        let req = JsonRpcRequest::new(1i64, INITIALIZE).with_params(InitializeParams::default());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"bridge/initialize\""));
        assert!(json.contains("\"clientInfo\""));
    }

    #[test]
    fn deserialize_response() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":{"temperature":72.0}}"#;
        let msg: HostMessage = serde_json::from_str(json).unwrap();
        let HostMessage::Response(resp) = msg else {
            panic!("expected a response");
        };
        assert_eq!(resp.id, RequestId::Number(1));
        assert!(resp.error.is_none());
    }

    #[test]
    fn deserialize_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"host/log","params":{"line":"hi"}}"#;
        let msg: HostMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, HostMessage::Notification(n) if n.method == "host/log"));
    }

    #[test]
    fn deserialize_initialize_result() {
        let json = r#"{
            "protocolVersion": "2025-06-01",
            "hostInfo": {"name": "node-host"},
            "functions": [{"name": "weather_tool", "description": "Current weather"}]
        }"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.host_info.name, "node-host");
        assert_eq!(result.functions[0].name, "weather_tool");
    }

    #[test]
    fn error_info_travels_in_error_data() {
        let info = ErrorInfo::new("UNKNOWN_TOOL_ERROR", "Unknown tool: f").with_detail("toolName", "f");
        let error = JsonRpcError::from_info(&info);
        assert_eq!(error.code, FUNCTION_ERROR_CODE);
        assert_eq!(error.error_info(), Some(info));
    }

    #[test]
    fn error_info_requires_code_and_message() {
        assert!(ErrorInfo::from_value(&serde_json::json!({"message": "no code"})).is_none());
        assert!(ErrorInfo::from_value(&serde_json::json!("plain")).is_none());
    }
}
