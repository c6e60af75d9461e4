//! Host-backed functions.

use std::sync::Arc;

use futures::future::BoxFuture;
use protocol::HostLink;
use serde_json::{Value, json};

use super::dispatch::{Function, PendingResult};
use crate::any_map::AnyMap;
use crate::error::{Cause, Error};

/// A function implemented by a connected scripting host.
pub struct RemoteFunction {
    link: Arc<HostLink>,
    name: String,
}

impl RemoteFunction {
    pub fn new(link: Arc<HostLink>, name: impl Into<String>) -> Self {
        Self {
            link,
            name: name.into(),
        }
    }
}

impl Function for RemoteFunction {
    fn dispatch(&self, arguments: AnyMap) -> BoxFuture<'_, Result<PendingResult, Cause>> {
        Box::pin(async move {
            let arguments = serde_json::to_value(&arguments)?;
            let reply = self
                .link
                .call_function(&self.name, arguments)
                .await
                .map_err(host_failure)?;

            let pending: PendingResult = Box::pin(async move {
                let value = reply.wait().await.map_err(host_failure)?;
                read_result(value)
            });
            Ok::<_, Cause>(pending)
        })
    }
}

/// A host result must be an object of tagged values.
fn read_result(value: Value) -> Result<AnyMap, Cause> {
    if !value.is_object() {
        return Err(Box::new(Error::ResponseParsing(format!(
            "host returned {value} instead of an object"
        ))));
    }
    serde_json::from_value(value)
        .map_err(|e| Box::new(Error::ResponseParsing(e.to_string())) as Cause)
}

/// Recover a bridge error from what the host reported, if it reported one.
fn host_failure(error: protocol::Error) -> Cause {
    match error {
        protocol::Error::JsonRpc(e) => {
            let typed = match e.error_info() {
                Some(info) => Error::from_error_info(info),
                None => Error::from_native(
                    e.data
                        .unwrap_or_else(|| json!({ "message": e.message, "rpcCode": e.code })),
                ),
            };
            Box::new(typed)
        }
        other => Box::new(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_must_be_objects() {
        let map = read_result(json!({"temperature": 72.0, "condition": "sunny"})).unwrap();
        assert_eq!(map.keys(), vec!["temperature", "condition"]);

        let err = read_result(json!([1, 2])).unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert_eq!(err.code(), "RESPONSE_PARSING_ERROR");
    }

    #[test]
    fn structured_host_errors_become_typed() {
        let info = Error::UnknownTool("forecast".into()).to_error_info();
        let cause = host_failure(protocol::JsonRpcError::from_info(&info).into());
        let err = cause.downcast::<Error>().unwrap();
        assert!(matches!(err.kind(), Error::UnknownTool(name) if name == "forecast"));

        let raw = protocol::JsonRpcError {
            code: -32603,
            message: "internal".into(),
            data: None,
        };
        let err = host_failure(raw.into()).downcast::<Error>().unwrap();
        assert_eq!(err.code(), crate::error::UNKNOWN_ERROR);
        assert_eq!(err.to_string(), "internal");
    }

    #[test]
    fn transport_failures_stay_foreign() {
        let cause = host_failure(protocol::Error::Timeout);
        assert!(cause.downcast::<Error>().is_err());
    }
}
