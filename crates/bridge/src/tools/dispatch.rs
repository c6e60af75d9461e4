//! Two-stage dispatch of tool implementations.
//!
//! Dispatching a call yields a pending result once the work has been handed
//! off (first stage); awaiting the pending result yields the value (second
//! stage). [`settle`] awaits both in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::any_map::AnyMap;
use crate::error::{Cause, Error, Result};

/// A result that has been dispatched but not produced yet.
pub type PendingResult = BoxFuture<'static, std::result::Result<AnyMap, Cause>>;

/// An implementation the bridge can call by name.
pub trait Function: Send + Sync {
    /// Hand the call off, returning the pending result.
    fn dispatch(&self, arguments: AnyMap) -> BoxFuture<'_, std::result::Result<PendingResult, Cause>>;
}

pub(crate) type Handler =
    Arc<dyn Fn(AnyMap) -> BoxFuture<'static, std::result::Result<AnyMap, Cause>> + Send + Sync>;

pub(crate) fn handler<F, Fut, E>(f: F) -> Handler
where
    F: Fn(AnyMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<AnyMap, E>> + Send + 'static,
    E: Into<Cause> + 'static,
{
    Arc::new(move |arguments| {
        let fut = f(arguments);
        async move { fut.await.map_err(Into::<Cause>::into) }.boxed()
    })
}

/// An in-process implementation run as a task on a tokio runtime.
pub struct LocalFunction {
    name: String,
    handler: Handler,
    executor: Option<Handle>,
}

impl LocalFunction {
    /// Without an executor, tasks go to the runtime of the caller.
    pub(crate) fn new(name: impl Into<String>, handler: Handler, executor: Option<Handle>) -> Self {
        Self {
            name: name.into(),
            handler,
            executor,
        }
    }
}

impl Function for LocalFunction {
    fn dispatch(&self, arguments: AnyMap) -> BoxFuture<'_, std::result::Result<PendingResult, Cause>> {
        Box::pin(async move {
            let executor = match &self.executor {
                Some(handle) => handle.clone(),
                None => Handle::try_current()?,
            };
            let handler = Arc::clone(&self.handler);
            let task = executor.spawn(async move { handler(arguments).await });

            let name = self.name.clone();
            let pending: PendingResult = Box::pin(async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(format!("'{name}' panicked").into()),
                    Err(e) => Err(Box::new(e) as Cause),
                }
            });
            Ok::<_, Cause>(pending)
        })
    }
}

/// Await both stages of a call.
///
/// Failures go through `wrap`, which keeps typed errors and wraps foreign
/// ones. `limit` bounds the second stage.
pub(crate) async fn settle(
    name: &str,
    function: &dyn Function,
    arguments: AnyMap,
    limit: Option<Duration>,
    wrap: fn(&str, Cause) -> Error,
) -> Result<AnyMap> {
    let pending = function
        .dispatch(arguments)
        .await
        .map_err(|e| wrap(name, e))?;

    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
            let waited = limit.as_millis();
            wrap(name, format!("no result after {waited}ms").into())
        })?,
        None => pending.await,
    };
    result.map_err(|e| wrap(name, e))
}

/// Wrap for calls made through the bridge.
pub(crate) fn execution_failure(name: &str, cause: Cause) -> Error {
    Error::tool_execution(name, cause)
}

/// Wrap for calls a tool makes directly.
pub(crate) fn call_failure(_name: &str, cause: Cause) -> Error {
    Error::tool_call(cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local<F, Fut>(f: F) -> LocalFunction
    where
        F: Fn(AnyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<AnyMap, Cause>> + Send + 'static,
    {
        LocalFunction::new("sensor", handler(f), None)
    }

    #[tokio::test]
    async fn both_stages_are_awaited() {
        let function = local(|args: AnyMap| async move {
            let n = args.get::<f64>("n")?;
            Ok::<_, Cause>(AnyMap::new().with("doubled", n * 2.0))
        });

        let out = settle(
            "sensor",
            &function,
            AnyMap::new().with("n", 21.0),
            None,
            execution_failure,
        )
        .await
        .unwrap();
        assert_eq!(out.get::<f64>("doubled").unwrap(), 42.0);
    }

    #[tokio::test]
    async fn panics_become_execution_errors() {
        let function = local(|_args: AnyMap| async move {
            if true {
                panic!("boom");
            }
            Ok::<_, Cause>(AnyMap::new())
        });

        let err = settle("sensor", &function, AnyMap::new(), None, execution_failure)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_EXECUTION_ERROR");
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn slow_results_time_out() {
        let function = local(|_args: AnyMap| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Cause>(AnyMap::new())
        });

        let err = settle(
            "sensor",
            &function,
            AnyMap::new(),
            Some(Duration::from_millis(20)),
            execution_failure,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ToolExecution { ref tool, .. } if tool == "sensor"));
    }

    #[test]
    fn explicit_executor_is_used_outside_a_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let function = LocalFunction::new(
            "sensor",
            handler(|_args: AnyMap| async move { Ok::<_, Cause>(AnyMap::new().with("ok", true)) }),
            Some(runtime.handle().clone()),
        );

        let out = futures::executor::block_on(settle(
            "sensor",
            &function,
            AnyMap::new(),
            None,
            execution_failure,
        ))
        .unwrap();
        assert!(out.get::<bool>("ok").unwrap());
    }
}
