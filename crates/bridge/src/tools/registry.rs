//! The registry the model runtime calls back through.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use protocol::HostLink;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::dispatch::{Function, LocalFunction, execution_failure, handler, settle};
use super::host::RemoteFunction;
use crate::any_map::AnyMap;
use crate::error::{Cause, Error, Result};

/// Named tool implementations, shared by the sessions of one application.
///
/// Registration replaces any earlier implementation of the same name.
/// Lookups and registrations may happen concurrently.
#[derive(Default)]
pub struct ToolBridge {
    functions: RwLock<HashMap<String, Arc<dyn Function>>>,
    executor: Option<Handle>,
    call_timeout: Option<Duration>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run in-process implementations on `handle` instead of the caller's runtime.
    pub fn with_executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    /// Fail calls whose result takes longer than `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn executor(&self) -> Option<&Handle> {
        self.executor.as_ref()
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Register an async closure under `name`.
    pub fn register<F, Fut, E>(&self, name: impl Into<String>, implementation: F)
    where
        F: Fn(AnyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<AnyMap, E>> + Send + 'static,
        E: Into<Cause> + 'static,
    {
        let name = name.into();
        let function = LocalFunction::new(name.clone(), handler(implementation), self.executor.clone());
        self.register_function(name, Arc::new(function));
    }

    /// Register any [`Function`] under `name`.
    pub fn register_function(&self, name: impl Into<String>, function: Arc<dyn Function>) {
        let name = name.into();
        let replaced = self
            .functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), function)
            .is_some();

        if replaced {
            info!(tool = %name, "replaced tool implementation");
        } else {
            debug!(tool = %name, "registered tool implementation");
        }
    }

    /// Register every function a scripting host implements.
    ///
    /// Performs the handshake first if it has not happened yet. Returns the
    /// number of functions registered.
    pub async fn register_host_functions(&self, link: Arc<HostLink>) -> Result<usize> {
        if !link.is_initialized().await {
            link.initialize()
                .await
                .map_err(|e| Error::tool_call(Box::new(e)))?;
        }

        let functions = link.functions().await;
        for function in &functions {
            let remote = RemoteFunction::new(Arc::clone(&link), function.name.clone());
            self.register_function(function.name.clone(), Arc::new(remote));
        }
        info!(host = link.name(), count = functions.len(), "registered host functions");
        Ok(functions.len())
    }

    /// Remove `name`, returning whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Call the implementation registered under `name`.
    pub async fn call(&self, name: &str, arguments: AnyMap) -> Result<AnyMap> {
        let function = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        debug!(tool = name, arguments = arguments.len(), "calling tool");
        settle(name, function.as_ref(), arguments, self.call_timeout, execution_failure).await
    }
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("functions", &self.names())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[tokio::test]
    async fn last_registration_wins() {
        let bridge = ToolBridge::new();
        bridge.register("f", |_args: AnyMap| async { Ok::<_, Cause>(AnyMap::new().with("v", 1.0)) });
        bridge.register("f", |_args: AnyMap| async { Ok::<_, Cause>(AnyMap::new().with("v", 2.0)) });

        let out = bridge.call("f", AnyMap::new()).await.unwrap();
        assert_eq!(out.get::<f64>("v").unwrap(), 2.0);
        assert_eq!(bridge.names(), vec!["f"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn replacement_is_logged() {
        let bridge = ToolBridge::new();
        bridge.register("f", |_args: AnyMap| async { Ok::<_, Cause>(AnyMap::new()) });
        assert!(!logs_contain("replaced tool implementation"));
        bridge.register("f", |_args: AnyMap| async { Ok::<_, Cause>(AnyMap::new()) });
        assert!(logs_contain("replaced tool implementation"));
    }

    #[tokio::test]
    async fn unknown_names_run_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bridge = ToolBridge::new();
        let counter = Arc::clone(&calls);
        bridge.register("known", move |_args: AnyMap| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Cause>(AnyMap::new()) }
        });

        let err = bridge.call("unknown", AnyMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTool(ref name) if name == "unknown"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn typed_failures_pass_and_foreign_ones_are_wrapped() {
        let bridge = ToolBridge::new();
        bridge.register("typed", |_args: AnyMap| async {
            Err::<AnyMap, _>(Error::ArgumentParsing("city is required".into()))
        });
        bridge.register("foreign", |_args: AnyMap| async {
            Err::<AnyMap, _>(std::io::Error::other("disk on fire"))
        });
        bridge.register("getter", |args: AnyMap| async move {
            let city: String = args.get("city")?;
            Ok::<_, Error>(AnyMap::new().with("city", city))
        });

        let err = bridge.call("typed", AnyMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::ArgumentParsing(_)));

        let err = bridge.call("foreign", AnyMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::ToolExecution { ref tool, .. } if tool == "foreign"));

        let err = bridge.call("getter", AnyMap::new()).await.unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_PARSING_ERROR");
    }

    #[tokio::test]
    async fn unregister_removes() {
        let bridge = ToolBridge::new();
        bridge.register("f", |_args: AnyMap| async { Ok::<_, Cause>(AnyMap::new()) });
        assert!(bridge.contains("f"));
        assert!(bridge.unregister("f"));
        assert!(!bridge.unregister("f"));
        assert!(!bridge.contains("f"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_and_lookup() {
        let bridge = Arc::new(ToolBridge::new());
        let tasks: Vec<_> = (0..16u32)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    let name = format!("tool_{i}");
                    bridge.register(name.clone(), move |_args: AnyMap| async move {
                        Ok::<_, Cause>(AnyMap::new().with("i", f64::from(i)))
                    });
                    bridge.call(&name, AnyMap::new()).await
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            let out = task.await.unwrap().unwrap();
            assert_eq!(out.get::<f64>("i").unwrap(), i as f64);
        }
        assert_eq!(bridge.names().len(), 16);
    }
}
