//! Host link management (spawn, communicate, lifecycle).
//!
//! Requests are multiplexed by id: a background reader routes each response
//! to the caller that is waiting for it, so several calls may be in flight.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CALL_FUNCTION, CallFunctionParams, FunctionInfo, HostMessage, INITIALIZE, INITIALIZED,
    InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, RequestId, SHUTDOWN,
};

/// Default timeout for host operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of a single frame (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Configuration for a host process.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

type Waiters = Arc<std::sync::Mutex<HashMap<RequestId, oneshot::Sender<Result<JsonRpcResponse>>>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A response the host has not produced yet.
///
/// Obtaining one means the request reached the host; awaiting [`wait`]
/// yields the result. Dropping it abandons the request.
///
/// [`wait`]: PendingReply::wait
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    rx: Option<oneshot::Receiver<Result<JsonRpcResponse>>>,
    waiters: Waiters,
    timeout: Duration,
}

impl PendingReply {
    /// The id of the outstanding request.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the host's answer.
    pub async fn wait(mut self) -> Result<serde_json::Value> {
        let rx = self.rx.take().ok_or(Error::Closed)?;
        let response = timeout(self.timeout, rx)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::Closed)??;

        if response.id != self.id {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {:?}, got {:?}",
                self.id, response.id
            )));
        }

        Ok(response.into_result()?)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Handle to a connected scripting host.
pub struct HostLink {
    name: String,
    writer: Mutex<Writer>,
    waiters: Waiters,
    next_id: AtomicI64,
    timeout: Duration,
    process: Option<Mutex<Child>>,
    reader: JoinHandle<()>,
    host_info: Mutex<Option<InitializeResult>>,
}

impl HostLink {
    /// Spawn a host process and talk to it over its stdio.
    pub async fn spawn(config: HostConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        debug!(host = %config.name, command = %config.command, "spawned host process");
        let mut link = Self::connect(config.name, stdout, stdin);
        link.process = Some(Mutex::new(process));
        Ok(link)
    }

    /// Talk to a host over an arbitrary reader/writer pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let waiters: Waiters = Arc::default();
        let reader = tokio::spawn(read_loop(name.clone(), reader, Arc::clone(&waiters)));

        Self {
            name,
            writer: Mutex::new(Box::new(writer)),
            waiters,
            next_id: AtomicI64::new(1),
            timeout: DEFAULT_TIMEOUT,
            process: None,
            reader,
            host_info: Mutex::new(None),
        }
    }

    /// Override how long a request may wait for its response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the host name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Perform the handshake (must be called before calling functions).
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request(INITIALIZE, Some(InitializeParams::default()))
            .await?;

        self.notify(INITIALIZED, None::<()>).await?;

        debug!(
            host = %self.name,
            functions = result.functions.len(),
            "host initialized"
        );
        *self.host_info.lock().await = Some(result.clone());
        Ok(result)
    }

    /// Check if the handshake has completed.
    pub async fn is_initialized(&self) -> bool {
        self.host_info.lock().await.is_some()
    }

    /// Functions the host announced during the handshake.
    pub async fn functions(&self) -> Vec<FunctionInfo> {
        self.host_info
            .lock()
            .await
            .as_ref()
            .map(|info| info.functions.clone())
            .unwrap_or_default()
    }

    /// Send a `functions/call` request; the reply arrives later.
    pub async fn call_function(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<PendingReply> {
        if !self.is_initialized().await {
            return Err(Error::NotInitialized);
        }

        let params = CallFunctionParams {
            name: name.to_string(),
            arguments,
        };
        self.dispatch(CALL_FUNCTION, Some(params)).await
    }

    /// Write a request and return without waiting for the response.
    pub async fn dispatch<P>(&self, method: &str, params: Option<P>) -> Result<PendingReply>
    where
        P: serde::Serialize,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let frame = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);

        // Registered before writing so a fast host cannot answer first.
        let reply = PendingReply {
            id,
            rx: Some(rx),
            waiters: Arc::clone(&self.waiters),
            timeout: self.timeout,
        };

        self.write_frame(&frame).await?;
        Ok(reply)
    }

    /// Send a request and wait for its typed result.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let value = self.dispatch(method, params).await?.wait().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification (no response expected).
    pub async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<()>
    where
        P: serde::Serialize,
    {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.and_then(|p| serde_json::to_value(p).ok())
        });

        let frame = serde_json::to_string(&notification)?;
        self.write_frame(&frame).await
    }

    /// Check if the host is still reachable.
    pub async fn is_running(&self) -> bool {
        if self.reader.is_finished() {
            return false;
        }
        match &self.process {
            Some(process) => matches!(process.lock().await.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Shut the host down.
    pub async fn shutdown(self) -> Result<()> {
        // Best effort: the host may already be gone.
        let _ = self.notify(SHUTDOWN, None::<()>).await;

        if let Some(process) = &self.process {
            let _ = process.lock().await.kill().await;
        }
        self.reader.abort();

        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Drop for HostLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for HostLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLink")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn read_loop<R>(name: String, reader: R, waiters: Waiters)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_SIZE));

    while let Some(next) = frames.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                // An oversized frame cannot be matched to its request; fail every waiter.
                warn!(host = %name, max = MAX_FRAME_SIZE, "host sent an oversized frame");
                fail_all(&waiters, || Error::FrameTooLarge { max: MAX_FRAME_SIZE });
                continue;
            }
            Err(LinesCodecError::Io(e)) => {
                warn!(host = %name, error = %e, "failed to read from host");
                break;
            }
        };

        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        match serde_json::from_str::<HostMessage>(frame) {
            Ok(HostMessage::Response(response)) => {
                let waiter = waiters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(response));
                    }
                    None => {
                        debug!(host = %name, id = ?response.id, "dropping response nobody waits for");
                    }
                }
            }
            Ok(HostMessage::Notification(notification)) => {
                debug!(host = %name, method = %notification.method, "host notification");
            }
            Err(e) => {
                warn!(host = %name, error = %e, "ignoring malformed frame from host");
            }
        }
    }

    debug!(host = %name, "host closed its output");
    // Dropping the senders wakes every waiter with `Error::Closed`.
    waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

fn fail_all(waiters: &Waiters, error: impl Fn() -> Error) {
    let drained: Vec<_> = waiters
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, waiter) in drained {
        let _ = waiter.send(Err(error()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorInfo, JsonRpcError};
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, duplex};

    /// Spawn a fake host that answers each request with `answer`.
    fn fake_host<F>(answer: F) -> HostLink
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse> + Send + 'static,
    {
        let (bridge_side, host_side) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        tokio::spawn(serve(host_side, answer));
        HostLink::connect("fake", bridge_read, bridge_write)
    }

    async fn serve<F>(stream: DuplexStream, answer: F)
    where
        F: Fn(&JsonRpcRequest) -> Option<JsonRpcResponse>,
    {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&line) else {
                continue; // notification
            };
            if let Some(response) = answer(&request) {
                let frame = serde_json::to_string(&response).unwrap();
                write.write_all(frame.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        }
    }

    fn handshake(request: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(
            request.id.clone(),
            json!({
                "protocolVersion": "2025-06-01",
                "hostInfo": {"name": "fake"},
                "functions": [{"name": "echo"}]
            }),
        )
    }

    #[test]
    fn host_config_creation() {
        let config = HostConfig {
            name: "node".to_string(),
            command: "node".to_string(),
            args: vec!["host.js".to_string()],
            env: HashMap::new(),
        };
        assert_eq!(config.name, "node");
    }

    #[tokio::test]
    async fn initialize_records_functions() {
        let link = fake_host(|req| Some(handshake(req)));
        assert!(!link.is_initialized().await);

        let info = link.initialize().await.unwrap();
        assert_eq!(info.host_info.name, "fake");
        assert!(link.is_initialized().await);
        assert_eq!(link.functions().await[0].name, "echo");
    }

    #[tokio::test]
    async fn call_before_initialize_is_rejected() {
        let link = fake_host(|_| None);
        let err = link.call_function("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn call_function_round_trip() {
        let link = fake_host(|req| match req.method.as_str() {
            INITIALIZE => Some(handshake(req)),
            CALL_FUNCTION => {
                let params = req.params.clone().unwrap_or(Value::Null);
                Some(JsonRpcResponse::success(req.id.clone(), params["arguments"].clone()))
            }
            _ => None,
        });
        link.initialize().await.unwrap();

        let pending = link.call_function("echo", json!({"city": "Tokyo"})).await.unwrap();
        let value = pending.wait().await.unwrap();
        assert_eq!(value, json!({"city": "Tokyo"}));
    }

    #[tokio::test]
    async fn concurrent_calls_are_routed_by_id() {
        let link = fake_host(|req| match req.method.as_str() {
            INITIALIZE => Some(handshake(req)),
            _ => Some(JsonRpcResponse::success(req.id.clone(), json!({"id": format!("{:?}", req.id)}))),
        });
        link.initialize().await.unwrap();

        let first = link.call_function("echo", json!({})).await.unwrap();
        let second = link.call_function("echo", json!({})).await.unwrap();
        let second_id = format!("{:?}", second.id());
        let first_id = format!("{:?}", first.id());

        let (a, b) = tokio::join!(second.wait(), first.wait());
        assert_eq!(a.unwrap()["id"], json!(second_id));
        assert_eq!(b.unwrap()["id"], json!(first_id));
    }

    #[tokio::test]
    async fn host_errors_surface_as_json_rpc_errors() {
        let link = fake_host(|req| match req.method.as_str() {
            INITIALIZE => Some(handshake(req)),
            _ => {
                let info = ErrorInfo::new("TOOL_EXECUTION_ERROR", "boom");
                Some(JsonRpcResponse::failure(req.id.clone(), JsonRpcError::from_info(&info)))
            }
        });
        link.initialize().await.unwrap();

        let err = link
            .call_function("echo", json!({}))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        let Error::JsonRpc(rpc) = err else {
            panic!("expected a JSON-RPC error, got {err:?}");
        };
        assert_eq!(rpc.error_info().unwrap().code, "TOOL_EXECUTION_ERROR");
    }

    #[tokio::test]
    async fn silent_host_times_out() {
        let link = fake_host(|_| None).with_timeout(Duration::from_millis(50));
        let err = link.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn closed_host_fails_pending_requests() {
        let (bridge_side, host_side) = duplex(1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let link = HostLink::connect("gone", bridge_read, bridge_write);

        let pending = link.dispatch(INITIALIZE, None::<()>).await.unwrap();
        drop(host_side);

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::Closed | Error::Io(_)));
    }

    #[tokio::test]
    async fn dropped_reply_forgets_waiter() {
        let link = fake_host(|_| None);
        let pending = link.dispatch(INITIALIZE, None::<()>).await.unwrap();
        assert_eq!(link.waiters.lock().unwrap().len(), 1);
        drop(pending);
        assert!(link.waiters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_fails_pending_requests() {
        let (bridge_side, host_side) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let link = HostLink::connect("chatty", bridge_read, bridge_write)
            .with_timeout(Duration::from_secs(5));

        let pending = link.dispatch(INITIALIZE, None::<()>).await.unwrap();
        let (host_read, mut host_write) = tokio::io::split(host_side);
        tokio::spawn(async move {
            // Keep the request side drained so the bridge never blocks writing.
            let mut lines = BufReader::new(host_read).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });
        tokio::spawn(async move {
            let mut junk = vec![b'x'; 2 * MAX_FRAME_SIZE];
            junk.push(b'\n');
            host_write.write_all(&junk).await.unwrap();
            let _ = host_write.flush().await;
            // Stay open so the failure comes from the size limit, not EOF.
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(host_write);
        });

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { max } if max == MAX_FRAME_SIZE));
    }

    #[tokio::test]
    async fn link_recovers_after_oversized_frame() {
        let (bridge_side, host_side) = duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let link = HostLink::connect("chatty", bridge_read, bridge_write);
        let (host_read, mut host_write) = tokio::io::split(host_side);
        let (discarded_tx, discarded_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(host_read).lines();
            let mut junk = vec![b'x'; 2 * MAX_FRAME_SIZE];
            junk.push(b'\n');
            host_write.write_all(&junk).await.unwrap();
            // The link has read past the limit by the time the write completes.
            let _ = discarded_tx.send(());
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&line) else {
                    continue;
                };
                let frame = serde_json::to_string(&handshake(&request)).unwrap();
                host_write.write_all(frame.as_bytes()).await.unwrap();
                host_write.write_all(b"\n").await.unwrap();
            }
        });

        discarded_rx.await.unwrap();
        let info = link.initialize().await.unwrap();
        assert_eq!(info.functions[0].name, "echo");
    }
}
