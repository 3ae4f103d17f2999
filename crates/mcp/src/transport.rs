//! Outgoing half of the stdio connection: serialized line writes plus
//! correlation of responses to the requests we send to the client.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use {
    serde::Serialize,
    tokio::{
        io::{AsyncWrite, AsyncWriteExt},
        sync::{Mutex, oneshot},
    },
    tracing::{debug, trace, warn},
};

use crate::{
    error::{Context, Error, Result},
    types::{JsonRpcRequest, JsonRpcResponse},
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type PendingMap = HashMap<String, oneshot::Sender<JsonRpcResponse>>;

/// The connected MCP client, as seen from the server.
pub struct Peer {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,
    request_timeout: Duration,
    sampling: AtomicBool,
}

impl Peer {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sampling: AtomicBool::new(false),
        }
    }

    /// A peer writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Whether the client advertised the `sampling` capability.
    pub fn supports_sampling(&self) -> bool {
        self.sampling.load(Ordering::Relaxed)
    }

    pub(crate) fn set_supports_sampling(&self, enabled: bool) {
        self.sampling.store(enabled, Ordering::Relaxed);
    }

    /// Send a request to the client and wait for its result.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id_key.clone(), tx);

        debug!(method = %method, id = %id, "server -> client request");
        if let Err(e) = self.write_line(&req).await {
            self.pending.lock().await.remove(&id_key);
            return Err(e);
        }

        let waited = tokio::time::timeout(self.request_timeout, rx).await;
        let resp = match waited {
            Ok(resp) => resp.with_context(|| {
                format!("connection closed while waiting for '{method}' response")
            })?,
            Err(_) => {
                self.pending.lock().await.remove(&id_key);
                return Err(Error::message(format!(
                    "MCP request '{method}' timed out after {}s",
                    self.request_timeout.as_secs()
                )));
            },
        };

        if let Some(err) = resp.error {
            return Err(Error::Rpc {
                method: method.into(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }

    pub async fn respond(&self, response: &JsonRpcResponse) -> Result<()> {
        self.write_line(response).await
    }

    /// Route a client response to the request waiting on it.
    pub(crate) async fn resolve(&self, response: JsonRpcResponse) {
        let key = response.id.to_string();
        let waiter = self.pending.lock().await.remove(&key);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            },
            None => warn!(id = %key, "received response for unknown request id"),
        }
    }

    /// Fail every outstanding request; used once the input side is gone.
    pub(crate) async fn close(&self) {
        let dropped = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!(count = dropped, "abandoned pending client requests");
        }
    }

    async fn write_line<T: Serialize>(&self, message: &T) -> Result<()> {
        let mut payload = serde_json::to_string(message)?;
        trace!(raw = %payload, "server -> client");
        payload.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
