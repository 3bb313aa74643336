use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::protocol::{RpcErrorBody, RpcRequest};
use tokio::{
    sync::{oneshot, Mutex},
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    error::{RequestError, TransportError},
    ids::IdGenerator,
};

/// Where encoded requests go. Implemented by the connection manager.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_line(&self, line: String) -> Result<(), TransportError>;
}

struct PendingRequest {
    method: String,
    issued_at: DateTime<Utc>,
    reply: oneshot::Sender<Result<Value, RequestError>>,
}

/// Handle for one in-flight request.
pub struct PendingReply {
    client_id: u64,
    receiver: oneshot::Receiver<Result<Value, RequestError>>,
}

impl PendingReply {
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub async fn wait(self) -> Result<Value, RequestError> {
        let client_id = self.client_id;
        self.receiver
            .await
            .unwrap_or(Err(RequestError::Cancelled { client_id }))
    }
}

/// Matches replies to the requests that caused them by client id.
pub struct Correlator {
    ids: Arc<dyn IdGenerator>,
    outbound: Arc<dyn Outbound>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    request_timeout: Duration,
}

impl Correlator {
    pub fn new(
        ids: Arc<dyn IdGenerator>,
        outbound: Arc<dyn Outbound>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            ids,
            outbound,
            pending: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    /// Assigns a fresh client id, records the request as pending and sends it.
    /// A send failure leaves nothing pending.
    pub async fn issue(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingReply, RequestError> {
        let client_id = self.ids.next_id();
        let line = RpcRequest::new(method, params, client_id)
            .encode()
            .map_err(|err| RequestError::Encode(err.to_string()))?;

        let (reply, receiver) = oneshot::channel();
        self.pending.lock().await.insert(
            client_id,
            PendingRequest {
                method: method.to_string(),
                issued_at: Utc::now(),
                reply,
            },
        );

        if let Err(err) = self.outbound.send_line(line).await {
            self.pending.lock().await.remove(&client_id);
            debug!(client_id, method, error = %err, "request not sent");
            return Err(err.into());
        }
        debug!(client_id, method, "request sent");

        Ok(PendingReply {
            client_id,
            receiver,
        })
    }

    /// Issues a request and waits for its reply, giving up after the request
    /// timeout. A JSON-RPC error reply becomes [`RequestError::Rpc`].
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RequestError> {
        let pending = self.issue(method, params).await?;
        let client_id = pending.client_id();
        match timeout(self.request_timeout, pending.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&client_id);
                warn!(client_id, method, "request timed out");
                Err(RequestError::TimedOut {
                    client_id,
                    method: method.to_string(),
                    timeout_ms: u64::try_from(self.request_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Completes the pending request `client_id`. Returns `false` when nothing
    /// is waiting for it (already resolved, timed out, or never issued here).
    pub async fn resolve(&self, client_id: u64, outcome: Result<Value, RpcErrorBody>) -> bool {
        let Some(request) = self.pending.lock().await.remove(&client_id) else {
            return false;
        };
        let elapsed_ms = (Utc::now() - request.issued_at).num_milliseconds();
        debug!(client_id, method = %request.method, elapsed_ms, "reply matched");
        let outcome = outcome.map_err(|body| RequestError::Rpc {
            method: request.method,
            code: body.code,
            message: body.message,
        });
        let _ = request.reply.send(outcome);
        true
    }

    /// Rejects every pending request with [`RequestError::ConnectionLost`].
    pub async fn fail_all(&self) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (client_id, request) in drained {
            let _ = request
                .reply
                .send(Err(RequestError::ConnectionLost { client_id }));
        }
        if count > 0 {
            warn!(count, "pending requests rejected after connection loss");
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
#[path = "tests/correlator_tests.rs"]
mod tests;
