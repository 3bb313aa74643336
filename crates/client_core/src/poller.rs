//! Periodic status queries. Each reply is fed back into the dispatch loop as
//! a synthetic event named after the method, so cards can bind to query
//! results the same way they bind to broadcast events.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use shared::protocol::{InboundEvent, Payload, ERROR_EVENT};
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    connection::ConnectionManager, correlator::Correlator, error::RequestError,
    monitor::DispatchInput,
};

pub(crate) struct Poller {
    pub(crate) connection: ConnectionManager,
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) inputs: mpsc::UnboundedSender<DispatchInput>,
    pub(crate) methods: Vec<String>,
    pub(crate) interval: Duration,
}

impl Poller {
    /// Issues one method per tick, round-robin, while the session is
    /// connected. Returns when the dispatch loop is gone.
    pub(crate) async fn run(self) {
        if self.methods.is_empty() || self.interval.is_zero() {
            debug!("polling disabled");
            return;
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut methods = self.methods.iter().cycle();

        loop {
            ticker.tick().await;
            if self.inputs.is_closed() {
                return;
            }
            if !self.connection.is_connected() {
                continue;
            }
            let Some(method) = methods.next() else {
                return;
            };

            let Some(event) = self.poll_once(method).await else {
                continue;
            };
            if self.inputs.send(DispatchInput::Synthetic(event)).is_err() {
                return;
            }
        }
    }

    async fn poll_once(&self, method: &str) -> Option<InboundEvent> {
        match self.correlator.call(method, None).await {
            Ok(result) => Some(InboundEvent::synthetic(method, Payload::from_value(result))),
            Err(RequestError::Rpc {
                method,
                code,
                message,
            }) => {
                debug!(%method, code, %message, "poll request rejected");
                Some(rpc_error_event(&method, code, &message))
            }
            Err(err @ (RequestError::NotConnected | RequestError::ConnectionLost { .. })) => {
                debug!(method, error = %err, "poll skipped");
                None
            }
            Err(err) => {
                warn!(method, error = %err, "poll request failed");
                None
            }
        }
    }
}

/// The synthetic `error` event surfaced when the server rejects a request.
pub(crate) fn rpc_error_event(method: &str, code: i64, message: &str) -> InboundEvent {
    let payload: Value = json!({
        "message": message,
        "code": code,
        "method": method,
    });
    InboundEvent::synthetic(ERROR_EVENT, Payload::from_value(payload))
}
