//! Wires the connection manager, correlator, router and poller together.
//!
//! Everything that touches the cards runs on one dispatch task: socket
//! records, poll results and table reloads are all queued to it and handled
//! strictly one after another.

use std::sync::Arc;

use serde_json::Value;
use shared::{protocol::InboundEvent, tables::StaticTables};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    bindings::{BindingIndex, ConfigIssue},
    config::MonitorConfig,
    connection::{ConnectionEvent, ConnectionManager},
    correlator::Correlator,
    error::RequestError,
    ids::{IdGenerator, SequentialIds},
    poller::Poller,
    router::{Router, RouterStats},
    sink::ViewSink,
};

/// Work queued to the dispatch task from outside the socket.
#[derive(Debug)]
pub enum DispatchInput {
    Synthetic(InboundEvent),
    Reload(Arc<BindingIndex>),
}

pub struct Monitor {
    connection: ConnectionManager,
    correlator: Arc<Correlator>,
    inputs: mpsc::UnboundedSender<DispatchInput>,
    version: watch::Receiver<Option<InboundEvent>>,
    stats: watch::Receiver<RouterStats>,
    dispatch_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl Monitor {
    /// Validates the tables, spawns every task and starts connecting. Table
    /// issues are logged, never fatal.
    pub fn start(config: MonitorConfig, tables: &StaticTables, sink: Arc<dyn ViewSink>) -> Self {
        Self::start_with_ids(
            config,
            tables,
            sink,
            Arc::new(SequentialIds::clock_seeded()),
        )
    }

    pub fn start_with_ids(
        config: MonitorConfig,
        tables: &StaticTables,
        sink: Arc<dyn ViewSink>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (index, issues) = BindingIndex::load(tables);
        info!(
            cards = index.card_ids().len(),
            issues = issues.len(),
            "binding tables loaded"
        );

        let retry = config.connection.retry.build();
        let (connection, events) = ConnectionManager::spawn(config.connection.clone(), retry);
        let correlator = Arc::new(Correlator::new(
            ids,
            Arc::new(connection.clone()),
            config.request_timeout,
        ));
        let router = Router::new(Arc::new(index), correlator.clone(), sink);
        router.reset_cards();

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (version_tx, version_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(RouterStats::default());

        let dispatch = DispatchLoop {
            router,
            correlator: correlator.clone(),
            events,
            inputs: inputs_rx,
            version: version_tx,
            stats: stats_tx,
        };
        let dispatch_task = tokio::spawn(dispatch.run());

        let poller = Poller {
            connection: connection.clone(),
            correlator: correlator.clone(),
            inputs: inputs_tx.clone(),
            methods: config.poll_methods.clone(),
            interval: config.poll_interval,
        };
        let poll_task = tokio::spawn(poller.run());

        connection.connect();

        Self {
            connection,
            correlator,
            inputs: inputs_tx,
            version: version_rx,
            stats: stats_rx,
            dispatch_task,
            poll_task,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Sends a request and waits for its correlated reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RequestError> {
        self.correlator.call(method, params).await
    }

    /// Validates `tables` and swaps them in between two inbound records. Every
    /// card of the new table is reset.
    pub fn reload(&self, tables: &StaticTables) -> Vec<ConfigIssue> {
        let (index, issues) = BindingIndex::load(tables);
        if self
            .inputs
            .send(DispatchInput::Reload(Arc::new(index)))
            .is_err()
        {
            warn!("dispatch loop is gone; reload ignored");
        }
        issues
    }

    /// The `Version` greeting of the current session.
    pub fn version(&self) -> Option<InboundEvent> {
        self.version.borrow().clone()
    }

    pub fn stats(&self) -> RouterStats {
        *self.stats.borrow()
    }

    /// Resolves once the dispatch loop has published stats satisfying `pred`.
    pub async fn wait_for_stats(&self, pred: impl FnMut(&RouterStats) -> bool) -> bool {
        let mut stats = self.stats.clone();
        let reached = stats.wait_for(pred).await.is_ok();
        reached
    }

    /// Closes the session and stops every task. Requests still pending are
    /// rejected with [`RequestError::ConnectionLost`].
    pub async fn shutdown(self) {
        self.connection.shutdown().await;
        self.poll_task.abort();
        self.dispatch_task.abort();
        self.correlator.fail_all().await;
        info!("monitor stopped");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.poll_task.abort();
        self.dispatch_task.abort();
    }
}

struct DispatchLoop {
    router: Router,
    correlator: Arc<Correlator>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    inputs: mpsc::UnboundedReceiver<DispatchInput>,
    version: watch::Sender<Option<InboundEvent>>,
    stats: watch::Sender<RouterStats>,
}

impl DispatchLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.on_connection_event(event).await,
                    None => {
                        debug!("connection driver gone; dispatch loop exiting");
                        return;
                    }
                },
                Some(input) = self.inputs.recv() => self.on_input(input),
            }
            self.publish();
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.router.reset_cards(),
            ConnectionEvent::Message(raw) => {
                self.router.on_message(&raw).await;
            }
            ConnectionEvent::Undecodable(bytes) => {
                self.router.on_undecodable(&bytes);
            }
            ConnectionEvent::Closed(reason) => {
                let rejected = self.correlator.fail_all().await;
                self.router.session_closed();
                debug!(?reason, rejected, "session closed");
            }
            ConnectionEvent::Error(err) => {
                warn!(error = %err, "transport error");
            }
        }
    }

    fn on_input(&mut self, input: DispatchInput) {
        match input {
            DispatchInput::Synthetic(event) => {
                self.router.dispatch(&event);
            }
            DispatchInput::Reload(index) => {
                info!(cards = index.card_ids().len(), "binding tables reloaded");
                self.router.replace_index(index);
            }
        }
    }

    fn publish(&self) {
        let version = self.router.version().cloned();
        self.version.send_if_modified(|current| {
            if *current == version {
                false
            } else {
                *current = version;
                true
            }
        });
        let stats = self.router.stats();
        self.stats.send_if_modified(|current| {
            if *current == stats {
                false
            } else {
                *current = stats;
                true
            }
        });
    }
}
