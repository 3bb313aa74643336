//! Reconnecting session against the guiding server.
//!
//! A single driver task owns the socket, the session state and the reconnect
//! timer. Callers hold a cloneable [`ConnectionManager`] handle; every request
//! they make is queued to the driver, so writes reach the socket one at a time
//! and in submission order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use shared::protocol::LINE_TERMINATOR;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, oneshot, watch},
    time::{sleep_until, timeout, Instant},
};
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionConfig,
    correlator::Outbound,
    error::{CloseReason, TransportError},
    retry::RetryStrategy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Runtime state of the connection. Only the driver task writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: ConnectionState,
    /// Failed attempts and unexpected closes since the last successful connect.
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Whether a reconnect timer is armed.
    pub retry_pending: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            last_attempt_at: None,
            retry_pending: false,
        }
    }
}

/// Lifecycle notifications, delivered in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Message(String),
    /// A record that is not valid UTF-8. The session stays open.
    Undecodable(Vec<u8>),
    Closed(CloseReason),
    Error(TransportError),
}

enum Command {
    Connect,
    Send {
        line: String,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    session: watch::Receiver<Session>,
}

impl ConnectionManager {
    /// Spawns the driver task. The returned receiver is the single subscriber
    /// for lifecycle notifications. Nothing connects until [`Self::connect`].
    pub fn spawn(
        config: ConnectionConfig,
        retry: Box<dyn RetryStrategy>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = watch::channel(Session::default());

        let driver = Driver {
            endpoint: config.endpoint.to_string(),
            config,
            retry,
            commands: commands_rx,
            events: events_tx,
            session: session_tx,
            retry_at: None,
        };
        tokio::spawn(driver.run());

        (
            Self {
                commands: commands_tx,
                session: session_rx,
            },
            events_rx,
        )
    }

    /// Starts connecting. A no-op while already connecting or connected; while
    /// waiting to reconnect it replaces the pending timer with an immediate
    /// attempt.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Writes one record. Fails with [`TransportError::NotConnected`] when no
    /// session is open.
    pub async fn send(&self, line: impl Into<String>) -> Result<(), TransportError> {
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                line: line.into(),
                ack,
            })
            .map_err(|_| TransportError::NotConnected)?;
        ack_rx.await.unwrap_or(Err(TransportError::NotConnected))
    }

    /// Closes the session, if any, and cancels a pending reconnect. Automatic
    /// reconnection stays off until the next [`Self::connect`].
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolves once the session reaches `state`; `false` if the driver is gone.
    pub async fn wait_for_state(&self, state: ConnectionState) -> bool {
        let mut session = self.session.clone();
        let reached = session.wait_for(|s| s.state == state).await.is_ok();
        reached
    }

    pub fn watch_session(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }
}

#[async_trait]
impl Outbound for ConnectionManager {
    async fn send_line(&self, line: String) -> Result<(), TransportError> {
        self.send(line).await
    }
}

struct Link {
    records: SplitStream<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            records: SplitStream::new(BufReader::new(reader).split(b'\n')),
            writer,
        }
    }

    async fn write_record(&mut self, line: &str) -> Result<(), TransportError> {
        let mut record = String::with_capacity(line.len() + LINE_TERMINATOR.len());
        record.push_str(line.trim_end_matches(['\r', '\n']));
        record.push_str(LINE_TERMINATOR);
        self.writer.write_all(record.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

enum Step {
    Command(Option<Command>),
    Record(Option<std::io::Result<Vec<u8>>>),
    RetryDue,
}

struct Driver {
    config: ConnectionConfig,
    endpoint: String,
    retry: Box<dyn RetryStrategy>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    session: watch::Sender<Session>,
    retry_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        let mut link: Option<Link> = None;
        loop {
            let step = match link.as_mut() {
                Some(active) => tokio::select! {
                    command = self.commands.recv() => Step::Command(command),
                    record = active.records.next() => Step::Record(record),
                },
                None => {
                    let retry_at = self.retry_at;
                    tokio::select! {
                        command = self.commands.recv() => Step::Command(command),
                        _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => Step::RetryDue,
                    }
                }
            };

            match step {
                Step::Command(None) => {
                    if let Some(active) = link.take() {
                        active.close().await;
                    }
                    debug!(endpoint = %self.endpoint, "connection handles dropped; driver exiting");
                    return;
                }
                Step::Command(Some(Command::Connect)) => {
                    if link.is_none() {
                        self.disarm_retry();
                        link = self.attempt().await;
                    } else {
                        debug!(endpoint = %self.endpoint, "connect requested while connected; ignoring");
                    }
                }
                Step::Command(Some(Command::Send { line, ack })) => {
                    let Some(active) = link.as_mut() else {
                        let _ = ack.send(Err(TransportError::NotConnected));
                        continue;
                    };
                    let written = active.write_record(&line).await;
                    let _ = ack.send(written.clone());
                    if let Err(err) = written {
                        link = None;
                        self.lost(CloseReason::Transport(err));
                    }
                }
                Step::Command(Some(Command::Shutdown { done })) => {
                    if let Some(active) = link.take() {
                        self.set_state(ConnectionState::Closing);
                        active.close().await;
                        self.emit(ConnectionEvent::Closed(CloseReason::Shutdown));
                    }
                    self.stop();
                    let _ = done.send(());
                }
                Step::Record(Some(Ok(record))) => self.on_record(record),
                Step::Record(Some(Err(err))) => {
                    link = None;
                    self.lost(CloseReason::Transport(err.into()));
                }
                Step::Record(None) => {
                    link = None;
                    self.lost(CloseReason::PeerClosed);
                }
                Step::RetryDue => {
                    self.disarm_retry();
                    link = self.attempt().await;
                }
            }
        }
    }

    /// One connection attempt. Commands keep being served while it is in
    /// flight so that a shutdown can abandon it.
    async fn attempt(&mut self) -> Option<Link> {
        self.session.send_modify(|session| {
            session.state = ConnectionState::Connecting;
            session.last_attempt_at = Some(Utc::now());
        });
        debug!(endpoint = %self.endpoint, "connecting");

        let address = self.endpoint.clone();
        let connect = timeout(self.config.connect_timeout, TcpStream::connect(address));
        tokio::pin!(connect);

        let outcome = loop {
            tokio::select! {
                outcome = &mut connect => break Some(outcome),
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {
                        debug!(endpoint = %self.endpoint, "connect requested while connecting; ignoring");
                    }
                    Some(Command::Send { ack, .. }) => {
                        let _ = ack.send(Err(TransportError::NotConnected));
                    }
                    Some(Command::Shutdown { done }) => {
                        self.stop();
                        let _ = done.send(());
                        break None;
                    }
                    None => break None,
                },
            }
        };

        match outcome? {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                self.session.send_modify(|session| {
                    session.state = ConnectionState::Connected;
                    session.retry_count = 0;
                    session.retry_pending = false;
                });
                info!(endpoint = %self.endpoint, "connected to guiding server");
                self.emit(ConnectionEvent::Opened);
                Some(Link::new(stream))
            }
            Ok(Err(err)) => {
                self.failed(TransportError::connect(&self.endpoint, &err));
                None
            }
            Err(_) => {
                self.failed(TransportError::ConnectTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: u64::try_from(self.config.connect_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
                None
            }
        }
    }

    /// Decodes one newline-delimited record. Blank records are skipped; a
    /// record that is not UTF-8 is reported without touching the session.
    fn on_record(&self, mut record: Vec<u8>) {
        if record.last() == Some(&b'\r') {
            record.pop();
        }
        match String::from_utf8(record) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => self.emit(ConnectionEvent::Message(line)),
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err.utf8_error(), "record is not valid UTF-8");
                self.emit(ConnectionEvent::Undecodable(err.into_bytes()));
            }
        }
    }

    fn failed(&mut self, err: TransportError) {
        warn!(endpoint = %self.endpoint, error = %err, "could not connect to guiding server");
        self.emit(ConnectionEvent::Error(err));
        self.schedule_retry();
    }

    fn lost(&mut self, reason: CloseReason) {
        match &reason {
            CloseReason::Transport(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "connection to guiding server failed");
                self.emit(ConnectionEvent::Error(err.clone()));
            }
            _ => info!(endpoint = %self.endpoint, "guiding server closed the connection"),
        }
        self.emit(ConnectionEvent::Closed(reason));
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let attempt = self.session.borrow().retry_count.saturating_add(1);
        let delay = self.retry.next_delay(attempt);
        self.retry_at = delay.map(|delay| Instant::now() + delay);
        self.session.send_modify(|session| {
            session.state = ConnectionState::Disconnected;
            session.retry_count = attempt;
            session.retry_pending = delay.is_some();
        });
        match delay {
            Some(delay) => info!(
                endpoint = %self.endpoint,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnect scheduled"
            ),
            None => warn!(
                endpoint = %self.endpoint,
                attempt,
                "retry strategy exhausted; waiting for manual connect"
            ),
        }
    }

    fn disarm_retry(&mut self) {
        self.retry_at = None;
        self.session
            .send_modify(|session| session.retry_pending = false);
    }

    fn stop(&mut self) {
        self.retry_at = None;
        self.session.send_modify(|session| {
            session.state = ConnectionState::Disconnected;
            session.retry_pending = false;
        });
        info!(endpoint = %self.endpoint, "connection shut down");
    }

    fn set_state(&self, state: ConnectionState) {
        self.session.send_modify(|session| session.state = state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}
