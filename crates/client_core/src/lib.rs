//! Monitoring client for the PHD2 guiding server.
//!
//! [`Monitor`] keeps a reconnecting session open, correlates requests with
//! their replies and routes every inbound event to the card fields bound to
//! it through a [`ViewSink`].

pub mod bindings;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod ids;
pub mod monitor;
mod poller;
pub mod retry;
pub mod router;
pub mod sink;

pub use bindings::{Binding, BindingIndex, ConfigIssue};
pub use config::{ConnectionConfig, Endpoint, MonitorConfig};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, Session};
pub use correlator::{Correlator, Outbound, PendingReply};
pub use error::{CloseReason, RequestError, TransportError};
pub use ids::{IdGenerator, SequentialIds};
pub use monitor::{DispatchInput, Monitor};
pub use retry::{ExponentialBackoff, FixedDelay, RetryConfig, RetryStrategy};
pub use router::{RouteOutcome, Router, RouterStats};
pub use sink::{CardBoard, FieldUpdate, ViewSink};
