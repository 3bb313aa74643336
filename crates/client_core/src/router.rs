use std::sync::Arc;

use shared::{
    domain::EventName,
    error::ProtocolParseError,
    protocol::{InboundEvent, InboundMessage, Reply, VERSION_EVENT},
};
use tracing::{debug, warn};

use crate::{
    bindings::BindingIndex,
    correlator::Correlator,
    sink::{FieldUpdate, ViewSink},
};

/// What happened to one inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Fanned out to every bound card field; `updates` may be zero for a
    /// cataloged event no card displays.
    Dispatched { event: EventName, updates: usize },
    /// Neither cataloged nor bound.
    Dropped { event: EventName },
    /// Handed to the correlator. `matched` is false for a correlation miss.
    Reply { client_id: Option<u64>, matched: bool },
    /// Could not be parsed or classified; only logged.
    Discarded(ProtocolParseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub events_routed: u64,
    pub updates_emitted: u64,
    pub parse_failures: u64,
    pub unknown_dropped: u64,
    pub replies_matched: u64,
    pub correlation_misses: u64,
}

/// Classifies inbound records and fans events out to the view sink.
///
/// Owned by the single dispatch task: one record is fully processed before
/// the next is looked at.
pub struct Router {
    index: Arc<BindingIndex>,
    correlator: Arc<Correlator>,
    sink: Arc<dyn ViewSink>,
    version: Option<InboundEvent>,
    stats: RouterStats,
}

impl Router {
    pub fn new(
        index: Arc<BindingIndex>,
        correlator: Arc<Correlator>,
        sink: Arc<dyn ViewSink>,
    ) -> Self {
        Self {
            index,
            correlator,
            sink,
            version: None,
            stats: RouterStats::default(),
        }
    }

    pub async fn on_message(&mut self, raw: &str) -> RouteOutcome {
        match InboundMessage::parse(raw) {
            InboundMessage::Event(event) => self.dispatch(&event),
            InboundMessage::Reply(reply) => self.on_reply(reply).await,
            InboundMessage::Unknown(unknown) => {
                self.stats.parse_failures += 1;
                warn!(reason = %unknown.reason, raw = %unknown.raw, "discarding unparseable message");
                RouteOutcome::Discarded(unknown.reason)
            }
        }
    }

    /// Counts a record that could not be decoded as text.
    pub fn on_undecodable(&mut self, raw: &[u8]) -> RouteOutcome {
        self.stats.parse_failures += 1;
        let reason = ProtocolParseError::InvalidUtf8(
            std::str::from_utf8(raw).err().map_or_else(String::new, |err| err.to_string()),
        );
        warn!(%reason, raw = %String::from_utf8_lossy(raw), "discarding undecodable record");
        RouteOutcome::Discarded(reason)
    }

    async fn on_reply(&mut self, reply: Reply) -> RouteOutcome {
        let client_id = reply.client_id();
        let matched = match client_id {
            Some(id) => self.correlator.resolve(id, reply.outcome).await,
            None => false,
        };
        if matched {
            self.stats.replies_matched += 1;
        } else {
            self.stats.correlation_misses += 1;
            warn!(id = %reply.id, "reply matches no pending request");
        }
        RouteOutcome::Reply { client_id, matched }
    }

    /// Pushes one update per card field bound to `event`, in table order.
    /// Missing payload values are sent as [`FieldValue::Absent`].
    ///
    /// [`FieldValue::Absent`]: shared::protocol::FieldValue::Absent
    pub fn dispatch(&mut self, event: &InboundEvent) -> RouteOutcome {
        if event.name.as_str() == VERSION_EVENT {
            self.version = Some(event.clone());
        }

        let bindings = self.index.bindings_for(&event.name);
        let cataloged = self.index.is_cataloged(&event.name);
        if bindings.is_empty() && !cataloged {
            self.stats.unknown_dropped += 1;
            warn!(event = %event.name, "dropping event that is neither cataloged nor bound");
            return RouteOutcome::Dropped {
                event: event.name.clone(),
            };
        }
        if !cataloged {
            debug!(event = %event.name, "routing uncataloged event to bound cards");
        }

        for binding in bindings {
            self.sink.update(FieldUpdate {
                card_id: binding.card_id.clone(),
                field: binding.field.clone(),
                label: binding.label.clone(),
                hint: binding.hint.clone(),
                value: event.payload.field(&binding.field),
            });
        }

        let updates = bindings.len();
        self.stats.events_routed += 1;
        self.stats.updates_emitted += updates as u64;
        debug!(event = %event.name, updates, "event dispatched");
        RouteOutcome::Dispatched {
            event: event.name.clone(),
            updates,
        }
    }

    /// Swaps in a freshly loaded index and clears every card it declares.
    pub fn replace_index(&mut self, index: Arc<BindingIndex>) {
        self.index = index;
        self.reset_cards();
    }

    pub fn reset_cards(&self) {
        for card_id in self.index.card_ids() {
            self.sink.reset(card_id);
        }
    }

    /// Forgets per-session data once the transport is gone.
    pub fn session_closed(&mut self) {
        self.version = None;
    }

    /// The greeting of the current session, if one has arrived.
    pub fn version(&self) -> Option<&InboundEvent> {
        self.version.as_ref()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
