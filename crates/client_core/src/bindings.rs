//! Validating loader that turns the static tables into the router's lookup
//! index: event name to the ordered list of card fields bound to it.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{CardId, EventName},
    tables::StaticTables,
};
use thiserror::Error;
use tracing::warn;

/// A table entry the loader could not fully validate. Reported as a warning;
/// never blocks startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("catalog lists event {event} more than once; keeping the first label")]
    DuplicateEvent { event: EventName },
    #[error("card {header:?} has an empty id and was skipped")]
    EmptyCardId { header: String },
    #[error("card id {card_id} is used more than once; later cards with it were skipped")]
    DuplicateCard { card_id: CardId },
    #[error("card {card_id} field #{position} has an empty event name and was skipped")]
    EmptyEventName { card_id: CardId, position: usize },
    #[error("card {card_id} field #{position} ({event}) has an empty field name and was skipped")]
    EmptyFieldName {
        card_id: CardId,
        event: EventName,
        position: usize,
    },
    #[error("card {card_id} binds event {event}, which is not in the catalog")]
    UncatalogedEvent { card_id: CardId, event: EventName },
}

/// One card field interested in an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub card_id: CardId,
    pub field: String,
    pub label: String,
    pub hint: String,
}

#[derive(Debug, Clone, Default)]
pub struct BindingIndex {
    labels: HashMap<EventName, String>,
    bindings: HashMap<EventName, Vec<Binding>>,
    cards: Vec<CardId>,
}

impl BindingIndex {
    /// Builds the index, logging every issue found along the way.
    pub fn load(tables: &StaticTables) -> (Self, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let mut index = Self::default();

        for descriptor in &tables.events {
            if index.labels.contains_key(&descriptor.event) {
                issues.push(ConfigIssue::DuplicateEvent {
                    event: descriptor.event.clone(),
                });
                continue;
            }
            index
                .labels
                .insert(descriptor.event.clone(), descriptor.label.clone());
        }

        let mut seen_cards = HashSet::new();
        for card in &tables.cards {
            if card.id.as_str().trim().is_empty() {
                issues.push(ConfigIssue::EmptyCardId {
                    header: card.header.clone(),
                });
                continue;
            }
            if !seen_cards.insert(card.id.clone()) {
                issues.push(ConfigIssue::DuplicateCard {
                    card_id: card.id.clone(),
                });
                continue;
            }
            index.cards.push(card.id.clone());

            for (position, field) in card.fields.iter().enumerate() {
                if field.event.as_str().trim().is_empty() {
                    issues.push(ConfigIssue::EmptyEventName {
                        card_id: card.id.clone(),
                        position,
                    });
                    continue;
                }
                if field.field.trim().is_empty() {
                    issues.push(ConfigIssue::EmptyFieldName {
                        card_id: card.id.clone(),
                        event: field.event.clone(),
                        position,
                    });
                    continue;
                }

                let uncataloged = ConfigIssue::UncatalogedEvent {
                    card_id: card.id.clone(),
                    event: field.event.clone(),
                };
                if !index.labels.contains_key(&field.event) && !issues.contains(&uncataloged) {
                    issues.push(uncataloged);
                }

                index
                    .bindings
                    .entry(field.event.clone())
                    .or_default()
                    .push(Binding {
                        card_id: card.id.clone(),
                        field: field.field.clone(),
                        label: field.label.clone(),
                        hint: field.hint.clone(),
                    });
            }
        }

        for issue in &issues {
            warn!(issue = %issue, "binding table inconsistency");
        }
        (index, issues)
    }

    /// Card fields bound to `event`, in table order.
    pub fn bindings_for(&self, event: &EventName) -> &[Binding] {
        self.bindings.get(event).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_cataloged(&self, event: &EventName) -> bool {
        self.labels.contains_key(event)
    }

    pub fn event_label(&self, event: &EventName) -> Option<&str> {
        self.labels.get(event).map(String::as_str)
    }

    pub fn card_ids(&self) -> &[CardId] {
        &self.cards
    }
}

#[cfg(test)]
#[path = "tests/bindings_tests.rs"]
mod tests;
