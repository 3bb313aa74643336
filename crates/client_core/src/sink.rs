//! The presentation seam. The router pushes one [`FieldUpdate`] per bound
//! card field; what a sink does with it (terminal, GUI, test recorder) is its
//! own business.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use shared::{domain::CardId, protocol::FieldValue};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub card_id: CardId,
    pub field: String,
    pub label: String,
    pub hint: String,
    pub value: FieldValue,
}

/// Receives card updates from the dispatch loop. Calls arrive from a single
/// task, in dispatch order; implementations must not block for long.
pub trait ViewSink: Send + Sync {
    fn update(&self, update: FieldUpdate);

    /// Clears every value shown on `card_id`.
    fn reset(&self, card_id: &CardId);
}

/// Keeps the latest value of every card field in memory.
#[derive(Debug, Default)]
pub struct CardBoard {
    cards: Mutex<HashMap<CardId, HashMap<String, FieldValue>>>,
}

impl CardBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of `field` on `card_id`; [`FieldValue::Absent`] if it was
    /// never set or the card has been reset since.
    pub fn value(&self, card_id: &CardId, field: &str) -> FieldValue {
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(card_id)
            .and_then(|fields| fields.get(field))
            .cloned()
            .unwrap_or(FieldValue::Absent)
    }

    pub fn card(&self, card_id: &CardId) -> HashMap<String, FieldValue> {
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(card_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl ViewSink for CardBoard {
    fn update(&self, update: FieldUpdate) {
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(update.card_id)
            .or_default()
            .insert(update.field, update.value);
    }

    fn reset(&self, card_id: &CardId) {
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(card_id);
    }
}
