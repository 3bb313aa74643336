use client_core::{CardBoard, FieldUpdate, ViewSink};
use shared::domain::CardId;
use tracing::{debug, info};

/// Logs card values as they change. Repeated identical values stay quiet.
#[derive(Debug, Default)]
pub struct TerminalSink {
    board: CardBoard,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `update` differs from the value currently shown.
    fn changes_board(&self, update: &FieldUpdate) -> bool {
        self.board.value(&update.card_id, &update.field) != update.value
    }
}

impl ViewSink for TerminalSink {
    fn update(&self, update: FieldUpdate) {
        if self.changes_board(&update) {
            info!(
                card = %update.card_id,
                field = %update.label,
                value = %update.value,
                "card updated"
            );
        }
        self.board.update(update);
    }

    fn reset(&self, card_id: &CardId) {
        debug!(card = %card_id, "card reset");
        self.board.reset(card_id);
    }
}
