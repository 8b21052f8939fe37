use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry tying request-scoped slot strings to cancellation handles.
///
/// Callers register a slot when they start long-running work on behalf of a
/// request; a later `Cancel` request referencing the same slot trips the
/// token. Slots are removed on cancel and may be re-registered.
#[derive(Debug, Default)]
pub struct Mailbox {
    slots: Mutex<HashMap<String, CancellationToken>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a slot and returns its cancellation handle. Registering an
    /// existing slot replaces the previous handle without cancelling it.
    pub fn register(&self, slot: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.slots.lock().insert(slot.to_string(), token.clone());
        token
    }

    /// Cancels and removes the handle at `slot`, if any.
    pub fn cancel(&self, slot: &str) {
        let token = self.slots.lock().remove(slot);
        match token {
            Some(token) => {
                debug!(slot, "mailbox slot cancelled");
                token.cancel();
            }
            None => debug!(slot, "cancel for unknown mailbox slot"),
        }
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
