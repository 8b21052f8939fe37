use std::collections::HashMap;

use crate::record::HistoryItem;

/// Per-step accumulator of history items.
///
/// Items keep their first-seen position; updating an existing key replaces
/// its value in place (last writer wins) so a step never carries duplicate
/// keys. The step is tracked in client-stepped mode and absent in shared
/// mode, where the server assigns step numbers downstream.
#[derive(Debug, Default)]
pub struct ActiveHistory {
    step: Option<i64>,
    items: Vec<HistoryItem>,
    index: HashMap<String, usize>,
}

impl ActiveHistory {
    /// Creates a client-stepped accumulator starting at `step`.
    pub fn with_step(step: i64) -> Self {
        Self {
            step: Some(step),
            ..Self::default()
        }
    }

    /// Creates a shared-mode accumulator with no step tracking.
    pub fn unstepped() -> Self {
        Self::default()
    }

    pub fn step(&self) -> Option<i64> {
        self.step
    }

    /// Moves the accumulator to a new step. No-op in shared mode.
    pub fn set_step(&mut self, step: i64) {
        if self.step.is_some() {
            self.step = Some(step);
        }
    }

    /// Appends items, replacing values of keys already present.
    pub fn update(&mut self, items: impl IntoIterator<Item = HistoryItem>) {
        for item in items {
            match self.index.get(&item.key) {
                Some(&idx) => self.items[idx].value_json = item.value_json,
                None => {
                    self.index.insert(item.key.clone(), self.items.len());
                    self.items.push(item);
                }
            }
        }
    }

    /// Looks up the current value of `key`.
    pub fn get(&self, key: &str) -> Option<&HistoryItem> {
        self.index.get(key).map(|&idx| &self.items[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Takes the accumulated items, leaving the accumulator empty at its
    /// current step.
    pub fn drain(&mut self) -> Vec<HistoryItem> {
        self.index.clear();
        std::mem::take(&mut self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_preserves_insertion_order() {
        let mut history = ActiveHistory::with_step(0);
        history.update([
            HistoryItem::new("loss", "0.5"),
            HistoryItem::new("acc", "0.9"),
        ]);

        let items = history.drain();
        assert_eq!(items[0].key, "loss");
        assert_eq!(items[1].key, "acc");
    }

    #[test]
    fn test_update_is_last_writer_wins() {
        let mut history = ActiveHistory::with_step(0);
        history.update([HistoryItem::new("loss", "0.5")]);
        history.update([HistoryItem::new("loss", "0.4")]);

        assert_eq!(history.get("loss").map(|i| i.value_json.as_str()), Some("0.4"));
        let items = history.drain();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].value_json, "0.4");
    }

    #[test]
    fn test_drain_resets_items_but_keeps_step() {
        let mut history = ActiveHistory::with_step(7);
        history.update([HistoryItem::new("loss", "0.5")]);

        assert!(!history.is_empty());
        assert_eq!(history.drain().len(), 1);
        assert!(history.is_empty());
        assert_eq!(history.step(), Some(7));

        // Keys are usable again after the drain.
        history.update([HistoryItem::new("loss", "0.1")]);
        assert_eq!(history.drain().len(), 1);
    }

    #[test]
    fn test_unstepped_ignores_set_step() {
        let mut history = ActiveHistory::unstepped();
        history.set_step(9);
        assert_eq!(history.step(), None);
    }
}
