use std::collections::HashMap;
use std::time::Duration;

use crate::debounce::Debouncer;
use crate::record::SummaryItem;

/// Last-writer-wins fold of `items` into `consolidated`.
///
/// Returns the winning key/value pairs in application order; callers record
/// those into the pending delta.
pub fn consolidate(
    consolidated: &mut HashMap<String, String>,
    items: &[SummaryItem],
) -> Vec<SummaryItem> {
    let mut winners = Vec::with_capacity(items.len());
    for item in items {
        consolidated.insert(item.key.clone(), item.value_json.clone());
        winners.push(item.clone());
    }
    winners
}

/// Consolidated summary state plus the delta pending a rate-limited flush.
///
/// Every history flush and explicit summary update folds into the
/// consolidated map and grows the delta; the dispatcher drains the delta
/// through the debouncer, and the defer path drains it unconditionally.
#[derive(Debug)]
pub struct SummaryHandler {
    consolidated: HashMap<String, String>,
    delta: HashMap<String, String>,
    debouncer: Debouncer,
}

impl SummaryHandler {
    /// Creates a summary handler debounced at one flush per `interval`.
    pub fn new(debounce_interval: Duration, burst: u32) -> Self {
        Self {
            consolidated: HashMap::new(),
            delta: HashMap::new(),
            debouncer: Debouncer::new(debounce_interval, burst),
        }
    }

    /// Folds items into the consolidated map and the pending delta.
    pub fn apply(&mut self, items: &[SummaryItem]) {
        if items.is_empty() {
            return;
        }

        let winners = consolidate(&mut self.consolidated, items);
        for item in winners {
            self.delta.insert(item.key, item.value_json);
        }
        self.debouncer.mark_dirty();
    }

    /// Looks up the consolidated value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.consolidated.get(key).map(String::as_str)
    }

    /// Read-only view of the full consolidated map.
    pub fn consolidated(&self) -> &HashMap<String, String> {
        &self.consolidated
    }

    /// Takes the pending delta as items sorted by key.
    pub fn take_delta(&mut self) -> Vec<SummaryItem> {
        let mut items: Vec<SummaryItem> = self
            .delta
            .drain()
            .map(|(key, value_json)| SummaryItem { key, value_json })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items
    }

    /// True when keys changed since the last forwarded summary.
    pub fn has_delta(&self) -> bool {
        !self.delta.is_empty()
    }

    /// Rate-limited flush gate, polled once per dispatched record.
    pub fn debounce_ready(&mut self) -> bool {
        self.debouncer.poll()
    }

    /// Clears the debouncer's pending flag for an out-of-band flush.
    pub fn bypass_debounce(&mut self) {
        self.debouncer.force();
    }
}
