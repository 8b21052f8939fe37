//! Partial-history coalescing and the history flush pipeline.
//!
//! Two modes are selected per run: client-stepped (steps are validated and
//! strictly monotone) and server-stepped shared mode (no step tracking; the
//! server assigns steps downstream). Flush semantics are identical across
//! modes.

use std::collections::HashSet;

use tracing::{error, warn};

use super::Handler;
use crate::history::ActiveHistory;
use crate::record::{
    HistoryItem, HistoryRecord, HistoryStep, MetricRecord, PartialHistoryRequest, Record,
    RecordPayload, SummaryItem,
};

impl Handler {
    /// Entry point for standalone `History` records.
    ///
    /// The record replaces any partial accumulation in progress, flushes
    /// once through the regular pipeline and discards the residue.
    pub(super) async fn handle_history_record(&mut self, record: Record) {
        let RecordPayload::History(history) = record.payload else {
            return;
        };

        let mut replacement = match history.step {
            Some(step) => ActiveHistory::with_step(step.num),
            None => ActiveHistory::unstepped(),
        };
        replacement.update(history.items);
        self.active_history = Some(replacement);

        self.flush_active_history().await;
    }

    /// Entry point for partial history requests.
    pub(super) async fn handle_partial_history(&mut self, request: PartialHistoryRequest) {
        if self.settings.shared {
            self.handle_partial_history_async(request).await;
        } else {
            self.handle_partial_history_sync(request).await;
        }
    }

    /// Server-stepped mode: append, flush on request, never track steps.
    async fn handle_partial_history_async(&mut self, request: PartialHistoryRequest) {
        let history = self
            .active_history
            .get_or_insert_with(ActiveHistory::unstepped);
        history.update(request.items);

        if request.action.map_or(true, |a| a.flush) {
            self.flush_active_history().await;
        }
    }

    /// Client-stepped mode. The step number in a request either advances
    /// the accumulator (flushing the previous step), matches the current
    /// step, or regresses, in which case the request is dropped with a
    /// user-visible notice. A request with neither step nor action is an
    /// implicit flush of the current step.
    async fn handle_partial_history_sync(&mut self, request: PartialHistoryRequest) {
        if self.active_history.is_none() {
            let starting_step = self
                .run_record
                .as_ref()
                .map(|run| run.starting_step)
                .unwrap_or(0);
            self.active_history = Some(ActiveHistory::with_step(starting_step));
        }

        if let Some(step) = request.step {
            let current = self
                .active_history
                .as_ref()
                .and_then(ActiveHistory::step)
                .unwrap_or(0);

            if step.num > current {
                self.flush_active_history().await;
                if let Some(history) = self.active_history.as_mut() {
                    history.set_step(step.num);
                }
            } else if step.num < current {
                warn!(
                    step = step.num,
                    current, "ignoring out-of-order history record",
                );
                self.printer.write(format!(
                    "steps must be monotonically increasing: received history record for \
                     step {} which is less than the current step {}; this data will be \
                     ignored. to log data out of order, see the define-metric documentation",
                    step.num, current,
                ));
                return;
            }
        }

        if let Some(history) = self.active_history.as_mut() {
            history.update(request.items);
        }

        let explicit_flush = request.action.is_some_and(|a| a.flush);
        if (request.step.is_none() && request.action.is_none()) || explicit_flush {
            self.flush_active_history().await;
            if let Some(history) = self.active_history.as_mut() {
                let next = history.step().unwrap_or(0) + 1;
                history.set_step(next);
            }
        }
    }

    /// Drains the accumulator into a history record and flushes it. An
    /// empty accumulator flushes nothing.
    pub(super) async fn flush_active_history(&mut self) {
        let Some(history) = self.active_history.as_mut() else {
            return;
        };

        let step = history.step();
        let items = history.drain();
        if items.is_empty() {
            return;
        }

        let record = HistoryRecord {
            step: step.map(|num| HistoryStep { num }),
            items,
        };
        self.flush_history(record).await;
    }

    /// Finalizes a per-step history record and forwards it.
    ///
    /// Appends the `_runtime` internal (and `_step` outside shared mode),
    /// imputes step metrics, feeds the reservoir samplers, forwards the
    /// record and folds every item into the consolidated summary.
    async fn flush_history(&mut self, mut history: HistoryRecord) {
        if history.items.is_empty() {
            return;
        }

        let mut runtime = 0f64;
        if let Some(item) = history.items.iter().find(|i| i.key == "_timestamp") {
            match item.value_json.parse::<f64>() {
                Ok(timestamp) => runtime = timestamp - self.timer.start_secs(),
                Err(e) => error!(error = %e, "failed to parse _timestamp item"),
            }
        }
        history
            .items
            .push(HistoryItem::new("_runtime", format!("{runtime}")));

        if !self.settings.shared {
            let step = history.step.map(|s| s.num).unwrap_or(0);
            history
                .items
                .push(HistoryItem::new("_step", format!("{step}")));
        }

        self.impute_step_metrics(&mut history).await;
        self.sample_history(&history.items);

        let summary_update: Vec<SummaryItem> = history.items.iter().map(Into::into).collect();

        self.fwd(Record::new(RecordPayload::History(history))).await;

        self.summary.apply(&summary_update);
    }

    /// Appends imputed step metrics to a record about to be flushed.
    ///
    /// For every item whose resolved metric has `step_sync` set and whose
    /// step-metric key is absent from the record, the step metric's last
    /// consolidated summary value is added to the record. Imputed items are
    /// appended after the scan and are not themselves matched.
    async fn impute_step_metrics(&mut self, history: &mut HistoryRecord) {
        let mut present: HashSet<String> =
            history.items.iter().map(|item| item.key.clone()).collect();

        let scan_len = history.items.len();
        let mut imputed = Vec::new();

        for idx in 0..scan_len {
            let key = history.items[idx].key.clone();
            let Some(metric) = self.match_item_metric(&key).await else {
                continue;
            };

            if !metric.options.step_sync || metric.step_metric.is_empty() {
                continue;
            }

            let step_key = metric.step_metric;
            if present.contains(&step_key) {
                continue;
            }
            let Some(value) = self.summary.get(&step_key).map(str::to_string) else {
                continue;
            };

            present.insert(step_key.clone());
            imputed.push(HistoryItem::new(step_key, value));
        }

        history.items.extend(imputed);
    }

    /// Resolves the metric definition for a history key: exact definitions
    /// first, then glob patterns. A fresh glob match materializes a defined
    /// metric and announces it downstream as a local metric record.
    async fn match_item_metric(&mut self, key: &str) -> Option<MetricRecord> {
        // Internal bookkeeping keys never match metric definitions.
        if key.starts_with('_') {
            return None;
        }

        if let Some(metric) = self.metrics.defined(key) {
            return Some(metric.clone());
        }

        let metric = self.metrics.materialize_glob(key)?;
        let record = Record::local(RecordPayload::Metric(metric.clone()));
        self.handle_metric_record(record).await;
        Some(metric)
    }

    /// Entry point for `Metric` records: registers the definition (glob or
    /// exact) and forwards the record.
    pub(super) async fn handle_metric_record(&mut self, record: Record) {
        let RecordPayload::Metric(ref metric) = record.payload else {
            return;
        };

        if !metric.glob_name.is_empty() {
            if let Err(e) = self.metrics.upsert_glob(metric.clone()) {
                error!(error = %e, "failed to register glob metric");
                return;
            }
            self.fwd(record).await;
        } else if !metric.name.is_empty() {
            self.metrics.upsert_defined(metric.clone());
            let step_metric = metric.step_metric.clone();
            self.register_step_metric(&step_metric).await;
            self.fwd(record).await;
        } else {
            error!("invalid metric record: neither name nor glob_name is set");
        }
    }

    /// Registers a step metric as a defined metric of its own, announcing
    /// the synthesized definition downstream. Nested step-metric chains are
    /// not resolved: the synthesized definition carries no step metric.
    async fn register_step_metric(&mut self, key: &str) {
        if key.is_empty() || self.metrics.contains_defined(key) {
            return;
        }

        let metric = MetricRecord::defined(key);
        self.metrics.upsert_defined(metric.clone());
        self.fwd(Record::local(RecordPayload::Metric(metric))).await;
    }
}
