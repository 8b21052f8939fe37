//! The stream handler: single-writer consumer of the inbound record stream.
//!
//! One handler instance serves exactly one run. It owns every piece of
//! per-run state (accumulator, registries, summary, samplers, timer) and is
//! driven by a single task; all concurrency lives at the channel boundaries.

mod defer;
mod history;
mod start;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::collab::{FileTransferStats, Git, Printer, RunfilesUploader, SystemMonitor, TbHandler};
use crate::history::ActiveHistory;
use crate::mailbox::Mailbox;
use crate::metrics::MetricRegistry;
use crate::record::{
    AttachResponse, CancelRequest, Control, FilesItem, FinalRecord, FooterRecord,
    GetSummaryResponse, GetSystemMetricsResponse, InternalMessagesResponse, PollExitResponse,
    Record, RecordPayload, Reply, Request, Response, RunRecord, SampledHistoryItem,
    SampledHistoryResponse, SummaryItem, SummaryRecord, VersionInfo,
};
use crate::sampler::ReservoirSampler;
use crate::settings::Settings;
use crate::summary::SummaryHandler;
use crate::timer::Timer;
use crate::version;

/// Run metadata file written at run start.
pub const META_FILE_NAME: &str = "wandb-metadata.json";
/// Consolidated summary snapshot written during shutdown.
pub const SUMMARY_FILE_NAME: &str = "wandb-summary.json";
/// Working-tree patch against HEAD.
pub const DIFF_FILE_NAME: &str = "diff.patch";
/// Python package listing written from the `PythonPackages` request.
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// Reservoir size backing the terminal sparkline view.
const SAMPLER_CAPACITY: usize = 48;
/// Aging factor of the reservoir's weighted sampling.
const SAMPLER_DELTA: f64 = 0.0005;
/// Summary flushes admitted per debounce interval.
const SUMMARY_DEBOUNCE_BURST: u32 = 1;

/// Injected subsystems the handler drives. See the `collab` module for the
/// individual contracts.
pub struct Collaborators {
    pub monitor: Arc<dyn SystemMonitor>,
    pub tb: Arc<dyn TbHandler>,
    /// Absent when running offline.
    pub uploader: Option<Arc<dyn RunfilesUploader>>,
    pub transfer_stats: Arc<dyn FileTransferStats>,
    pub git: Arc<dyn Git>,
    pub mailbox: Arc<Mailbox>,
}

/// Control and UUID of a request, kept for its reply and re-forwarding.
#[derive(Debug, Clone)]
struct RequestMeta {
    control: Option<Control>,
    uuid: String,
}

impl RequestMeta {
    fn req_resp(&self) -> bool {
        self.control.as_ref().is_some_and(|c| c.req_resp)
    }

    /// Rebuilds the request record around its original metadata.
    fn into_record(self, request: Request) -> Record {
        Record {
            control: self.control,
            uuid: self.uuid,
            payload: RecordPayload::Request(request),
        }
    }
}

/// The stream handler. Consumes the inbound channel in order, mutates its
/// own state, forwards records to the writer and replies to the caller.
pub struct Handler {
    settings: Settings,
    fwd_tx: mpsc::Sender<Record>,
    out_tx: mpsc::Sender<Reply>,

    timer: Timer,
    run_record: Option<RunRecord>,
    summary: SummaryHandler,
    active_history: Option<ActiveHistory>,
    samplers: HashMap<String, ReservoirSampler>,
    metrics: MetricRegistry,
    printer: Printer,

    monitor: Arc<dyn SystemMonitor>,
    tb: Arc<dyn TbHandler>,
    uploader: Option<Arc<dyn RunfilesUploader>>,
    transfer_stats: Arc<dyn FileTransferStats>,
    git: Arc<dyn Git>,
    mailbox: Arc<Mailbox>,
}

impl Handler {
    /// Creates a handler for one stream with its injected collaborators and
    /// downstream channels.
    pub fn new(
        settings: Settings,
        collaborators: Collaborators,
        fwd_tx: mpsc::Sender<Record>,
        out_tx: mpsc::Sender<Reply>,
    ) -> Self {
        let summary = SummaryHandler::new(
            settings.summary_debounce_interval,
            SUMMARY_DEBOUNCE_BURST,
        );

        Self {
            settings,
            fwd_tx,
            out_tx,
            timer: Timer::default(),
            run_record: None,
            summary,
            active_history: None,
            samplers: HashMap::new(),
            metrics: MetricRegistry::new(),
            printer: Printer::new(),
            monitor: collaborators.monitor,
            tb: collaborators.tb,
            uploader: collaborators.uploader,
            transfer_stats: collaborators.transfer_stats,
            git: collaborators.git,
            mailbox: collaborators.mailbox,
        }
    }

    /// Consumes the inbound channel until the producer closes it, then
    /// closes the outbound channel followed by the forward channel.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Record>) {
        info!(run_id = %self.settings.run_id, "handler started");

        while let Some(record) = inbound.recv().await {
            self.handle_record(record).await;
        }

        let Handler { fwd_tx, out_tx, settings, .. } = self;
        drop(out_tx);
        drop(fwd_tx);
        debug!(run_id = %settings.run_id, "handler closed");
    }

    /// The run record received at `RunStart`, if any.
    pub fn run_record(&self) -> Option<&RunRecord> {
        self.run_record.as_ref()
    }

    // --- Channel plumbing ---

    async fn fwd(&mut self, record: Record) {
        if self.fwd_tx.send(record).await.is_err() {
            warn!("forward channel closed, dropping record");
        }
    }

    /// Forwards after adjusting the control block, creating one if absent.
    async fn fwd_with(&mut self, mut record: Record, adjust: impl FnOnce(&mut Control)) {
        let control = record.control.get_or_insert_with(Control::default);
        adjust(control);
        self.fwd(record).await;
    }

    async fn respond(&mut self, meta: &RequestMeta, response: Response) {
        let reply = Reply {
            response,
            control: meta.control.clone(),
            uuid: meta.uuid.clone(),
        };
        if self.out_tx.send(reply).await.is_err() {
            warn!("outbound channel closed, dropping reply");
        }
    }

    // --- Record dispatch ---

    async fn handle_record(&mut self, record: Record) {
        // Tick the summary debouncer before every dispatch.
        if self.summary.debounce_ready() {
            self.forward_summary().await;
        }

        debug!(
            record = record.payload.kind(),
            run_id = %self.settings.run_id,
            "dispatching record",
        );

        match &record.payload {
            RecordPayload::Alert(_)
            | RecordPayload::Artifact(_)
            | RecordPayload::Config(_)
            | RecordPayload::LinkArtifact(_)
            | RecordPayload::Output(_)
            | RecordPayload::OutputRaw(_)
            | RecordPayload::Preempting(_)
            | RecordPayload::Stats(_)
            | RecordPayload::Telemetry(_)
            | RecordPayload::UseArtifact(_) => self.fwd(record).await,
            RecordPayload::Exit(_) => self.handle_exit(record).await,
            RecordPayload::Files(_) => self.handle_files(record).await,
            RecordPayload::Final(_) => self.handle_final().await,
            RecordPayload::Footer(_) => self.handle_footer().await,
            RecordPayload::Header(_) => self.handle_header(record).await,
            RecordPayload::History(_) => self.handle_history_record(record).await,
            RecordPayload::Metric(_) => self.handle_metric_record(record).await,
            RecordPayload::Request(_) => self.handle_request(record).await,
            RecordPayload::Run(_) => {
                self.fwd_with(record, |c| c.always_send = true).await;
            }
            RecordPayload::Summary(_) => {
                let RecordPayload::Summary(summary) = record.payload else {
                    return;
                };
                self.handle_summary(summary);
            }
            RecordPayload::TbRecord(_) => self.handle_tb_record(record).await,
        }
    }

    async fn handle_request(&mut self, record: Record) {
        let Record { control, uuid, payload } = record;
        let RecordPayload::Request(request) = payload else {
            return;
        };
        let meta = RequestMeta { control, uuid };

        debug!(request = request.kind(), "dispatching request");

        match request {
            Request::Login => {
                if meta.req_resp() {
                    self.respond(&meta, Response::Empty).await;
                }
            }
            Request::CheckVersion | Request::RunStatus | Request::Status | Request::Shutdown => {
                self.respond(&meta, Response::Empty).await;
            }
            Request::SenderMark | Request::StatusReport | Request::Keepalive => {}
            Request::Defer(req) => self.handle_defer(meta, req).await,
            Request::GetSummary => self.handle_get_summary(meta).await,
            Request::PartialHistory(req) => self.handle_partial_history(req).await,
            Request::PollExit => self.handle_poll_exit(meta).await,
            Request::RunStart(req) => self.handle_run_start(meta, req).await,
            Request::SampledHistory => self.handle_sampled_history(meta).await,
            Request::PythonPackages(req) => self.handle_python_packages(&req).await,
            Request::Attach => {
                let response = AttachResponse {
                    run: self.run_record.clone(),
                };
                self.respond(&meta, Response::Attach(response)).await;
            }
            Request::Pause => {
                self.timer.pause();
                self.monitor.stop();
            }
            Request::Resume => {
                self.timer.resume();
                self.monitor.start();
            }
            Request::Cancel(req) => self.handle_cancel(&req),
            Request::GetSystemMetrics => self.handle_get_system_metrics(meta).await,
            Request::InternalMessages => self.handle_internal_messages(meta).await,
            Request::ServerInfo => {
                self.fwd_with(meta.into_record(Request::ServerInfo), |c| {
                    c.always_send = true;
                })
                .await;
            }
            forwarded @ (Request::StopStatus
            | Request::NetworkStatus
            | Request::Sync
            | Request::SenderRead
            | Request::JobInput
            | Request::LogArtifact
            | Request::DownloadArtifact) => {
                self.fwd(meta.into_record(forwarded)).await;
            }
        }
    }

    // --- Simple record handlers ---

    async fn handle_exit(&mut self, mut record: Record) {
        // Stop the run clock; the elapsed readout becomes the final runtime.
        self.timer.pause();
        let runtime = self.timer.elapsed().as_secs() as i32;

        if let RecordPayload::Exit(exit) = &mut record.payload {
            exit.runtime = runtime;
        }

        if !self.settings.sync {
            self.summary.apply(&[SummaryItem::new(
                "_wandb",
                serde_json::json!({ "runtime": runtime }).to_string(),
            )]);
        }

        let sync = self.settings.sync;
        self.fwd_with(record, |c| {
            c.always_send = true;
            // Do not write to the transaction log when replaying an offline run.
            if sync {
                c.local = true;
            }
        })
        .await;
    }

    async fn handle_files(&mut self, record: Record) {
        let RecordPayload::Files(files) = &record.payload else {
            return;
        };
        if files.files.is_empty() {
            return;
        }
        self.fwd(record).await;
    }

    /// Forwards a `Files` record for service-produced files.
    async fn fwd_wandb_files(&mut self, files: Vec<FilesItem>) {
        if files.is_empty() {
            return;
        }
        let record = Record::new(RecordPayload::Files(crate::record::FilesRecord { files }));
        self.handle_files(record).await;
    }

    async fn handle_header(&mut self, mut record: Record) {
        if let RecordPayload::Header(header) = &mut record.payload {
            header.version_info = Some(VersionInfo {
                producer: version::producer(),
                min_consumer: version::MIN_CONSUMER.to_string(),
            });
        }
        self.fwd_with(record, |c| c.always_send = false).await;
    }

    async fn handle_final(&mut self) {
        if self.settings.sync {
            return;
        }
        let record = Record::new(RecordPayload::Final(FinalRecord {}));
        self.fwd_with(record, |c| c.always_send = false).await;
    }

    async fn handle_footer(&mut self) {
        if self.settings.sync {
            return;
        }
        let record = Record::new(RecordPayload::Footer(FooterRecord {}));
        self.fwd_with(record, |c| c.always_send = false).await;
    }

    async fn handle_tb_record(&mut self, record: Record) {
        if let Err(e) = self.tb.handle(&record) {
            error!(error = %e, "tensorboard handler failed");
        }
        self.fwd(record).await;
    }

    // --- Summary ---

    /// Folds an explicit summary update, stamping the current runtime under
    /// the `_wandb` key. Suppressed entirely when replaying an offline run.
    fn handle_summary(&mut self, summary: SummaryRecord) {
        if self.settings.sync {
            return;
        }

        let runtime = self.timer.elapsed().as_secs() as i32;
        let mut update = summary.update;
        update.push(SummaryItem::new(
            "_wandb",
            serde_json::json!({ "runtime": runtime }).to_string(),
        ));

        self.summary.apply(&update);
    }

    /// Forwards the pending summary delta and clears it.
    async fn forward_summary(&mut self) {
        let update = self.summary.take_delta();
        self.summary.bypass_debounce();
        let record = Record::new(RecordPayload::Summary(SummaryRecord { update }));
        self.fwd(record).await;
    }

    /// Writes the consolidated summary snapshot under the files directory
    /// and asks the uploader to pick it up immediately.
    fn write_and_upload_summary(&mut self) {
        if self.settings.sync {
            return;
        }

        let ordered: std::collections::BTreeMap<&String, &String> =
            self.summary.consolidated().iter().collect();

        match serde_json::to_string_pretty(&ordered) {
            Ok(json) => {
                let path = self.settings.files_dir.join(SUMMARY_FILE_NAME);
                if let Err(e) = std::fs::write(&path, json) {
                    error!(error = %e, path = %path.display(), "failed to write summary file");
                }
            }
            Err(e) => error!(error = %e, "failed to marshal summary"),
        }

        if let Some(uploader) = &self.uploader {
            uploader.upload_now(std::path::Path::new(SUMMARY_FILE_NAME));
        }
    }

    // --- Request handlers with responses ---

    async fn handle_get_summary(&mut self, meta: RequestMeta) {
        let mut items: Vec<SummaryItem> = self
            .summary
            .consolidated()
            .iter()
            .map(|(key, value)| SummaryItem::new(key.clone(), value.clone()))
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        self.respond(&meta, Response::GetSummary(GetSummaryResponse { items }))
            .await;
    }

    async fn handle_poll_exit(&mut self, meta: RequestMeta) {
        let response = PollExitResponse {
            pusher_stats: Some(self.transfer_stats.files_stats()),
            file_counts: Some(self.transfer_stats.file_counts()),
            done: self.transfer_stats.is_done(),
        };
        self.respond(&meta, Response::PollExit(response)).await;
    }

    async fn handle_sampled_history(&mut self, meta: RequestMeta) {
        let mut items: Vec<SampledHistoryItem> = self
            .samplers
            .iter()
            .map(|(key, sampler)| SampledHistoryItem {
                key: key.clone(),
                values: sampler.sample(),
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        self.respond(
            &meta,
            Response::SampledHistory(SampledHistoryResponse { items }),
        )
        .await;
    }

    async fn handle_get_system_metrics(&mut self, meta: RequestMeta) {
        let metrics = self.monitor.buffer();
        self.respond(
            &meta,
            Response::GetSystemMetrics(GetSystemMetricsResponse { metrics }),
        )
        .await;
    }

    async fn handle_internal_messages(&mut self, meta: RequestMeta) {
        let warnings = self.printer.drain();
        self.respond(
            &meta,
            Response::InternalMessages(InternalMessagesResponse { warnings }),
        )
        .await;
    }

    fn handle_cancel(&mut self, request: &CancelRequest) {
        if request.cancel_slot.is_empty() {
            return;
        }
        self.mailbox.cancel(&request.cancel_slot);
    }

    /// Seeds the sampler map from a flushed history record. Only values
    /// decoding as 32-bit floats are admitted.
    fn sample_history(&mut self, items: &[crate::record::HistoryItem]) {
        for item in items {
            let Ok(value) = serde_json::from_str::<f32>(&item.value_json) else {
                continue;
            };

            self.samplers
                .entry(item.key.clone())
                .or_insert_with(|| ReservoirSampler::new(SAMPLER_CAPACITY, SAMPLER_DELTA))
                .add(value);
        }
    }
}
