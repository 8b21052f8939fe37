//! The record and request unions exchanged over the stream channels.
//!
//! A `Record` is the unit of work on the inbound and forward channels; a
//! `Reply` is the unit on the outbound channel. Requests are a sub-union
//! carried inside `RecordPayload::Request`.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Per-record routing flags consumed by the downstream writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Control {
    /// Send even when the downstream sender is in a quiescent state.
    pub always_send: bool,
    /// Do not persist to the transaction log.
    pub local: bool,
    /// The caller expects a `Reply` for this record.
    pub req_resp: bool,
}

/// One message on the inbound or forward channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub control: Option<Control>,
    pub uuid: String,
    pub payload: RecordPayload,
}

impl Record {
    /// Creates a record with no control block and an empty UUID.
    pub fn new(payload: RecordPayload) -> Self {
        Self {
            control: None,
            uuid: String::new(),
            payload,
        }
    }

    /// Creates a handler-synthesized record marked `local`.
    pub fn local(payload: RecordPayload) -> Self {
        Self {
            control: Some(Control {
                local: true,
                ..Control::default()
            }),
            uuid: String::new(),
            payload,
        }
    }
}

/// The tagged union of record kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Alert(AlertRecord),
    Artifact(ArtifactRecord),
    Config(ConfigRecord),
    Exit(ExitRecord),
    Files(FilesRecord),
    Final(FinalRecord),
    Footer(FooterRecord),
    Header(HeaderRecord),
    History(HistoryRecord),
    LinkArtifact(LinkArtifactRecord),
    Metric(MetricRecord),
    Output(OutputRecord),
    OutputRaw(OutputRawRecord),
    Preempting(PreemptingRecord),
    Request(Request),
    Run(RunRecord),
    Stats(StatsRecord),
    Summary(SummaryRecord),
    TbRecord(TbRecord),
    Telemetry(TelemetryRecord),
    UseArtifact(UseArtifactRecord),
}

impl RecordPayload {
    /// Returns the canonical log label for this record kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Alert(_) => "alert",
            Self::Artifact(_) => "artifact",
            Self::Config(_) => "config",
            Self::Exit(_) => "exit",
            Self::Files(_) => "files",
            Self::Final(_) => "final",
            Self::Footer(_) => "footer",
            Self::Header(_) => "header",
            Self::History(_) => "history",
            Self::LinkArtifact(_) => "link_artifact",
            Self::Metric(_) => "metric",
            Self::Output(_) => "output",
            Self::OutputRaw(_) => "output_raw",
            Self::Preempting(_) => "preempting",
            Self::Request(_) => "request",
            Self::Run(_) => "run",
            Self::Stats(_) => "stats",
            Self::Summary(_) => "summary",
            Self::TbRecord(_) => "tbrecord",
            Self::Telemetry(_) => "telemetry",
            Self::UseArtifact(_) => "use_artifact",
        }
    }
}

/// The control-plane request union embedded in `RecordPayload::Request`.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Login,
    CheckVersion,
    RunStatus,
    Status,
    SenderMark,
    StatusReport,
    Keepalive,
    Shutdown,
    Defer(DeferRequest),
    GetSummary,
    NetworkStatus,
    PartialHistory(PartialHistoryRequest),
    PollExit,
    RunStart(RunStartRequest),
    SampledHistory,
    ServerInfo,
    PythonPackages(PythonPackagesRequest),
    StopStatus,
    LogArtifact,
    DownloadArtifact,
    Attach,
    Pause,
    Resume,
    Cancel(CancelRequest),
    GetSystemMetrics,
    InternalMessages,
    Sync,
    SenderRead,
    JobInput,
}

impl Request {
    /// Returns the canonical log label for this request kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::CheckVersion => "check_version",
            Self::RunStatus => "run_status",
            Self::Status => "status",
            Self::SenderMark => "sender_mark",
            Self::StatusReport => "status_report",
            Self::Keepalive => "keepalive",
            Self::Shutdown => "shutdown",
            Self::Defer(_) => "defer",
            Self::GetSummary => "get_summary",
            Self::NetworkStatus => "network_status",
            Self::PartialHistory(_) => "partial_history",
            Self::PollExit => "poll_exit",
            Self::RunStart(_) => "run_start",
            Self::SampledHistory => "sampled_history",
            Self::ServerInfo => "server_info",
            Self::PythonPackages(_) => "python_packages",
            Self::StopStatus => "stop_status",
            Self::LogArtifact => "log_artifact",
            Self::DownloadArtifact => "download_artifact",
            Self::Attach => "attach",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel(_) => "cancel",
            Self::GetSystemMetrics => "get_system_metrics",
            Self::InternalMessages => "internal_messages",
            Self::Sync => "sync",
            Self::SenderRead => "sender_read",
            Self::JobInput => "job_input",
        }
    }
}

// --- Record payloads ---

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertRecord {
    pub title: String,
    pub text: String,
    pub level: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactRecord {
    pub name: String,
    pub artifact_type: String,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigRecord {
    pub update: Vec<ConfigItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigItem {
    pub key: String,
    pub value_json: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitRecord {
    pub exit_code: i32,
    /// Elapsed run seconds, stamped by the handler on dispatch.
    pub runtime: i32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilesRecord {
    pub files: Vec<FilesItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesItem {
    /// Path relative to the run's files directory.
    pub path: String,
    pub kind: FileKind,
}

/// Upload policy class of a run file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// User-produced file.
    User,
    /// Internal bookkeeping file produced by the service itself.
    Wandb,
}

impl FilesItem {
    /// Creates an internal (service-produced) files item.
    pub fn wandb(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Wandb,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalRecord {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FooterRecord {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderRecord {
    /// Filled in by the handler before forwarding.
    pub version_info: Option<VersionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionInfo {
    pub producer: String,
    pub min_consumer: String,
}

/// A single key/value observation; values are untyped JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub key: String,
    pub value_json: String,
}

impl HistoryItem {
    pub fn new(key: impl Into<String>, value_json: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_json: value_json.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStep {
    pub num: i64,
}

/// An unordered set of items observed for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRecord {
    pub step: Option<HistoryStep>,
    pub items: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkArtifactRecord {
    pub client_id: String,
    pub portfolio_name: String,
}

/// A metric definition. Exactly one of `name` or `glob_name` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub glob_name: String,
    /// Key of another metric whose value defines this metric's x-axis.
    pub step_metric: String,
    pub options: MetricOptions,
    pub summary: MetricSummary,
}

impl MetricRecord {
    /// Creates a plain defined metric for `name` with default options.
    pub fn defined(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricOptions {
    /// Impute the step metric into history records that lack it.
    pub step_sync: bool,
    pub hidden: bool,
}

/// Which aggregations the backend keeps in the run summary for this metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSummary {
    pub min: bool,
    pub max: bool,
    pub mean: bool,
    pub last: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRecord {
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputRawRecord {
    pub line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreemptingRecord {}

/// Metadata of the run, received once and echoed on `Attach`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub entity: String,
    pub project: String,
    pub display_name: String,
    pub start_time: Option<SystemTime>,
    pub starting_step: i64,
    pub git: Option<GitRepoInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitRepoInfo {
    pub remote_url: String,
    pub commit: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsRecord {
    pub items: Vec<StatsItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsItem {
    pub key: String,
    pub value_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryItem {
    pub key: String,
    pub value_json: String,
}

impl SummaryItem {
    pub fn new(key: impl Into<String>, value_json: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_json: value_json.into(),
        }
    }
}

impl From<&HistoryItem> for SummaryItem {
    fn from(item: &HistoryItem) -> Self {
        Self {
            key: item.key.clone(),
            value_json: item.value_json.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryRecord {
    pub update: Vec<SummaryItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TbRecord {
    pub log_dir: String,
    pub save: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    pub python_version: String,
    pub cli_version: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UseArtifactRecord {
    pub id: String,
    pub name: String,
}

// --- Request payloads ---

/// Incremental history update; appends items and optionally flushes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialHistoryRequest {
    pub items: Vec<HistoryItem>,
    pub step: Option<HistoryStep>,
    pub action: Option<HistoryAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryAction {
    pub flush: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStartRequest {
    pub run: RunRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PythonPackagesRequest {
    pub packages: Vec<PythonPackage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PythonPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelRequest {
    /// Mailbox slot of the in-flight request to cancel.
    pub cancel_slot: String,
}

/// Shutdown phase request. The raw state survives the wire as an integer so
/// that states from newer producers are logged and still forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeferRequest {
    pub state: i32,
}

impl DeferRequest {
    pub fn new(state: DeferState) -> Self {
        Self {
            state: state as i32,
        }
    }
}

/// Numerically ordered shutdown phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum DeferState {
    Begin = 0,
    FlushRun = 1,
    FlushStats = 2,
    FlushPartialHistory = 3,
    FlushTb = 4,
    FlushSum = 5,
    FlushDebouncer = 6,
    FlushOutput = 7,
    FlushJob = 8,
    FlushDir = 9,
    FlushFp = 10,
    JoinFp = 11,
    FlushFs = 12,
    FlushFinal = 13,
    End = 14,
}

impl DeferState {
    /// Decodes a raw wire value, returning `None` for unknown states.
    pub const fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Begin),
            1 => Some(Self::FlushRun),
            2 => Some(Self::FlushStats),
            3 => Some(Self::FlushPartialHistory),
            4 => Some(Self::FlushTb),
            5 => Some(Self::FlushSum),
            6 => Some(Self::FlushDebouncer),
            7 => Some(Self::FlushOutput),
            8 => Some(Self::FlushJob),
            9 => Some(Self::FlushDir),
            10 => Some(Self::FlushFp),
            11 => Some(Self::JoinFp),
            12 => Some(Self::FlushFs),
            13 => Some(Self::FlushFinal),
            14 => Some(Self::End),
            _ => None,
        }
    }

    /// Returns every state in phase order.
    pub const fn all() -> [Self; 15] {
        [
            Self::Begin,
            Self::FlushRun,
            Self::FlushStats,
            Self::FlushPartialHistory,
            Self::FlushTb,
            Self::FlushSum,
            Self::FlushDebouncer,
            Self::FlushOutput,
            Self::FlushJob,
            Self::FlushDir,
            Self::FlushFp,
            Self::JoinFp,
            Self::FlushFs,
            Self::FlushFinal,
            Self::End,
        ]
    }
}

// --- Outbound replies ---

/// One message on the outbound channel; produced for responded requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub response: Response,
    pub control: Option<Control>,
    pub uuid: String,
}

/// Response union, keyed by the request kind that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Empty,
    Attach(AttachResponse),
    PollExit(PollExitResponse),
    GetSummary(GetSummaryResponse),
    GetSystemMetrics(GetSystemMetricsResponse),
    InternalMessages(InternalMessagesResponse),
    SampledHistory(SampledHistoryResponse),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachResponse {
    pub run: Option<RunRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollExitResponse {
    pub pusher_stats: Option<FilePusherStats>,
    pub file_counts: Option<FileCounts>,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSummaryResponse {
    pub items: Vec<SummaryItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSystemMetricsResponse {
    pub metrics: HashMap<String, Vec<SystemMetricSample>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalMessagesResponse {
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampledHistoryResponse {
    pub items: Vec<SampledHistoryItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampledHistoryItem {
    pub key: String,
    pub values: Vec<f32>,
}

// --- Collaborator-facing value types ---

/// Upload progress reported by the file-transfer subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilePusherStats {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub deduped_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub wandb_count: u32,
    pub media_count: u32,
    pub artifact_count: u32,
    pub other_count: u32,
}

/// One buffered sample of a system metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemMetricSample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub value: f32,
}

/// Host facts produced by the system monitor's probe, merged into the
/// run metadata file. All fields are optional; absent fields are omitted
/// from the merged JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_count_logical: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_total_bytes: Option<u64>,
}
