//! Narrow contracts for the subsystems the handler drives but does not own.
//!
//! Every collaborator is injected at stream construction; the handler calls
//! these traits and nothing calls back into the handler.

pub mod git;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use parking_lot::Mutex;

use crate::record::{FileCounts, FilePusherStats, Record, SystemInfo, SystemMetricSample};

pub use self::git::CliGit;

/// The system-resource monitor producing `Stats` records out of band.
pub trait SystemMonitor: Send + Sync {
    /// Starts (or restarts) sampling.
    fn start(&self);
    /// Stops sampling; no further stats records are produced.
    fn stop(&self);
    /// One-shot host probe for the run metadata file.
    fn probe(&self) -> Option<SystemInfo>;
    /// Buffered samples per metric key, for `GetSystemMetrics`.
    fn buffer(&self) -> HashMap<String, Vec<SystemMetricSample>>;
}

/// The TensorBoard translator fed every `TBRecord` before forwarding.
pub trait TbHandler: Send + Sync {
    fn handle(&self, record: &Record) -> Result<()>;
    fn close(&self);
}

/// The run-files uploader. Absent when running offline.
pub trait RunfilesUploader: Send + Sync {
    /// Schedules an immediate upload of a run file (path relative to the
    /// files directory).
    fn upload_now(&self, path: &Path);
    /// Drains all outstanding uploads.
    fn upload_remaining(&self);
}

/// Upload/download statistics source backing `PollExit`.
pub trait FileTransferStats: Send + Sync {
    fn files_stats(&self) -> FilePusherStats;
    fn file_counts(&self) -> FileCounts;
    fn is_done(&self) -> bool;
    fn set_done(&self);
}

/// Version-control snapshotter backing patch capture at run start.
pub trait Git: Send + Sync {
    /// True when the root directory is inside a usable repository.
    fn is_available(&self) -> bool;
    /// Writes the diff of the working tree against `reference` to `out`.
    fn save_patch(&self, reference: &str, out: &Path) -> Result<()>;
    /// Resolves `reference` to a commit SHA.
    fn latest_commit(&self, reference: &str) -> Result<String>;
}

/// Queue of user-visible internal messages, drained by the
/// `InternalMessages` request.
#[derive(Debug, Default)]
pub struct Printer {
    messages: Mutex<Vec<String>>,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message for the next `InternalMessages` drain.
    pub fn write(&self, message: impl Into<String>) {
        self.messages.lock().push(message.into());
    }

    /// Takes all queued messages in write order.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_drains_in_order() {
        let printer = Printer::new();
        printer.write("first");
        printer.write("second");

        assert_eq!(printer.drain(), vec!["first", "second"]);
        assert!(printer.drain().is_empty());
    }
}
