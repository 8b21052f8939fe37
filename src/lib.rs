//! Stream handler for an experiment-tracking local service.
//!
//! The handler is the single-writer consumer of an ordered stream of typed
//! records produced by user processes. It coalesces partial history into
//! atomic per-step records, maintains the metric registry and consolidated
//! summary, samples float history for terminal sparklines, and drives the
//! deferred shutdown sequence, forwarding everything persistable to the
//! downstream writer.

pub mod collab;
pub mod debounce;
pub mod handler;
pub mod history;
pub mod mailbox;
pub mod metrics;
pub mod record;
pub mod sampler;
pub mod settings;
pub mod summary;
pub mod timer;

/// Build-time version info advertised in stream headers.
pub mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Oldest consumer version able to read records produced by this crate.
    pub const MIN_CONSUMER: &str = "0.2.0";

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Producer string stamped into forwarded header records.
    pub fn producer() -> String {
        format!("{}+{}", RELEASE, git_commit())
    }
}
