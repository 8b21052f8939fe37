//! The deferred shutdown coordinator.
//!
//! Defer requests arrive in numeric state order. Each state's side effect
//! runs to completion before the request is re-forwarded downstream, so the
//! writer never observes a defer record whose preceding phase has not been
//! flushed.

use tracing::{debug, warn};

use super::{Handler, RequestMeta};
use crate::record::{DeferRequest, DeferState, Request, SummaryRecord};

impl Handler {
    pub(super) async fn handle_defer(&mut self, meta: RequestMeta, request: DeferRequest) {
        match DeferState::from_i32(request.state) {
            Some(state) => {
                debug!(state = ?state, "defer phase");
                self.run_defer_side_effect(state).await;
            }
            None => warn!(state = request.state, "unknown defer state"),
        }

        // Forward even for unknown states so the shutdown sequence keeps
        // draining downstream.
        self.fwd_with(meta.into_record(Request::Defer(request)), |control| {
            control.always_send = true;
            control.local = true;
        })
        .await;
    }

    async fn run_defer_side_effect(&mut self, state: DeferState) {
        match state {
            DeferState::Begin
            | DeferState::FlushRun
            | DeferState::FlushDebouncer
            | DeferState::FlushOutput
            | DeferState::FlushJob
            | DeferState::FlushDir
            | DeferState::JoinFp
            | DeferState::FlushFs => {}
            DeferState::FlushStats => {
                // No further stats records after the run has exited.
                self.monitor.stop();
            }
            DeferState::FlushPartialHistory => {
                self.flush_active_history().await;
            }
            DeferState::FlushTb => {
                self.tb.close();
            }
            DeferState::FlushSum => {
                self.handle_summary(SummaryRecord::default());
                self.forward_summary().await;
                self.write_and_upload_summary();
            }
            DeferState::FlushFp => {
                if let Some(uploader) = &self.uploader {
                    uploader.upload_remaining();
                }
            }
            DeferState::FlushFinal => {
                self.handle_final().await;
                self.handle_footer().await;
            }
            DeferState::End => {
                self.transfer_stats.set_done();
            }
        }
    }
}
