//! Forwards an Action's log writes to the Master as `OnProgress` RPCs.
//!
//! Grounded on `worker/logger.go`'s `logger{runner,ctx}`, which funnels
//! every seelog-style write through `Notify` into `worker.Progress(...)`.
//! [`bubble_actions::ActionLog::write`] is synchronous (mirroring the
//! Go original's fire-and-forget log sink), so writes are queued on an unbounded
//! channel and drained by one background task — this both bridges sync to
//! async and keeps progress callbacks for a given (runnerId, action)
//! delivered in the order they were written, per spec.md §5's ordering
//! guarantee.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bubble_actions::ActionLog;
use bubble_proto::{MasterApi, OnProgressRequest};
use tokio::sync::mpsc;

pub struct ForwardingLog {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ForwardingLog {
    pub fn new(master: Arc<dyn MasterApi>, worker_id: u64, action: String, runner_id: u64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let req = OnProgressRequest {
                    worker_id,
                    action: action.clone(),
                    runner_id,
                    payload_b64: BASE64.encode(&bytes),
                };
                if let Err(err) = master.on_progress(req).await {
                    tracing::warn!(?err, runner_id, action = %action, "failed to forward progress to master");
                }
            }
        });
        ForwardingLog { tx }
    }
}

impl ActionLog for ForwardingLog {
    fn write(&self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }
}
