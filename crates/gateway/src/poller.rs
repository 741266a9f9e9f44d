//! Subscribe-side consumer
//!
//! Drains decoded batches from the subscription queue into the
//! materializer, one batch at a time.

use cinema_common::db::BatchSink;
use cinema_common::records::MovieRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counters for one poller run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub ingested: u64,
    pub dropped: u64,
}

pub struct Poller {
    sink: Arc<dyn BatchSink>,
}

impl Poller {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self { sink }
    }

    /// Runs until cancelled or the queue closes. A batch already handed to
    /// the sink finishes (bounded by the sink's own timeout).
    pub async fn run(
        self,
        mut batches: mpsc::Receiver<Vec<MovieRecord>>,
        cancel: CancellationToken,
    ) -> PollerStats {
        let mut stats = PollerStats::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => batch,
            };

            let Some(batch) = batch else {
                break;
            };

            match self.sink.ingest(&batch).await {
                Ok(_) => stats.ingested += 1,
                Err(e) => {
                    stats.dropped += 1;
                    warn!(size = batch.len(), error = %e, "Batch dropped");
                }
            }
        }

        info!(
            ingested = stats.ingested,
            dropped = stats.dropped,
            "Poller stopped"
        );
        stats
    }
}
