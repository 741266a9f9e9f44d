//! Extract -> publish forwarding loop

use cinema_common::metrics;
use cinema_common::records::MovieRecord;
use cinema_common::transport::BatchPublisher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Counters for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u64,
    pub failed: u64,
    pub skipped_empty: u64,
}

pub struct Pipeline<P> {
    publisher: P,
}

impl<P: BatchPublisher> Pipeline<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    /// Forward batches until cancelled or the extractor stops.
    ///
    /// A failed publish is logged and the batch dropped. A publish already in
    /// flight when cancellation fires runs to its own timeout.
    pub async fn run(
        &self,
        mut batches: mpsc::Receiver<Vec<MovieRecord>>,
        cancel: CancellationToken,
    ) -> PipelineStats {
        let mut stats = PipelineStats::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => batch,
            };

            let Some(batch) = batch else {
                break;
            };

            if batch.is_empty() {
                debug!("Nothing extracted this tick");
                stats.skipped_empty += 1;
                continue;
            }

            match self.publisher.publish(&batch).await {
                Ok(()) => {
                    metrics::record_publish(true);
                    stats.published += 1;
                    info!(size = batch.len(), "Batch published");
                }
                Err(e) => {
                    metrics::record_publish(false);
                    stats.failed += 1;
                    error!(size = batch.len(), error = %e, "Dropping batch after publish failure");
                }
            }
        }

        info!(
            published = stats.published,
            failed = stats.failed,
            "Pipeline stopped"
        );
        stats
    }
}
