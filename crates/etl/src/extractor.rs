//! Periodic extraction of contiguous id ranges
//!
//! Each tick fetches `[cursor, cursor + batch_size)` sequentially, skips ids
//! that fail, emits the rest as one batch and advances the cursor by the
//! full batch size. Failed ids are not retried.

use crate::tmdb::MovieSource;
use cinema_common::config::ExtractorConfig;
use cinema_common::metrics;
use cinema_common::records::MovieRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub struct Extractor<S> {
    source: S,
    cursor: i64,
    batch_size: i64,
    tick: Duration,
}

impl<S: MovieSource + 'static> Extractor<S> {
    pub fn new(source: S, config: &ExtractorConfig) -> Self {
        Self {
            source,
            cursor: config.start_id,
            batch_size: config.batch_size,
            // tokio intervals reject a zero period
            tick: Duration::from_secs(config.tick_interval_secs).max(Duration::from_millis(1)),
        }
    }

    /// Override the tick period
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Next id to be fetched
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Fetch one batch and advance the cursor
    #[instrument(skip(self), fields(start = self.cursor, size = self.batch_size))]
    pub async fn fetch_batch(&mut self) -> Vec<MovieRecord> {
        let start = self.cursor;
        let end = start.saturating_add(self.batch_size.max(0));
        let mut batch = Vec::new();

        for id in start..end {
            match self.source.fetch_movie(id).await {
                Ok(movie) => {
                    metrics::record_extract_item(true);
                    batch.push(movie);
                }
                Err(e) => {
                    metrics::record_extract_item(false);
                    warn!(id, error = %e, "Skipping movie");
                }
            }
        }

        self.cursor = end;
        metrics::record_extract_batch(batch.len());
        debug!(fetched = batch.len(), next = self.cursor, "Batch extracted");

        batch
    }

    /// Run the tick loop on its own task.
    ///
    /// The first batch is fetched one tick after start. Cancellation drops an
    /// in-progress batch instead of emitting it.
    pub fn spawn(self, cancel: CancellationToken, buffer: usize) -> (mpsc::Receiver<Vec<MovieRecord>>, JoinHandle<i64>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    /// Returns the cursor at exit, for restarts
    pub async fn run(mut self, tx: mpsc::Sender<Vec<MovieRecord>>, cancel: CancellationToken) -> i64 {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            start_id = self.cursor,
            batch_size = self.batch_size,
            tick_ms = self.tick.as_millis() as u64,
            "Extractor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = self.fetch_batch() => batch,
            };

            info!(size = batch.len(), next = self.cursor, "Batch ready");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        warn!("Batch consumer gone, stopping extractor");
                        break;
                    }
                }
            }
        }

        info!(cursor = self.cursor, "Extractor stopped");
        self.cursor
    }
}
