//! Redis pub/sub transport for movie batches
//!
//! Provides:
//! - A publisher that encodes a batch and publishes it with a bounded timeout
//! - A continuous subscriber that decodes messages into a bounded queue
//!
//! Delivery is whatever Redis pub/sub gives: nothing is queued for a
//! subscriber that is not connected at publish time.

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::records::{decode_batch, encode_batch, MovieRecord};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publish side of the transport
#[async_trait]
pub trait BatchPublisher: Send + Sync {
    async fn publish(&self, batch: &[MovieRecord]) -> Result<()>;
}

/// Redis `PUBLISH` on a single channel
#[derive(Clone)]
pub struct RedisPublisher {
    connection: ConnectionManager,
    channel: String,
    timeout: Duration,
}

impl RedisPublisher {
    /// Connect to Redis using the transport settings
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let client = Client::open(config.redis.url.as_str()).map_err(|e| AppError::Configuration {
            message: format!("Invalid Redis URL: {}", e),
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| AppError::Transport {
            message: format!("Failed to connect to Redis: {}", e),
        })?;

        info!(channel = %config.transport.channel, "Redis publisher connected");

        Ok(Self {
            connection,
            channel: config.transport.channel.clone(),
            timeout: config.publish_timeout(),
        })
    }
}

#[async_trait]
impl BatchPublisher for RedisPublisher {
    async fn publish(&self, batch: &[MovieRecord]) -> Result<()> {
        let payload = encode_batch(batch)?;
        let mut connection = self.connection.clone();

        let receivers: i64 = tokio::time::timeout(
            self.timeout,
            connection.publish(&self.channel, payload),
        )
        .await
        .map_err(|_| AppError::Transport {
            message: format!("Publish timed out after {}ms", self.timeout.as_millis()),
        })??;

        if receivers == 0 {
            warn!(channel = %self.channel, "Batch published with no subscribers");
        } else {
            debug!(channel = %self.channel, receivers, size = batch.len(), "Batch published");
        }

        Ok(())
    }
}

/// Subscribe side of the transport
pub struct RedisSubscriber {
    client: Client,
    channel: String,
    buffer: usize,
    resubscribe_delay: Duration,
}

enum ListenEnd {
    Cancelled,
    ReceiverClosed,
    ConnectionLost,
}

impl RedisSubscriber {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::open(config.redis.url.as_str()).map_err(|e| AppError::Configuration {
            message: format!("Invalid Redis URL: {}", e),
        })?;

        Ok(Self {
            client,
            channel: config.transport.channel.clone(),
            buffer: config.transport.subscriber_buffer.max(1),
            resubscribe_delay: config.resubscribe_delay(),
        })
    }

    /// Start the subscription loop; decoded batches arrive on the receiver.
    ///
    /// The loop ends when `cancel` fires or the receiver is dropped.
    pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<Vec<MovieRecord>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (rx, handle)
    }

    async fn run(self, tx: mpsc::Sender<Vec<MovieRecord>>, cancel: CancellationToken) {
        loop {
            match self.listen(&tx, &cancel).await {
                Ok(ListenEnd::Cancelled) | Ok(ListenEnd::ReceiverClosed) => break,
                Ok(ListenEnd::ConnectionLost) => {
                    warn!(channel = %self.channel, "Subscription connection lost");
                }
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Subscription failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_delay) => {
                    info!(channel = %self.channel, "Resubscribing");
                }
            }
        }

        info!(channel = %self.channel, "Subscriber stopped");
    }

    async fn listen(
        &self,
        tx: &mpsc::Sender<Vec<MovieRecord>>,
        cancel: &CancellationToken,
    ) -> Result<ListenEnd> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed");

        let mut messages = pubsub.on_message();

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(ListenEnd::Cancelled),
                message = messages.next() => message,
            };

            let Some(message) = message else {
                return Ok(ListenEnd::ConnectionLost);
            };

            let Some(batch) = decode_message(message.get_payload_bytes()) else {
                continue;
            };

            // Full queue blocks here rather than dropping the batch
            tokio::select! {
                _ = cancel.cancelled() => return Ok(ListenEnd::Cancelled),
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        return Ok(ListenEnd::ReceiverClosed);
                    }
                }
            }
        }
    }
}

/// Decode one channel message; malformed payloads are logged and discarded
pub fn decode_message(payload: &[u8]) -> Option<Vec<MovieRecord>> {
    match decode_batch(payload) {
        Ok(batch) => {
            metrics::record_subscribe_message(true);
            debug!(size = batch.len(), "Batch received");
            Some(batch)
        }
        Err(e) => {
            metrics::record_subscribe_message(false);
            warn!(error = %e, bytes = payload.len(), "Discarding malformed message");
            None
        }
    }
}
