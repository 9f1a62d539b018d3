//! Bus consumer feeding the analytics pipeline.
//!
//! One consumer in group `statistics-group` subscribed to both event topics.
//! Malformed payloads are counted, logged, and skipped; the offset is
//! committed either way so a bad message cannot wedge the partition.
//! Handing a row to a full batch channel blocks here, which is the
//! backpressure path up to the bus.

use crate::models::{ResolvedEvent, ShortenedEvent};
use crate::statistics::service::IngestService;
use crate::telemetry::extract_trace_headers;
use crate::bus;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consume both event topics until shutdown fires.
pub async fn run(consumer: StreamConsumer, service: IngestService, shutdown: CancellationToken) {
    info!(
        topics = ?[bus::TOPIC_SHORTENED, bus::TOPIC_UNSHORTENED],
        "Statistics consumer running"
    );
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = consumer.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(e) => {
                        error!(error = %e, "Failed to read message");
                        continue;
                    }
                };

                let _cx = extract_trace_headers(&bus::message_headers(&message));
                let payload = message.payload().unwrap_or_default();

                match message.topic() {
                    bus::TOPIC_SHORTENED => {
                        match serde_json::from_slice::<ShortenedEvent>(payload) {
                            Ok(event) => service.shortened(event).await,
                            Err(e) => {
                                warn!(topic = message.topic(), error = %e, "Skipping malformed payload");
                                service.malformed();
                            }
                        }
                    }
                    bus::TOPIC_UNSHORTENED => {
                        match serde_json::from_slice::<ResolvedEvent>(payload) {
                            Ok(event) => service.resolved(event).await,
                            Err(e) => {
                                warn!(topic = message.topic(), error = %e, "Skipping malformed payload");
                                service.malformed();
                            }
                        }
                    }
                    other => warn!(topic = other, "Skipping message from unexpected topic"),
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    warn!(error = %e, "Failed to commit offset");
                }
            }
        }
    }
    info!("Statistics consumer stopped");
}
