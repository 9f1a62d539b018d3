//! Message-bus plumbing shared by all services.
//!
//! Topics are ordered per partition with at-least-once delivery. Payloads are
//! UTF-8 JSON; trace-propagation metadata rides as message headers and is
//! optional on the consuming side.
//!
//! RPC-path emissions go through [`EventPublisher`], a bounded in-process
//! queue drained by a single background task: enqueue never blocks the
//! caller, overflow is dropped and counted. The hot-set producer publishes
//! directly through [`EventBus`] because it needs the error.

use crate::models::{HotSet, ResolvedEvent, ShortenedEvent};
use crate::telemetry::{inject_trace_headers, HeaderMap};
use crate::{Error, Result};

use async_trait::async_trait;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const TOPIC_SHORTENED: &str = "shortener.shortened";
pub const TOPIC_UNSHORTENED: &str = "shortener.unshortened";
pub const TOPIC_TOP_UNSHORTENED: &str = "shortener.top_unshortened";

pub const GROUP_STATISTICS: &str = "statistics-group";
pub const GROUP_SHORTENER: &str = "shortener-group";

const PUBLISH_QUEUE_CAPACITY: usize = 256;
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Write side of the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, headers: HeaderMap) -> Result<()>;
}

/// Kafka-backed [`EventBus`] with auto topic creation.
pub struct KafkaBus {
    producer: FutureProducer,
}

impl KafkaBus {
    pub fn connect(addr: &str) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", addr)
            .set("allow.auto.create.topics", "true")
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventBus for KafkaBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, headers: HeaderMap) -> Result<()> {
        let mut record = FutureRecord::<(), _>::to(topic).payload(&payload);
        if !headers.is_empty() {
            let mut owned = OwnedHeaders::new_with_capacity(headers.len());
            for (key, value) in &headers {
                owned = owned.insert(Header {
                    key,
                    value: Some(value.as_bytes()),
                });
            }
            record = record.headers(owned);
        }

        self.producer
            .send(record, Timeout::After(PUBLISH_TIMEOUT))
            .await
            .map_err(|(e, _)| Error::Bus(e))?;
        Ok(())
    }
}

/// Create a stream consumer subscribed for one consumer group.
///
/// Offsets are committed explicitly by the consuming loop, after the message
/// was handled (or rejected as malformed), giving at-least-once semantics.
pub fn create_consumer(addr: &str, group: &str, topics: &[&str]) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", addr)
        .set("group.id", group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(topics)?;
    Ok(consumer)
}

/// Collect message headers into the propagation carrier shape.
pub fn message_headers(msg: &BorrowedMessage<'_>) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(headers) = msg.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                if let Ok(value) = std::str::from_utf8(value) {
                    map.insert(header.key.to_string(), value.to_string());
                }
            }
        }
    }
    map
}

struct PublisherInstruments {
    sent: Counter<u64>,
    dropped: Counter<u64>,
}

fn instruments() -> &'static PublisherInstruments {
    static INSTRUMENTS: OnceLock<PublisherInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("shortstack.bus");
        PublisherInstruments {
            sent: meter
                .u64_counter("shortstack.bus.publish.sent")
                .with_description("Events handed to the bus, by topic")
                .init(),
            dropped: meter
                .u64_counter("shortstack.bus.publish.dropped")
                .with_description("Events dropped on queue overflow or publish failure, by topic")
                .init(),
        }
    })
}

struct Outbound {
    topic: &'static str,
    payload: Vec<u8>,
    headers: HeaderMap,
}

/// Bounded fire-and-forget publish queue.
///
/// `shortened`/`resolved` never block and never fail the caller: the payload
/// is serialized (timestamp already fixed by the event), the current trace
/// context is captured, and the message is enqueued with `try_send`. A full
/// queue drops the event. The drain task exits once every publisher handle
/// is gone, which flushes the queue at shutdown.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Outbound>,
}

impl EventPublisher {
    /// Spawn the drain task and return the shared handle plus its join
    /// handle (await it after dropping all publishers).
    pub fn spawn(bus: Arc<dyn EventBus>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Outbound>(PUBLISH_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                match bus.publish(out.topic, out.payload, out.headers).await {
                    Ok(()) => {
                        instruments()
                            .sent
                            .add(1, &[KeyValue::new("topic", out.topic)]);
                    }
                    Err(e) => {
                        warn!(topic = out.topic, error = %e, "Dropping event: publish failed");
                        instruments()
                            .dropped
                            .add(1, &[KeyValue::new("topic", out.topic)]);
                    }
                }
            }
            debug!("Event publisher drained");
        });
        (Self { tx }, handle)
    }

    pub fn shortened(&self, event: &ShortenedEvent) {
        self.enqueue(TOPIC_SHORTENED, serde_json::to_vec(event));
    }

    pub fn resolved(&self, event: &ResolvedEvent) {
        self.enqueue(TOPIC_UNSHORTENED, serde_json::to_vec(event));
    }

    fn enqueue(
        &self,
        topic: &'static str,
        payload: std::result::Result<Vec<u8>, serde_json::Error>,
    ) {
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Dropping event: serialization failed");
                instruments().dropped.add(1, &[KeyValue::new("topic", topic)]);
                return;
            }
        };
        let out = Outbound {
            topic,
            payload,
            headers: inject_trace_headers(),
        };
        if self.tx.try_send(out).is_err() {
            warn!(topic, "Dropping event: publish queue full");
            instruments().dropped.add(1, &[KeyValue::new("topic", topic)]);
        }
    }
}

/// Serialize and publish the hot set, with trace headers attached.
pub async fn publish_hot_set(bus: &dyn EventBus, hot_set: &HotSet) -> Result<()> {
    let payload = serde_json::to_vec(hot_set)?;
    bus.publish(TOPIC_TOP_UNSHORTENED, payload, inject_trace_headers())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _headers: HeaderMap,
        ) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[tokio::test]
    async fn publisher_drains_on_shutdown() {
        let bus = Arc::new(RecordingBus {
            published: Mutex::new(Vec::new()),
        });
        let (publisher, drain) = EventPublisher::spawn(bus.clone());

        publisher.shortened(&ShortenedEvent {
            shortened_at: Utc::now(),
            original_url: "https://go.dev".to_string(),
            short_code: "1".to_string(),
        });
        publisher.resolved(&ResolvedEvent {
            unshortened_at: Utc::now(),
            original_url: "https://go.dev".to_string(),
            short_code: "1".to_string(),
        });

        drop(publisher);
        drain.await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, TOPIC_SHORTENED);
        assert_eq!(published[1].0, TOPIC_UNSHORTENED);
    }

    #[tokio::test]
    async fn hot_set_payload_matches_wire_contract() {
        let bus = RecordingBus {
            published: Mutex::new(Vec::new()),
        };
        let hot_set = HotSet {
            valid_until: Utc::now(),
            top: vec![crate::models::TopEntry {
                original_url: "https://go.dev".to_string(),
                short_code: "1".to_string(),
            }],
        };
        publish_hot_set(&bus, &hot_set).await.unwrap();

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].0, TOPIC_TOP_UNSHORTENED);
        let value: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(value["top"][0]["short_code"], "1");
        assert!(value["valid_until"].is_string());
    }
}
