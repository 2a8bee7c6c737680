//! rdkafka を使用したトランスポート実装。
//! feature = "kafka" で有効化される。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::NamedClientConfig;
use crate::envelope::{DeliveryReceipt, Envelope, InboundRecord, PartitionEof, RecordMetadata};
use crate::error::TransportError;
use crate::transport::{ConsumerTransport, PollOutcome, ProducerTransport, TransportFactory};

/// 配信確認を待つ上限。
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// close 時に未送信メッセージをフラッシュする上限。
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

const PRODUCER_DEFAULTS: [(&str, &str); 1] = [("message.timeout.ms", "30000")];

const CONSUMER_DEFAULTS: [(&str, &str); 4] = [
    ("enable.auto.commit", "false"),
    ("auto.offset.reset", "earliest"),
    ("session.timeout.ms", "30000"),
    ("enable.partition.eof", "true"),
];

/// 組み込みの既定値を設定した後、追加設定で上書きする。
fn client_config(
    config: &NamedClientConfig,
    group_id: Option<&str>,
    defaults: &[(&str, &str)],
) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    if let Some(group_id) = group_id {
        client.set("group.id", group_id);
    }
    for (key, value) in defaults {
        client.set(*key, *value);
    }
    for (key, value) in &config.extra_settings {
        client.set(key, value);
    }
    client
}

pub(crate) fn producer_client_config(config: &NamedClientConfig) -> ClientConfig {
    client_config(config, None, &PRODUCER_DEFAULTS)
}

pub(crate) fn consumer_client_config(config: &NamedClientConfig) -> ClientConfig {
    client_config(
        config,
        Some(config.effective_group_id()),
        &CONSUMER_DEFAULTS,
    )
}

/// KafkaProducerTransport は rdkafka の FutureProducer を使った実装。
pub struct KafkaProducerTransport {
    producer: FutureProducer,
}

impl KafkaProducerTransport {
    pub fn new(config: &NamedClientConfig) -> Result<Self, TransportError> {
        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl ProducerTransport for KafkaProducerTransport {
    async fn send(
        &self,
        topic: &str,
        envelope: Envelope<String, Vec<u8>>,
    ) -> Result<DeliveryReceipt, TransportError> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(envelope.value.as_slice());
        if let Some(key) = envelope.key.as_deref() {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| match err {
                KafkaError::MessageProduction(_) => TransportError::Delivery(err.to_string()),
                KafkaError::Canceled => TransportError::Closed,
                other => TransportError::Unexpected(other.to_string()),
            })?;

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to flush kafka producer"),
            Err(e) => warn!(error = %e, "kafka producer flush task failed"),
        }
    }
}

/// KafkaConsumerTransport は rdkafka の StreamConsumer を使った実装。
pub struct KafkaConsumerTransport {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumerTransport {
    pub fn new(config: &NamedClientConfig) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = consumer_client_config(config)
            .create()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn inbound(message: &BorrowedMessage<'_>) -> InboundRecord {
    InboundRecord {
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec),
        metadata: RecordMetadata {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp_ms: message.timestamp().to_millis(),
        },
    }
}

#[async_trait]
impl ConsumerTransport for KafkaConsumerTransport {
    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    async fn poll(&self, cancel: &CancellationToken) -> Result<PollOutcome, TransportError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(PollOutcome::Cancelled),
            received = self.consumer.recv() => match received {
                Ok(message) => Ok(PollOutcome::Record(inbound(&message))),
                Err(KafkaError::PartitionEOF(partition)) => {
                    Ok(PollOutcome::EndOfPartition(PartitionEof {
                        topic: self.topic.clone(),
                        partition,
                    }))
                }
                Err(e) => Err(TransportError::Consume(e.to_string())),
            },
        }
    }

    async fn commit(&self, metadata: &RecordMetadata) -> Result<(), TransportError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &metadata.topic,
            metadata.partition,
            Offset::Offset(metadata.offset + 1),
        )
        .map_err(|e| TransportError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| TransportError::Commit(e.to_string()))
    }

    fn close(&self) {
        self.consumer.unsubscribe();
    }
}

/// KafkaTransportFactory は解決済み設定から rdkafka クライアントを生成する。
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaTransportFactory;

impl TransportFactory for KafkaTransportFactory {
    fn producer(
        &self,
        config: &NamedClientConfig,
    ) -> Result<Arc<dyn ProducerTransport>, TransportError> {
        Ok(Arc::new(KafkaProducerTransport::new(config)?))
    }

    fn consumer(
        &self,
        config: &NamedClientConfig,
    ) -> Result<Arc<dyn ConsumerTransport>, TransportError> {
        Ok(Arc::new(KafkaConsumerTransport::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NamedClientConfig {
        NamedClientConfig::new("Orders", "orders", "kafka-0:9092,kafka-1:9092", "http://sr:8081")
    }

    #[test]
    fn test_producer_client_config_defaults() {
        let client = producer_client_config(&config());
        assert_eq!(client.get("bootstrap.servers"), Some("kafka-0:9092,kafka-1:9092"));
        assert_eq!(client.get("message.timeout.ms"), Some("30000"));
        assert_eq!(client.get("group.id"), None);
    }

    #[test]
    fn test_consumer_client_config_defaults() {
        let client = consumer_client_config(&config().with_group_id("orders-group"));
        assert_eq!(client.get("group.id"), Some("orders-group"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("enable.partition.eof"), Some("true"));
    }

    #[test]
    fn test_extra_settings_override_defaults() {
        let client = consumer_client_config(
            &config()
                .with_setting("auto.offset.reset", "latest")
                .with_setting("fetch.min.bytes", "1024"),
        );
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("fetch.min.bytes"), Some("1024"));
        assert_eq!(client.get("group.id"), Some("Orders"));
    }
}
