use std::sync::Arc;

use tracing::{debug, error, info};

use crate::codec::{Codec, CodecKind, Payload};
use crate::config::{resolve, ClientRole, NamedClientConfig};
use crate::envelope::{DeliveryReceipt, Envelope};
use crate::error::EasyKafkaError;
use crate::schemaregistry::SchemaRegistryConfig;
use crate::source::ConfigSource;
use crate::transport::{ProducerTransport, TransportFactory};

/// ProducerService は 1 つのトピックに束縛された名前付きプロデューサー。
///
/// 値の型 V からコーデックを構築時に選択し、トランスポートと Registry クライアントを所有する。
pub struct ProducerService<V: Payload> {
    config: NamedClientConfig,
    codec_kind: CodecKind,
    transport: Option<Arc<dyn ProducerTransport>>,
    codec: Option<Codec<V>>,
}

impl<V: Payload> ProducerService<V> {
    /// 設定ソースから `Producer:<name>:*` を解決してプロデューサーを生成する。
    pub fn new(
        source: &dyn ConfigSource,
        name: &str,
        factory: &dyn TransportFactory,
    ) -> Result<Self, EasyKafkaError> {
        let config = resolve(source, name, ClientRole::Producer)?;
        Self::with_config(config, factory)
    }

    /// 解決済みの設定を検証せずに使用してプロデューサーを生成する。
    pub fn with_config(
        config: NamedClientConfig,
        factory: &dyn TransportFactory,
    ) -> Result<Self, EasyKafkaError> {
        let codec = V::select_codec(&SchemaRegistryConfig::from_client(&config))?;
        let transport = factory.producer(&config)?;
        Ok(Self::from_parts(config, transport, codec))
    }

    pub fn from_parts(
        config: NamedClientConfig,
        transport: Arc<dyn ProducerTransport>,
        codec: Codec<V>,
    ) -> Self {
        info!(
            producer = %config.name,
            topic = %config.topic,
            codec = ?codec.kind(),
            "kafka producer created"
        );
        Self {
            codec_kind: codec.kind(),
            config,
            transport: Some(transport),
            codec: Some(codec),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn config(&self) -> &NamedClientConfig {
        &self.config
    }

    pub fn codec_kind(&self) -> CodecKind {
        self.codec_kind
    }

    pub fn is_disposed(&self) -> bool {
        self.transport.is_none()
    }

    /// キー付きでメッセージを送信し、ブローカーの確認応答まで待機する。
    pub async fn send(
        &self,
        key: impl Into<String>,
        value: V,
    ) -> Result<DeliveryReceipt, EasyKafkaError> {
        self.send_envelope(Envelope::keyed(key.into(), value)).await
    }

    /// キーなしでメッセージを送信する。
    pub async fn send_unkeyed(&self, value: V) -> Result<DeliveryReceipt, EasyKafkaError> {
        self.send_envelope(Envelope::unkeyed(value)).await
    }

    /// Envelope を送信する。
    ///
    /// トランスポートまたはシリアライザが拒否した場合は `SendFailed`、
    /// それ以外の失敗は `UnexpectedProducer` を返す。
    pub async fn send_envelope(
        &self,
        envelope: Envelope<String, V>,
    ) -> Result<DeliveryReceipt, EasyKafkaError> {
        let (Some(transport), Some(codec)) = (&self.transport, &self.codec) else {
            return Err(EasyKafkaError::Disposed {
                name: self.config.name.clone(),
            });
        };
        let topic = self.config.topic.as_str();
        let key = envelope.key;

        debug!(
            producer = %self.config.name,
            topic = %topic,
            key = ?key,
            "sending message"
        );

        let payload = match codec.encode(topic, &envelope.value).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    producer = %self.config.name,
                    topic = %topic,
                    key = ?key,
                    error = %e,
                    "failed to serialize message"
                );
                return Err(EasyKafkaError::SendFailed {
                    topic: topic.to_string(),
                    cause: e.to_string(),
                });
            }
        };
        let payload_len = payload.len();

        match transport.send(topic, Envelope::new(key.clone(), payload)).await {
            Ok(receipt) => {
                info!(
                    producer = %self.config.name,
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "message delivered"
                );
                Ok(receipt)
            }
            Err(e) if e.is_send_failure() => {
                error!(
                    producer = %self.config.name,
                    topic = %topic,
                    key = ?key,
                    payload_len,
                    error = %e,
                    "failed to deliver message"
                );
                Err(EasyKafkaError::SendFailed {
                    topic: topic.to_string(),
                    cause: e.to_string(),
                })
            }
            Err(e) => {
                error!(
                    producer = %self.config.name,
                    topic = %topic,
                    key = ?key,
                    payload_len,
                    error = %e,
                    "unexpected error while producing message"
                );
                Err(EasyKafkaError::UnexpectedProducer {
                    cause: e.to_string(),
                })
            }
        }
    }

    /// トランスポートと Registry クライアントを解放する。複数回呼んでもよい。
    pub async fn dispose(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        if let Some(codec) = self.codec.take() {
            codec.close().await;
        }
        debug!(producer = %self.config.name, "kafka producer disposed");
    }
}

#[cfg(feature = "kafka")]
impl<V: Payload> ProducerService<V> {
    /// rdkafka トランスポートでプロデューサーを生成する。
    pub fn connect(source: &dyn ConfigSource, name: &str) -> Result<Self, EasyKafkaError> {
        Self::new(source, name, &crate::kafka_transport::KafkaTransportFactory)
    }
}
