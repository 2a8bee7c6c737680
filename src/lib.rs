//! k1s0-easykafka: 名前付き Kafka プロデューサー・コンシューマーのサービスライブラリ。
//!
//! 設定ソースからクライアントごとの設定を解決し、値の型に応じたコーデックを選択して、
//! プロデューサーの送信とコンシューマーのバックグラウンドループを提供する。
//!
//! # 使用例
//!
//! ```ignore
//! use k1s0_easykafka::{MemoryConfigSource, ProducerService};
//!
//! let source = MemoryConfigSource::load("config/config.yaml", None)?;
//! let producer = ProducerService::<String>::connect(&source, "Orders")?;
//! let receipt = producer.send("order-1", "created".to_string()).await?;
//! ```

pub mod codec;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod hosting;
#[cfg(feature = "kafka")]
pub mod kafka_transport;
pub mod producer;
pub mod schemaregistry;
pub mod source;
pub mod transport;

pub use codec::{
    build_codec, Codec, CodecKind, IdentityCodec, Payload, SchemaCodec, SchemaPayload, ValueCodec,
};
pub use config::{resolve, resolve_or_supplied, ClientRole, NamedClientConfig};
pub use consumer::{
    ConsumerService, LifecycleState, RecordHandler, DEFAULT_POLL_PAUSE, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use envelope::{
    ConsumedRecord, DeliveryReceipt, Envelope, InboundRecord, PartitionEof, RecordMetadata,
};
pub use error::{CodecError, EasyKafkaError, TransportError};
pub use hosting::{shutdown_signal, HostedService, ServiceHost};
#[cfg(feature = "kafka")]
pub use kafka_transport::{KafkaConsumerTransport, KafkaProducerTransport, KafkaTransportFactory};
pub use producer::ProducerService;
pub use schemaregistry::{
    CachedSchemaRegistryClient, HttpSchemaRegistryClient, RegisteredSchema, SchemaRegistryClient,
    SchemaRegistryConfig, SchemaRegistryError, SchemaType,
};
pub use source::{ConfigSource, MemoryConfigSource};
pub use transport::{ConsumerTransport, PollOutcome, ProducerTransport, TransportFactory};

#[cfg(feature = "mock")]
pub use schemaregistry::MockSchemaRegistryClient;
#[cfg(feature = "mock")]
pub use transport::{MockConsumerTransport, MockProducerTransport};
