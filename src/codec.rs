//! 値の型ごとのコーデック選択。
//!
//! 値の型が `String` の場合は恒等コーデック、`SchemaPayload` を実装した型の場合は
//! Schema Registry を使うコーデックを、サービス構築時に型レベルで一度だけ選択する。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CodecError, EasyKafkaError};
use crate::schemaregistry::{
    CachedSchemaRegistryClient, SchemaRegistryClient, SchemaRegistryConfig, SchemaType,
};

/// Confluent ワイヤーフォーマットのマジックバイト。
const MAGIC_BYTE: u8 = 0;
/// マジックバイト 1 バイト + スキーマ ID 4 バイト。
const HEADER_LEN: usize = 5;

/// ValueCodec は値とバイト列の相互変換を行う。
#[async_trait]
pub trait ValueCodec<V>: Send + Sync {
    async fn encode(&self, topic: &str, value: &V) -> Result<Vec<u8>, CodecError>;

    async fn decode(&self, topic: &str, bytes: &[u8]) -> Result<V, CodecError>;
}

/// IdentityCodec は文字列を UTF-8 バイト列としてそのまま扱う。
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

#[async_trait]
impl ValueCodec<String> for IdentityCodec {
    async fn encode(&self, _topic: &str, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    async fn decode(&self, _topic: &str, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

/// SchemaPayload は Schema Registry に登録したスキーマでエンコードする値の型を表す。
///
/// ペイロード本体は serde_json でシリアライズされる。
pub trait SchemaPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Schema Registry に登録するスキーマ定義。
    fn schema() -> String;

    fn schema_type() -> SchemaType {
        SchemaType::Json
    }
}

/// SchemaCodec は Confluent ワイヤーフォーマット
/// `[0x00][スキーマ ID (4 バイト, ビッグエンディアン)][ペイロード]` でエンコードする。
pub struct SchemaCodec<V> {
    registry: Arc<dyn SchemaRegistryClient>,
    _value: PhantomData<fn() -> V>,
}

impl<V: SchemaPayload> SchemaCodec<V> {
    pub fn new(registry: Arc<dyn SchemaRegistryClient>) -> Self {
        Self {
            registry,
            _value: PhantomData,
        }
    }
}

#[async_trait]
impl<V: SchemaPayload> ValueCodec<V> for SchemaCodec<V> {
    async fn encode(&self, topic: &str, value: &V) -> Result<Vec<u8>, CodecError> {
        let subject = SchemaRegistryConfig::subject_name(topic);
        let schema_id = self
            .registry
            .register_schema(&subject, &V::schema(), V::schema_type())
            .await?;

        let payload =
            serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.extend_from_slice(&schema_id.to_be_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    async fn decode(&self, topic: &str, bytes: &[u8]) -> Result<V, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::InvalidFraming(format!(
                "expected at least {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != MAGIC_BYTE {
            return Err(CodecError::InvalidFraming(format!(
                "unknown magic byte {:#04x}",
                bytes[0]
            )));
        }

        let mut id_bytes = [0u8; 4];
        id_bytes.copy_from_slice(&bytes[1..HEADER_LEN]);
        let schema_id = i32::from_be_bytes(id_bytes);

        let schema = self.registry.get_schema_by_id(schema_id).await?;
        debug!(
            topic = %topic,
            schema_id,
            schema_type = %schema.schema_type,
            "resolved writer schema"
        );

        serde_json::from_slice(&bytes[HEADER_LEN..])
            .map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

/// CodecKind は選択されたコーデックの種類を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Identity,
    Schema,
}

/// Codec はサービスが所有するコーデックと、スキーマ形式の場合はその Registry クライアント。
pub struct Codec<V> {
    inner: Arc<dyn ValueCodec<V>>,
    registry: Option<Arc<CachedSchemaRegistryClient>>,
    kind: CodecKind,
}

impl<V> Clone for Codec<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            registry: self.registry.clone(),
            kind: self.kind,
        }
    }
}

impl Codec<String> {
    /// Registry クライアントを持たない恒等コーデック。
    pub fn identity() -> Self {
        Self {
            inner: Arc::new(IdentityCodec),
            registry: None,
            kind: CodecKind::Identity,
        }
    }
}

impl<V: SchemaPayload> Codec<V> {
    /// キャッシュ付き Registry クライアントに束縛したスキーマコーデック。
    pub fn schema(registry: Arc<CachedSchemaRegistryClient>) -> Self {
        let client: Arc<dyn SchemaRegistryClient> = registry.clone();
        Self {
            inner: Arc::new(SchemaCodec::<V>::new(client)),
            registry: Some(registry),
            kind: CodecKind::Schema,
        }
    }
}

impl<V: Send + Sync> Codec<V> {
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn registry(&self) -> Option<&Arc<CachedSchemaRegistryClient>> {
        self.registry.as_ref()
    }

    pub async fn encode(&self, topic: &str, value: &V) -> Result<Vec<u8>, CodecError> {
        self.inner.encode(topic, value).await
    }

    pub async fn decode(&self, topic: &str, bytes: &[u8]) -> Result<V, CodecError> {
        self.inner.decode(topic, bytes).await
    }

    /// 所有する Registry クライアントのキャッシュを解放する。
    pub async fn close(&self) {
        if let Some(registry) = &self.registry {
            registry.clear().await;
        }
    }
}

/// Payload はサービスが扱える値の型を表し、型ごとのコーデックを選択する。
pub trait Payload: Send + Sync + Sized + 'static {
    fn select_codec(registry: &SchemaRegistryConfig) -> Result<Codec<Self>, EasyKafkaError>;
}

impl Payload for String {
    fn select_codec(_registry: &SchemaRegistryConfig) -> Result<Codec<Self>, EasyKafkaError> {
        Ok(Codec::identity())
    }
}

impl<T: SchemaPayload> Payload for T {
    fn select_codec(registry: &SchemaRegistryConfig) -> Result<Codec<Self>, EasyKafkaError> {
        let client = CachedSchemaRegistryClient::new(registry.clone())?;
        Ok(Codec::schema(Arc::new(client)))
    }
}

/// 値の型 V に対応するコーデックを構築する。
pub fn build_codec<V: Payload>(
    registry: &SchemaRegistryConfig,
) -> Result<Codec<V>, EasyKafkaError> {
    V::select_codec(registry)
}
