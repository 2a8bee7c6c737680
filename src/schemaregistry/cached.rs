use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::client::{HttpSchemaRegistryClient, SchemaRegistryClient};
use super::config::SchemaRegistryConfig;
use super::error::SchemaRegistryError;
use super::schema::{RegisteredSchema, SchemaType};

/// CachedSchemaRegistryClient はスキーマ ID とスキーマ本体をメモリにキャッシュする SchemaRegistryClient。
///
/// キャッシュが上限に達した場合は全件を破棄してから追加する。
pub struct CachedSchemaRegistryClient {
    inner: Arc<dyn SchemaRegistryClient>,
    max_entries: usize,
    ids_by_schema: RwLock<HashMap<(String, String), i32>>,
    schemas_by_id: RwLock<HashMap<i32, RegisteredSchema>>,
}

impl CachedSchemaRegistryClient {
    /// HTTP クライアントを構築し、その前段にキャッシュを置く。
    pub fn new(config: SchemaRegistryConfig) -> Result<Self, SchemaRegistryError> {
        let max_entries = config.max_cached_schemas;
        let http = HttpSchemaRegistryClient::new(config)?;
        Ok(Self::with_client(Arc::new(http), max_entries))
    }

    /// 任意の SchemaRegistryClient をキャッシュでラップする。
    pub fn with_client(inner: Arc<dyn SchemaRegistryClient>, max_entries: usize) -> Self {
        Self {
            inner,
            max_entries: max_entries.max(1),
            ids_by_schema: RwLock::new(HashMap::new()),
            schemas_by_id: RwLock::new(HashMap::new()),
        }
    }

    /// キャッシュ済みエントリ数（ID 索引 + スキーマ本体）を返す。
    pub async fn cached_len(&self) -> usize {
        self.ids_by_schema.read().await.len() + self.schemas_by_id.read().await.len()
    }

    /// キャッシュをすべて破棄する。
    pub async fn clear(&self) {
        self.ids_by_schema.write().await.clear();
        self.schemas_by_id.write().await.clear();
    }
}

#[async_trait]
impl SchemaRegistryClient for CachedSchemaRegistryClient {
    async fn register_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
    ) -> Result<i32, SchemaRegistryError> {
        let key = (subject.to_string(), schema.to_string());
        if let Some(id) = self.ids_by_schema.read().await.get(&key) {
            return Ok(*id);
        }

        let id = self
            .inner
            .register_schema(subject, schema, schema_type)
            .await?;

        let mut ids = self.ids_by_schema.write().await;
        if ids.len() >= self.max_entries {
            debug!(max_entries = self.max_entries, "schema id cache full, evicting");
            ids.clear();
        }
        ids.insert(key, id);
        Ok(id)
    }

    async fn get_schema_by_id(
        &self,
        schema_id: i32,
    ) -> Result<RegisteredSchema, SchemaRegistryError> {
        if let Some(schema) = self.schemas_by_id.read().await.get(&schema_id) {
            return Ok(schema.clone());
        }

        let schema = self.inner.get_schema_by_id(schema_id).await?;

        let mut schemas = self.schemas_by_id.write().await;
        if schemas.len() >= self.max_entries {
            debug!(max_entries = self.max_entries, "schema cache full, evicting");
            schemas.clear();
        }
        schemas.insert(schema_id, schema.clone());
        Ok(schema)
    }
}
