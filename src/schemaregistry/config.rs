use serde::{Deserialize, Serialize};

use crate::config::NamedClientConfig;

/// Schema Registry 接続設定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistryConfig {
    /// Schema Registry の URL。
    /// 例: "http://schema-registry:8081"（docker-compose）
    pub url: String,

    /// HTTP タイムアウト（秒）。
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// キャッシュに保持するスキーマの最大数。
    #[serde(default = "default_max_cached_schemas")]
    pub max_cached_schemas: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_cached_schemas() -> usize {
    1000
}

impl SchemaRegistryConfig {
    /// 指定した URL で設定を作成する。
    ///
    /// タイムアウトは 30 秒、キャッシュ上限は 1000 件がデフォルト値として設定される。
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout_secs(),
            max_cached_schemas: default_max_cached_schemas(),
        }
    }

    /// 名前付きクライアント設定の SchemaRegistryUrl から設定を作成する。
    pub fn from_client(config: &NamedClientConfig) -> Self {
        Self::new(config.schema_registry_url.clone())
    }

    /// Kafka トピック名から Schema Registry のサブジェクト名を生成する。
    ///
    /// Confluent の規則に従い `{topic-name}-value` 形式を返す。
    pub fn subject_name(topic: &str) -> String {
        format!("{}-value", topic)
    }
}
