use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EasyKafkaError;
use crate::source::{ConfigSource, KEY_DELIMITER};

const KEY_TOPIC: &str = "Topic";
const KEY_BOOTSTRAP_SERVERS: &str = "BootstrapServers";
const KEY_SCHEMA_REGISTRY_URL: &str = "SchemaRegistryUrl";
const KEY_GROUP_ID: &str = "GroupId";

/// 名前付きクライアント設定の中でトランスポートへ渡さない予約キー。
const RESERVED_KEYS: [&str; 4] = [
    KEY_TOPIC,
    KEY_BOOTSTRAP_SERVERS,
    KEY_SCHEMA_REGISTRY_URL,
    KEY_GROUP_ID,
];

/// ClientRole は設定セクションのロール（プロデューサー / コンシューマー）を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRole {
    Producer,
    Consumer,
}

impl ClientRole {
    /// 設定キーの先頭セグメントを返す。
    pub fn section(&self) -> &'static str {
        match self {
            ClientRole::Producer => "Producer",
            ClientRole::Consumer => "Consumer",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// NamedClientConfig は名前付きクライアント 1 つ分の解決済み設定を表す。
///
/// サービス構築時に一度だけ作られ、以降は変更されない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedClientConfig {
    /// クライアント名（ログ出力と設定キーに使用）
    pub name: String,
    /// 送信先 / 購読対象のトピック名
    pub topic: String,
    /// ブローカーアドレス（カンマ区切り、rdkafka の bootstrap.servers）
    pub bootstrap_servers: String,
    /// コンシューマーグループ ID（コンシューマーのみ）
    #[serde(default)]
    pub group_id: Option<String>,
    /// Schema Registry の URL
    pub schema_registry_url: String,
    /// トランスポート設定へそのまま渡す追加設定
    #[serde(default)]
    pub extra_settings: BTreeMap<String, String>,
}

impl NamedClientConfig {
    pub fn new(
        name: impl Into<String>,
        topic: impl Into<String>,
        bootstrap_servers: impl Into<String>,
        schema_registry_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            bootstrap_servers: bootstrap_servers.into(),
            group_id: None,
            schema_registry_url: schema_registry_url.into(),
            extra_settings: BTreeMap::new(),
        }
    }

    /// コンシューマーグループ ID を設定する。
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// 追加のトランスポート設定を 1 件加える。
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_settings.insert(key.into(), value.into());
        self
    }

    /// 実際に使用するグループ ID を返す。未設定の場合はクライアント名。
    pub fn effective_group_id(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.name)
    }
}

/// 設定ソースから名前付きクライアントの設定を解決する。
///
/// `<role>:<name>:Topic`、`BootstrapServers`、`SchemaRegistryUrl` は必須で、
/// 欠落または空の場合は `MissingConfiguration` を返す。
/// コンシューマーの `GroupId` は省略時にクライアント名となる。
pub fn resolve(
    source: &dyn ConfigSource,
    name: &str,
    role: ClientRole,
) -> Result<NamedClientConfig, EasyKafkaError> {
    let prefix = format!("{}{}{}", role.section(), KEY_DELIMITER, name);

    let topic = required(source, &prefix, KEY_TOPIC)?;
    let bootstrap_servers = required(source, &prefix, KEY_BOOTSTRAP_SERVERS)?;
    let schema_registry_url = required(source, &prefix, KEY_SCHEMA_REGISTRY_URL)?;

    let group_id = match role {
        ClientRole::Consumer => Some(
            optional(source, &prefix, KEY_GROUP_ID).unwrap_or_else(|| name.to_string()),
        ),
        ClientRole::Producer => None,
    };

    let extra_settings = source
        .section(&prefix)
        .into_iter()
        .filter(|(key, _)| {
            !key.contains(KEY_DELIMITER)
                && !RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(key))
        })
        .collect();

    info!(
        client = %name,
        role = %role,
        topic = %topic,
        "resolved kafka client configuration"
    );

    Ok(NamedClientConfig {
        name: name.to_string(),
        topic,
        bootstrap_servers,
        group_id,
        schema_registry_url,
        extra_settings,
    })
}

/// supplied が与えられた場合は検証せずにそのまま使用し、そうでなければ resolve する。
pub fn resolve_or_supplied(
    source: &dyn ConfigSource,
    name: &str,
    role: ClientRole,
    supplied: Option<NamedClientConfig>,
) -> Result<NamedClientConfig, EasyKafkaError> {
    match supplied {
        Some(config) => {
            info!(
                client = %config.name,
                role = %role,
                topic = %config.topic,
                "using caller-supplied kafka client configuration"
            );
            Ok(config)
        }
        None => resolve(source, name, role),
    }
}

fn required(source: &dyn ConfigSource, prefix: &str, key: &str) -> Result<String, EasyKafkaError> {
    optional(source, prefix, key).ok_or_else(|| EasyKafkaError::MissingConfiguration {
        key: format!("{prefix}{KEY_DELIMITER}{key}"),
    })
}

fn optional(source: &dyn ConfigSource, prefix: &str, key: &str) -> Option<String> {
    source
        .get(&format!("{prefix}{KEY_DELIMITER}{key}"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryConfigSource;

    fn producer_source() -> MemoryConfigSource {
        MemoryConfigSource::new()
            .with("Producer:TestProducer:Topic", "TestTopic")
            .with("Producer:TestProducer:BootstrapServers", "localhost:9092")
            .with("Producer:TestProducer:SchemaRegistryUrl", "http://localhost:8081")
    }

    #[test]
    fn test_resolve_producer() {
        let cfg = resolve(&producer_source(), "TestProducer", ClientRole::Producer).unwrap();
        assert_eq!(cfg.name, "TestProducer");
        assert_eq!(cfg.topic, "TestTopic");
        assert_eq!(cfg.bootstrap_servers, "localhost:9092");
        assert_eq!(cfg.schema_registry_url, "http://localhost:8081");
        assert!(cfg.group_id.is_none());
        assert!(cfg.extra_settings.is_empty());
    }

    #[test]
    fn test_resolve_is_repeatable() {
        let source = producer_source();
        let first = resolve(&source, "TestProducer", ClientRole::Producer).unwrap();
        let second = resolve(&source, "TestProducer", ClientRole::Producer).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_missing_topic() {
        let mut source = producer_source();
        source.remove("Producer:TestProducer:Topic");
        let err = resolve(&source, "TestProducer", ClientRole::Producer).unwrap_err();
        assert!(matches!(
            err,
            EasyKafkaError::MissingConfiguration { ref key } if key == "Producer:TestProducer:Topic"
        ));
    }

    #[test]
    fn test_resolve_blank_value_counts_as_missing() {
        let source = producer_source().with("Producer:TestProducer:BootstrapServers", "   ");
        let err = resolve(&source, "TestProducer", ClientRole::Producer).unwrap_err();
        assert!(matches!(
            err,
            EasyKafkaError::MissingConfiguration { ref key }
                if key == "Producer:TestProducer:BootstrapServers"
        ));
    }

    #[test]
    fn test_resolve_consumer_group_defaults_to_name() {
        let source = MemoryConfigSource::new()
            .with("Consumer:Audit:Topic", "audit")
            .with("Consumer:Audit:BootstrapServers", "kafka:9092")
            .with("Consumer:Audit:SchemaRegistryUrl", "http://schema-registry:8081");
        let cfg = resolve(&source, "Audit", ClientRole::Consumer).unwrap();
        assert_eq!(cfg.group_id.as_deref(), Some("Audit"));
        assert_eq!(cfg.effective_group_id(), "Audit");
    }

    #[test]
    fn test_resolve_consumer_explicit_group() {
        let source = MemoryConfigSource::new()
            .with("Consumer:Audit:Topic", "audit")
            .with("Consumer:Audit:BootstrapServers", "kafka:9092")
            .with("Consumer:Audit:SchemaRegistryUrl", "http://schema-registry:8081")
            .with("Consumer:Audit:GroupId", "audit-service");
        let cfg = resolve(&source, "Audit", ClientRole::Consumer).unwrap();
        assert_eq!(cfg.group_id.as_deref(), Some("audit-service"));
    }

    #[test]
    fn test_resolve_collects_passthrough_settings() {
        let source = producer_source()
            .with("Producer:TestProducer:acks", "all")
            .with("Producer:TestProducer:message.timeout.ms", "5000")
            .with("Producer:TestProducer:Nested:Key", "skipped")
            .with("Producer:TestProducer:groupid", "skipped");
        let cfg = resolve(&source, "TestProducer", ClientRole::Producer).unwrap();
        assert_eq!(cfg.extra_settings.len(), 2);
        assert_eq!(cfg.extra_settings.get("acks").map(String::as_str), Some("all"));
        assert_eq!(
            cfg.extra_settings.get("message.timeout.ms").map(String::as_str),
            Some("5000")
        );
    }

    #[test]
    fn test_resolve_role_sections_are_separate() {
        let err = resolve(&producer_source(), "TestProducer", ClientRole::Consumer).unwrap_err();
        assert!(matches!(
            err,
            EasyKafkaError::MissingConfiguration { ref key } if key == "Consumer:TestProducer:Topic"
        ));
    }

    #[test]
    fn test_resolve_or_supplied_skips_validation() {
        let supplied = NamedClientConfig::new("Custom", "", "", "");
        let cfg = resolve_or_supplied(
            &MemoryConfigSource::new(),
            "Custom",
            ClientRole::Producer,
            Some(supplied.clone()),
        )
        .unwrap();
        assert_eq!(cfg, supplied);
    }

    #[test]
    fn test_resolve_or_supplied_without_supplied_resolves() {
        let cfg = resolve_or_supplied(
            &producer_source(),
            "TestProducer",
            ClientRole::Producer,
            None,
        )
        .unwrap();
        assert_eq!(cfg.topic, "TestTopic");
    }

    #[test]
    fn test_named_client_config_builder() {
        let cfg = NamedClientConfig::new("Orders", "orders", "kafka:9092", "http://sr:8081")
            .with_group_id("orders-group")
            .with_setting("acks", "all");
        assert_eq!(cfg.effective_group_id(), "orders-group");
        assert_eq!(cfg.extra_settings.get("acks").map(String::as_str), Some("all"));
    }

    #[test]
    fn test_client_role_display() {
        assert_eq!(ClientRole::Producer.to_string(), "Producer");
        assert_eq!(ClientRole::Consumer.to_string(), "Consumer");
    }
}
