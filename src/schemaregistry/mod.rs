//! Confluent Schema Registry クライアント。
//!
//! スキーマ形式のペイロードを扱うコーデックが、スキーマの登録と ID 解決に使用する。
//! HTTP 実装の前段にキャッシュ層を置き、同一スキーマの問い合わせを 1 回に抑える。

pub mod cached;
pub mod client;
pub mod config;
pub mod error;
pub mod schema;

pub use cached::CachedSchemaRegistryClient;
pub use client::{HttpSchemaRegistryClient, SchemaRegistryClient};
pub use config::SchemaRegistryConfig;
pub use error::SchemaRegistryError;
pub use schema::{RegisteredSchema, SchemaType};

#[cfg(any(test, feature = "mock"))]
pub use client::MockSchemaRegistryClient;
