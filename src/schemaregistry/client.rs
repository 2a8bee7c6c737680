use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

use super::{
    config::SchemaRegistryConfig,
    error::SchemaRegistryError,
    schema::{
        parse_schema_type, RegisterSchemaRequest, RegisterSchemaResponse, RegisteredSchema,
        SchemaByIdResponse, SchemaType,
    },
};

/// Schema Registry クライアントのインターフェース。
///
/// コーデックが必要とするスキーマ登録と ID 解決を提供する。
/// `mock` feature を有効にすると `MockSchemaRegistryClient` が生成される。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait SchemaRegistryClient: Send + Sync {
    /// スキーマをサブジェクトに登録し、スキーマ ID を返す。
    ///
    /// 同一スキーマが既に存在する場合は既存の ID を返す。
    async fn register_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
    ) -> Result<i32, SchemaRegistryError>;

    /// グローバルスキーマ ID でスキーマを取得する。
    async fn get_schema_by_id(&self, schema_id: i32)
        -> Result<RegisteredSchema, SchemaRegistryError>;
}

/// HTTP 経由で Confluent Schema Registry と通信する実装。
pub struct HttpSchemaRegistryClient {
    config: SchemaRegistryConfig,
    http_client: reqwest::Client,
}

impl HttpSchemaRegistryClient {
    /// 設定から HTTP クライアントを構築する。タイムアウトは `config.timeout_secs`。
    pub fn new(config: SchemaRegistryConfig) -> Result<Self, SchemaRegistryError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SchemaRegistryError::Unavailable(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Schema Registry のベース URL を返す（末尾スラッシュなし）。
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn register_url(&self, subject: &str) -> String {
        format!("{}/subjects/{}/versions", self.base_url(), subject)
    }

    fn schema_by_id_url(&self, schema_id: i32) -> String {
        format!("{}/schemas/ids/{}", self.base_url(), schema_id)
    }

    /// HTTP ステータスを検査する。404 は SchemaNotFound、それ以外の失敗は Rejected。
    async fn check_response(
        response: reqwest::Response,
        subject: &str,
    ) -> Result<reqwest::Response, SchemaRegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaRegistryError::SchemaNotFound(subject.to_string()));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        error!(status = %status, body = %body, "schema registry returned error");
        Err(SchemaRegistryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SchemaRegistryClient for HttpSchemaRegistryClient {
    async fn register_schema(
        &self,
        subject: &str,
        schema: &str,
        schema_type: SchemaType,
    ) -> Result<i32, SchemaRegistryError> {
        let body = RegisterSchemaRequest {
            schema,
            schema_type: schema_type.as_str(),
        };

        debug!(subject = %subject, schema_type = %schema_type, "registering schema");

        let response = self
            .http_client
            .post(self.register_url(subject))
            .json(&body)
            .send()
            .await?;

        let response = Self::check_response(response, subject).await?;
        let reg: RegisterSchemaResponse = response.json().await?;

        debug!(subject = %subject, schema_id = reg.id, "schema registered");
        Ok(reg.id)
    }

    async fn get_schema_by_id(
        &self,
        schema_id: i32,
    ) -> Result<RegisteredSchema, SchemaRegistryError> {
        debug!(schema_id, "fetching schema by id");

        let response = self
            .http_client
            .get(self.schema_by_id_url(schema_id))
            .send()
            .await?;
        let response = Self::check_response(response, &format!("id:{schema_id}")).await?;
        let data: SchemaByIdResponse = response.json().await?;

        Ok(RegisteredSchema {
            id: schema_id,
            subject: String::new(),
            schema: data.schema,
            schema_type: parse_schema_type(&data.schema_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> HttpSchemaRegistryClient {
        HttpSchemaRegistryClient::new(SchemaRegistryConfig::new(url)).unwrap()
    }

    #[test]
    fn test_base_url_strips_trailing_slash() {
        assert_eq!(
            client("http://schema-registry:8081/").base_url(),
            "http://schema-registry:8081"
        );
    }

    #[test]
    fn test_register_url() {
        assert_eq!(
            client("http://localhost:8081").register_url("orders-value"),
            "http://localhost:8081/subjects/orders-value/versions"
        );
    }

    #[test]
    fn test_schema_by_id_url() {
        assert_eq!(
            client("http://localhost:8081/").schema_by_id_url(42),
            "http://localhost:8081/schemas/ids/42"
        );
    }

    #[tokio::test]
    async fn test_mock_register_schema() {
        use mockall::predicate::*;

        let mut mock = MockSchemaRegistryClient::new();
        mock.expect_register_schema()
            .with(eq("orders-value"), always(), eq(SchemaType::Json))
            .times(1)
            .returning(|_, _, _| Ok(99));

        let id = mock
            .register_schema("orders-value", r#"{"type":"object"}"#, SchemaType::Json)
            .await
            .unwrap();
        assert_eq!(id, 99);
    }
}
