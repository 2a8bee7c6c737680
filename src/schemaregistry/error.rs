/// SchemaRegistryError は Schema Registry との通信で発生するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum SchemaRegistryError {
    #[error("schema registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 404 応答。subject またはスキーマ ID の表記を持つ。
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// 404 以外の失敗ステータス。
    #[error("schema registry rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// クライアントを構築できない、または Registry に到達できない。
    #[error("schema registry unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_not_found_display() {
        let err = SchemaRegistryError::SchemaNotFound("id:42".to_string());
        assert_eq!(err.to_string(), "schema not found: id:42");
    }

    #[test]
    fn test_rejected_display_includes_status_and_body() {
        let err = SchemaRegistryError::Rejected {
            status: 422,
            body: "incompatible schema".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("422"));
        assert!(msg.contains("incompatible schema"));
    }
}
