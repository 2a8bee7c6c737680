use crate::consumer::LifecycleState;
use crate::schemaregistry::SchemaRegistryError;

/// EasyKafkaError はプロデューサー・コンシューマーサービスの操作に関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum EasyKafkaError {
    /// 必須の設定キーが存在しない、または空である。
    #[error("missing configuration: {key}")]
    MissingConfiguration { key: String },

    /// ブローカーまたはシリアライザがメッセージ送信を拒否した。呼び出し側で再送を判断する。
    #[error("failed to send message to topic {topic}: {cause}")]
    SendFailed { topic: String, cause: String },

    /// 送信時の想定外のエラー。このライブラリ内では再送しない。
    #[error("unexpected producer error: {cause}")]
    UnexpectedProducer { cause: String },

    /// コンシューマーのバックグラウンドタスクを終了させたレコード処理エラー。
    #[error("consume processing error: {cause}")]
    ConsumeProcessing { cause: String },

    #[error("invalid lifecycle transition: cannot {operation} while {state}")]
    InvalidLifecycle {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Tokio ランタイムの外からバックグラウンドタスクを起動しようとした。
    #[error("tokio runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("producer {name} has been disposed")]
    Disposed { name: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Schema Registry クライアントの構築に失敗した。
    #[error("schema registry error: {0}")]
    SchemaRegistry(#[from] SchemaRegistryError),

    #[error("failed to read file: {0}")]
    ReadFile(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
}

/// TransportError はブローカートランスポート（rdkafka 等）から報告されるエラーを表す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("consume error: {0}")]
    Consume(String),

    #[error("commit error: {0}")]
    Commit(String),

    #[error("transport closed")]
    Closed,

    #[error("unexpected transport error: {0}")]
    Unexpected(String),
}

impl TransportError {
    /// ブローカー側の送信失敗として呼び出し元へ SendFailed で返すべきエラーか判定する。
    pub fn is_send_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Delivery(_) | TransportError::Connection(_) | TransportError::Closed
        )
    }
}

/// CodecError はペイロードのエンコード・デコードに関するエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid wire format: {0}")]
    InvalidFraming(String),

    #[error("schema registry error: {0}")]
    Registry(#[from] SchemaRegistryError),
}
