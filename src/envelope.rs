/// Envelope は 1 件のメッセージのキーと値をまとめたもの。
///
/// 送信呼び出しごと、または受信レコードごとに作られ、作成した呼び出しが所有する。
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<K, V> {
    /// パーティションキー（None の場合はキーなし）
    pub key: Option<K>,
    pub value: V,
}

impl<K, V> Envelope<K, V> {
    pub fn new(key: Option<K>, value: V) -> Self {
        Self { key, value }
    }

    pub fn keyed(key: K, value: V) -> Self {
        Self {
            key: Some(key),
            value,
        }
    }

    pub fn unkeyed(value: V) -> Self {
        Self { key: None, value }
    }
}

/// DeliveryReceipt はブローカーが送信成功時に返す配信結果。ログ出力にのみ使用する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// RecordMetadata は受信レコードの位置情報を表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// レコードのタイムスタンプ（エポックミリ秒）
    pub timestamp_ms: Option<i64>,
}

/// InboundRecord はトランスポートから受け取ったデコード前のレコード。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub key: Option<String>,
    /// ペイロード（tombstone の場合は None）
    pub payload: Option<Vec<u8>>,
    pub metadata: RecordMetadata,
}

/// PartitionEof はパーティション末尾に到達したことを示す。メッセージではない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEof {
    pub topic: String,
    pub partition: i32,
}

/// ConsumedRecord はコールバックへ渡されるデコード済みレコード。
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord<V> {
    pub key: Option<String>,
    pub value: V,
    pub metadata: RecordMetadata,
}

impl<V> ConsumedRecord<V> {
    pub fn topic(&self) -> &str {
        &self.metadata.topic
    }

    pub fn partition(&self) -> i32 {
        self.metadata.partition
    }

    pub fn offset(&self) -> i64 {
        self.metadata.offset
    }

    /// キーと値を Envelope として取り出す。
    pub fn into_envelope(self) -> Envelope<String, V> {
        Envelope::new(self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_constructors() {
        let keyed = Envelope::keyed("user-1".to_string(), "login".to_string());
        assert_eq!(keyed.key.as_deref(), Some("user-1"));

        let unkeyed: Envelope<String, &str> = Envelope::unkeyed("login");
        assert!(unkeyed.key.is_none());
        assert_eq!(unkeyed.value, "login");
    }

    #[test]
    fn test_consumed_record_accessors() {
        let record = ConsumedRecord {
            key: Some("order-1".to_string()),
            value: "created".to_string(),
            metadata: RecordMetadata {
                topic: "k1s0.service.order.created.v1".to_string(),
                partition: 2,
                offset: 42,
                timestamp_ms: Some(1_700_000_000_000),
            },
        };
        assert_eq!(record.topic(), "k1s0.service.order.created.v1");
        assert_eq!(record.partition(), 2);
        assert_eq!(record.offset(), 42);

        let envelope = record.into_envelope();
        assert_eq!(envelope.key.as_deref(), Some("order-1"));
        assert_eq!(envelope.value, "created");
    }
}
