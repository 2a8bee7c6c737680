//! ブローカートランスポートとの境界。
//!
//! 接続管理・パーティション割り当て・配信確認はトランスポート側の責務で、
//! サービスはここで定義するトレイト越しにのみ利用する。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::NamedClientConfig;
use crate::envelope::{DeliveryReceipt, Envelope, InboundRecord, PartitionEof, RecordMetadata};
use crate::error::TransportError;

/// PollOutcome は 1 回のポーリング結果を表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// レコードを受信した
    Record(InboundRecord),
    /// パーティション末尾に到達した（コールバックは呼ばない）
    EndOfPartition(PartitionEof),
    /// キャンセルにより待機を中断した
    Cancelled,
}

/// ProducerTransport はエンコード済みメッセージをブローカーへ送信するインターフェース。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ProducerTransport: Send + Sync {
    /// メッセージを送信し、ブローカーの確認応答（成功 / 失敗）まで待機する。
    async fn send(
        &self,
        topic: &str,
        envelope: Envelope<String, Vec<u8>>,
    ) -> Result<DeliveryReceipt, TransportError>;

    /// 未送信メッセージをフラッシュし、クライアントを解放する。
    async fn close(&self);
}

/// ConsumerTransport はブローカーからレコードを受信するインターフェース。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    /// トピックを購読する。
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// 次のレコードを待機する。cancel が発火した場合は速やかに `Cancelled` を返す。
    async fn poll(&self, cancel: &CancellationToken) -> Result<PollOutcome, TransportError>;

    /// 処理済みレコードのオフセットをコミットする。
    async fn commit(&self, metadata: &RecordMetadata) -> Result<(), TransportError>;

    /// 購読を解除し、クライアントを解放する。
    fn close(&self);
}

/// TransportFactory は解決済み設定からトランスポートクライアントを生成する。
pub trait TransportFactory: Send + Sync {
    fn producer(
        &self,
        config: &NamedClientConfig,
    ) -> Result<Arc<dyn ProducerTransport>, TransportError>;

    fn consumer(
        &self,
        config: &NamedClientConfig,
    ) -> Result<Arc<dyn ConsumerTransport>, TransportError>;
}
