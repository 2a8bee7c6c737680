use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{Codec, Payload};
use crate::config::{resolve, ClientRole, NamedClientConfig};
use crate::envelope::{ConsumedRecord, InboundRecord};
use crate::error::EasyKafkaError;
use crate::schemaregistry::SchemaRegistryConfig;
use crate::source::ConfigSource;
use crate::transport::{ConsumerTransport, PollOutcome, TransportFactory};

/// レコード処理後、次のポーリングまでの待機時間。
pub const DEFAULT_POLL_PAUSE: Duration = Duration::from_millis(100);
/// `stop()` がバックグラウンドタスクの終了を待つ既定の上限。
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// RecordHandler は受信レコードごとに同期的に呼び出されるコールバック。
pub type RecordHandler<V> = Arc<dyn Fn(ConsumedRecord<V>) + Send + Sync>;

/// LifecycleState はコンシューマーのライフサイクル状態を表す。
///
/// `Created → Started → StopRequested → Stopped` の順にのみ遷移し、`Stopped` は終端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    StopRequested,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Created => "Created",
            LifecycleState::Started => "Started",
            LifecycleState::StopRequested => "StopRequested",
            LifecycleState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// ConsumerService は 1 つのトピック / グループに束縛された名前付きコンシューマー。
///
/// `start()` でバックグラウンドのポーリングタスクを起動し、`stop()` で協調的に停止する。
/// ドロップ時はキャンセルを通知するが、タスクの終了は待たない。
pub struct ConsumerService<V: Payload> {
    config: NamedClientConfig,
    transport: Arc<dyn ConsumerTransport>,
    codec: Codec<V>,
    handler: RecordHandler<V>,
    state: LifecycleState,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), EasyKafkaError>>>,
    poll_pause: Duration,
    shutdown_timeout: Duration,
}

impl<V: Payload> ConsumerService<V> {
    /// 設定ソースから `Consumer:<name>:*` を解決してコンシューマーを生成する。
    pub fn new<F>(
        source: &dyn ConfigSource,
        name: &str,
        factory: &dyn TransportFactory,
        handler: F,
    ) -> Result<Self, EasyKafkaError>
    where
        F: Fn(ConsumedRecord<V>) + Send + Sync + 'static,
    {
        let config = resolve(source, name, ClientRole::Consumer)?;
        Self::with_config(config, factory, handler)
    }

    /// 解決済みの設定を検証せずに使用してコンシューマーを生成する。
    pub fn with_config<F>(
        config: NamedClientConfig,
        factory: &dyn TransportFactory,
        handler: F,
    ) -> Result<Self, EasyKafkaError>
    where
        F: Fn(ConsumedRecord<V>) + Send + Sync + 'static,
    {
        let codec = V::select_codec(&SchemaRegistryConfig::from_client(&config))?;
        let transport = factory.consumer(&config)?;
        Ok(Self::from_parts(config, transport, codec, handler))
    }

    pub fn from_parts<F>(
        config: NamedClientConfig,
        transport: Arc<dyn ConsumerTransport>,
        codec: Codec<V>,
        handler: F,
    ) -> Self
    where
        F: Fn(ConsumedRecord<V>) + Send + Sync + 'static,
    {
        info!(
            consumer = %config.name,
            topic = %config.topic,
            group = %config.effective_group_id(),
            codec = ?codec.kind(),
            "kafka consumer created"
        );
        Self {
            config,
            transport,
            codec,
            handler: Arc::new(handler),
            state: LifecycleState::Created,
            cancel: CancellationToken::new(),
            task: None,
            poll_pause: DEFAULT_POLL_PAUSE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// レコード処理後の待機時間を設定する。
    pub fn with_poll_pause(mut self, pause: Duration) -> Self {
        self.poll_pause = pause;
        self
    }

    /// `stop()` の既定の待機上限を設定する。
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn group_id(&self) -> &str {
        self.config.effective_group_id()
    }

    pub fn config(&self) -> &NamedClientConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// バックグラウンドタスクが終了しているか返す。起動前は false。
    pub fn is_finished(&self) -> bool {
        match &self.task {
            Some(handle) => handle.is_finished(),
            None => self.state == LifecycleState::Stopped,
        }
    }

    /// トピックを購読し、バックグラウンドのポーリングタスクを起動する。
    ///
    /// 最初のレコードを待たずに戻る。`Created` 以外の状態では `InvalidLifecycle`、
    /// Tokio ランタイムの外から呼んだ場合は `RuntimeUnavailable` を返す。
    pub fn start(&mut self) -> Result<(), EasyKafkaError> {
        if self.state != LifecycleState::Created {
            return Err(EasyKafkaError::InvalidLifecycle {
                operation: "start",
                state: self.state,
            });
        }
        let runtime = Handle::try_current()
            .map_err(|e| EasyKafkaError::RuntimeUnavailable(e.to_string()))?;

        self.transport.subscribe(&self.config.topic)?;
        info!(
            consumer = %self.config.name,
            topic = %self.config.topic,
            group = %self.config.effective_group_id(),
            "subscribed to topic"
        );

        let worker = PollLoop {
            name: self.config.name.clone(),
            transport: Arc::clone(&self.transport),
            codec: self.codec.clone(),
            handler: Arc::clone(&self.handler),
            cancel: self.cancel.clone(),
            poll_pause: self.poll_pause,
        };
        self.task = Some(runtime.spawn(worker.run()));
        self.state = LifecycleState::Started;
        Ok(())
    }

    /// 既定の待機上限で停止する。
    pub async fn stop(&mut self) -> Result<(), EasyKafkaError> {
        self.stop_within(self.shutdown_timeout).await
    }

    /// キャンセルを通知し、バックグラウンドタスクの終了を deadline まで待つ。
    ///
    /// deadline を過ぎた場合はタスクを破棄せずに `Ok` を返し、状態は `StopRequested` のまま。
    /// タスクがエラーで終了していた場合はそのエラーを返す。`Stopped` で呼んだ場合は何もしない。
    pub async fn stop_within(&mut self, deadline: Duration) -> Result<(), EasyKafkaError> {
        match self.state {
            LifecycleState::Created => {
                return Err(EasyKafkaError::InvalidLifecycle {
                    operation: "stop",
                    state: self.state,
                })
            }
            LifecycleState::Stopped => return Ok(()),
            LifecycleState::Started | LifecycleState::StopRequested => {}
        }

        self.state = LifecycleState::StopRequested;
        self.cancel.cancel();
        debug!(consumer = %self.config.name, "stop requested");

        let joined = match self.task.as_mut() {
            Some(handle) => match tokio::time::timeout(deadline, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        consumer = %self.config.name,
                        deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                        "consumer task did not finish before the shutdown deadline"
                    );
                    return Ok(());
                }
            },
            None => Ok(Ok(())),
        };
        self.finish(joined).await
    }

    /// バックグラウンドタスクが停止要求なしに終了するまで待ち、その結果を返す。
    ///
    /// タスクがない場合（起動前・停止後）は完了しない。
    /// 途中でドロップしても状態は変わらないため、`select!` で他の future と競合させてよい。
    pub async fn terminated(&mut self) -> Result<(), EasyKafkaError> {
        let Some(handle) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        warn!(consumer = %self.config.name, "consumer task terminated without a stop request");
        self.finish(joined).await
    }

    /// 終了したタスクの結果を受け取り、`Stopped` へ遷移してクライアントを解放する。
    async fn finish(
        &mut self,
        joined: Result<Result<(), EasyKafkaError>, JoinError>,
    ) -> Result<(), EasyKafkaError> {
        self.task = None;
        self.state = LifecycleState::Stopped;
        self.cancel.cancel();
        self.transport.close();
        info!(consumer = %self.config.name, "consumer stopped");
        self.codec.close().await;

        match joined {
            Ok(result) => result,
            Err(join_error) => Err(EasyKafkaError::ConsumeProcessing {
                cause: join_error.to_string(),
            }),
        }
    }
}

#[cfg(feature = "kafka")]
impl<V: Payload> ConsumerService<V> {
    /// rdkafka トランスポートでコンシューマーを生成する。
    pub fn connect<F>(
        source: &dyn ConfigSource,
        name: &str,
        handler: F,
    ) -> Result<Self, EasyKafkaError>
    where
        F: Fn(ConsumedRecord<V>) + Send + Sync + 'static,
    {
        Self::new(
            source,
            name,
            &crate::kafka_transport::KafkaTransportFactory,
            handler,
        )
    }
}

impl<V: Payload> Drop for ConsumerService<V> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// PollLoop はバックグラウンドタスクが所有するポーリングループの状態。
struct PollLoop<V> {
    name: String,
    transport: Arc<dyn ConsumerTransport>,
    codec: Codec<V>,
    handler: RecordHandler<V>,
    cancel: CancellationToken,
    poll_pause: Duration,
}

impl<V: Payload> PollLoop<V> {
    async fn run(self) -> Result<(), EasyKafkaError> {
        info!(consumer = %self.name, "starting consumer loop");

        while !self.cancel.is_cancelled() {
            debug!(consumer = %self.name, "waiting for messages");

            let outcome = match self.transport.poll(&self.cancel).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fatal(e.to_string())),
            };

            match outcome {
                PollOutcome::Cancelled => break,
                PollOutcome::EndOfPartition(eof) => {
                    info!(
                        consumer = %self.name,
                        topic = %eof.topic,
                        partition = eof.partition,
                        "reached end of partition"
                    );
                }
                PollOutcome::Record(record) => {
                    self.process(record).await?;

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_pause) => {}
                    }
                }
            }
        }

        info!(consumer = %self.name, "consumer loop stopped");
        Ok(())
    }

    /// 1 件のレコードをデコードしてコールバックに渡し、完了後にオフセットをコミットする。
    async fn process(&self, record: InboundRecord) -> Result<(), EasyKafkaError> {
        let metadata = record.metadata;
        info!(
            consumer = %self.name,
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "consumed message"
        );

        let payload = record.payload.unwrap_or_default();
        let value = self
            .codec
            .decode(&metadata.topic, &payload)
            .await
            .map_err(|e| self.fatal(e.to_string()))?;

        let consumed = ConsumedRecord {
            key: record.key,
            value,
            metadata: metadata.clone(),
        };
        // 同期コールバックはブロッキングプールで実行する
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler(consumed))
            .await
            .map_err(|e| self.fatal(handler_failure(e)))?;

        self.transport
            .commit(&metadata)
            .await
            .map_err(|e| self.fatal(e.to_string()))
    }

    fn fatal(&self, cause: String) -> EasyKafkaError {
        error!(
            consumer = %self.name,
            error = %cause,
            "exception occurred while consuming messages"
        );
        EasyKafkaError::ConsumeProcessing { cause }
    }
}

fn handler_failure(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("record handler did not complete: {error}");
    }
    let panic = error.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("record handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("record handler panicked: {s}")
    } else {
        "record handler panicked".to_string()
    }
}
