//! ホスティング側からサービスの起動と停止を駆動する仕組み。

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{select_all, BoxFuture, FutureExt};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::codec::Payload;
use crate::consumer::{ConsumerService, LifecycleState, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::EasyKafkaError;

/// HostedService はホストが起動・停止を管理するバックグラウンドサービス。
#[async_trait]
pub trait HostedService: Send {
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<(), EasyKafkaError>;

    /// deadline を上限に停止する。
    async fn stop(&mut self, deadline: Duration) -> Result<(), EasyKafkaError>;

    /// 停止要求なしにサービスが終了するまで待ち、その結果を返す。
    ///
    /// 途中でドロップされても状態を壊してはならない。既定では完了しない。
    async fn terminated(&mut self) -> Result<(), EasyKafkaError> {
        std::future::pending().await
    }

    /// 停止が完了しているか返す。false の場合、ホストは次の `stop` で再度停止を試みる。
    fn is_stopped(&self) -> bool {
        true
    }
}

#[async_trait]
impl<V: Payload> HostedService for ConsumerService<V> {
    fn name(&self) -> &str {
        ConsumerService::name(self)
    }

    async fn start(&mut self) -> Result<(), EasyKafkaError> {
        ConsumerService::start(self)
    }

    async fn stop(&mut self, deadline: Duration) -> Result<(), EasyKafkaError> {
        self.stop_within(deadline).await
    }

    async fn terminated(&mut self) -> Result<(), EasyKafkaError> {
        ConsumerService::terminated(self).await
    }

    fn is_stopped(&self) -> bool {
        self.state() == LifecycleState::Stopped
    }
}

/// ServiceHost は登録順にサービスを起動し、逆順に停止する。
pub struct ServiceHost {
    services: Vec<Box<dyn HostedService>>,
    /// 次に起動するサービスの位置
    next: usize,
    /// 起動済みで停止が完了していないサービスの位置（起動順）
    running: Vec<usize>,
    shutdown_timeout: Duration,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            next: 0,
            running: Vec::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// 全サービスの停止で共有する待機上限を設定する。
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn add<S: HostedService + 'static>(&mut self, service: S) -> &mut Self {
        self.services.push(Box::new(service));
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// 停止が完了していないサービスの数を返す。
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// 登録順にサービスを起動する。
    ///
    /// 途中で失敗した場合は起動済みのサービスを逆順に停止してからエラーを返す。
    pub async fn start(&mut self) -> Result<(), EasyKafkaError> {
        while self.next < self.services.len() {
            let index = self.next;
            let service = &mut self.services[index];
            match service.start().await {
                Ok(()) => {
                    info!(service = %service.name(), "hosted service started");
                    self.running.push(index);
                    self.next += 1;
                }
                Err(e) => {
                    error!(service = %service.name(), error = %e, "failed to start hosted service");
                    // ロールバック中の停止エラーはログのみ
                    let _ = self.stop().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 起動済みのサービスを逆順に停止する。待機上限は全サービスで共有する。
    ///
    /// 待機上限までに停止しなかったサービスは起動済みのまま残り、次の `stop` で再度停止する。
    /// 全サービスの停止を試みた後、最初に発生したエラーを返す。
    pub async fn stop(&mut self) -> Result<(), EasyKafkaError> {
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut first_error = None;
        let mut still_running = Vec::new();

        for &index in self.running.iter().rev() {
            let service = &mut self.services[index];
            let remaining = deadline.saturating_duration_since(Instant::now());
            match service.stop(remaining).await {
                Ok(()) if service.is_stopped() => {
                    info!(service = %service.name(), "hosted service stopped");
                }
                Ok(()) => {
                    warn!(service = %service.name(), "hosted service is still stopping");
                    still_running.push(index);
                }
                Err(e) => {
                    error!(service = %service.name(), error = %e, "hosted service failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        still_running.reverse();
        self.running = still_running;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// サービスを起動し、signal の完了またはいずれかのサービスの終了を待ってから停止する。
    ///
    /// サービスがエラーで終了した場合は、残りを停止した後にそのエラーを返す。
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), EasyKafkaError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await?;

        let terminated = tokio::select! {
            () = signal => {
                info!("shutdown signal received");
                None
            }
            (index, result) = first_terminated(&mut self.services, &self.running) => {
                Some((index, result))
            }
        };

        let mut first_error = None;
        if let Some((index, result)) = terminated {
            let name = self.services[index].name();
            match result {
                Ok(()) => warn!(service = %name, "hosted service terminated"),
                Err(e) => {
                    error!(service = %name, error = %e, "hosted service terminated with error");
                    first_error = Some(e);
                }
            }
        }

        let stopped = self.stop().await;
        match first_error {
            Some(e) => Err(e),
            None => stopped,
        }
    }
}

/// running に含まれるサービスのうち最初に終了したものの位置と結果を返す。
async fn first_terminated(
    services: &mut [Box<dyn HostedService>],
    running: &[usize],
) -> (usize, Result<(), EasyKafkaError>) {
    let waiting: Vec<BoxFuture<'_, (usize, Result<(), EasyKafkaError>)>> = services
        .iter_mut()
        .enumerate()
        .filter(|(index, _)| running.contains(index))
        .map(|(index, service)| async move { (index, service.terminated().await) }.boxed())
        .collect();

    if waiting.is_empty() {
        return std::future::pending().await;
    }
    let (terminated, _, _) = select_all(waiting).await;
    terminated
}

/// Ctrl+C または SIGTERM を待つ。`ServiceHost::run_until` に渡す。
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct RecordingService {
        name: String,
        journal: Journal,
        fail_start: bool,
        fail_stop: bool,
        /// 停止が完了するまでに必要な stop 呼び出し回数
        stops_needed: usize,
        terminate_with: Option<String>,
    }

    impl RecordingService {
        fn new(name: &str, journal: &Journal) -> Self {
            Self {
                name: name.to_string(),
                journal: journal.clone(),
                fail_start: false,
                fail_stop: false,
                stops_needed: 1,
                terminate_with: None,
            }
        }
    }

    #[async_trait]
    impl HostedService for RecordingService {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&mut self) -> Result<(), EasyKafkaError> {
            if self.fail_start {
                return Err(EasyKafkaError::UnexpectedProducer {
                    cause: format!("{} cannot start", self.name),
                });
            }
            self.journal.lock().unwrap().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&mut self, _deadline: Duration) -> Result<(), EasyKafkaError> {
            self.journal.lock().unwrap().push(format!("stop:{}", self.name));
            self.stops_needed = self.stops_needed.saturating_sub(1);
            if self.fail_stop {
                return Err(EasyKafkaError::ConsumeProcessing {
                    cause: format!("{} failed", self.name),
                });
            }
            Ok(())
        }

        async fn terminated(&mut self) -> Result<(), EasyKafkaError> {
            match self.terminate_with.take() {
                Some(cause) => Err(EasyKafkaError::ConsumeProcessing { cause }),
                None => std::future::pending().await,
            }
        }

        fn is_stopped(&self) -> bool {
            self.stops_needed == 0
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_start_in_order_stop_in_reverse() {
        let journal = Journal::default();
        let mut host = ServiceHost::new();
        host.add(RecordingService::new("a", &journal))
            .add(RecordingService::new("b", &journal));
        assert_eq!(host.len(), 2);

        host.start().await.unwrap();
        host.stop().await.unwrap();
        assert_eq!(entries(&journal), vec!["start:a", "start:b", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back() {
        let journal = Journal::default();
        let mut failing = RecordingService::new("b", &journal);
        failing.fail_start = true;

        let mut host = ServiceHost::new();
        host.add(RecordingService::new("a", &journal))
            .add(failing)
            .add(RecordingService::new("c", &journal));

        let err = host.start().await.unwrap_err();
        assert!(err.to_string().contains("b cannot start"));
        assert_eq!(entries(&journal), vec!["start:a", "stop:a"]);
    }

    #[tokio::test]
    async fn test_stop_returns_first_error_after_stopping_all() {
        let journal = Journal::default();
        let mut a = RecordingService::new("a", &journal);
        a.fail_stop = true;
        let mut b = RecordingService::new("b", &journal);
        b.fail_stop = true;

        let mut host = ServiceHost::new();
        host.add(a).add(b);
        host.start().await.unwrap();

        let err = host.stop().await.unwrap_err();
        assert!(err.to_string().contains("b failed"));
        assert_eq!(entries(&journal), vec!["start:a", "start:b", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn test_run_until_signal() {
        let journal = Journal::default();
        let mut host = ServiceHost::new().with_shutdown_timeout(Duration::from_secs(1));
        host.add(RecordingService::new("a", &journal));

        host.run_until(async {}).await.unwrap();
        assert_eq!(entries(&journal), vec!["start:a", "stop:a"]);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let journal = Journal::default();
        let mut host = ServiceHost::new();
        host.add(RecordingService::new("a", &journal));

        host.stop().await.unwrap();
        assert!(entries(&journal).is_empty());
    }

    #[tokio::test]
    async fn test_run_until_returns_when_service_terminates() {
        let journal = Journal::default();
        let mut failing = RecordingService::new("b", &journal);
        failing.terminate_with = Some("b crashed".to_string());

        let mut host = ServiceHost::new().with_shutdown_timeout(Duration::from_secs(1));
        host.add(RecordingService::new("a", &journal)).add(failing);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            host.run_until(std::future::pending()),
        )
        .await
        .expect("run_until should return after the service terminated");

        match result {
            Err(EasyKafkaError::ConsumeProcessing { cause }) => assert_eq!(cause, "b crashed"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(entries(&journal), vec!["start:a", "start:b", "stop:b", "stop:a"]);
        assert_eq!(host.running(), 0);
    }

    #[tokio::test]
    async fn test_run_until_without_services_waits_for_signal() {
        let mut host = ServiceHost::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tx.send(()).unwrap();

        host.run_until(async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unfinished_service_stays_running_until_stopped() {
        let journal = Journal::default();
        let mut slow = RecordingService::new("a", &journal);
        slow.stops_needed = 2;

        let mut host = ServiceHost::new();
        host.add(slow).add(RecordingService::new("b", &journal));
        host.start().await.unwrap();
        assert_eq!(host.running(), 2);

        host.stop().await.unwrap();
        assert_eq!(host.running(), 1);

        host.stop().await.unwrap();
        assert_eq!(host.running(), 0);
        assert_eq!(
            entries(&journal),
            vec!["start:a", "start:b", "stop:b", "stop:a", "stop:a"]
        );

        host.stop().await.unwrap();
        assert_eq!(entries(&journal).len(), 5);
    }
}
