//! ServiceBusBroker - Publisher / ConsumptionPipeline / Lifecycle を 1 つの Broker にまとめる
//!
//! # Fail-fast 設計
//! `BrokerBuilder::build()` の時点で
//! - config の検証
//! - namespace が渡されているか
//! - queue が存在するか（`QueueLookup`）
//! - publish 用 handle が開けるか
//!
//! を確認します。どれかに失敗したら `BrokerError` を返し、作りかけの broker は返しません。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::app::{BrokerBase, ConsumptionPipeline, Lifecycle, Publisher};
use crate::config::BrokerConfig;
use crate::domain::{BrokerError, BuildError, Signature};
use crate::ports::{
    Clock, IdGenerator, Namespace, QueueLookup, QueueOptions, SystemClock, TaskProcessor,
    UlidGenerator,
};

/// ホスト側 task フレームワークから見た broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// 停止されて drain し終わるまで戻らない。`Ok(true)` なら呼び出し側は再接続してよい。
    async fn start_consuming(
        &self,
        consumer_tag: &str,
        concurrency: usize,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<bool, BrokerError>;

    /// 停止シグナルを送り、処理中のメッセージが全部終端するまで待つ
    async fn stop_consuming(&self);

    async fn publish(&self, signature: Signature) -> Result<(), BrokerError>;

    fn set_registered_task_names(&self, names: Vec<String>);

    fn is_task_registered(&self, name: &str) -> bool;

    fn retry(&self) -> bool;
}

pub struct ServiceBusBroker {
    base: Arc<BrokerBase>,
    publisher: Publisher,
    pipeline: ConsumptionPipeline,
    lifecycle: Arc<Lifecycle>,
}

impl ServiceBusBroker {
    /// デフォルトの clock / id generator で接続
    pub async fn connect(
        config: BrokerConfig,
        namespace: Arc<dyn Namespace>,
    ) -> Result<Self, BrokerError> {
        BrokerBuilder::new(config).namespace(namespace).build().await
    }
}

#[async_trait]
impl Broker for ServiceBusBroker {
    async fn start_consuming(
        &self,
        consumer_tag: &str,
        concurrency: usize,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<bool, BrokerError> {
        self.pipeline
            .start_consuming(consumer_tag, concurrency, processor)
            .await
    }

    async fn stop_consuming(&self) {
        self.lifecycle.stop().await;
    }

    async fn publish(&self, signature: Signature) -> Result<(), BrokerError> {
        self.publisher.publish(signature).await
    }

    fn set_registered_task_names(&self, names: Vec<String>) {
        self.base.set_registered_task_names(names);
    }

    fn is_task_registered(&self, name: &str) -> bool {
        self.base.is_task_registered(name)
    }

    fn retry(&self) -> bool {
        self.base.retry()
    }
}

/// BrokerBuilder は ServiceBusBroker を構築
///
/// # 使用例
/// ```ignore
/// let broker = BrokerBuilder::new(config)
///     .namespace(namespace)
///     .registered_tasks(registry.registered_names())
///     .build()
///     .await?;
/// ```
pub struct BrokerBuilder {
    config: BrokerConfig,
    namespace: Option<Arc<dyn Namespace>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    registered: Vec<String>,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            namespace: None,
            clock: None,
            ids: None,
            registered: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: Arc<dyn Namespace>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// ETA 判定に使う clock（省略時は SystemClock）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// session id の生成器（省略時は clock を使う UlidGenerator）
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn registered_tasks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registered = names.into_iter().map(Into::into).collect();
        self
    }

    pub async fn build(self) -> Result<ServiceBusBroker, BrokerError> {
        self.config.validate()?;
        let namespace = self.namespace.ok_or(BuildError::MissingNamespace)?;
        let queue_name = self.config.default_queue.clone();

        match namespace.get_queue(&queue_name).await {
            QueueLookup::Found => {}
            QueueLookup::NotFound => {
                error!(queue = %queue_name, "queue does not exist");
                return Err(BrokerError::QueueNotFound(queue_name));
            }
            QueueLookup::Failed(e) => {
                error!(queue = %queue_name, error = %e, "failed to look up queue");
                return Err(e.into());
            }
        }
        let queue = namespace
            .open_queue(&queue_name, QueueOptions::default())
            .await?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let base = Arc::new(BrokerBase::new(self.config));
        base.set_registered_task_names(self.registered);
        let lifecycle = Arc::new(Lifecycle::new(Arc::clone(&base)));
        let publisher = Publisher::new(Arc::clone(&base), Arc::clone(&queue), clock);
        let pipeline = ConsumptionPipeline::new(
            Arc::clone(&base),
            namespace,
            queue,
            Arc::clone(&lifecycle),
            ids,
        );

        info!(queue = %queue_name, "broker ready");
        Ok(ServiceBusBroker {
            base,
            publisher,
            pipeline,
            lifecycle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResolutionKind, TransportError};
    use crate::impls::InMemoryNamespace;
    use crate::ports::FixedClock;
    use crate::typed::handler::fixtures::AddHandler;
    use crate::typed::task::fixtures::AddTask;
    use crate::typed::{Task, TypedRegistry};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn config() -> BrokerConfig {
        BrokerConfig::default().with_default_queue("orders")
    }

    #[tokio::test]
    async fn build_without_namespace_fails() {
        let result = BrokerBuilder::new(config()).build().await;
        assert!(matches!(
            result,
            Err(BrokerError::Build(BuildError::MissingNamespace))
        ));
    }

    #[tokio::test]
    async fn build_with_empty_queue_name_fails() {
        let ns = Arc::new(InMemoryNamespace::new());
        let result = BrokerBuilder::new(BrokerConfig::default().with_default_queue(""))
            .namespace(ns)
            .build()
            .await;
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }

    #[tokio::test]
    async fn missing_queue_is_a_setup_error() {
        let ns = Arc::new(InMemoryNamespace::new());
        let result = ServiceBusBroker::connect(config(), ns.clone()).await;

        assert!(matches!(result, Err(BrokerError::QueueNotFound(q)) if q == "orders"));
        assert!(ns.opened_handles().is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_is_a_transport_error() {
        let ns = Arc::new(InMemoryNamespace::new());
        ns.create_queue("orders");
        ns.fail_lookups(TransportError::Lookup("unauthorized".to_string()));

        let result = ServiceBusBroker::connect(config(), ns).await;
        assert!(matches!(
            result,
            Err(BrokerError::Transport(TransportError::Lookup(_)))
        ));
    }

    #[tokio::test]
    async fn build_opens_the_publish_handle_and_registers_tasks() {
        let ns = Arc::new(InMemoryNamespace::new());
        ns.create_queue("orders");

        let broker = BrokerBuilder::new(config())
            .namespace(ns.clone())
            .registered_tasks(["add"])
            .build()
            .await
            .unwrap();

        assert_eq!(
            ns.opened_handles(),
            vec![("orders".to_string(), QueueOptions::default())]
        );
        assert!(broker.is_task_registered("add"));
        assert!(!broker.is_task_registered("shout"));
        assert!(broker.retry());
    }

    #[tokio::test]
    async fn publish_uses_the_supplied_clock_for_eta() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let ns = Arc::new(InMemoryNamespace::new().with_clock(clock.clone()));
        let queue = ns.create_queue("orders");

        let broker = BrokerBuilder::new(config())
            .namespace(ns)
            .clock(clock)
            .build()
            .await
            .unwrap();
        broker
            .publish(Signature::new("add", vec![]).with_eta(now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(queue.scheduled_count(), 1);
        assert_eq!(queue.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publish_consume_and_stop() {
        let ns = Arc::new(InMemoryNamespace::new());
        let queue = ns.create_queue("orders");

        let handler = AddHandler::default();
        let mut registry = TypedRegistry::new();
        registry.register::<AddTask, _>(handler.clone()).unwrap();

        let broker = Arc::new(
            BrokerBuilder::new(config())
                .namespace(ns)
                .registered_tasks(registry.registered_names())
                .build()
                .await
                .unwrap(),
        );

        for (a, b) in [(1, 2), (3, 4), (5, 6)] {
            broker
                .publish(AddTask { a, b }.to_signature().unwrap())
                .await
                .unwrap();
        }

        let consuming = tokio::spawn({
            let broker = broker.clone();
            async move { broker.start_consuming("worker-1", 2, Arc::new(registry)).await }
        });
        tokio::time::timeout(std::time::Duration::from_secs(5), queue.wait_for_settlements(3))
            .await
            .unwrap();
        broker.stop_consuming().await;

        assert!(!consuming.await.unwrap().unwrap());
        assert!(!broker.retry());
        assert_eq!(handler.total.load(Ordering::SeqCst), 21);
        assert_eq!(queue.settlement_count(ResolutionKind::Acknowledge), 3);
        assert!(queue.is_idle());
    }
}
