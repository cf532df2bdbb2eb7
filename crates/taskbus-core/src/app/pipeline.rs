//! ConsumptionPipeline - 受信ループ + worker pool + メッセージの終端判定
//!
//! # 構成
//! ```text
//! transport.receive ──handle──▶ dispatch channel (bounded: concurrency) ──▶ worker × concurrency
//!                                                                            │
//!                                               resolve → settle ◀───────────┘
//! ```
//!
//! - arrival handler は channel に積むだけ（ビジネスロジックを走らせない）
//! - in-flight は channel に積んだ時点で +1、終端処理後に -1（`InFlightGuard` の drop）
//! - session は最初の await より前に登録する（開始直後の停止を取りこぼさない）
//! - 受信ループは session の停止シグナル（の child token）で止まる
//! - ループを抜けたら channel を閉じ、drained を立て、worker を join して戻る
//!
//! # 終端判定
//! | 状態 | 結果 |
//! |------|------|
//! | 空 payload | dead-letter (`empty message data`) |
//! | decode 失敗 | dead-letter (`unmarshal msg data error`) |
//! | 未登録 + `IgnoreWhenTaskNotRegistered` | dead-letter (`task X is not registered`) |
//! | 未登録 | abandon |
//! | processor 成功 | acknowledge |
//! | processor 失敗 | abandon |
//! | processor panic | abandon |

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::lifecycle::{InFlightGuard, Lifecycle, Session};
use crate::app::settle::settle;
use crate::app::BrokerBase;
use crate::codec::MessageCodec;
use crate::config::ConsumerSettings;
use crate::domain::resolution::{REASON_EMPTY_MESSAGE, REASON_UNMARSHAL};
use crate::domain::{BrokerError, Message, Resolution, TransportError};
use crate::ports::{
    Delivery, IdGenerator, MessageHandler, Namespace, QueueHandle, QueueOptions, TaskProcessor,
};

/// channel に積まれた受信メッセージ。guard は終端処理が済むまで持ち回る。
struct Tracked {
    delivery: Box<dyn Delivery>,
    guard: InFlightGuard,
}

type DeliveryRx = Arc<AsyncMutex<mpsc::Receiver<Tracked>>>;

pub struct ConsumptionPipeline {
    base: Arc<BrokerBase>,
    namespace: Arc<dyn Namespace>,
    queue: Arc<dyn QueueHandle>,
    lifecycle: Arc<Lifecycle>,
    ids: Arc<dyn IdGenerator>,
}

impl ConsumptionPipeline {
    /// `queue` は publish 用の handle（concurrency == 1 のときは受信にも使う）
    pub fn new(
        base: Arc<BrokerBase>,
        namespace: Arc<dyn Namespace>,
        queue: Arc<dyn QueueHandle>,
        lifecycle: Arc<Lifecycle>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            base,
            namespace,
            queue,
            lifecycle,
            ids,
        }
    }

    /// 停止されて drain し終わるまで戻らない。戻り値は「再度 consume すべきか」。
    pub async fn start_consuming(
        &self,
        consumer_tag: &str,
        concurrency: usize,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<bool, BrokerError> {
        if concurrency == 0 {
            return Err(BrokerError::InvalidConcurrency(concurrency));
        }

        let (session, stop) =
            self.lifecycle
                .begin(self.ids.generate_session_id(), consumer_tag, concurrency);
        let receiver = match self.receive_handle(concurrency).await {
            Ok(receiver) => receiver,
            Err(e) => {
                error!(session = %session.id(), error = %e, "failed to open receive handle");
                session.mark_drained();
                return Err(e);
            }
        };
        info!(
            session = %session.id(),
            consumer_tag,
            concurrency,
            queue = receiver.name(),
            "starting consumption"
        );

        let (tx, rx) = mpsc::channel(concurrency);
        let rx: DeliveryRx = Arc::new(AsyncMutex::new(rx));
        let dispatch = Arc::new(Dispatch {
            tx: Mutex::new(Some(tx)),
            session: Arc::clone(&session),
        });

        let worker = Arc::new(Worker {
            base: Arc::clone(&self.base),
            processor,
            codec: MessageCodec::new(),
        });
        let workers: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&worker),
                    Arc::clone(&rx),
                    Arc::clone(&session),
                ))
            })
            .collect();

        // 停止シグナルが来たら受信ループの token も cancel される
        let cancel = stop.child_token();
        self.receive_loop(receiver.as_ref(), cancel, dispatch.clone())
            .await;

        dispatch.close();
        session.mark_drained();
        debug!(session = %session.id(), "receive loop exited, dispatch channel closed");

        for join in workers {
            if let Err(e) = join.await {
                error!(session = %session.id(), error = %e, "worker task failed");
            }
        }
        info!(session = %session.id(), "consumption finished");

        Ok(self.base.retry())
    }

    /// concurrency > 1 のときだけ prefetch 付きの受信専用 handle を開く
    async fn receive_handle(&self, concurrency: usize) -> Result<Arc<dyn QueueHandle>, BrokerError> {
        if concurrency == 1 {
            return Ok(Arc::clone(&self.queue));
        }
        let prefetch = u32::try_from(concurrency).unwrap_or(u32::MAX);
        let handle = self
            .namespace
            .open_queue(
                &self.base.config().default_queue,
                QueueOptions::with_prefetch(prefetch),
            )
            .await?;
        Ok(handle)
    }

    async fn receive_loop(
        &self,
        receiver: &dyn QueueHandle,
        cancel: CancellationToken,
        dispatch: Arc<Dispatch>,
    ) {
        let mut backoff = ReceiveBackoff::new(&self.base.config().consumer);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let handler: Arc<dyn MessageHandler> = dispatch.clone();
            match receiver.receive(cancel.clone(), handler).await {
                Ok(()) => break,
                Err(e) => {
                    error!(queue = receiver.name(), error = %e, "error when receiving messages");
                    if cancel.is_cancelled() {
                        break;
                    }
                    match backoff.next_delay() {
                        Some(delay) => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::task::yield_now().await,
                    }
                }
            }
        }
    }
}

/// arrival handler: dispatch channel に積むだけ
struct Dispatch {
    tx: Mutex<Option<mpsc::Sender<Tracked>>>,
    session: Arc<Session>,
}

impl Dispatch {
    fn close(&self) {
        self.tx.lock().take();
    }
}

#[async_trait]
impl MessageHandler for Dispatch {
    async fn handle(&self, delivery: Box<dyn Delivery>) -> Result<(), TransportError> {
        let tx = self.tx.lock().clone();
        let tracked = Tracked {
            delivery,
            guard: self.session.track(),
        };

        let result = match tx {
            Some(tx) => tx.send(tracked).await.map_err(|mpsc::error::SendError(t)| t),
            None => Err(tracked),
        };

        // worker がいないので受け取った分はここで返す
        if let Err(Tracked { delivery, guard }) = result {
            warn!(
                session = %self.session.id(),
                message_id = %delivery.message().id,
                "dispatch channel closed, abandoning message"
            );
            let _ = settle(delivery, &Resolution::Abandon).await;
            drop(guard);
            return Err(TransportError::Receive("dispatch channel closed".to_string()));
        }
        Ok(())
    }
}

async fn worker_loop(worker_id: usize, worker: Arc<Worker>, rx: DeliveryRx, session: Arc<Session>) {
    loop {
        // lock は recv の間だけ（処理中は他の worker が受け取れる）
        let next = rx.lock().await.recv().await;
        let Some(Tracked { delivery, guard }) = next else {
            break;
        };
        worker.consume_one(delivery).await;
        drop(guard);
    }
    debug!(worker_id, session = %session.id(), "worker drained");
}

/// 1 session 分の処理コンテキスト（worker 間で共有）
struct Worker {
    base: Arc<BrokerBase>,
    processor: Arc<dyn TaskProcessor>,
    codec: MessageCodec,
}

impl Worker {
    async fn consume_one(&self, delivery: Box<dyn Delivery>) {
        let resolution = self.resolve(delivery.message()).await;
        // 失敗は settle 側でログ済み。lock が切れれば transport が再配送する。
        let _ = settle(delivery, &resolution).await;
    }

    async fn resolve(&self, message: &Message) -> Resolution {
        if message.is_empty() {
            error!(message_id = %message.id, "received an empty message");
            return Resolution::dead_letter(REASON_EMPTY_MESSAGE);
        }

        let signature = match self.codec.decode(&message.data) {
            Ok(signature) => signature,
            Err(e) => {
                error!(message_id = %message.id, error = %e, "failed to decode message");
                return Resolution::dead_letter(REASON_UNMARSHAL);
            }
        };

        if !self.base.is_task_registered(&signature.name) {
            if signature.ignore_when_task_not_registered {
                error!(task_name = %signature.name, task_uuid = %signature.uuid, "task not registered, dead-lettering");
                return Resolution::task_not_registered(&signature.name);
            }
            error!(task_name = %signature.name, task_uuid = %signature.uuid, "task not registered, abandoning");
            return Resolution::Abandon;
        }

        let outcome = AssertUnwindSafe(self.processor.process(&signature))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => Resolution::Acknowledge,
            Ok(Err(e)) => {
                error!(
                    task_name = %signature.name,
                    task_uuid = %signature.uuid,
                    error = %e,
                    "task processing failed"
                );
                Resolution::Abandon
            }
            Err(panic) => {
                error!(
                    task_name = %signature.name,
                    task_uuid = %signature.uuid,
                    panic = panic_message(panic.as_ref()),
                    "task processor panicked"
                );
                Resolution::Abandon
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// 受信エラー後の待ち時間（0 ms 設定なら待たない）
struct ReceiveBackoff {
    next: Duration,
    max: Duration,
}

impl ReceiveBackoff {
    fn new(settings: &ConsumerSettings) -> Self {
        Self {
            next: Duration::from_millis(settings.receive_retry_backoff_ms),
            max: Duration::from_millis(settings.max_receive_retry_backoff_ms),
        }
    }

    fn next_delay(&mut self) -> Option<Duration> {
        if self.next.is_zero() {
            return None;
        }
        let delay = self.next.min(self.max);
        self.next = (self.next * 2).min(self.max);
        Some(delay)
    }
}
