//! InMemoryNamespace - 開発・テスト用の message bus
//!
//! # 再現している transport の挙動
//! - scheduled delivery（`scheduled_enqueue_time` まで配送しない）
//! - delivery ごとの lock token と delivery count
//! - abandon → 再配送、`max_delivery_count` を超えたら自動で dead-letter
//! - dead-letter sink（reason 付き）
//! - prefetch 付き handle の生成記録
//!
//! # テスト用の仕掛け
//! - settlement log（どのメッセージがどう終端したか）
//! - receive / send の失敗注入
//! - `wait_for_settlements(n)` で n 件の終端を待てる

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{LockToken, Message, Resolution, ResolutionKind, SettlementError, TransportError};
use crate::ports::{
    Clock, Delivery, IdGenerator, MessageHandler, Namespace, QueueHandle, QueueLookup,
    QueueOptions, SystemClock, UlidGenerator,
};

pub const REASON_MAX_DELIVERY_COUNT: &str = "MaxDeliveryCountExceeded";

/// scheduled queue を見直す最大間隔（FixedClock を進めた場合もこの間隔で拾う）
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// dead-letter sink に入ったメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message: Message,
    pub reason: String,
}

/// 終端処理 1 件の記録
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRecord {
    pub message_id: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone)]
struct Stored {
    message: Message,
    sequence_number: i64,
}

/// Scheduled message entry for the min-heap (earliest first, then send order).
#[derive(Debug, Clone)]
struct Scheduled {
    at: DateTime<Utc>,
    stored: Stored,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.stored.sequence_number.cmp(&self.stored.sequence_number))
    }
}

#[derive(Default)]
struct QueueInner {
    active: VecDeque<Stored>,
    scheduled: BinaryHeap<Scheduled>,
    locked: HashMap<LockToken, Stored>,
    dead_letters: Vec<DeadLetter>,
    settlements: Vec<SettlementRecord>,
    sent: Vec<Message>,
    next_sequence: i64,
    receive_calls: u32,
    pending_receive_failures: u32,
    pending_send_failures: u32,
}

impl QueueInner {
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.active.push_back(entry.stored);
            }
        }
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.peek().map(|entry| entry.at)
    }
}

struct QueueState {
    name: String,
    inner: Mutex<QueueInner>,
    arrived: Notify,
    settled: watch::Sender<usize>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_delivery_count: u32,
}

impl QueueState {
    fn enqueue(&self, mut message: Message) -> Result<(), TransportError> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock();
            if inner.pending_send_failures > 0 {
                inner.pending_send_failures -= 1;
                return Err(TransportError::Send("injected send failure".to_string()));
            }

            inner.sent.push(message.clone());
            message.enqueued_time = Some(now);
            let stored = Stored {
                message,
                sequence_number: inner.next_sequence,
            };
            inner.next_sequence += 1;

            match stored.message.scheduled_enqueue_time {
                Some(at) if at > now => inner.scheduled.push(Scheduled { at, stored }),
                _ => inner.active.push_back(stored),
            }
        }
        self.arrived.notify_waiters();
        Ok(())
    }

    /// 次のメッセージを lock して返す。来るまで待つ。
    async fn next_delivery(self: &Arc<Self>) -> Box<dyn Delivery> {
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let now = self.clock.now();
                let mut inner = self.inner.lock();
                inner.promote_due(now);

                if let Some(mut stored) = inner.active.pop_front() {
                    stored.message.delivery_count += 1;
                    let lock_token = self.ids.generate_lock_token();
                    let message = stored.message.clone();
                    inner.locked.insert(lock_token, stored);
                    return Box::new(InMemoryDelivery {
                        message,
                        lock_token,
                        queue: Arc::clone(self),
                    });
                }

                inner
                    .next_due()
                    .and_then(|at| (at - now).to_std().ok())
                    .map_or(POLL_INTERVAL, |until| until.min(POLL_INTERVAL))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn settle(
        &self,
        lock_token: LockToken,
        message_id: &str,
        resolution: Resolution,
    ) -> Result<(), SettlementError> {
        let mut requeued = false;
        {
            let mut inner = self.inner.lock();
            let stored = inner
                .locked
                .remove(&lock_token)
                .ok_or_else(|| SettlementError::LockLost(message_id.to_string()))?;

            match &resolution {
                Resolution::Acknowledge => {}
                Resolution::Abandon => {
                    if stored.message.delivery_count >= self.max_delivery_count {
                        debug!(queue = %self.name, message_id, "max delivery count reached, dead-lettering");
                        inner.dead_letters.push(DeadLetter {
                            message: stored.message,
                            reason: REASON_MAX_DELIVERY_COUNT.to_string(),
                        });
                    } else {
                        inner.active.push_back(stored);
                        requeued = true;
                    }
                }
                Resolution::DeadLetter { reason } => {
                    inner.dead_letters.push(DeadLetter {
                        message: stored.message,
                        reason: reason.clone(),
                    });
                }
            }

            inner.settlements.push(SettlementRecord {
                message_id: message_id.to_string(),
                resolution,
            });
        }

        if requeued {
            self.arrived.notify_waiters();
        }
        self.settled.send_modify(|count| *count += 1);
        Ok(())
    }
}

/// 受信した 1 件（lock を保持している）
struct InMemoryDelivery {
    message: Message,
    lock_token: LockToken,
    queue: Arc<QueueState>,
}

impl InMemoryDelivery {
    fn settle(self, ctx: &CancellationToken, resolution: Resolution) -> Result<(), SettlementError> {
        if ctx.is_cancelled() {
            return Err(SettlementError::ContextCancelled);
        }
        self.queue
            .settle(self.lock_token, &self.message.id, resolution)
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    fn lock_token(&self) -> LockToken {
        self.lock_token
    }

    async fn complete(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError> {
        self.settle(ctx, Resolution::Acknowledge)
    }

    async fn abandon(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError> {
        self.settle(ctx, Resolution::Abandon)
    }

    async fn dead_letter(
        self: Box<Self>,
        ctx: &CancellationToken,
        reason: &str,
    ) -> Result<(), SettlementError> {
        self.settle(ctx, Resolution::dead_letter(reason))
    }
}

/// queue handle（送受信 + テスト用の観測 API）
#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<QueueState>,
}

impl InMemoryQueue {
    /// 配送待ちのメッセージ数
    pub fn active_count(&self) -> usize {
        self.state.inner.lock().active.len()
    }

    pub fn scheduled_count(&self) -> usize {
        self.state.inner.lock().scheduled.len()
    }

    /// lock 中（受信済み・未終端）のメッセージ数
    pub fn locked_count(&self) -> usize {
        self.state.inner.lock().locked.len()
    }

    pub fn is_idle(&self) -> bool {
        let inner = self.state.inner.lock();
        inner.active.is_empty() && inner.scheduled.is_empty() && inner.locked.is_empty()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.inner.lock().dead_letters.clone()
    }

    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.state.inner.lock().settlements.clone()
    }

    pub fn settlement_count(&self, kind: ResolutionKind) -> usize {
        self.state
            .inner
            .lock()
            .settlements
            .iter()
            .filter(|record| record.resolution.kind() == kind)
            .count()
    }

    /// `send` で受け付けたメッセージ（送信時点の内容）
    pub fn sent(&self) -> Vec<Message> {
        self.state.inner.lock().sent.clone()
    }

    pub fn receive_calls(&self) -> u32 {
        self.state.inner.lock().receive_calls
    }

    /// 次の `n` 回の `receive` を即座に失敗させる
    pub fn fail_next_receives(&self, n: u32) {
        self.state.inner.lock().pending_receive_failures = n;
    }

    /// 次の `n` 回の `send` を失敗させる
    pub fn fail_next_sends(&self, n: u32) {
        self.state.inner.lock().pending_send_failures = n;
    }

    /// 終端処理の累計が `n` 件に達するまで待つ
    pub async fn wait_for_settlements(&self, n: usize) {
        let mut rx = self.state.settled.subscribe();
        // Sender は self.state が保持しているので Err にはならない
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl QueueHandle for InMemoryQueue {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.state.enqueue(message)
    }

    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        {
            let mut inner = self.state.inner.lock();
            inner.receive_calls += 1;
            if inner.pending_receive_failures > 0 {
                inner.pending_receive_failures -= 1;
                return Err(TransportError::Receive("injected receive failure".to_string()));
            }
        }

        loop {
            let delivery = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                delivery = self.state.next_delivery() => delivery,
            };
            handler.handle(delivery).await?;
        }
    }
}

/// 開発・テスト用の namespace
pub struct InMemoryNamespace {
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    opened: Mutex<Vec<(String, QueueOptions)>>,
    lookup_failure: Mutex<Option<TransportError>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    max_delivery_count: u32,
}

impl InMemoryNamespace {
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            queues: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            lookup_failure: Mutex::new(None),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            max_delivery_count: 10,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.max_delivery_count = max_delivery_count.max(1);
        self
    }

    /// queue を作成（既にあればそれを返す）
    pub fn create_queue(&self, name: &str) -> InMemoryQueue {
        let mut queues = self.queues.lock();
        let state = queues
            .entry(name.to_string())
            .or_insert_with(|| {
                let (settled, _) = watch::channel(0);
                Arc::new(QueueState {
                    name: name.to_string(),
                    inner: Mutex::new(QueueInner::default()),
                    arrived: Notify::new(),
                    settled,
                    clock: Arc::clone(&self.clock),
                    ids: Arc::clone(&self.ids),
                    max_delivery_count: self.max_delivery_count,
                })
            })
            .clone();
        InMemoryQueue { state }
    }

    /// 観測用の handle を取得
    pub fn queue(&self, name: &str) -> Option<InMemoryQueue> {
        self.queues.lock().get(name).map(|state| InMemoryQueue {
            state: Arc::clone(state),
        })
    }

    /// 以降の `get_queue` を `QueueLookup::Failed` にする
    pub fn fail_lookups(&self, error: TransportError) {
        *self.lookup_failure.lock() = Some(error);
    }

    /// `open_queue` の呼び出し履歴
    pub fn opened_handles(&self) -> Vec<(String, QueueOptions)> {
        self.opened.lock().clone()
    }
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Namespace for InMemoryNamespace {
    async fn get_queue(&self, name: &str) -> QueueLookup {
        if let Some(error) = self.lookup_failure.lock().clone() {
            return QueueLookup::Failed(error);
        }
        if self.queues.lock().contains_key(name) {
            QueueLookup::Found
        } else {
            QueueLookup::NotFound
        }
    }

    async fn open_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<dyn QueueHandle>, TransportError> {
        let state = self
            .queues
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::Open {
                queue: name.to_string(),
                reason: "no such queue".to_string(),
            })?;
        self.opened.lock().push((name.to_string(), options));
        Ok(Arc::new(InMemoryQueue { state }))
    }
}
