//! BrokerBase - transport に依存しない broker 共通機能
//!
//! 継承の代わりに、Publisher / ConsumptionPipeline / Lifecycle に `Arc<BrokerBase>` として
//! 渡して共有します。
//!
//! # 持っているもの
//! - config
//! - 登録済み task 名（`is_task_registered`）
//! - retry フラグ（`stop_consuming` で false になる）
//! - session の停止シグナル（`CancellationToken`）

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::BrokerConfig;
use crate::domain::Signature;

pub struct BrokerBase {
    config: BrokerConfig,
    registered_task_names: RwLock<HashSet<String>>,
    retry: AtomicBool,
    stop: Mutex<CancellationToken>,
}

impl BrokerBase {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            registered_task_names: RwLock::new(HashSet::new()),
            retry: AtomicBool::new(true),
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn set_registered_task_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.registered_task_names.write() = names.into_iter().map(Into::into).collect();
    }

    pub fn is_task_registered(&self, name: &str) -> bool {
        self.registered_task_names.read().contains(name)
    }

    /// routing key が空なら default queue を入れる（宛先 queue を決める）
    pub fn adjust_routing_key(&self, signature: &mut Signature) {
        if !signature.routing_key.is_empty() {
            return;
        }
        signature.routing_key = self.config.default_queue.clone();
    }

    /// consumption session の開始。session の停止シグナルを返す。
    ///
    /// 前回の session が止められていたら新しい token を発行する。
    pub fn start_consuming(&self, consumer_tag: &str, concurrency: usize) -> CancellationToken {
        let mut stop = self.stop.lock();
        if stop.is_cancelled() {
            *stop = CancellationToken::new();
        }
        self.retry.store(true, Ordering::SeqCst);
        debug!(consumer_tag, concurrency, "consumption session registered");
        stop.clone()
    }

    /// 現在の停止シグナル（新しい token は発行しない）
    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.lock().clone()
    }

    /// 停止シグナルを送る。以降 `retry()` は false。
    pub fn stop_consuming(&self) {
        self.retry.store(false, Ordering::SeqCst);
        self.stop.lock().cancel();
    }

    /// `start_consuming` の呼び出し元が再接続すべきか
    pub fn retry(&self) -> bool {
        self.retry.load(Ordering::SeqCst)
    }
}
