//! QueueHandle port - send と blocking receive
//!
//! # receive の契約
//! - `cancel` が cancel されたら `Ok(())` で戻る（clean stop）
//! - transport 側の障害は `Err` で戻る（呼び出し側がリトライを決める）
//! - 受信したメッセージは 1 件ずつ `MessageHandler::handle` に渡す

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Message, TransportError};
use crate::ports::Delivery;

/// 受信メッセージを受け取る callback
///
/// handler はビジネスロジックを実行してはいけない（受け渡しだけ）。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Box<dyn Delivery>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// メッセージを送信（`scheduled_enqueue_time` があれば予約配送）
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// `cancel` されるまで受信を続ける
    async fn receive(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError>;
}
