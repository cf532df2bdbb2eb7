//! Acknowledgment gateway - Resolution を transport の終端処理に変換する
//!
//! pipeline がメッセージを終端させるのはここだけです。
//! 停止処理中でも終端処理は中断させたくないので、受信ループの token ではなく
//! 毎回新しい（cancel されていない）token を渡します。

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::domain::{Resolution, SettlementError};
use crate::ports::Delivery;

pub async fn settle(
    delivery: Box<dyn Delivery>,
    resolution: &Resolution,
) -> Result<(), SettlementError> {
    let ctx = CancellationToken::new();
    let message_id = delivery.message().id.clone();
    debug!(message_id = %message_id, lock_token = %delivery.lock_token(), %resolution, "settling message");

    let result = match resolution {
        Resolution::Acknowledge => delivery.complete(&ctx).await,
        Resolution::Abandon => delivery.abandon(&ctx).await,
        Resolution::DeadLetter { reason } => delivery.dead_letter(&ctx, reason).await,
    };

    if let Err(e) = &result {
        error!(message_id = %message_id, %resolution, error = %e, "failed to settle message");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LockToken, Message, ResolutionKind};
    use crate::impls::InMemoryNamespace;
    use crate::ports::QueueHandle;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::Arc;
    use ulid::Ulid;

    /// どの終端処理が呼ばれたかを記録する Delivery
    struct Recording {
        message: Message,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Delivery for Recording {
        fn message(&self) -> &Message {
            &self.message
        }

        fn lock_token(&self) -> LockToken {
            LockToken::from_ulid(Ulid::nil())
        }

        async fn complete(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError> {
            assert!(!ctx.is_cancelled());
            self.calls.lock().push("complete".to_string());
            Ok(())
        }

        async fn abandon(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError> {
            assert!(!ctx.is_cancelled());
            self.calls.lock().push("abandon".to_string());
            Ok(())
        }

        async fn dead_letter(
            self: Box<Self>,
            ctx: &CancellationToken,
            reason: &str,
        ) -> Result<(), SettlementError> {
            assert!(!ctx.is_cancelled());
            self.calls.lock().push(format!("dead_letter:{reason}"));
            Err(SettlementError::Transport("sink unavailable".to_string()))
        }
    }

    #[rstest]
    #[case::acknowledge(Resolution::Acknowledge, "complete", true)]
    #[case::abandon(Resolution::Abandon, "abandon", true)]
    #[case::dead_letter(Resolution::dead_letter("bad"), "dead_letter:bad", false)]
    #[tokio::test]
    async fn routes_each_resolution_to_one_call(
        #[case] resolution: Resolution,
        #[case] expected: &str,
        #[case] ok: bool,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let delivery = Box::new(Recording {
            message: Message::new(b"x".to_vec()).with_id("m1"),
            calls: calls.clone(),
        });

        let result = settle(delivery, &resolution).await;
        assert_eq!(result.is_ok(), ok);
        assert_eq!(*calls.lock(), vec![expected.to_string()]);
    }

    #[tokio::test]
    async fn settles_against_the_in_memory_bus() {
        let ns = InMemoryNamespace::new();
        let queue = ns.create_queue("default");
        queue.send(Message::new(b"x".to_vec()).with_id("m1")).await.unwrap();

        struct Take(Mutex<Option<tokio::sync::oneshot::Sender<Box<dyn Delivery>>>>);

        #[async_trait]
        impl crate::ports::MessageHandler for Take {
            async fn handle(
                &self,
                delivery: Box<dyn Delivery>,
            ) -> Result<(), crate::domain::TransportError> {
                if let Some(tx) = self.0.lock().take() {
                    let _ = tx.send(delivery);
                }
                Ok(())
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let cancel = CancellationToken::new();
        let receiving = tokio::spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move { queue.receive(cancel, Arc::new(Take(Mutex::new(Some(tx))))).await }
        });

        let delivery = rx.await.unwrap();
        // 受信ループ側の token が cancel 済みでも終端処理は通る
        cancel.cancel();
        settle(delivery, &Resolution::Acknowledge).await.unwrap();

        assert_eq!(queue.settlement_count(ResolutionKind::Acknowledge), 1);
        assert!(receiving.await.unwrap().is_ok());
    }
}
