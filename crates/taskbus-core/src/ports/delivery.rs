//! Delivery port - 受信メッセージ 1 件と、その 3 種類の終端処理
//!
//! # 設計原則
//! - 終端処理（complete / abandon / dead_letter）は `self: Box<Self>` を消費する
//!   → 同じメッセージに 2 回目の呼び出しはコンパイルできない
//! - どの呼び出しも生きている context（`CancellationToken`）を要求する
//!   → cancel 済みの token を渡すと失敗してよい

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{LockToken, Message, SettlementError};

#[async_trait]
pub trait Delivery: Send + Sync {
    fn message(&self) -> &Message;

    fn lock_token(&self) -> LockToken;

    /// 処理成功。メッセージを削除する。
    async fn complete(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError>;

    /// lock を解放して再配送に回す（payload は変更しない）。
    async fn abandon(self: Box<Self>, ctx: &CancellationToken) -> Result<(), SettlementError>;

    /// dead-letter sink に移す。再配送されない。
    async fn dead_letter(
        self: Box<Self>,
        ctx: &CancellationToken,
        reason: &str,
    ) -> Result<(), SettlementError>;
}
