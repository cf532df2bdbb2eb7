//! TaskProcessor port - 登録済み task を実行するホスト側の worker
//!
//! 実装例: `typed::TypedRegistry`

use async_trait::async_trait;

use crate::domain::{ProcessError, Signature};

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, signature: &Signature) -> Result<(), ProcessError>;
}
