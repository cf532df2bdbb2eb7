//! Namespace port - message bus の namespace（queue の存在確認と handle 生成）
//!
//! 接続・認証は namespace を作る側の責務で、ここでは扱いません。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TransportError;
use crate::ports::QueueHandle;

/// queue の存在確認結果
///
/// SDK のエラー型を downcast して "not found" を判定する代わりに、
/// 判別済みの結果として返します。
#[derive(Debug, Clone)]
pub enum QueueLookup {
    Found,
    NotFound,
    Failed(TransportError),
}

/// queue handle の生成オプション
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// client 側で先読みしておくメッセージ数（`None` は transport のデフォルト）
    pub prefetch_count: Option<u32>,
}

impl QueueOptions {
    pub fn with_prefetch(count: u32) -> Self {
        Self {
            prefetch_count: Some(count),
        }
    }
}

#[async_trait]
pub trait Namespace: Send + Sync {
    async fn get_queue(&self, name: &str) -> QueueLookup;

    async fn open_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<dyn QueueHandle>, TransportError>;
}
