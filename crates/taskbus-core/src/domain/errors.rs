//! Errors - エラー型と分類
//!
//! # 分類
//! - **setup**: queue が存在しない / transport に届かない（`BrokerError`、構築時に返す）
//! - **publish**: encode / send の失敗（`BrokerError`、呼び出しごとに返す）
//! - **per-message**: 空 payload / decode 失敗 / 未登録 / processor 失敗
//!   （pipeline の外には出さず、`Resolution` に変換する）
//! - **receive loop**: `TransportError`（ログを出してリトライ）

use thiserror::Error;

/// Broker レベルのエラー
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue {0} does not exist")]
    QueueNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid concurrency {0}: at least one worker is required")]
    InvalidConcurrency(usize),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Codec のエラー
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty message data")]
    EmptyPayload,

    #[error("JSON marshal error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unmarshal msg data error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Transport（message bus SDK）から返るエラー
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("queue lookup failed: {0}")]
    Lookup(String),

    #[error("failed to open queue {queue}: {reason}")]
    Open { queue: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// acknowledge / abandon / dead-letter の失敗
#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("context cancelled before the message could be settled")]
    ContextCancelled,

    #[error("lock lost for message {0}")]
    LockLost(String),

    #[error("settlement failed: {0}")]
    Transport(String),
}

/// TaskProcessor の失敗（中身は processor 側の都合なので文字列で持つ）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcessError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Broker 構築時のエラー
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no transport namespace was supplied to the builder")]
    MissingNamespace,
}
