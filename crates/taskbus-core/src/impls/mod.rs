//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryNamespace**: 開発用の message bus（scheduled delivery, lock, dead-letter sink）
//!
//! # 本番用実装
//! 実際の message bus SDK を使う `Namespace` 実装は別クレートに置く想定です。

pub mod inmem_bus;

pub use self::inmem_bus::{
    DeadLetter, InMemoryNamespace, InMemoryQueue, SettlementRecord, REASON_MAX_DELIVERY_COUNT,
};
