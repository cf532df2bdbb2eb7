//! App - アプリケーション層
//!
//! ports を組み合わせて broker adapter を実装します。
//!
//! # 主要コンポーネント
//! - **BrokerBase**: transport に依存しない共通機能（routing key, 登録済み task, 停止シグナル）
//! - **Publisher**: routing → encode → send / scheduled send
//! - **ConsumptionPipeline**: 受信ループ + worker pool + 終端判定
//! - **Lifecycle**: session の開始・停止と drain 待ち
//! - **settle**: Resolution を transport の終端処理に変換する
//! - **ServiceBusBroker / BrokerBuilder**: 上記のワイヤリング

pub mod base;
pub mod broker;
pub mod lifecycle;
pub mod pipeline;
pub mod publisher;
pub mod settle;

pub use self::base::BrokerBase;
pub use self::broker::{Broker, BrokerBuilder, ServiceBusBroker};
pub use self::lifecycle::{InFlight, InFlightGuard, Lifecycle, Session};
pub use self::pipeline::ConsumptionPipeline;
pub use self::publisher::Publisher;
pub use self::settle::settle;
