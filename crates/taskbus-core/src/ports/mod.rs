//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! message bus SDK とホスト側 task フレームワークはここの trait 越しにだけ見えます。
//!
//! # 構成
//! - transport 側: Namespace, QueueHandle, MessageHandler, Delivery
//! - ホスト側: TaskProcessor
//! - 共通: Clock, IdGenerator

pub mod clock;
pub mod delivery;
pub mod id_generator;
pub mod namespace;
pub mod processor;
pub mod queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery::Delivery;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::namespace::{Namespace, QueueLookup, QueueOptions};
pub use self::processor::TaskProcessor;
pub use self::queue::{MessageHandler, QueueHandle};
