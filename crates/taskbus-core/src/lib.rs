//! taskbus-core
//!
//! Broker adapter that connects a distributed task-queue abstraction to a
//! message-bus transport.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Signature, Message, Resolution, ids, errors）
//! - **codec**: Signature ⇔ transport message
//! - **ports**: 抽象化レイヤー（Namespace, QueueHandle, Delivery, TaskProcessor, Clock, IdGenerator）
//! - **app**: BrokerBase, Publisher, ConsumptionPipeline, Lifecycle, ServiceBusBroker
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **impls**: 実装（InMemoryNamespace など開発用）
//! - **config**: BrokerConfig

pub mod app;
pub mod codec;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;
