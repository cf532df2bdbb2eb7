//! Typed - 型付き Task API
//!
//! 文字列の task 名の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! `TypedRegistry` は `TaskProcessor` を実装しているので、そのまま pipeline に渡せます。

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
