//! Handler trait - Task を実行する Handler の定義
//!
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure (TypedHandler<T, H> → DynHandler)

use super::task::Task;
use crate::domain::{ProcessError, Signature};
use async_trait::async_trait;
use std::marker::PhantomData;

/// Handler は Task を実行する
///
/// # 使用例
/// ```ignore
/// struct AddHandler;
///
/// #[async_trait]
/// impl Handler<Add> for AddHandler {
///     async fn handle(&self, task: Add) -> Result<(), ProcessError> {
///         tracing::info!(sum = task.a + task.b, "added");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<(), ProcessError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// HashMap<String, Arc<dyn DynHandler>> に格納するために使います。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, signature: &Signature) -> Result<(), ProcessError>;
    fn task_name(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, signature: &Signature) -> Result<(), ProcessError> {
        let task: T = serde_json::from_value(serde_json::Value::Object(signature.named_args()))
            .map_err(|e| ProcessError::new(format!("args decode for {}: {e}", T::NAME)))?;
        self.handler.handle(task).await
    }

    fn task_name(&self) -> &str {
        T::NAME
    }
}
