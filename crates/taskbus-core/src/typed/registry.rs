//! TypedRegistry - Handler の登録と管理
//!
//! - HashMap での型消去された trait object の管理
//! - `TaskProcessor` として pipeline に渡せる
//! - `registered_names()` を `BrokerBase::set_registered_task_names` に渡す

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ProcessError, Signature};
use crate::ports::TaskProcessor;
use crate::typed::handler::TypedHandler;

use super::handler::{DynHandler, Handler};
use super::task::Task;
use std::collections::HashMap;
use std::sync::Arc;

/// TypedRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<Add, _>(AddHandler)?;
///
/// broker.set_registered_task_names(registry.registered_names());
/// broker.start_consuming("worker-1", 4, Arc::new(registry)).await?;
/// ```
#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = T::NAME.to_string();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        let typed_handler: Arc<dyn DynHandler> = Arc::new(TypedHandler::new(handler));
        debug!(task_name = typed_handler.task_name(), "handler registered");
        self.handlers.insert(name, typed_handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TaskProcessor for TypedRegistry {
    async fn process(&self, signature: &Signature) -> Result<(), ProcessError> {
        let handler = self.get(&signature.name).ok_or_else(|| {
            ProcessError::new(format!("no handler for task {}", signature.name))
        })?;
        handler.handle_dyn(signature).await
    }
}
