//! Publisher - Signature を queue に送る
//!
//! # フロー
//! 1. `BrokerBase::adjust_routing_key` で宛先を確定（encode より先）
//! 2. MessageCodec で encode（失敗したら transport には触らない）
//! 3. ETA が未来なら scheduled delivery、それ以外は即時配送
//! 4. send（失敗はログを出して返す。ここではリトライしない）

use std::sync::Arc;

use tracing::{debug, error};

use crate::app::BrokerBase;
use crate::codec::MessageCodec;
use crate::domain::{BrokerError, Signature};
use crate::ports::{Clock, QueueHandle};

pub struct Publisher {
    base: Arc<BrokerBase>,
    queue: Arc<dyn QueueHandle>,
    codec: MessageCodec,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(base: Arc<BrokerBase>, queue: Arc<dyn QueueHandle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            base,
            queue,
            codec: MessageCodec::new(),
            clock,
        }
    }

    pub async fn publish(&self, mut signature: Signature) -> Result<(), BrokerError> {
        self.base.adjust_routing_key(&mut signature);

        let message = self.codec.encode(&signature, self.clock.now())?;
        debug!(
            task_uuid = %signature.uuid,
            task_name = %signature.name,
            queue = self.queue.name(),
            scheduled_at = ?message.scheduled_enqueue_time,
            "publishing task"
        );

        if let Err(e) = self.queue.send(message).await {
            error!(task_uuid = %signature.uuid, error = %e, "error when sending a message");
            return Err(e.into());
        }
        Ok(())
    }
}
