//! Transport message: the envelope that carries an encoded signature.

use chrono::{DateTime, Utc};

/// Wire envelope exchanged with the transport.
///
/// Outbound messages are built by the codec; inbound ones are handed out by
/// the transport with the delivery metadata filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message identity; set to the task uuid so consumers can de-duplicate.
    pub id: String,

    pub data: Vec<u8>,

    pub content_type: Option<String>,

    /// Deliver no earlier than this instant. `None` means immediately.
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,

    /// How many times the transport has handed this message out (1 on first receive).
    pub delivery_count: u32,

    pub enqueued_time: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            id: String::new(),
            data,
            content_type: None,
            scheduled_enqueue_time: None,
            delivery_count: 0,
            enqueued_time: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Mark the message for scheduled delivery.
    pub fn schedule_at(&mut self, at: DateTime<Utc>) {
        self.scheduled_enqueue_time = Some(at);
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled_enqueue_time.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
