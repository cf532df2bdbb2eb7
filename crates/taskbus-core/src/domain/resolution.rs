//! Terminal resolution of a received message.

use std::fmt;

pub const REASON_EMPTY_MESSAGE: &str = "empty message data";
pub const REASON_UNMARSHAL: &str = "unmarshal msg data error";

/// Exactly one of these is applied to every received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Processing succeeded; remove the message.
    Acknowledge,

    /// Release the message for redelivery under the transport's policy.
    Abandon,

    /// Move the message to the dead-letter sink; never redelivered.
    DeadLetter { reason: String },
}

impl Resolution {
    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Resolution::DeadLetter {
            reason: reason.into(),
        }
    }

    pub fn task_not_registered(name: &str) -> Self {
        Resolution::dead_letter(format!("task {name} is not registered"))
    }

    pub fn kind(&self) -> ResolutionKind {
        match self {
            Resolution::Acknowledge => ResolutionKind::Acknowledge,
            Resolution::Abandon => ResolutionKind::Abandon,
            Resolution::DeadLetter { .. } => ResolutionKind::DeadLetter,
        }
    }
}

/// Resolution without the dead-letter reason, handy for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    Acknowledge,
    Abandon,
    DeadLetter,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Acknowledge => f.write_str("acknowledge"),
            Resolution::Abandon => f.write_str("abandon"),
            Resolution::DeadLetter { reason } => write!(f, "dead-letter ({reason})"),
        }
    }
}
