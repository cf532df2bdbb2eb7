//! Domain model (signatures, transport messages, resolutions, ids, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod resolution;
pub mod signature;

pub use self::errors::{
    BrokerError, BuildError, CodecError, ProcessError, SettlementError, TransportError,
};
pub use self::ids::{LockToken, SessionId};
pub use self::message::Message;
pub use self::resolution::{Resolution, ResolutionKind};
pub use self::signature::{Arg, Signature};
