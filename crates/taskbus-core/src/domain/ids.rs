//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! transport 側で払い出す識別子（lock token, consumption session）は ULID を使います。
//! Task の識別子（`Signature::uuid`）はホスト側フレームワークの規約に従う文字列なので
//! ここでは扱いません。
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を提供し、`T` はマーカー型としてコンパイル時の型安全性だけを
//! 提供します（`LockToken` と `SessionId` は混同できない）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"lock-", "session-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Delivery lock のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lock {}

impl IdMarker for Lock {
    fn prefix() -> &'static str {
        "lock-"
    }
}

/// Consumption session のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Session {}

impl IdMarker for Session {
    fn prefix() -> &'static str {
        "session-"
    }
}

/// Identifier of one delivery of a message (valid until the message is resolved).
pub type LockToken = Id<Lock>;

/// Identifier of one `start_consuming` session.
pub type SessionId = Id<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let lock = LockToken::from_ulid(ulid1);
        let session = SessionId::from_ulid(ulid2);

        assert_eq!(lock.as_ulid(), ulid1);
        assert_eq!(session.as_ulid(), ulid2);

        assert!(lock.to_string().starts_with("lock-"));
        assert!(session.to_string().starts_with("session-"));
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let token = LockToken::from_ulid(Ulid::new());

        let serialized = serde_json::to_string(&token).unwrap();
        let deserialized: LockToken = serde_json::from_str(&serialized).unwrap();

        assert_eq!(token, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<LockToken>(), size_of::<Ulid>());
        assert_eq!(size_of::<SessionId>(), size_of::<Ulid>());
    }
}
