//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock から timestamp を取る）

use std::sync::Arc;

use crate::domain::ids::{LockToken, SessionId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は transport / pipeline が使う ID を生成
pub trait IdGenerator: Send + Sync {
    /// 1 回の delivery に対する lock token
    fn generate_lock_token(&self) -> LockToken;

    /// `start_consuming` 1 回分の session id（ログの相関用）
    fn generate_session_id(&self) -> SessionId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を渡すと timestamp 部分が固定される（ランダム部分は毎回異なる）。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_lock_token(&self) -> LockToken {
        LockToken::from(self.next_ulid())
    }

    fn generate_session_id(&self) -> SessionId {
        SessionId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));

        let id1 = id_gen.generate_lock_token();
        let id2 = id_gen.generate_lock_token();
        let id3 = id_gen.generate_lock_token();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate_lock_token();
        let id2 = id_gen.generate_session_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1.as_ulid(), id2.as_ulid());

        let timestamp1 = (id1.as_ulid().0 >> 80) as u64;
        let timestamp2 = (id2.as_ulid().0 >> 80) as u64;
        assert_eq!(timestamp1, timestamp2);
        assert_eq!(timestamp1, fixed_time.timestamp_millis() as u64);
    }
}
