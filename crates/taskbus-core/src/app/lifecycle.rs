//! Lifecycle - consumption session の開始・停止と drain 待ち
//!
//! # stop_consuming の保証
//! 1. 停止シグナルを送る（`BrokerBase::stop_consuming`）
//! 2. 受信ループが抜けて dispatch channel が閉じるのを待つ（drained）
//! 3. in-flight が 0 になるのを待つ
//!
//! 戻った時点で処理途中のメッセージは残っておらず、以降の終端処理も起きない。
//!
//! # 開始前の停止
//! 動いている session が無いときの停止は「保留」として残り、次の `begin` は
//! cancel 済みの token で始まる（すぐ drain して戻る）。停止を受け取って終わった
//! session の後に重ねて呼ばれた停止は保留にならないので、明示的な再開はできる。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::BrokerBase;
use crate::domain::SessionId;

/// in-flight カウンタ
///
/// dispatch channel に積んだ時点で +1、終端処理が済んだら -1。
/// 0 になるのを `wait_idle` で待てる。
#[derive(Debug)]
pub struct InFlight {
    count: watch::Sender<usize>,
}

impl InFlight {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn start(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    pub fn finish(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // Sender は self が保持しているので Err にはならない
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

/// drop されたときに in-flight を 1 つ減らす
///
/// worker が panic で落ちても、channel ごと捨てられても数え漏れない。
#[derive(Debug)]
pub struct InFlightGuard {
    session: Arc<Session>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.in_flight.finish();
    }
}

/// `start_consuming` 1 回分の状態
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    stop: CancellationToken,
    drained: watch::Sender<bool>,
    in_flight: InFlight,
}

impl Session {
    pub fn new(id: SessionId, stop: CancellationToken) -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            id,
            stop,
            drained,
            in_flight: InFlight::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn stop_signal(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// in-flight を +1 し、drop で -1 する guard を返す
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.start();
        InFlightGuard {
            session: Arc::clone(self),
        }
    }

    /// 受信ループを抜け、dispatch channel を閉じた
    pub fn mark_drained(&self) {
        self.drained.send_replace(true);
    }

    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

#[derive(Default)]
struct State {
    current: Option<Arc<Session>>,
    stop_pending: bool,
}

pub struct Lifecycle {
    base: Arc<BrokerBase>,
    state: Mutex<State>,
}

impl Lifecycle {
    pub fn new(base: Arc<BrokerBase>) -> Self {
        Self {
            base,
            state: Mutex::new(State::default()),
        }
    }

    /// 新しい session を登録し、その停止シグナルと一緒に返す
    ///
    /// 保留中の停止があれば cancel 済みの token で始まる。
    pub fn begin(
        &self,
        id: SessionId,
        consumer_tag: &str,
        concurrency: usize,
    ) -> (Arc<Session>, CancellationToken) {
        let mut state = self.state.lock();
        let stop = if std::mem::take(&mut state.stop_pending) {
            info!(session = %id, consumer_tag, "stop was requested before start, session ends at once");
            self.base.stop_signal()
        } else {
            self.base.start_consuming(consumer_tag, concurrency)
        };
        let session = Arc::new(Session::new(id, stop.clone()));
        state.current = Some(Arc::clone(&session));
        (session, stop)
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.state.lock().current.clone()
    }

    /// 停止シグナルを送り、drain と in-flight 0 を待つ
    pub async fn stop(&self) {
        let live = {
            let mut state = self.state.lock();
            let live = match &state.current {
                Some(session) if !session.is_drained() => Some(Arc::clone(session)),
                // 停止を受け取って終わった session への重ねての停止
                Some(session) if session.stop_signal().is_cancelled() => None,
                _ => {
                    state.stop_pending = true;
                    None
                }
            };
            self.base.stop_consuming();
            live
        };

        let Some(session) = live else {
            return;
        };
        info!(session = %session.id(), "stop requested, waiting for receive loop to drain");
        session.wait_drained().await;
        session.in_flight().wait_idle().await;
        info!(session = %session.id(), "consumption drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use std::time::Duration;
    use ulid::Ulid;

    fn session_id() -> SessionId {
        SessionId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn in_flight_wait_idle_returns_at_zero() {
        let in_flight = Arc::new(InFlight::default());
        in_flight.start();
        in_flight.start();
        assert_eq!(in_flight.count(), 2);

        let waiter = tokio::spawn({
            let in_flight = in_flight.clone();
            async move { in_flight.wait_idle().await }
        });

        in_flight.finish();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        in_flight.finish();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(in_flight.count(), 0);
    }

    #[tokio::test]
    async fn stop_without_session_returns_immediately() {
        let base = Arc::new(BrokerBase::new(BrokerConfig::default()));
        let lifecycle = Lifecycle::new(base.clone());

        tokio::time::timeout(Duration::from_secs(1), lifecycle.stop())
            .await
            .unwrap();
        assert!(!base.retry());
    }

    #[tokio::test]
    async fn stop_waits_for_drain_then_in_flight() {
        let base = Arc::new(BrokerBase::new(BrokerConfig::default()));
        let lifecycle = Arc::new(Lifecycle::new(base));
        let (session, stop) = lifecycle.begin(session_id(), "tag", 2);
        session.in_flight().start();

        let stopping = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.stop().await }
        });

        stop.cancelled().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        session.mark_drained();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        session.in_flight().finish();
        tokio::time::timeout(Duration::from_secs(1), stopping)
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_drained());
    }

    #[test]
    fn guard_releases_in_flight_on_drop() {
        let session = Arc::new(Session::new(session_id(), CancellationToken::new()));
        let first = session.track();
        let second = session.track();
        assert_eq!(session.in_flight().count(), 2);

        drop(first);
        assert_eq!(session.in_flight().count(), 1);
        drop(second);
        assert_eq!(session.in_flight().count(), 0);
    }

    #[tokio::test]
    async fn stop_before_begin_is_not_lost() {
        let base = Arc::new(BrokerBase::new(BrokerConfig::default()));
        let lifecycle = Lifecycle::new(base.clone());

        lifecycle.stop().await;
        let (session, stop) = lifecycle.begin(session_id(), "tag", 1);

        assert!(stop.is_cancelled());
        assert!(session.stop_signal().is_cancelled());
        assert!(!base.retry());

        // 保留は 1 回で消費される
        session.mark_drained();
        let (_, stop) = lifecycle.begin(session_id(), "tag", 1);
        assert!(!stop.is_cancelled());
        assert!(base.retry());
    }

    #[tokio::test]
    async fn repeated_stop_after_a_stopped_session_allows_restart() {
        let base = Arc::new(BrokerBase::new(BrokerConfig::default()));
        let lifecycle = Arc::new(Lifecycle::new(base.clone()));
        let (session, _) = lifecycle.begin(session_id(), "tag", 1);

        let stopping = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.stop().await }
        });
        session.stop_signal().cancelled().await;
        session.mark_drained();
        stopping.await.unwrap();

        lifecycle.stop().await;
        let (_, stop) = lifecycle.begin(session_id(), "tag", 1);
        assert!(!stop.is_cancelled());
        assert!(base.retry());
    }
}
