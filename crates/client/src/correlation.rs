//! Request-id allocation and the table of in-flight requests.
//!
//! [`CorrelationTable`] is generic over what it stores so the adapters can
//! keep routing entries in it.  [`PendingCalls`] is the client-side
//! specialisation: each entry is the one-shot sender a waiting caller is
//! parked on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use tw_protocol::RequestId;

use crate::error::ClientError;

/// Monotonic id source starting at 1.  Ids are never reused.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generic table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outstanding requests keyed by id.  Every entry is taken out exactly once:
/// by a response, by a timeout, or by a drain.
pub struct CorrelationTable<T> {
    ids: RequestIds,
    entries: Mutex<HashMap<RequestId, T>>,
}

impl<T> Default for CorrelationTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CorrelationTable<T> {
    pub fn new() -> Self {
        Self {
            ids: RequestIds::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A fresh id, unique for the life of this table.
    pub fn allocate(&self) -> RequestId {
        self.ids.next()
    }

    /// Insert an entry.  An id that is already outstanding is refused and
    /// the entry handed back.
    pub fn insert(&self, id: RequestId, entry: T) -> Result<(), T> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(entry);
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Allocate a fresh id and store `entry` under it.
    pub fn insert_new(&self, entry: T) -> RequestId {
        let id = self.allocate();
        self.entries.lock().insert(id, entry);
        id
    }

    pub fn take(&self, id: RequestId) -> Option<T> {
        self.entries.lock().remove(&id)
    }

    /// Remove and return every outstanding entry.
    pub fn drain(&self) -> Vec<(RequestId, T)> {
        self.entries.lock().drain().collect()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending client calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a waiting caller eventually receives.
pub type CallOutcome = Result<Value, ClientError>;

pub type PendingCalls = CorrelationTable<oneshot::Sender<CallOutcome>>;

impl CorrelationTable<oneshot::Sender<CallOutcome>> {
    /// Park a caller on `id`.
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        if self.insert(id, tx).is_err() {
            // The refused sender is dropped, so the receiver reports Closed.
            tracing::error!(id, "request id registered twice");
        }
        rx
    }

    /// Complete `id` with a result.  Returns `false` for unknown ids.
    pub fn resolve(&self, id: RequestId, value: Value) -> bool {
        self.complete(id, Ok(value))
    }

    /// Complete `id` with an error.  Returns `false` for unknown ids.
    pub fn reject(&self, id: RequestId, error: ClientError) -> bool {
        self.complete(id, Err(error))
    }

    fn complete(&self, id: RequestId, outcome: CallOutcome) -> bool {
        match self.take(id) {
            Some(tx) => {
                // The waiter may have gone away; that is not an error here.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding call.  Returns how many were failed.
    pub fn drain_with_error(&self, make_error: impl Fn() -> ClientError) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(make_error()));
        }
        count
    }

    /// Wait for `id` to complete, giving up after `timeout`.
    ///
    /// On timeout the entry is removed so a late response is discarded.  If
    /// a response won the race and already took the entry, its outcome is
    /// returned instead.
    pub async fn wait(
        &self,
        id: RequestId,
        mut rx: oneshot::Receiver<CallOutcome>,
        timeout: Option<Duration>,
    ) -> CallOutcome {
        let received = match timeout {
            None => rx.await,
            Some(after) => match tokio::time::timeout(after, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.take(id).is_some() {
                        return Err(ClientError::Timeout { id, after });
                    }
                    rx.await
                }
            },
        };
        received.unwrap_or(Err(ClientError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tw_protocol::RpcError;

    #[test]
    fn ids_start_at_one_and_increase() {
        let table: CorrelationTable<()> = CorrelationTable::new();
        assert_eq!(table.allocate(), 1);
        assert_eq!(table.allocate(), 2);
        assert_eq!(table.allocate(), 3);
    }

    #[test]
    fn duplicate_insert_is_refused() {
        let table = CorrelationTable::new();
        table.insert(1, "first").unwrap();
        assert_eq!(table.insert(1, "second"), Err("second"));
        assert_eq!(table.take(1), Some("first"));
        assert!(table.is_empty());
    }

    #[test]
    fn insert_new_uses_fresh_ids() {
        let table = CorrelationTable::new();
        let a = table.insert_new("a");
        let b = table.insert_new("b");
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.take(b), Some("b"));
        assert_eq!(table.drain(), vec![(a, "a")]);
    }

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let pending = PendingCalls::new();
        let id = pending.allocate();
        let rx = pending.register(id);

        assert!(pending.resolve(id, json!({"ok": true})));
        let value = pending.wait(id, rx, None).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn reject_delivers_error() {
        let pending = PendingCalls::new();
        let rx = pending.register(5);
        assert!(pending.reject(5, ClientError::Rpc(RpcError::tool_not_found("nope"))));

        let err = pending.wait(5, rx, None).await.unwrap_err();
        assert_eq!(err.rpc().map(|e| e.code), Some(-32601));
    }

    #[test]
    fn unknown_id_is_a_no_op() {
        let pending = PendingCalls::new();
        let _rx = pending.register(1);
        assert!(!pending.resolve(99, json!(null)));
        assert!(!pending.reject(98, ClientError::Closed));
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn responses_complete_out_of_order() {
        let pending = Arc::new(PendingCalls::new());
        let ids: Vec<_> = (0..3).map(|_| pending.allocate()).collect();
        let receivers: Vec<_> = ids.iter().map(|id| pending.register(*id)).collect();

        for id in ids.iter().rev() {
            assert!(pending.resolve(*id, json!(id)));
        }
        for (id, rx) in ids.iter().zip(receivers) {
            assert_eq!(pending.wait(*id, rx, None).await.unwrap(), json!(id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_late_response_is_discarded() {
        let pending = PendingCalls::new();
        let rx = pending.register(7);

        let err = pending
            .wait(7, rx, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout { id: 7, .. }));
        assert!(!pending.contains(7));
        assert!(!pending.resolve(7, json!("late")));
    }

    #[test]
    fn drain_fails_every_waiter() {
        let pending = PendingCalls::new();
        let mut receivers: Vec<_> = (1..=3).map(|id| pending.register(id)).collect();

        assert_eq!(pending.drain_with_error(|| ClientError::Closed), 3);
        assert!(pending.is_empty());
        for rx in receivers.iter_mut() {
            assert!(matches!(rx.try_recv(), Ok(Err(ClientError::Closed))));
        }
    }
}
