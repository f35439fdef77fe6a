//! Deferred read marking
//!
//! Viewing a moment only counts as reading it after a short dwell, so an
//! accidental navigation does not clear the unread count. Each view
//! schedules a delayed task; a newer view of the same flow by the same
//! member supersedes the pending one, and dropping the marker cancels
//! everything still pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use crate::storage::Storage;

/// Default dwell before a view is recorded as a read
pub const DEFAULT_DWELL: Duration = Duration::from_secs(2);

/// Schedules fire-and-forget read marks after a dwell delay
pub struct ReadMarker<S: Storage> {
    /// Storage the read marks are written to
    storage: S,

    /// How long a view must dwell before it counts as a read
    dwell: Duration,

    /// Pending marks, keyed by (flow, member)
    pending: Arc<Mutex<HashMap<(Uuid, Uuid), CancellationToken>>>,

    /// Parent of every pending token
    root: CancellationToken,

    /// Cancels all pending marks when the last marker clone goes away
    _guard: Arc<DropGuard>,
}

// manual impl, `S: Clone` is all that is needed
impl<S: Storage> Clone for ReadMarker<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            dwell: self.dwell,
            pending: Arc::clone(&self.pending),
            root: self.root.clone(),
            _guard: Arc::clone(&self._guard),
        }
    }
}

impl<S: Storage> ReadMarker<S> {
    pub fn with_dwell(storage: S, dwell: Duration) -> Self {
        let root = CancellationToken::new();

        Self {
            storage,
            dwell,
            pending: Arc::new(Mutex::new(HashMap::new())),
            root: root.clone(),
            _guard: Arc::new(root.drop_guard()),
        }
    }

    /// Schedule a read mark for a member viewing a flow
    ///
    /// Replaces any mark still pending for the same (flow, member) pair.
    pub async fn schedule(&self, flow_id: Uuid, user_id: Uuid) {
        let token = self.root.child_token();

        {
            let mut pending = self.pending.lock().await;

            if let Some(superseded) = pending.insert((flow_id, user_id), token.clone()) {
                superseded.cancel();
            }
        }

        let storage = self.storage.clone();
        let pending = Arc::clone(&self.pending);
        let dwell = self.dwell;

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(dwell) => {
                    let result = storage
                        .mark_read(&flow_id, &user_id, Utc::now().naive_utc())
                        .await;

                    if let Err(err) = result {
                        tracing::warn!("Could not mark flow {flow_id} as read: {err}");
                    }

                    let mut pending = pending.lock().await;

                    // only clear our own token, a newer view may have
                    // scheduled again in the meantime
                    if pending.get(&(flow_id, user_id)) == Some(&token) {
                        pending.remove(&(flow_id, user_id));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::FlowKind;
    use crate::membership::accept;
    use crate::membership::invite;
    use crate::membership::Principal;
    use crate::storage::memory::Memory;
    use crate::storage::CreateFlowValues;

    use super::*;

    async fn flow_with_member(storage: &Memory) -> (Uuid, Uuid) {
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();

        let flow = storage
            .create_flow(&CreateFlowValues {
                user_id: &owner,
                title: "Us",
                bio: "",
                kind: FlowKind::Shared,
                tags: &[],
            })
            .await
            .unwrap();

        invite(storage, &flow, Principal::User(member)).await.unwrap();
        accept(storage, &flow.id, &member).await.unwrap();

        (flow.id, member)
    }

    #[tokio::test]
    async fn test_mark_lands_after_dwell() {
        let storage = Memory::new();
        let (flow_id, member) = flow_with_member(&storage).await;

        let before = storage
            .find_single_participant(&flow_id, &member)
            .await
            .unwrap()
            .unwrap()
            .last_read_at
            .unwrap();

        let marker = ReadMarker::with_dwell(storage.clone(), Duration::from_millis(10));
        marker.schedule(flow_id, member).await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let after = storage
            .find_single_participant(&flow_id, &member)
            .await
            .unwrap()
            .unwrap()
            .last_read_at
            .unwrap();

        assert!(after > before);
    }

    #[tokio::test]
    async fn test_dropping_the_marker_cancels_pending_marks() {
        let storage = Memory::new();
        let (flow_id, member) = flow_with_member(&storage).await;

        let before = storage
            .find_single_participant(&flow_id, &member)
            .await
            .unwrap()
            .unwrap()
            .last_read_at;

        let marker = ReadMarker::with_dwell(storage.clone(), Duration::from_millis(50));
        marker.schedule(flow_id, member).await;
        drop(marker);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let after = storage
            .find_single_participant(&flow_id, &member)
            .await
            .unwrap()
            .unwrap()
            .last_read_at;

        assert_eq!(before, after);
    }
}
