//! Flows, the journal containers
//!
//! A flow is either personal (only its owner can see it) or shared/couple,
//! in which case every participant is tracked in the membership store.

use chrono::naive::NaiveDateTime;
use moka::future::Cache;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::membership::ParticipantRole;
use crate::storage;
use crate::storage::Storage;

/// The kind of a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    /// Single implicit member: the owner, no participant rows
    Personal,
    /// Multiple participants, each with a membership row
    Shared,
    /// Same mechanics as shared, different presentation
    Couple,
}

impl FlowKind {
    /// Does this kind of flow carry participant rows?
    pub fn has_participants(self) -> bool {
        !matches!(self, Self::Personal)
    }
}

#[derive(Clone, Debug)]
pub struct Flow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub bio: String,
    pub kind: FlowKind,
    pub tags: Vec<String>,
    /// Bumped by every membership add/remove batch, see [`Storage::add_participants`]
    pub membership_revision: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Aggregated flow data for listing
///
/// The storage computes the per-member numbers in one go, so the listing does
/// not fan out into one query per flow.
#[derive(Clone, Debug)]
pub struct FlowSummary {
    pub flow: Flow,
    /// The role of the requesting user in this flow
    pub role: ParticipantRole,
    pub moment_count: usize,
    pub last_activity: Option<NaiveDateTime>,
    /// Moments updated since the requesting user's last read, excluding their own
    pub unread_count: usize,
}

/// Typed cache of flows, keyed by flow ID
///
/// Every mutation of a flow or its membership must invalidate the entry;
/// reads that race an invalidation fall through to storage.
#[derive(Clone)]
pub struct FlowCache {
    inner: Cache<Uuid, Flow>,
}

impl FlowCache {
    const MAX_CAPACITY: u64 = 1024;

    pub fn new() -> Self {
        Self {
            inner: Cache::builder().max_capacity(Self::MAX_CAPACITY).build(),
        }
    }

    /// Fetch a flow through the cache
    pub async fn fetch<S: Storage>(
        &self,
        storage: &S,
        flow_id: &Uuid,
    ) -> storage::Result<Option<Flow>> {
        if let Some(flow) = self.inner.get(flow_id).await {
            return Ok(Some(flow));
        }

        let flow = storage.find_single_flow_by_id(flow_id).await?;

        if let Some(flow) = &flow {
            self.inner.insert(flow.id, flow.clone()).await;
        }

        Ok(flow)
    }

    /// Drop a flow from the cache after a mutation
    pub async fn invalidate(&self, flow_id: &Uuid) {
        self.inner.invalidate(flow_id).await;
    }
}
