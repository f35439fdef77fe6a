//! Flow API management

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::flows::Flow;
use crate::flows::FlowCache;
use crate::flows::FlowKind;
use crate::flows::FlowSummary;
use crate::membership::reconcile;
use crate::membership::DesiredMembership;
use crate::membership::ParticipantRole;
use crate::storage::CreateFlowValues;
use crate::storage::Storage;
use crate::storage::UpdateFlowValues;

use super::members::ParticipantResponse;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// The flow response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResponse {
    /// The flow ID
    pub id: Uuid,

    /// The owner of the flow
    pub user_id: Uuid,

    /// The title of the flow
    pub title: String,

    /// The bio of the flow
    pub bio: String,

    /// Personal, shared or couple
    pub kind: FlowKind,

    /// The tag set of the flow
    pub tags: Vec<String>,

    /// Echoed back so edits can detect concurrent membership changes
    pub membership_revision: i64,

    /// When the flow was created
    pub created_at: NaiveDateTime,

    /// When the flow was last updated
    pub updated_at: NaiveDateTime,

    /// The participants, for shared/couple flows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<ParticipantResponse>>,
}

impl FlowResponse {
    /// Create a flow response from a [`Flow`](Flow)
    fn from_flow(flow: Flow) -> Self {
        Self {
            id: flow.id,
            user_id: flow.user_id,
            title: flow.title,
            bio: flow.bio,
            kind: flow.kind,
            tags: flow.tags,
            membership_revision: flow.membership_revision,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
            members: None,
        }
    }

    /// Add the participant list to the flow response
    fn set_members(&mut self, members: Vec<ParticipantResponse>) {
        self.members = Some(members);
    }
}

/// An aggregated flow, as listed on the overview
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummaryResponse {
    /// The flow ID
    pub id: Uuid,

    /// The title of the flow
    pub title: String,

    /// The bio of the flow
    pub bio: String,

    /// Personal, shared or couple
    pub kind: FlowKind,

    /// The tag set of the flow
    pub tags: Vec<String>,

    /// The role of the requesting user in this flow
    pub role: ParticipantRole,

    /// How many moments the flow holds
    pub moment_count: usize,

    /// When the most recently updated moment was updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<NaiveDateTime>,

    /// Moments updated since the requesting user last read the flow
    pub unread_count: usize,
}

impl FlowSummaryResponse {
    /// Create a summary response from a [`FlowSummary`](FlowSummary)
    fn from_summary(summary: FlowSummary) -> Self {
        Self {
            id: summary.flow.id,
            title: summary.flow.title,
            bio: summary.flow.bio,
            kind: summary.flow.kind,
            tags: summary.flow.tags,
            role: summary.role,
            moment_count: summary.moment_count,
            last_activity: summary.last_activity,
            unread_count: summary.unread_count,
        }
    }

    /// Create summary responses from multiple [`FlowSummary`](FlowSummary)s
    fn from_summary_multiple(mut summaries: Vec<FlowSummary>) -> Vec<Self> {
        summaries
            .drain(..)
            .map(Self::from_summary)
            .collect::<Vec<Self>>()
    }
}

/// List all flows of the current user
///
/// Includes flows the user owns and shared flows the user participates in,
/// with the moment count, last activity and unread count per flow, most
/// recently active first.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": "<uuid>", "title": "Our travels", "unreadCount": 2, ... } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<FlowSummaryResponse>>, Error> {
    let summaries = storage.find_flow_summaries_by_user(&current_user.id).await?;

    Ok(Success::ok(FlowSummaryResponse::from_summary_multiple(
        summaries,
    )))
}

/// Create flow form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowForm {
    /// Title of the new flow
    title: String,
    /// Optional bio of the new flow
    bio: Option<String>,
    /// Personal, shared or couple
    kind: FlowKind,
    /// Optional tag set
    tags: Option<Vec<String>>,
    /// Users to invite right away, for shared/couple flows
    member_ids: Option<Vec<Uuid>>,
    /// Email addresses to invite right away, for shared/couple flows
    invite_emails: Option<Vec<String>>,
}

/// Create a flow based on the [`CreateFlowForm`](CreateFlowForm) form
///
/// For shared/couple flows the given members and email addresses are invited
/// immediately; they all start out as `pending`.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Our travels", "kind": "shared", "memberIds": ["<uuid>"] }' \
///     http://localhost:6000/api/flows
/// ```
///
/// Response
/// ```json
/// { "data": { "id": "<uuid>", "title": "Our travels", "kind": "shared", ... } }
/// ```
pub async fn create<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    Form(form): Form<CreateFlowForm>,
) -> Result<Success<FlowResponse>, Error> {
    let desired = DesiredMembership {
        user_ids: form.member_ids.unwrap_or_default(),
        emails: form.invite_emails.unwrap_or_default(),
    };

    if !form.kind.has_participants() && !(desired.user_ids.is_empty() && desired.emails.is_empty())
    {
        return Err(Error::bad_request("A personal flow has no members"));
    }

    let values = CreateFlowValues {
        user_id: &current_user.id,
        title: &form.title,
        bio: form.bio.as_deref().unwrap_or(""),
        kind: form.kind,
        tags: form.tags.as_deref().unwrap_or(&[]),
    };

    let mut flow = storage.create_flow(&values).await?;

    if form.kind.has_participants() {
        reconcile(&storage, &flow, &desired).await?;

        // the reconciliation bumped the membership revision
        flow = fetch_flow_uncached(&storage, &flow.id).await?;
    }

    let mut response = FlowResponse::from_flow(flow);

    if form.kind.has_participants() {
        let participants = storage.find_all_participants(&response.id).await?;
        response.set_members(ParticipantResponse::from_participant_multiple(
            participants,
        ));
    }

    Ok(Success::created(response))
}

/// Get a single flow, including its participants
///
/// Only accessible to the owner and accepted members; a pending invitee has
/// to accept first.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "title": "Our travels", "members": [ ... ] } }
/// ```
pub async fn single<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<FlowResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let has_participants = flow.kind.has_participants();
    let mut response = FlowResponse::from_flow(flow);

    if has_participants {
        let participants = storage.find_all_participants(&flow_id).await?;
        response.set_members(ParticipantResponse::from_participant_multiple(
            participants,
        ));
    }

    Ok(Success::ok(response))
}

/// Update flow form
///
/// All fields are optional, only the provided ones are updated
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlowForm {
    /// New (optional) title
    title: Option<String>,
    /// New (optional) bio
    bio: Option<String>,
    /// New (optional) tag set
    tags: Option<Vec<String>>,
    /// New (optional) member list, replacing the current one
    member_ids: Option<Vec<Uuid>>,
    /// New (optional) email invite list, replacing the current one
    invite_emails: Option<Vec<String>>,
}

/// Update a flow based on the [`UpdateFlowForm`](UpdateFlowForm) form
///
/// Only the owner can update a flow. When `memberIds` or `inviteEmails` is
/// provided the participant set is reconciled against it: missing principals
/// are invited, principals no longer listed are removed. The owner is
/// implicit and never touched. A concurrent membership change surfaces as a
/// conflict; reload the flow and retry.
///
/// Request:
/// ```sh
/// curl -v -XPATCH -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Our hikes", "memberIds": [] }' \
///     http://localhost:6000/api/flows/<uuid>
/// ```
pub async fn update<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
    Form(form): Form<UpdateFlowForm>,
) -> Result<Success<FlowResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    // outsiders get a not found, members a forbidden
    access_role(&storage, &flow, &current_user.id).await?;
    require_owner(&flow, &current_user.id)?;

    let values = UpdateFlowValues {
        title: form.title.as_ref(),
        bio: form.bio.as_ref(),
        tags: form.tags.as_ref(),
    };

    let mut flow = storage.update_flow(&flow, &values).await?;

    let edits_membership = form.member_ids.is_some() || form.invite_emails.is_some();

    if edits_membership {
        if !flow.kind.has_participants() {
            cache.invalidate(&flow_id).await;

            return Err(Error::bad_request("A personal flow has no members"));
        }

        let desired = DesiredMembership {
            user_ids: form.member_ids.unwrap_or_default(),
            emails: form.invite_emails.unwrap_or_default(),
        };

        let result = reconcile(&storage, &flow, &desired).await;

        cache.invalidate(&flow_id).await;
        result?;

        flow = fetch_flow_uncached(&storage, &flow_id).await?;
    } else {
        cache.invalidate(&flow_id).await;
    }

    let has_participants = flow.kind.has_participants();
    let mut response = FlowResponse::from_flow(flow);

    if has_participants {
        let participants = storage.find_all_participants(&flow_id).await?;
        response.set_members(ParticipantResponse::from_participant_multiple(
            participants,
        ));
    }

    Ok(Success::ok(response))
}

/// Delete a flow, including its moments and participant rows
///
/// Only the owner can delete a flow.
///
/// Request:
/// ```sh
/// curl -v -XDELETE \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>
/// ```
pub async fn delete<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    // outsiders get a not found, members a forbidden
    access_role(&storage, &flow, &current_user.id).await?;
    require_owner(&flow, &current_user.id)?;

    storage.delete_flow(&flow).await?;

    cache.invalidate(&flow_id).await;

    Ok(Success::<&'static str>::no_content())
}

/// List the distinct tags across all flows of the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/tags
/// ```
///
/// Response:
/// ```json
/// { "data": [ "travel", "food" ] }
/// ```
pub async fn tags<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<String>>, Error> {
    let tags = storage.find_all_tags_by_user(&current_user.id).await?;

    Ok(Success::ok(tags))
}

/// Fetch a flow from storage, through the cache
pub(super) async fn fetch_flow<S: Storage>(
    storage: &S,
    cache: &FlowCache,
    flow_id: &Uuid,
) -> Result<Flow, Error> {
    cache
        .fetch(storage, flow_id)
        .await?
        .map_or_else(|| Err(Error::not_found("Flow not found")), Ok)
}

/// Fetch a flow from storage, bypassing the cache
async fn fetch_flow_uncached<S: Storage>(storage: &S, flow_id: &Uuid) -> Result<Flow, Error> {
    storage
        .find_single_flow_by_id(flow_id)
        .await?
        .map_or_else(|| Err(Error::not_found("Flow not found")), Ok)
}

/// The role that grants the user access to the flow's content
///
/// Outsiders get the same not found as a missing flow, so flow IDs leak
/// nothing. A pending invitee knows the flow exists but has to accept first.
pub(super) async fn access_role<S: Storage>(
    storage: &S,
    flow: &Flow,
    user_id: &Uuid,
) -> Result<ParticipantRole, Error> {
    if !flow.kind.has_participants() {
        return if &flow.user_id == user_id {
            Ok(ParticipantRole::Owner)
        } else {
            Err(Error::not_found("Flow not found"))
        };
    }

    let participant = storage.find_single_participant(&flow.id, user_id).await?;

    match participant {
        Some(participant) if participant.role == ParticipantRole::Pending => Err(Error::forbidden(
            "You need to accept the invite to access this shared flow",
        )),
        Some(participant) => Ok(participant.role),
        None => Err(Error::not_found("Flow not found")),
    }
}

/// Check that the user owns the flow
pub(super) fn require_owner(flow: &Flow, user_id: &Uuid) -> Result<(), Error> {
    if &flow.user_id == user_id {
        Ok(())
    } else {
        Err(Error::forbidden("Only the owner can manage this flow"))
    }
}
