//! Membership API management
//!
//! The participant routes of a shared flow: listing, inviting, and the
//! accept/decline side of the invitation lifecycle. Bulk membership edits go
//! through the flow update endpoint instead.

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::flows::FlowCache;
use crate::membership::accept;
use crate::membership::decline;
use crate::membership::invite;
use crate::membership::Participant;
use crate::membership::ParticipantRole;
use crate::membership::Principal;
use crate::storage::Storage;

use super::flows::access_role;
use super::flows::fetch_flow;
use super::flows::require_owner;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// The participant response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    /// The user ID, for registered participants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    /// The email address, for invitees without an account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Owner, member or pending
    pub role: ParticipantRole,

    /// Up to when the participant has read the flow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<NaiveDateTime>,

    /// When the participant row was created
    pub created_at: NaiveDateTime,
}

impl ParticipantResponse {
    /// Create a participant response from a [`Participant`](Participant)
    fn from_participant(participant: Participant) -> Self {
        let (user_id, email) = match participant.principal {
            Principal::User(user_id) => (Some(user_id), None),
            Principal::Email(email) => (None, Some(email)),
        };

        Self {
            user_id,
            email,
            role: participant.role,
            last_read_at: participant.last_read_at,
            created_at: participant.created_at,
        }
    }

    /// Create participant responses from multiple [`Participant`](Participant)s
    pub(super) fn from_participant_multiple(mut participants: Vec<Participant>) -> Vec<Self> {
        participants
            .drain(..)
            .map(Self::from_participant)
            .collect::<Vec<Self>>()
    }
}

/// List all participants of a flow, including the owner
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/members
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "userId": "<uuid>", "role": "owner", ... } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<Vec<ParticipantResponse>>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let participants = storage.find_all_participants(&flow_id).await?;

    Ok(Success::ok(ParticipantResponse::from_participant_multiple(
        participants,
    )))
}

/// Invite form
///
/// Exactly one of `userId` and `email` must be provided
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteForm {
    /// The user to invite
    user_id: Option<Uuid>,
    /// The email address to invite, for people without an account
    email: Option<String>,
}

/// Invite a single principal based on the [`InviteForm`](InviteForm) form
///
/// Only the owner can invite. The invitee starts out as `pending` and has to
/// accept before gaining access; an email invitee additionally has to sign
/// up first.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "email": "outsider@example.com" }' \
///     http://localhost:6000/api/flows/<uuid>/members
/// ```
///
/// Response:
/// ```json
/// { "data": { "email": "outsider@example.com", "role": "pending", ... } }
/// ```
pub async fn invite_member<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
    Form(form): Form<InviteForm>,
) -> Result<Success<ParticipantResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    // outsiders get a not found, members a forbidden
    access_role(&storage, &flow, &current_user.id).await?;
    require_owner(&flow, &current_user.id)?;

    if !flow.kind.has_participants() {
        return Err(Error::bad_request("A personal flow has no members"));
    }

    let principal = match (form.user_id, form.email) {
        (Some(user_id), None) => Principal::User(user_id),
        (None, Some(email)) => Principal::Email(email),
        _ => {
            return Err(Error::bad_request(
                "Provide either a user ID or an email address",
            ))
        }
    };

    let result = invite(&storage, &flow, principal.clone()).await;

    // the invite bumped the membership revision held by the cached flow
    cache.invalidate(&flow_id).await;
    result?;

    let participants = storage.find_all_participants(&flow_id).await?;

    let participant = participants
        .into_iter()
        .find(|participant| participant.principal == principal)
        .map_or_else(
            || Err(Error::internal_server_error("Could not find invitation")),
            Ok,
        )?;

    Ok(Success::created(ParticipantResponse::from_participant(
        participant,
    )))
}

/// Accept a pending invitation to a flow
///
/// Transitions the caller's invitation to full membership; from here on the
/// flow shows up in their listing and unread counts are tracked. Accepting
/// an already accepted invitation is a no-op.
///
/// Request:
/// ```sh
/// curl -v -XPOST \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/members/accept
/// ```
pub async fn accept_invitation<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    accept(&storage, &flow_id, &current_user.id).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Decline a pending invitation to a flow, removing it
///
/// Request:
/// ```sh
/// curl -v -XPOST \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/members/decline
/// ```
pub async fn decline_invitation<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    decline(&storage, &flow_id, &current_user.id).await?;

    Ok(Success::<&'static str>::no_content())
}
