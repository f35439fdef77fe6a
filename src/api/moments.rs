//! Moment API management

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::flows::FlowCache;
use crate::moments::generate_snippet;
use crate::moments::Moment;
use crate::read_marker::ReadMarker;
use crate::storage::CreateMomentValues;
use crate::storage::Storage;
use crate::storage::UpdateMomentValues;

use super::flows::access_role;
use super::flows::fetch_flow;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// The default title of a moment created without one
const DEFAULT_TITLE: &str = "Untitled Moment";

/// The moment response information
///
/// The full content is only included when a single moment is fetched; the
/// listing serves the derived snippet instead.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentResponse {
    /// The moment ID
    pub id: Uuid,

    /// The flow the moment belongs to
    pub flow_id: Uuid,

    /// The author of the moment
    pub user_id: Uuid,

    /// The title of the moment
    pub title: String,

    /// The derived plain-text snippet
    pub snippet: String,

    /// The rich text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// When the moment was created
    pub created_at: NaiveDateTime,

    /// When the moment was last updated
    pub updated_at: NaiveDateTime,
}

impl MomentResponse {
    /// Create a moment response from a [`Moment`](Moment), without its content
    fn from_moment(moment: Moment) -> Self {
        Self {
            id: moment.id,
            flow_id: moment.flow_id,
            user_id: moment.user_id,
            title: moment.title,
            snippet: moment.snippet,
            content: None,
            created_at: moment.created_at,
            updated_at: moment.updated_at,
        }
    }

    /// Create a moment response from a [`Moment`](Moment), content included
    fn from_moment_with_content(moment: Moment) -> Self {
        let content = moment.content.clone();

        let mut response = Self::from_moment(moment);
        response.content = Some(content);

        response
    }

    /// Create moment responses from multiple [`Moment`](Moment)s
    fn from_moment_multiple(mut moments: Vec<Moment>) -> Vec<Self> {
        moments
            .drain(..)
            .map(Self::from_moment)
            .collect::<Vec<Self>>()
    }
}

/// List all moments of a flow, most recently created first
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/moments
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": "<uuid>", "title": "First entry", "snippet": "...", ... } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
) -> Result<Success<Vec<MomentResponse>>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let moments = storage.find_all_moments_by_flow(&flow_id).await?;

    Ok(Success::ok(MomentResponse::from_moment_multiple(moments)))
}

/// Create moment form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMomentForm {
    /// Optional title, defaults to "Untitled Moment"
    title: Option<String>,
    /// Optional rich text content
    content: Option<String>,
}

/// Create a moment based on the [`CreateMomentForm`](CreateMomentForm) form
///
/// The snippet is derived from the content here and on every later content
/// change; it is never submitted by the client.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "First entry", "content": "<p>Dear diary</p>" }' \
///     http://localhost:6000/api/flows/<uuid>/moments
/// ```
///
/// Response
/// ```json
/// { "data": { "id": "<uuid>", "title": "First entry", "snippet": "Dear diary", ... } }
/// ```
pub async fn create<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters(flow_id): PathParameters<Uuid>,
    Form(form): Form<CreateMomentForm>,
) -> Result<Success<MomentResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let title = form.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let content = form.content.as_deref().unwrap_or("");
    let snippet = generate_snippet(content);

    let values = CreateMomentValues {
        flow_id: &flow_id,
        user_id: &current_user.id,
        title,
        content,
        snippet: &snippet,
    };

    let moment = storage.create_moment(&values).await?;

    Ok(Success::created(MomentResponse::from_moment_with_content(
        moment,
    )))
}

/// Get a single moment, content included
///
/// Viewing someone else's moment in a shared flow schedules a deferred read
/// mark: after a short dwell the viewer's read position on the flow
/// advances, clearing the moment from their unread count.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/moments/<uuid>
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "title": "First entry", "content": "<p>Dear diary</p>", ... } }
/// ```
pub async fn single<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    Extension(read_marker): Extension<ReadMarker<S>>,
    current_user: CurrentUser<S>,
    PathParameters((flow_id, moment_id)): PathParameters<(Uuid, Uuid)>,
) -> Result<Success<MomentResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let moment = fetch_moment(&storage, &flow_id, &moment_id).await?;

    if flow.kind.has_participants() && moment.user_id != current_user.id {
        read_marker.schedule(flow_id, current_user.id).await;
    }

    Ok(Success::ok(MomentResponse::from_moment_with_content(
        moment,
    )))
}

/// Update moment form
///
/// Both fields are optional, only the provided ones are updated
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMomentForm {
    /// New (optional) title
    title: Option<String>,
    /// New (optional) content
    content: Option<String>,
}

/// Update a moment based on the [`UpdateMomentForm`](UpdateMomentForm) form
///
/// Only the author can edit a moment. A content change regenerates the
/// snippet.
///
/// Request:
/// ```sh
/// curl -v -XPATCH -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "content": "<p>Dear diary, again</p>" }' \
///     http://localhost:6000/api/flows/<uuid>/moments/<uuid>
/// ```
pub async fn update<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters((flow_id, moment_id)): PathParameters<(Uuid, Uuid)>,
    Form(form): Form<UpdateMomentForm>,
) -> Result<Success<MomentResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let moment = fetch_moment(&storage, &flow_id, &moment_id).await?;

    if moment.user_id != current_user.id {
        return Err(Error::forbidden("Only the author can edit a moment"));
    }

    let snippet = form.content.as_deref().map(generate_snippet);

    let values = UpdateMomentValues {
        title: form.title.as_ref(),
        content: form.content.as_ref(),
        snippet,
    };

    let moment = storage.update_moment(&moment, &values).await?;

    Ok(Success::ok(MomentResponse::from_moment_with_content(
        moment,
    )))
}

/// Duplicate a moment into the same flow
///
/// The copy gets " (copy)" appended to its title, a freshly derived snippet,
/// and the current user as its author.
///
/// Request:
/// ```sh
/// curl -v -XPOST \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/moments/<uuid>/duplicate
/// ```
pub async fn duplicate<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters((flow_id, moment_id)): PathParameters<(Uuid, Uuid)>,
) -> Result<Success<MomentResponse>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let moment = fetch_moment(&storage, &flow_id, &moment_id).await?;

    let title = format!("{} (copy)", moment.title);
    let snippet = generate_snippet(&moment.content);

    let values = CreateMomentValues {
        flow_id: &flow_id,
        user_id: &current_user.id,
        title: &title,
        content: &moment.content,
        snippet: &snippet,
    };

    let copy = storage.create_moment(&values).await?;

    Ok(Success::created(MomentResponse::from_moment_with_content(
        copy,
    )))
}

/// Delete a moment
///
/// The author can delete their own moments; the flow owner can delete any
/// moment in the flow.
///
/// Request:
/// ```sh
/// curl -v -XDELETE \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/flows/<uuid>/moments/<uuid>
/// ```
pub async fn delete<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(cache): Extension<FlowCache>,
    current_user: CurrentUser<S>,
    PathParameters((flow_id, moment_id)): PathParameters<(Uuid, Uuid)>,
) -> Result<Success<&'static str>, Error> {
    let flow = fetch_flow(&storage, &cache, &flow_id).await?;

    access_role(&storage, &flow, &current_user.id).await?;

    let moment = fetch_moment(&storage, &flow_id, &moment_id).await?;

    if moment.user_id != current_user.id && flow.user_id != current_user.id {
        return Err(Error::forbidden(
            "Only the author or the flow owner can delete a moment",
        ));
    }

    storage.delete_moment(&moment).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Fetch a moment of a flow from storage
async fn fetch_moment<S: Storage>(
    storage: &S,
    flow_id: &Uuid,
    moment_id: &Uuid,
) -> Result<Moment, Error> {
    storage
        .find_single_moment_by_id(flow_id, moment_id)
        .await?
        .map_or_else(|| Err(Error::not_found("Moment not found")), Ok)
}
