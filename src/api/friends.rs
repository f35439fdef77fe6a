//! Friends API management
//!
//! The request/accept handshake and the resulting friend list. The friend
//! list is where the membership invite suggestions come from.

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::friends::FriendRequest;
use crate::friends::RequestStatus;
use crate::storage::Storage;
use crate::users::User;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// The friend response information
#[derive(Debug, Serialize)]
pub struct FriendResponse {
    /// The user ID of the friend
    pub id: Uuid,

    /// The username of the friend
    pub username: String,

    /// The email address of the friend, usable for membership invites
    pub email: String,
}

impl FriendResponse {
    /// Create a friend response from a [`User`](User)
    fn from_user(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }

    /// Create friend responses from multiple [`User`](User)s
    fn from_user_multiple(mut users: Vec<User>) -> Vec<Self> {
        users.drain(..).map(Self::from_user).collect::<Vec<Self>>()
    }
}

/// The friend request response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestResponse {
    /// The request ID
    pub id: Uuid,

    /// Who sent the request
    pub sender_id: Uuid,

    /// Who the request was sent to
    pub receiver_id: Uuid,

    /// Pending, accepted or declined
    pub status: RequestStatus,

    /// When the request was sent
    pub created_at: NaiveDateTime,
}

impl FriendRequestResponse {
    /// Create a friend request response from a [`FriendRequest`](FriendRequest)
    fn from_request(request: FriendRequest) -> Self {
        Self {
            id: request.id,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            status: request.status,
            created_at: request.created_at,
        }
    }

    /// Create friend request responses from multiple [`FriendRequest`](FriendRequest)s
    fn from_request_multiple(mut requests: Vec<FriendRequest>) -> Vec<Self> {
        requests
            .drain(..)
            .map(Self::from_request)
            .collect::<Vec<Self>>()
    }
}

/// The pending friend requests of a user, both directions
#[derive(Debug, Serialize)]
pub struct RequestsResponse {
    /// Requests sent to the user
    pub incoming: Vec<FriendRequestResponse>,

    /// Requests sent by the user
    pub sent: Vec<FriendRequestResponse>,
}

/// List all friends of the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/friends
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": "<uuid>", "username": "maud", "email": "maud@example.com" } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<FriendResponse>>, Error> {
    let friends = storage.find_all_friends(&current_user.id).await?;

    Ok(Success::ok(FriendResponse::from_user_multiple(friends)))
}

/// List the pending friend requests of the current user, both directions
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/friends/requests
/// ```
///
/// Response:
/// ```json
/// { "data": { "incoming": [ ... ], "sent": [ ... ] } }
/// ```
pub async fn requests<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<RequestsResponse>, Error> {
    let incoming = storage
        .find_incoming_friend_requests(&current_user.id)
        .await?;

    let sent = storage.find_sent_friend_requests(&current_user.id).await?;

    Ok(Success::ok(RequestsResponse {
        incoming: FriendRequestResponse::from_request_multiple(incoming),
        sent: FriendRequestResponse::from_request_multiple(sent),
    }))
}

/// Send request form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestForm {
    /// The username to befriend
    username: String,
}

/// Send a friend request based on the [`SendRequestForm`](SendRequestForm) form
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "username": "maud" }' \
///     http://localhost:6000/api/friends/requests
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "status": "pending", ... } }
/// ```
pub async fn send_request<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    Form(form): Form<SendRequestForm>,
) -> Result<Success<FriendRequestResponse>, Error> {
    let receiver = storage
        .find_single_user_by_username(&form.username)
        .await?
        .map_or_else(|| Err(Error::not_found("User not found")), Ok)?;

    if receiver.id == current_user.id {
        return Err(Error::bad_request("You cannot befriend yourself"));
    }

    let friends = storage.find_all_friends(&current_user.id).await?;

    if friends.iter().any(|friend| friend.id == receiver.id) {
        return Err(Error::bad_request("Already friends"));
    }

    let sent = storage.find_sent_friend_requests(&current_user.id).await?;
    let incoming = storage
        .find_incoming_friend_requests(&current_user.id)
        .await?;

    let already_pending = sent.iter().any(|request| request.receiver_id == receiver.id)
        || incoming.iter().any(|request| request.sender_id == receiver.id);

    if already_pending {
        return Err(Error::bad_request("A friend request is already pending"));
    }

    let request = storage
        .create_friend_request(&current_user.id, &receiver.id)
        .await?;

    Ok(Success::created(FriendRequestResponse::from_request(
        request,
    )))
}

/// Accept a friend request, establishing the friendship
///
/// Only the receiver of a request can accept it.
///
/// Request:
/// ```sh
/// curl -v -XPOST \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/friends/requests/<uuid>/accept
/// ```
pub async fn accept_request<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(request_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let request = fetch_request(&storage, &request_id, &current_user.id).await?;

    storage.accept_friend_request(&request).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Decline a friend request
///
/// Only the receiver of a request can decline it.
///
/// Request:
/// ```sh
/// curl -v -XPOST \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/friends/requests/<uuid>/decline
/// ```
pub async fn decline_request<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(request_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let request = fetch_request(&storage, &request_id, &current_user.id).await?;

    storage.decline_friend_request(&request).await?;

    Ok(Success::<&'static str>::no_content())
}

/// End a friendship, removing both directions
///
/// Request:
/// ```sh
/// curl -v -XDELETE \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/friends/<uuid>
/// ```
pub async fn unfriend<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(friend_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let friends = storage.find_all_friends(&current_user.id).await?;

    if !friends.iter().any(|friend| friend.id == friend_id) {
        return Err(Error::not_found("Friend not found"));
    }

    storage
        .remove_friendship(&current_user.id, &friend_id)
        .await?;

    Ok(Success::<&'static str>::no_content())
}

/// Fetch a pending friend request addressed to the current user
async fn fetch_request<S: Storage>(
    storage: &S,
    request_id: &Uuid,
    receiver_id: &Uuid,
) -> Result<FriendRequest, Error> {
    let request = storage
        .find_single_friend_request_by_id(request_id)
        .await?
        .map_or_else(|| Err(Error::not_found("Friend request not found")), Ok)?;

    if &request.receiver_id != receiver_id {
        return Err(Error::forbidden("This friend request is not for you"));
    }

    if request.status != RequestStatus::Pending {
        return Err(Error::bad_request("Friend request already handled"));
    }

    Ok(request)
}
