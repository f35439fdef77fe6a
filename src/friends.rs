//! Friend relations
//!
//! Friendships are established through a request/accept handshake and stored
//! as a symmetric pair of one-directional rows. The friend list is the
//! suggestion source for membership invites; the membership store does not
//! own it.

use chrono::naive::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

/// State of a friend request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Clone, Debug)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
}

/// One direction of a friendship
///
/// Accepting a request creates both directions; unfriending deletes both.
#[derive(Clone, Debug)]
pub struct Friendship {
    pub user_id: Uuid,
    pub friend_id: Uuid,
}
