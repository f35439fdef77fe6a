//! All things related to the storage of users, flows, moments and friends

use async_trait::async_trait;
use chrono::naive::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::flows::Flow;
use crate::flows::FlowKind;
use crate::flows::FlowSummary;
use crate::friends::FriendRequest;
use crate::membership::Participant;
use crate::membership::Principal;
use crate::moments::Moment;
use crate::users::User;

#[cfg(feature = "postgres")]
use postgres::Postgres;

pub mod memory;
#[cfg(feature = "postgres")]
mod postgres;

/// Setup the storage
#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
pub async fn setup() -> memory::Memory {
    memory::Memory::new()
}

/// Setup the storage
#[cfg(feature = "postgres")]
pub async fn setup() -> Postgres {
    Postgres::new().await
}

/// Storage errors
///
/// Next to the plain connection error this carries the membership error
/// taxonomy; those variants are produced by the invitation lifecycle and
/// the reconciliation in [`crate::membership`].
#[derive(Debug, Error)]
pub enum Error {
    /// A connection error with the storage
    #[error("Connection error: {0}")]
    Connection(String),

    /// Accept/decline attempted without a matching pending row
    #[error("No pending invitation for user {user_id} on flow {flow_id}")]
    NotInvited {
        /// The flow the invitation was expected on
        flow_id: Uuid,
        /// The user without an invitation
        user_id: Uuid,
    },

    /// Invite attempted against a principal that already is a member/owner
    #[error("Already a member of this flow")]
    AlreadyMember(Principal),

    /// Invite attempted against a principal with a pending row
    #[error("An invitation for this flow is already pending")]
    AlreadyPending(Principal),

    /// A membership batch was rejected or partially applied
    ///
    /// Carries every principal of the failed batch; nothing is rolled back,
    /// re-running the reconciliation converges.
    #[error("A membership batch failed for {} principal(s)", principals.len())]
    PartialBatchFailure {
        /// The principals the failed batch covered
        principals: Vec<Principal>,
    },

    /// The membership changed since the caller read it
    #[error("Membership changed concurrently (expected revision {expected}, found {actual})")]
    StaleRevision {
        /// The revision the caller read
        expected: i64,
        /// The revision the storage holds
        actual: i64,
    },
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create a User
pub struct CreateUserValues<'a> {
    /// The initial session ID for the user
    pub session_id: &'a Uuid,

    /// The username
    pub username: &'a str,

    /// The email address, also used to claim email invitations
    pub email: &'a str,

    /// The hashed password
    pub hashed_password: &'a str,
}

/// Values to change a password of a user
pub struct ChangePasswordValues<'a> {
    /// New session ID to invalidate current tokens
    pub session_id: &'a Uuid,

    /// The new hashed password
    pub hashed_password: &'a str,
}

/// Values to create a Flow
pub struct CreateFlowValues<'a> {
    /// The owner of the flow
    pub user_id: &'a Uuid,

    /// The title of the flow
    pub title: &'a str,

    /// The bio of the flow
    pub bio: &'a str,

    /// Personal, shared or couple
    pub kind: FlowKind,

    /// The tag set of the flow
    pub tags: &'a [String],
}

/// Values to update a Flow
pub struct UpdateFlowValues<'a> {
    /// New (optional) title
    pub title: Option<&'a String>,

    /// New (optional) bio
    pub bio: Option<&'a String>,

    /// New (optional) tag set
    pub tags: Option<&'a Vec<String>>,
}

/// Values to create a Moment
pub struct CreateMomentValues<'a> {
    /// The flow the moment belongs to
    pub flow_id: &'a Uuid,

    /// The author of the moment
    pub user_id: &'a Uuid,

    /// The title of the moment
    pub title: &'a str,

    /// Rich text content
    pub content: &'a str,

    /// The derived snippet, see [`crate::moments::generate_snippet`]
    pub snippet: &'a str,
}

/// Values to update a Moment
pub struct UpdateMomentValues<'a> {
    /// New (optional) title
    pub title: Option<&'a String>,

    /// New (optional) content
    pub content: Option<&'a String>,

    /// The snippet derived from the new content
    ///
    /// Always present when `content` is
    pub snippet: Option<String>,
}

/// Storage with all supported operations
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    /// Finds a single user by its username
    async fn find_single_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Finds a single user by its email address
    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Finds a single user by its ID
    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>>;

    /// Create a single user
    async fn create_user(&self, values: &CreateUserValues) -> Result<User>;

    /// Change the password of a user
    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User>;

    /// Create a flow
    ///
    /// For shared/couple flows the creator's own participant row is inserted
    /// here with role `owner`; it is the only place an owner row is ever
    /// created.
    async fn create_flow(&self, values: &CreateFlowValues) -> Result<Flow>;

    /// Find a single flow by ID
    async fn find_single_flow_by_id(&self, id: &Uuid) -> Result<Option<Flow>>;

    /// Find every flow a user owns or participates in, with aggregated
    /// moment count, last activity and the user's unread count
    ///
    /// Ordered by last activity, most recent first.
    async fn find_flow_summaries_by_user(&self, user_id: &Uuid) -> Result<Vec<FlowSummary>>;

    /// Update the title/bio/tags of a flow
    async fn update_flow(&self, flow: &Flow, values: &UpdateFlowValues) -> Result<Flow>;

    /// Delete a flow, cascading into its moments and participant rows
    async fn delete_flow(&self, flow: &Flow) -> Result<()>;

    /// The distinct tags across all flows of a user
    async fn find_all_tags_by_user(&self, user_id: &Uuid) -> Result<Vec<String>>;

    /// Find every participant row of a flow, including the owner
    async fn find_all_participants(&self, flow_id: &Uuid) -> Result<Vec<Participant>>;

    /// Find the participant row of a user on a flow
    async fn find_single_participant(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Participant>>;

    /// Insert `pending` rows for the given principals
    ///
    /// Scoped to one flow. Fails with [`Error::StaleRevision`] when
    /// `expected_revision` no longer matches the flow's membership revision;
    /// returns the new revision otherwise.
    async fn add_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64>;

    /// Delete the rows matching the given principals
    ///
    /// Never removes an owner row; callers filter the owner out before
    /// invoking, the reconciliation diff does so by construction. Same
    /// revision check as [`Storage::add_participants`].
    async fn remove_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64>;

    /// Transition a `pending` row to `member`, starting read tracking at `at`
    async fn accept_invitation(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
        at: NaiveDateTime,
    ) -> Result<Participant>;

    /// Delete a `pending` row
    async fn decline_invitation(&self, flow_id: &Uuid, user_id: &Uuid) -> Result<()>;

    /// Re-key `pending` rows held by a bare email to a fresh user ID
    ///
    /// Called at signup; the rows stay `pending`, accepting is still up to
    /// the new user. Returns the number of claimed rows.
    async fn claim_email_invitations(&self, email: &str, user_id: &Uuid) -> Result<u64>;

    /// Record that a member has read a flow up to `at`
    async fn mark_read(&self, flow_id: &Uuid, user_id: &Uuid, at: NaiveDateTime) -> Result<()>;

    /// Create a moment
    async fn create_moment(&self, values: &CreateMomentValues) -> Result<Moment>;

    /// Find all moments of a flow, most recently created first
    async fn find_all_moments_by_flow(&self, flow_id: &Uuid) -> Result<Vec<Moment>>;

    /// Find a single moment of a flow
    async fn find_single_moment_by_id(
        &self,
        flow_id: &Uuid,
        moment_id: &Uuid,
    ) -> Result<Option<Moment>>;

    /// Update a moment
    async fn update_moment(&self, moment: &Moment, values: &UpdateMomentValues) -> Result<Moment>;

    /// Delete a moment
    async fn delete_moment(&self, moment: &Moment) -> Result<()>;

    /// Find all friends of a user
    async fn find_all_friends(&self, user_id: &Uuid) -> Result<Vec<User>>;

    /// Find the pending friend requests sent to a user
    async fn find_incoming_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>>;

    /// Find the pending friend requests sent by a user
    async fn find_sent_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>>;

    /// Find a single friend request by its ID
    async fn find_single_friend_request_by_id(&self, id: &Uuid) -> Result<Option<FriendRequest>>;

    /// Create a pending friend request
    async fn create_friend_request(
        &self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<FriendRequest>;

    /// Accept a friend request, creating both friendship rows
    async fn accept_friend_request(&self, request: &FriendRequest) -> Result<()>;

    /// Decline a friend request
    async fn decline_friend_request(&self, request: &FriendRequest) -> Result<()>;

    /// Delete both rows of a friendship
    async fn remove_friendship(&self, user_id: &Uuid, friend_id: &Uuid) -> Result<()>;
}
