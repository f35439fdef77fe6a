//! Postgres storage

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::flows::Flow;
use crate::flows::FlowKind;
use crate::flows::FlowSummary;
use crate::friends::FriendRequest;
use crate::friends::RequestStatus;
use crate::membership::Participant;
use crate::membership::ParticipantRole;
use crate::membership::Principal;
use crate::moments::Moment;
use crate::users::User;

use super::ChangePasswordValues;
use super::CreateFlowValues;
use super::CreateMomentValues;
use super::CreateUserValues;
use super::Error;
use super::Result;
use super::Storage;
use super::UpdateFlowValues;
use super::UpdateMomentValues;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Postgres type for flow kind
#[derive(PartialEq, Debug, sqlx::Type)]
#[sqlx(type_name = "flow_kind_type")]
#[sqlx(rename_all = "kebab-case")]
enum FlowKindType {
    /// Personal
    Personal,

    /// Shared
    Shared,

    /// Couple
    Couple,
}

impl FlowKindType {
    /// Create flow kind type from kind
    fn from_kind(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Personal => Self::Personal,
            FlowKind::Shared => Self::Shared,
            FlowKind::Couple => Self::Couple,
        }
    }

    /// Create kind from flow kind type
    fn to_kind(&self) -> FlowKind {
        match self {
            Self::Personal => FlowKind::Personal,
            Self::Shared => FlowKind::Shared,
            Self::Couple => FlowKind::Couple,
        }
    }
}

/// Postgres type for participant role
#[derive(PartialEq, Debug, sqlx::Type)]
#[sqlx(type_name = "participant_role_type")]
#[sqlx(rename_all = "kebab-case")]
enum ParticipantRoleType {
    /// Owner
    Owner,

    /// Member
    Member,

    /// Pending
    Pending,
}

impl ParticipantRoleType {
    /// Create role from participant role type
    fn to_role(&self) -> ParticipantRole {
        match self {
            Self::Owner => ParticipantRole::Owner,
            Self::Member => ParticipantRole::Member,
            Self::Pending => ParticipantRole::Pending,
        }
    }
}

/// Postgres type for friend request status
#[derive(PartialEq, Debug, sqlx::Type)]
#[sqlx(type_name = "friend_request_status_type")]
#[sqlx(rename_all = "kebab-case")]
enum RequestStatusType {
    /// Pending
    Pending,

    /// Accepted
    Accepted,

    /// Declined
    Declined,
}

impl RequestStatusType {
    /// Create status from friend request status type
    fn to_status(&self) -> RequestStatus {
        match self {
            Self::Pending => RequestStatus::Pending,
            Self::Accepted => RequestStatus::Accepted,
            Self::Declined => RequestStatus::Declined,
        }
    }
}

/// Postgres storage
#[derive(Clone)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Create Postgres storage
    ///
    /// Use the `DATABASE_URL` environment variable
    ///
    /// Migrations will be run
    pub async fn new() -> Self {
        let database_connection_string = std::env::var("DATABASE_URL").expect("Valid DATABASE_URL");

        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_connection_string)
            .await
            .expect("Valid connection");

        Self::new_with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run
    pub async fn new_with_pool(connection_pool: PgPool) -> Self {
        let migration_result = MIGRATOR.run(&connection_pool).await;

        if let Err(err) = migration_result {
            panic!("Migrations could not run: {err}");
        }

        Self { connection_pool }
    }

    /// Bump the membership revision of a flow inside a transaction
    ///
    /// The conditional update is what detects concurrent membership edits:
    /// when the expected revision no longer matches, no row updates and the
    /// actual revision is reported back in the error.
    async fn bump_revision(
        transaction: &mut sqlx::PgTransaction<'_>,
        flow_id: &Uuid,
        expected_revision: i64,
    ) -> Result<i64> {
        let revision = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE flows
            SET membership_revision = membership_revision + 1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND membership_revision = $2
            RETURNING membership_revision
            ",
        )
        .bind(flow_id)
        .bind(expected_revision)
        .fetch_optional(&mut **transaction)
        .await
        .map_err(connection_error)?;

        if let Some(revision) = revision {
            return Ok(revision);
        }

        let actual = sqlx::query_scalar::<_, i64>(
            r"
            SELECT membership_revision
            FROM flows
            WHERE id = $1
            ",
        )
        .bind(flow_id)
        .fetch_optional(&mut **transaction)
        .await
        .map_err(connection_error)?
        .unwrap_or(expected_revision);

        Err(Error::StaleRevision {
            expected: expected_revision,
            actual,
        })
    }
}

/// Postgres version of user
#[derive(sqlx::FromRow)]
struct PostgresUser {
    /// User ID
    id: Uuid,

    /// Sessions ID
    session_id: Uuid,

    /// Username
    username: String,

    /// Email address
    email: String,

    /// Hashed password
    hashed_password: String,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,
}

impl User {
    /// Create user from postgres version
    fn from_postgres_user(user: PostgresUser) -> Self {
        Self {
            id: user.id,
            session_id: user.session_id,
            username: user.username,
            email: user.email,
            hashed_password: user.hashed_password,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }

    /// Maybe create user from postgres version
    fn from_postgres_user_optional(user: Option<PostgresUser>) -> Option<Self> {
        user.map(Self::from_postgres_user)
    }

    /// Create multiple user from postgres version
    fn from_postgres_user_multiple(mut users: Vec<PostgresUser>) -> Vec<Self> {
        users
            .drain(..)
            .map(Self::from_postgres_user)
            .collect::<Vec<Self>>()
    }
}

/// Postgres version of flow
#[derive(sqlx::FromRow)]
struct PostgresFlow {
    /// Flow ID
    id: Uuid,

    /// Owner ID
    user_id: Uuid,

    /// Title
    title: String,

    /// Bio
    bio: String,

    /// Flow kind
    kind: FlowKindType,

    /// Tag set
    tags: Vec<String>,

    /// Membership revision
    membership_revision: i64,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,
}

impl Flow {
    /// Create flow from postgres version
    fn from_postgres_flow(flow: PostgresFlow) -> Self {
        Self {
            id: flow.id,
            user_id: flow.user_id,
            title: flow.title,
            bio: flow.bio,
            kind: flow.kind.to_kind(),
            tags: flow.tags,
            membership_revision: flow.membership_revision,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
        }
    }

    /// Maybe create flow from postgres version
    fn from_postgres_flow_optional(flow: Option<PostgresFlow>) -> Option<Self> {
        flow.map(Self::from_postgres_flow)
    }
}

/// Postgres version of an aggregated flow summary row
#[derive(sqlx::FromRow)]
struct PostgresFlowSummary {
    /// Flow ID
    id: Uuid,

    /// Owner ID
    user_id: Uuid,

    /// Title
    title: String,

    /// Bio
    bio: String,

    /// Flow kind
    kind: FlowKindType,

    /// Tag set
    tags: Vec<String>,

    /// Membership revision
    membership_revision: i64,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,

    /// Role of the requesting user
    role: ParticipantRoleType,

    /// Number of moments in the flow
    moment_count: i64,

    /// When the most recently updated moment was updated
    last_activity: Option<NaiveDateTime>,

    /// Moments unread by the requesting user
    unread_count: i64,
}

impl FlowSummary {
    /// Create flow summary from postgres version
    fn from_postgres_summary(summary: PostgresFlowSummary) -> Self {
        Self {
            role: summary.role.to_role(),
            moment_count: usize::try_from(summary.moment_count).unwrap_or_default(),
            last_activity: summary.last_activity,
            unread_count: usize::try_from(summary.unread_count).unwrap_or_default(),
            flow: Flow {
                id: summary.id,
                user_id: summary.user_id,
                title: summary.title,
                bio: summary.bio,
                kind: summary.kind.to_kind(),
                tags: summary.tags,
                membership_revision: summary.membership_revision,
                created_at: summary.created_at,
                updated_at: summary.updated_at,
            },
        }
    }

    /// Create multiple flow summaries from postgres version
    fn from_postgres_summary_multiple(mut summaries: Vec<PostgresFlowSummary>) -> Vec<Self> {
        summaries
            .drain(..)
            .map(Self::from_postgres_summary)
            .collect::<Vec<Self>>()
    }
}

/// Postgres version of participant
#[derive(sqlx::FromRow)]
struct PostgresParticipant {
    /// Flow ID
    flow_id: Uuid,

    /// User ID, for registered participants
    user_id: Option<Uuid>,

    /// Email address, for invitees without an account
    email: Option<String>,

    /// Role
    role: ParticipantRoleType,

    /// Up to when the participant has read the flow
    last_read_at: Option<NaiveDateTime>,

    /// Creation date
    created_at: NaiveDateTime,
}

impl Participant {
    /// Create participant from postgres version
    ///
    /// A check constraint guarantees every row holds a user ID or an email.
    fn from_postgres_participant(participant: PostgresParticipant) -> Result<Self> {
        let principal = match (participant.user_id, participant.email) {
            (Some(user_id), _) => Principal::User(user_id),
            (None, Some(email)) => Principal::Email(email),
            (None, None) => {
                return Err(Error::Connection(format!(
                    "Participant row without principal on flow {}",
                    participant.flow_id
                )))
            }
        };

        Ok(Self {
            flow_id: participant.flow_id,
            principal,
            role: participant.role.to_role(),
            last_read_at: participant.last_read_at,
            created_at: participant.created_at,
        })
    }

    /// Create multiple participants from postgres version
    fn from_postgres_participant_multiple(
        participants: Vec<PostgresParticipant>,
    ) -> Result<Vec<Self>> {
        participants
            .into_iter()
            .map(Self::from_postgres_participant)
            .collect::<Result<Vec<Self>>>()
    }
}

/// Postgres version of moment
#[derive(sqlx::FromRow)]
struct PostgresMoment {
    /// Moment ID
    id: Uuid,

    /// Flow ID
    flow_id: Uuid,

    /// Author ID
    user_id: Uuid,

    /// Title
    title: String,

    /// Rich text content
    content: String,

    /// Derived snippet
    snippet: String,

    /// Creation date
    created_at: NaiveDateTime,

    /// Last updated at
    updated_at: NaiveDateTime,
}

impl Moment {
    /// Create moment from postgres version
    fn from_postgres_moment(moment: PostgresMoment) -> Self {
        Self {
            id: moment.id,
            flow_id: moment.flow_id,
            user_id: moment.user_id,
            title: moment.title,
            content: moment.content,
            snippet: moment.snippet,
            created_at: moment.created_at,
            updated_at: moment.updated_at,
        }
    }

    /// Maybe create moment from postgres version
    fn from_postgres_moment_optional(moment: Option<PostgresMoment>) -> Option<Self> {
        moment.map(Self::from_postgres_moment)
    }

    /// Create multiple moments from postgres version
    fn from_postgres_moment_multiple(mut moments: Vec<PostgresMoment>) -> Vec<Self> {
        moments
            .drain(..)
            .map(Self::from_postgres_moment)
            .collect::<Vec<Self>>()
    }
}

/// Postgres version of friend request
#[derive(sqlx::FromRow)]
struct PostgresFriendRequest {
    /// Request ID
    id: Uuid,

    /// Sender ID
    sender_id: Uuid,

    /// Receiver ID
    receiver_id: Uuid,

    /// Status
    status: RequestStatusType,

    /// Creation date
    created_at: NaiveDateTime,
}

impl FriendRequest {
    /// Create friend request from postgres version
    fn from_postgres_request(request: PostgresFriendRequest) -> Self {
        Self {
            id: request.id,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            status: request.status.to_status(),
            created_at: request.created_at,
        }
    }

    /// Maybe create friend request from postgres version
    fn from_postgres_request_optional(request: Option<PostgresFriendRequest>) -> Option<Self> {
        request.map(Self::from_postgres_request)
    }

    /// Create multiple friend requests from postgres version
    fn from_postgres_request_multiple(mut requests: Vec<PostgresFriendRequest>) -> Vec<Self> {
        requests
            .drain(..)
            .map(Self::from_postgres_request)
            .collect::<Vec<Self>>()
    }
}

/// All user columns
const USER_COLUMNS: &str = "id, session_id, username, email, hashed_password, created_at, updated_at";

/// All flow columns
const FLOW_COLUMNS: &str =
    "id, user_id, title, bio, kind, tags, membership_revision, created_at, updated_at";

#[async_trait]
impl Storage for Postgres {
    async fn find_single_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE username = $1
            LIMIT 1
            ",
        ))
        .bind(username)
        .fetch_optional(&self.connection_pool)
        .await
        .map(User::from_postgres_user_optional)
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email = $1
            LIMIT 1
            ",
        ))
        .bind(email)
        .fetch_optional(&self.connection_pool)
        .await
        .map(User::from_postgres_user_optional)
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id = $1
            LIMIT 1
            ",
        ))
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map(User::from_postgres_user_optional)
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn create_user(&self, values: &CreateUserValues) -> Result<User> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            INSERT INTO users (id, session_id, username, email, hashed_password)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            ",
        ))
        .bind(Uuid::new_v4())
        .bind(values.session_id)
        .bind(values.username)
        .bind(values.email)
        .bind(values.hashed_password)
        .fetch_one(&self.connection_pool)
        .await
        .map(User::from_postgres_user)
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User> {
        let user = sqlx::query_as::<_, PostgresUser>(&format!(
            r"
            UPDATE users
            SET session_id = $1, hashed_password = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            ",
        ))
        .bind(values.session_id)
        .bind(values.hashed_password)
        .bind(user.id)
        .fetch_one(&self.connection_pool)
        .await
        .map(User::from_postgres_user)
        .map_err(connection_error)?;

        Ok(user)
    }

    async fn create_flow(&self, values: &CreateFlowValues) -> Result<Flow> {
        let mut transaction = self.connection_pool.begin().await.map_err(connection_error)?;

        let flow = sqlx::query_as::<_, PostgresFlow>(&format!(
            r"
            INSERT INTO flows (id, user_id, title, bio, kind, tags)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {FLOW_COLUMNS}
            ",
        ))
        .bind(Uuid::new_v4())
        .bind(values.user_id)
        .bind(values.title)
        .bind(values.bio)
        .bind(FlowKindType::from_kind(values.kind))
        .bind(values.tags)
        .fetch_one(&mut *transaction)
        .await
        .map(Flow::from_postgres_flow)
        .map_err(connection_error)?;

        // the creator's own row, the only owner row the flow will ever have
        if values.kind.has_participants() {
            sqlx::query(
                r"
                INSERT INTO flow_participants (flow_id, user_id, role, last_read_at)
                VALUES ($1, $2, 'owner', CURRENT_TIMESTAMP)
                ",
            )
            .bind(flow.id)
            .bind(values.user_id)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;
        }

        transaction.commit().await.map_err(connection_error)?;

        Ok(flow)
    }

    async fn find_single_flow_by_id(&self, id: &Uuid) -> Result<Option<Flow>> {
        let flow = sqlx::query_as::<_, PostgresFlow>(&format!(
            r"
            SELECT {FLOW_COLUMNS}
            FROM flows
            WHERE id = $1
            LIMIT 1
            ",
        ))
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map(Flow::from_postgres_flow_optional)
        .map_err(connection_error)?;

        Ok(flow)
    }

    async fn find_flow_summaries_by_user(&self, user_id: &Uuid) -> Result<Vec<FlowSummary>> {
        let summaries = sqlx::query_as::<_, PostgresFlowSummary>(
            r"
            SELECT
                f.id,
                f.user_id,
                f.title,
                f.bio,
                f.kind,
                f.tags,
                f.membership_revision,
                f.created_at,
                f.updated_at,
                COALESCE(p.role, 'owner') AS role,
                COUNT(m.id) AS moment_count,
                MAX(m.updated_at) AS last_activity,
                COUNT(m.id) FILTER (
                    WHERE p.user_id IS NOT NULL
                        AND m.user_id <> $1
                        AND (p.last_read_at IS NULL OR m.updated_at > p.last_read_at)
                ) AS unread_count
            FROM flows f
            LEFT JOIN flow_participants p ON p.flow_id = f.id AND p.user_id = $1
            LEFT JOIN moments m ON m.flow_id = f.id
            WHERE f.user_id = $1 OR p.role IN ('owner', 'member')
            GROUP BY f.id, p.role, p.user_id, p.last_read_at
            ORDER BY MAX(m.updated_at) DESC NULLS LAST, f.created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.connection_pool)
        .await
        .map(FlowSummary::from_postgres_summary_multiple)
        .map_err(connection_error)?;

        Ok(summaries)
    }

    async fn update_flow(&self, flow: &Flow, values: &UpdateFlowValues) -> Result<Flow> {
        let updated_flow = sqlx::query_as::<_, PostgresFlow>(&format!(
            r"
            UPDATE flows
            SET title = $1, bio = $2, tags = $3, updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            RETURNING {FLOW_COLUMNS}
            ",
        ))
        .bind(values.title.unwrap_or(&flow.title))
        .bind(values.bio.unwrap_or(&flow.bio))
        .bind(values.tags.unwrap_or(&flow.tags))
        .bind(flow.id)
        .fetch_one(&self.connection_pool)
        .await
        .map(Flow::from_postgres_flow)
        .map_err(connection_error)?;

        Ok(updated_flow)
    }

    async fn delete_flow(&self, flow: &Flow) -> Result<()> {
        // moments and participant rows cascade
        sqlx::query(
            r"
            DELETE FROM flows
            WHERE id = $1
            ",
        )
        .bind(flow.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn find_all_tags_by_user(&self, user_id: &Uuid) -> Result<Vec<String>> {
        let tags = sqlx::query_scalar::<_, String>(
            r"
            SELECT DISTINCT UNNEST(f.tags) AS tag
            FROM flows f
            LEFT JOIN flow_participants p ON p.flow_id = f.id AND p.user_id = $1
            WHERE f.user_id = $1 OR p.role IN ('owner', 'member')
            ORDER BY tag
            ",
        )
        .bind(user_id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(tags)
    }

    async fn find_all_participants(&self, flow_id: &Uuid) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, PostgresParticipant>(
            r"
            SELECT flow_id, user_id, email, role, last_read_at, created_at
            FROM flow_participants
            WHERE flow_id = $1
            ORDER BY created_at
            ",
        )
        .bind(flow_id)
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Participant::from_postgres_participant_multiple(participants)
    }

    async fn find_single_participant(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Participant>> {
        let participant = sqlx::query_as::<_, PostgresParticipant>(
            r"
            SELECT flow_id, user_id, email, role, last_read_at, created_at
            FROM flow_participants
            WHERE flow_id = $1 AND user_id = $2
            LIMIT 1
            ",
        )
        .bind(flow_id)
        .bind(user_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        participant.map(Participant::from_postgres_participant).transpose()
    }

    async fn add_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64> {
        let mut transaction = self.connection_pool.begin().await.map_err(connection_error)?;

        let revision = Self::bump_revision(&mut transaction, flow_id, expected_revision).await?;

        for principal in principals {
            sqlx::query(
                r"
                INSERT INTO flow_participants (flow_id, user_id, email, role)
                VALUES ($1, $2, $3, 'pending')
                ",
            )
            .bind(flow_id)
            .bind(principal.user_id())
            .bind(principal.email())
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;
        }

        transaction.commit().await.map_err(connection_error)?;

        Ok(revision)
    }

    async fn remove_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64> {
        let mut transaction = self.connection_pool.begin().await.map_err(connection_error)?;

        let revision = Self::bump_revision(&mut transaction, flow_id, expected_revision).await?;

        for principal in principals {
            sqlx::query(
                r"
                DELETE FROM flow_participants
                WHERE flow_id = $1
                    AND role <> 'owner'
                    AND (user_id = $2 OR email = $3)
                ",
            )
            .bind(flow_id)
            .bind(principal.user_id())
            .bind(principal.email())
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;
        }

        transaction.commit().await.map_err(connection_error)?;

        Ok(revision)
    }

    async fn accept_invitation(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
        at: NaiveDateTime,
    ) -> Result<Participant> {
        let participant = sqlx::query_as::<_, PostgresParticipant>(
            r"
            UPDATE flow_participants
            SET role = 'member', last_read_at = $3
            WHERE flow_id = $1 AND user_id = $2 AND role = 'pending'
            RETURNING flow_id, user_id, email, role, last_read_at, created_at
            ",
        )
        .bind(flow_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        match participant {
            Some(participant) => Participant::from_postgres_participant(participant),
            None => Err(Error::NotInvited {
                flow_id: *flow_id,
                user_id: *user_id,
            }),
        }
    }

    async fn decline_invitation(&self, flow_id: &Uuid, user_id: &Uuid) -> Result<()> {
        let result = sqlx::query(
            r"
            DELETE FROM flow_participants
            WHERE flow_id = $1 AND user_id = $2 AND role = 'pending'
            ",
        )
        .bind(flow_id)
        .bind(user_id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotInvited {
                flow_id: *flow_id,
                user_id: *user_id,
            });
        }

        Ok(())
    }

    async fn claim_email_invitations(&self, email: &str, user_id: &Uuid) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE flow_participants
            SET user_id = $2, email = NULL
            WHERE email = $1
                AND role = 'pending'
                AND NOT EXISTS (
                    SELECT 1
                    FROM flow_participants other
                    WHERE other.flow_id = flow_participants.flow_id
                        AND other.user_id = $2
                )
            ",
        )
        .bind(email)
        .bind(user_id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(result.rows_affected())
    }

    async fn mark_read(&self, flow_id: &Uuid, user_id: &Uuid, at: NaiveDateTime) -> Result<()> {
        sqlx::query(
            r"
            UPDATE flow_participants
            SET last_read_at = $3
            WHERE flow_id = $1 AND user_id = $2
            ",
        )
        .bind(flow_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn create_moment(&self, values: &CreateMomentValues) -> Result<Moment> {
        let moment = sqlx::query_as::<_, PostgresMoment>(
            r"
            INSERT INTO moments (id, flow_id, user_id, title, content, snippet)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, flow_id, user_id, title, content, snippet, created_at, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(values.flow_id)
        .bind(values.user_id)
        .bind(values.title)
        .bind(values.content)
        .bind(values.snippet)
        .fetch_one(&self.connection_pool)
        .await
        .map(Moment::from_postgres_moment)
        .map_err(connection_error)?;

        Ok(moment)
    }

    async fn find_all_moments_by_flow(&self, flow_id: &Uuid) -> Result<Vec<Moment>> {
        let moments = sqlx::query_as::<_, PostgresMoment>(
            r"
            SELECT id, flow_id, user_id, title, content, snippet, created_at, updated_at
            FROM moments
            WHERE flow_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(flow_id)
        .fetch_all(&self.connection_pool)
        .await
        .map(Moment::from_postgres_moment_multiple)
        .map_err(connection_error)?;

        Ok(moments)
    }

    async fn find_single_moment_by_id(
        &self,
        flow_id: &Uuid,
        moment_id: &Uuid,
    ) -> Result<Option<Moment>> {
        let moment = sqlx::query_as::<_, PostgresMoment>(
            r"
            SELECT id, flow_id, user_id, title, content, snippet, created_at, updated_at
            FROM moments
            WHERE flow_id = $1 AND id = $2
            LIMIT 1
            ",
        )
        .bind(flow_id)
        .bind(moment_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map(Moment::from_postgres_moment_optional)
        .map_err(connection_error)?;

        Ok(moment)
    }

    async fn update_moment(&self, moment: &Moment, values: &UpdateMomentValues) -> Result<Moment> {
        let updated_moment = sqlx::query_as::<_, PostgresMoment>(
            r"
            UPDATE moments
            SET title = $1, content = $2, snippet = $3, updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            RETURNING id, flow_id, user_id, title, content, snippet, created_at, updated_at
            ",
        )
        .bind(values.title.unwrap_or(&moment.title))
        .bind(values.content.unwrap_or(&moment.content))
        .bind(values.snippet.as_ref().unwrap_or(&moment.snippet))
        .bind(moment.id)
        .fetch_one(&self.connection_pool)
        .await
        .map(Moment::from_postgres_moment)
        .map_err(connection_error)?;

        Ok(updated_moment)
    }

    async fn delete_moment(&self, moment: &Moment) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM moments
            WHERE id = $1
            ",
        )
        .bind(moment.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn find_all_friends(&self, user_id: &Uuid) -> Result<Vec<User>> {
        let friends = sqlx::query_as::<_, PostgresUser>(
            r"
            SELECT u.id, u.session_id, u.username, u.email, u.hashed_password, u.created_at, u.updated_at
            FROM friends f
            JOIN users u ON u.id = f.friend_id
            WHERE f.user_id = $1
            ORDER BY u.username
            ",
        )
        .bind(user_id)
        .fetch_all(&self.connection_pool)
        .await
        .map(User::from_postgres_user_multiple)
        .map_err(connection_error)?;

        Ok(friends)
    }

    async fn find_incoming_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>> {
        let requests = sqlx::query_as::<_, PostgresFriendRequest>(
            r"
            SELECT id, sender_id, receiver_id, status, created_at
            FROM friend_requests
            WHERE receiver_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.connection_pool)
        .await
        .map(FriendRequest::from_postgres_request_multiple)
        .map_err(connection_error)?;

        Ok(requests)
    }

    async fn find_sent_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>> {
        let requests = sqlx::query_as::<_, PostgresFriendRequest>(
            r"
            SELECT id, sender_id, receiver_id, status, created_at
            FROM friend_requests
            WHERE sender_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.connection_pool)
        .await
        .map(FriendRequest::from_postgres_request_multiple)
        .map_err(connection_error)?;

        Ok(requests)
    }

    async fn find_single_friend_request_by_id(&self, id: &Uuid) -> Result<Option<FriendRequest>> {
        let request = sqlx::query_as::<_, PostgresFriendRequest>(
            r"
            SELECT id, sender_id, receiver_id, status, created_at
            FROM friend_requests
            WHERE id = $1
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map(FriendRequest::from_postgres_request_optional)
        .map_err(connection_error)?;

        Ok(request)
    }

    async fn create_friend_request(
        &self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<FriendRequest> {
        let request = sqlx::query_as::<_, PostgresFriendRequest>(
            r"
            INSERT INTO friend_requests (id, sender_id, receiver_id, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING id, sender_id, receiver_id, status, created_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(receiver_id)
        .fetch_one(&self.connection_pool)
        .await
        .map(FriendRequest::from_postgres_request)
        .map_err(connection_error)?;

        Ok(request)
    }

    async fn accept_friend_request(&self, request: &FriendRequest) -> Result<()> {
        let mut transaction = self.connection_pool.begin().await.map_err(connection_error)?;

        sqlx::query(
            r"
            UPDATE friend_requests
            SET status = 'accepted'
            WHERE id = $1
            ",
        )
        .bind(request.id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?;

        // a friendship is a symmetric pair of rows
        sqlx::query(
            r"
            INSERT INTO friends (user_id, friend_id)
            VALUES ($1, $2), ($2, $1)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(request.sender_id)
        .bind(request.receiver_id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?;

        transaction.commit().await.map_err(connection_error)?;

        Ok(())
    }

    async fn decline_friend_request(&self, request: &FriendRequest) -> Result<()> {
        sqlx::query(
            r"
            UPDATE friend_requests
            SET status = 'declined'
            WHERE id = $1
            ",
        )
        .bind(request.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn remove_friendship(&self, user_id: &Uuid, friend_id: &Uuid) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM friends
            WHERE (user_id = $1 AND friend_id = $2)
                OR (user_id = $2 AND friend_id = $1)
            ",
        )
        .bind(user_id)
        .bind(friend_id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }
}

/// Convert `SQLx` to storage connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}
