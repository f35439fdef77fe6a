//! Memory storage
//!
//! Will be destroyed on system shutdown; also the backend the test suite
//! runs against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::naive::NaiveDateTime;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::flows::Flow;
use crate::flows::FlowSummary;
use crate::friends::FriendRequest;
use crate::friends::Friendship;
use crate::friends::RequestStatus;
use crate::membership::Participant;
use crate::membership::ParticipantRole;
use crate::membership::Principal;
use crate::moments::count_unread;
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

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug)]
pub struct Memory {
    /// All users in storage
    users: Arc<Mutex<HashMap<Uuid, User>>>,

    /// All flows in storage
    flows: Arc<Mutex<HashMap<Uuid, Flow>>>,

    /// Participant rows, keyed by flow
    participants: Arc<Mutex<HashMap<Uuid, Vec<Participant>>>>,

    /// All moments in storage
    moments: Arc<Mutex<HashMap<Uuid, Moment>>>,

    /// All friend requests in storage
    friend_requests: Arc<Mutex<HashMap<Uuid, FriendRequest>>>,

    /// One-directional friendship rows
    friendships: Arc<Mutex<Vec<Friendship>>>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(HashMap::new())),
            flows: Arc::new(Mutex::new(HashMap::new())),
            participants: Arc::new(Mutex::new(HashMap::new())),
            moments: Arc::new(Mutex::new(HashMap::new())),
            friend_requests: Arc::new(Mutex::new(HashMap::new())),
            friendships: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Check and bump the membership revision of a flow
    ///
    /// Lock order is always flows before participants.
    async fn bump_revision(&self, flow_id: &Uuid, expected_revision: i64) -> Result<i64> {
        let mut flows = self.flows.lock().await;

        let flow = flows
            .get_mut(flow_id)
            .ok_or_else(|| Error::Connection("Unknown flow".to_string()))?;

        if flow.membership_revision != expected_revision {
            return Err(Error::StaleRevision {
                expected: expected_revision,
                actual: flow.membership_revision,
            });
        }

        flow.membership_revision += 1;

        Ok(flow.membership_revision)
    }
}

#[async_trait]
impl Storage for Memory {
    async fn find_single_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn create_user(&self, values: &CreateUserValues) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            session_id: *values.session_id,
            username: values.username.to_string(),
            email: values.email.to_string(),
            hashed_password: values.hashed_password.to_string(),
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.users.lock().await.insert(user.id, user.clone());

        Ok(user)
    }

    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User> {
        Ok(self
            .users
            .lock()
            .await
            .get_mut(&user.id)
            .map(|user| {
                user.session_id = *values.session_id;
                user.hashed_password = values.hashed_password.to_string();
                user.updated_at = Utc::now().naive_utc();

                user.clone()
            })
            .expect("HashMap is the source of the user"))
    }

    async fn create_flow(&self, values: &CreateFlowValues) -> Result<Flow> {
        let flow = Flow {
            id: Uuid::new_v4(),
            user_id: *values.user_id,
            title: values.title.to_string(),
            bio: values.bio.to_string(),
            kind: values.kind,
            tags: values.tags.to_vec(),
            membership_revision: 0,
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.flows.lock().await.insert(flow.id, flow.clone());

        // the one place an owner row is created
        if flow.kind.has_participants() {
            let owner = Participant {
                flow_id: flow.id,
                principal: Principal::User(flow.user_id),
                role: ParticipantRole::Owner,
                last_read_at: Some(Utc::now().naive_utc()),
                created_at: Utc::now().naive_utc(),
            };

            self.participants.lock().await.insert(flow.id, vec![owner]);
        }

        Ok(flow)
    }

    async fn find_single_flow_by_id(&self, id: &Uuid) -> Result<Option<Flow>> {
        Ok(self.flows.lock().await.get(id).cloned())
    }

    async fn find_flow_summaries_by_user(&self, user_id: &Uuid) -> Result<Vec<FlowSummary>> {
        let flows = self.flows.lock().await;
        let participants = self.participants.lock().await;
        let moments = self.moments.lock().await;

        let mut summaries = Vec::new();

        for flow in flows.values() {
            let participant = participants
                .get(&flow.id)
                .and_then(|rows| {
                    rows.iter()
                        .find(|row| row.principal == Principal::User(*user_id))
                })
                .cloned();

            let role = if flow.kind.has_participants() {
                // pending invitees do not see the flow listed yet
                match &participant {
                    Some(participant) if participant.role != ParticipantRole::Pending => {
                        participant.role
                    }
                    _ => continue,
                }
            } else if &flow.user_id == user_id {
                ParticipantRole::Owner
            } else {
                continue;
            };

            let flow_moments = moments
                .values()
                .filter(|moment| moment.flow_id == flow.id)
                .cloned()
                .collect::<Vec<Moment>>();

            let last_activity = flow_moments
                .iter()
                .map(|moment| moment.updated_at)
                .max();

            let unread_count = participant
                .as_ref()
                .map_or(0, |participant| count_unread(&flow_moments, participant));

            summaries.push(FlowSummary {
                flow: flow.clone(),
                role,
                moment_count: flow_moments.len(),
                last_activity,
                unread_count,
            });
        }

        // most recently active first, idle flows trail by creation date
        summaries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| b.flow.created_at.cmp(&a.flow.created_at))
        });

        Ok(summaries)
    }

    async fn update_flow(&self, flow: &Flow, values: &UpdateFlowValues) -> Result<Flow> {
        Ok(self
            .flows
            .lock()
            .await
            .get_mut(&flow.id)
            .map(|flow| {
                if let Some(title) = values.title {
                    flow.title = title.to_string();
                }

                if let Some(bio) = values.bio {
                    flow.bio = bio.to_string();
                }

                if let Some(tags) = values.tags {
                    flow.tags = tags.clone();
                }

                flow.updated_at = Utc::now().naive_utc();

                flow.clone()
            })
            .expect("HashMap is the source of the flow"))
    }

    async fn delete_flow(&self, flow: &Flow) -> Result<()> {
        self.flows.lock().await.remove(&flow.id);
        self.participants.lock().await.remove(&flow.id);
        self.moments
            .lock()
            .await
            .retain(|_, moment| moment.flow_id != flow.id);

        Ok(())
    }

    async fn find_all_tags_by_user(&self, user_id: &Uuid) -> Result<Vec<String>> {
        let flows = self.flows.lock().await;
        let participants = self.participants.lock().await;

        let mut tags = Vec::new();

        for flow in flows.values() {
            let is_theirs = if flow.kind.has_participants() {
                // pending invitees have no access, their tags stay out too
                participants.get(&flow.id).is_some_and(|rows| {
                    rows.iter().any(|row| {
                        row.principal == Principal::User(*user_id)
                            && row.role != ParticipantRole::Pending
                    })
                })
            } else {
                &flow.user_id == user_id
            };

            if is_theirs {
                for tag in &flow.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
            }
        }

        tags.sort();

        Ok(tags)
    }

    async fn find_all_participants(&self, flow_id: &Uuid) -> Result<Vec<Participant>> {
        Ok(self
            .participants
            .lock()
            .await
            .get(flow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_single_participant(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<Participant>> {
        Ok(self
            .participants
            .lock()
            .await
            .get(flow_id)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.principal == Principal::User(*user_id))
            })
            .cloned())
    }

    async fn add_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64> {
        let revision = self.bump_revision(flow_id, expected_revision).await?;

        let mut participants = self.participants.lock().await;
        let rows = participants.entry(*flow_id).or_default();

        for principal in principals {
            rows.push(Participant {
                flow_id: *flow_id,
                principal: principal.clone(),
                role: ParticipantRole::Pending,
                last_read_at: None,
                created_at: Utc::now().naive_utc(),
            });
        }

        Ok(revision)
    }

    async fn remove_participants(
        &self,
        flow_id: &Uuid,
        principals: &[Principal],
        expected_revision: i64,
    ) -> Result<i64> {
        let revision = self.bump_revision(flow_id, expected_revision).await?;

        if let Some(rows) = self.participants.lock().await.get_mut(flow_id) {
            rows.retain(|row| !principals.contains(&row.principal));
        }

        Ok(revision)
    }

    async fn accept_invitation(
        &self,
        flow_id: &Uuid,
        user_id: &Uuid,
        at: NaiveDateTime,
    ) -> Result<Participant> {
        self.participants
            .lock()
            .await
            .get_mut(flow_id)
            .and_then(|rows| {
                rows.iter_mut().find(|row| {
                    row.principal == Principal::User(*user_id)
                        && row.role == ParticipantRole::Pending
                })
            })
            .map(|row| {
                row.role = ParticipantRole::Member;
                row.last_read_at = Some(at);

                row.clone()
            })
            .ok_or(Error::NotInvited {
                flow_id: *flow_id,
                user_id: *user_id,
            })
    }

    async fn decline_invitation(&self, flow_id: &Uuid, user_id: &Uuid) -> Result<()> {
        let mut participants = self.participants.lock().await;

        let rows = participants.get_mut(flow_id).ok_or(Error::NotInvited {
            flow_id: *flow_id,
            user_id: *user_id,
        })?;

        let before = rows.len();

        rows.retain(|row| {
            !(row.principal == Principal::User(*user_id) && row.role == ParticipantRole::Pending)
        });

        if rows.len() == before {
            return Err(Error::NotInvited {
                flow_id: *flow_id,
                user_id: *user_id,
            });
        }

        Ok(())
    }

    async fn claim_email_invitations(&self, email: &str, user_id: &Uuid) -> Result<u64> {
        let mut claimed = 0;

        for rows in self.participants.lock().await.values_mut() {
            let already_present = rows
                .iter()
                .any(|row| row.principal == Principal::User(*user_id));

            if already_present {
                continue;
            }

            for row in rows.iter_mut() {
                if row.principal.email() == Some(email) {
                    row.principal = Principal::User(*user_id);
                    claimed += 1;
                }
            }
        }

        Ok(claimed)
    }

    async fn mark_read(&self, flow_id: &Uuid, user_id: &Uuid, at: NaiveDateTime) -> Result<()> {
        if let Some(rows) = self.participants.lock().await.get_mut(flow_id) {
            if let Some(row) = rows
                .iter_mut()
                .find(|row| row.principal == Principal::User(*user_id))
            {
                row.last_read_at = Some(at);
            }
        }

        Ok(())
    }

    async fn create_moment(&self, values: &CreateMomentValues) -> Result<Moment> {
        let moment = Moment {
            id: Uuid::new_v4(),
            flow_id: *values.flow_id,
            user_id: *values.user_id,
            title: values.title.to_string(),
            content: values.content.to_string(),
            snippet: values.snippet.to_string(),
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        };

        self.moments.lock().await.insert(moment.id, moment.clone());

        Ok(moment)
    }

    async fn find_all_moments_by_flow(&self, flow_id: &Uuid) -> Result<Vec<Moment>> {
        let mut moments = self
            .moments
            .lock()
            .await
            .values()
            .filter(|moment| &moment.flow_id == flow_id)
            .cloned()
            .collect::<Vec<Moment>>();

        moments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(moments)
    }

    async fn find_single_moment_by_id(
        &self,
        flow_id: &Uuid,
        moment_id: &Uuid,
    ) -> Result<Option<Moment>> {
        Ok(self
            .moments
            .lock()
            .await
            .values()
            .find(|moment| &moment.id == moment_id && &moment.flow_id == flow_id)
            .cloned())
    }

    async fn update_moment(&self, moment: &Moment, values: &UpdateMomentValues) -> Result<Moment> {
        Ok(self
            .moments
            .lock()
            .await
            .get_mut(&moment.id)
            .map(|moment| {
                if let Some(title) = values.title {
                    moment.title = title.to_string();
                }

                if let Some(content) = values.content {
                    moment.content = content.to_string();
                }

                if let Some(snippet) = &values.snippet {
                    moment.snippet = snippet.clone();
                }

                moment.updated_at = Utc::now().naive_utc();

                moment.clone()
            })
            .expect("HashMap is the source of the moment"))
    }

    async fn delete_moment(&self, moment: &Moment) -> Result<()> {
        self.moments.lock().await.remove(&moment.id);

        Ok(())
    }

    async fn find_all_friends(&self, user_id: &Uuid) -> Result<Vec<User>> {
        let friendships = self.friendships.lock().await;
        let users = self.users.lock().await;

        Ok(friendships
            .iter()
            .filter(|friendship| &friendship.user_id == user_id)
            .filter_map(|friendship| users.get(&friendship.friend_id))
            .cloned()
            .collect())
    }

    async fn find_incoming_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>> {
        Ok(self
            .friend_requests
            .lock()
            .await
            .values()
            .filter(|request| {
                &request.receiver_id == user_id && request.status == RequestStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn find_sent_friend_requests(&self, user_id: &Uuid) -> Result<Vec<FriendRequest>> {
        Ok(self
            .friend_requests
            .lock()
            .await
            .values()
            .filter(|request| {
                &request.sender_id == user_id && request.status == RequestStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn find_single_friend_request_by_id(&self, id: &Uuid) -> Result<Option<FriendRequest>> {
        Ok(self.friend_requests.lock().await.get(id).cloned())
    }

    async fn create_friend_request(
        &self,
        sender_id: &Uuid,
        receiver_id: &Uuid,
    ) -> Result<FriendRequest> {
        let request = FriendRequest {
            id: Uuid::new_v4(),
            sender_id: *sender_id,
            receiver_id: *receiver_id,
            status: RequestStatus::Pending,
            created_at: Utc::now().naive_utc(),
        };

        self.friend_requests
            .lock()
            .await
            .insert(request.id, request.clone());

        Ok(request)
    }

    async fn accept_friend_request(&self, request: &FriendRequest) -> Result<()> {
        if let Some(request) = self.friend_requests.lock().await.get_mut(&request.id) {
            request.status = RequestStatus::Accepted;
        }

        let mut friendships = self.friendships.lock().await;

        for (user_id, friend_id) in [
            (request.sender_id, request.receiver_id),
            (request.receiver_id, request.sender_id),
        ] {
            let exists = friendships
                .iter()
                .any(|friendship| {
                    friendship.user_id == user_id && friendship.friend_id == friend_id
                });

            if !exists {
                friendships.push(Friendship { user_id, friend_id });
            }
        }

        Ok(())
    }

    async fn decline_friend_request(&self, request: &FriendRequest) -> Result<()> {
        if let Some(request) = self.friend_requests.lock().await.get_mut(&request.id) {
            request.status = RequestStatus::Declined;
        }

        Ok(())
    }

    async fn remove_friendship(&self, user_id: &Uuid, friend_id: &Uuid) -> Result<()> {
        self.friendships.lock().await.retain(|friendship| {
            !(friendship.user_id == *user_id && friendship.friend_id == *friend_id)
                && !(friendship.user_id == *friend_id && friendship.friend_id == *user_id)
        });

        Ok(())
    }
}
