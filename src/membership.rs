//! Shared flow membership
//!
//! Who belongs to a shared/couple flow, in what role, and how the set of
//! participants changes over time. Three pieces live here:
//!
//! - the participant model: a row per principal, with exactly one `owner`
//!   row per flow, created when the flow is
//! - the invitation lifecycle: `pending` rows transition to `member` on
//!   accept and are deleted on decline or owner removal
//! - reconciliation: diffing a desired member list against the persisted
//!   participant set and applying the delta as add/remove batches
//!
//! Authorization is checked by the callers; everything here assumes the
//! acting user is allowed to perform the operation.

use chrono::naive::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::flows::Flow;
use crate::storage::Error;
use crate::storage::Result;
use crate::storage::Storage;

/// A principal that can participate in a shared flow
///
/// Either a registered user, or a bare email address invited before signup.
/// The variant doubles as the diffing key during reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Principal {
    /// A registered user, by ID
    User(Uuid),
    /// An invitee that has no account yet
    Email(String),
}

impl Principal {
    /// The user ID, when the principal is a registered user
    pub fn user_id(&self) -> Option<&Uuid> {
        match self {
            Self::User(user_id) => Some(user_id),
            Self::Email(_) => None,
        }
    }

    /// The email, when the principal is an email-only invitee
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Email(email) => Some(email),
        }
    }
}

/// Role of a participant within a shared flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Assigned to the creator's own row at flow creation, terminal
    Owner,
    /// A pending row that has been accepted
    Member,
    /// Invited, no read/write access until accepted
    Pending,
}

/// One membership row: a principal attached to a flow with a role
#[derive(Clone, Debug)]
pub struct Participant {
    pub flow_id: Uuid,
    pub principal: Principal,
    pub role: ParticipantRole,
    /// Initialized at join time, advanced by the deferred read marking
    pub last_read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// The membership an owner wants a flow to have, owner excluded
///
/// This is what the edit form submits: known users by ID, everybody else by
/// email.
#[derive(Clone, Debug, Default)]
pub struct DesiredMembership {
    pub user_ids: Vec<Uuid>,
    pub emails: Vec<String>,
}

/// The delta between persisted participants and a desired membership
///
/// Computed by set difference on the principal key. The owner row is
/// excluded from both sides, so a diff can never add or remove an owner.
/// Additions and removals are disjoint by construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: Vec<Principal>,
    pub to_remove: Vec<Principal>,
}

impl MembershipDiff {
    /// Diff the persisted participant set against a desired membership
    pub fn compute(existing: &[Participant], desired: &DesiredMembership) -> Self {
        let owner_id = existing
            .iter()
            .find(|participant| participant.role == ParticipantRole::Owner)
            .and_then(|participant| participant.principal.user_id());

        let existing_user_ids = existing
            .iter()
            .filter(|participant| participant.role != ParticipantRole::Owner)
            .filter_map(|participant| participant.principal.user_id())
            .collect::<Vec<_>>();

        let existing_emails = existing
            .iter()
            .filter_map(|participant| participant.principal.email())
            .collect::<Vec<_>>();

        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();

        for user_id in &desired.user_ids {
            // the owner is implicit in every desired membership
            if Some(user_id) == owner_id {
                continue;
            }

            let principal = Principal::User(*user_id);

            // the desired list may name a principal more than once
            if !existing_user_ids.contains(&user_id) && !to_add.contains(&principal) {
                to_add.push(principal);
            }
        }

        for email in &desired.emails {
            let principal = Principal::Email(email.clone());

            if !existing_emails.contains(&email.as_str()) && !to_add.contains(&principal) {
                to_add.push(principal);
            }
        }

        for user_id in existing_user_ids {
            if !desired.user_ids.contains(user_id) {
                to_remove.push(Principal::User(*user_id));
            }
        }

        for email in existing_emails {
            if !desired.emails.iter().any(|desired| desired == email) {
                to_remove.push(Principal::Email(email.to_string()));
            }
        }

        Self { to_add, to_remove }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// The batches a reconciliation run actually applied
#[derive(Clone, Debug, Default)]
pub struct ReconcileOutcome {
    pub added: Vec<Principal>,
    pub removed: Vec<Principal>,
}

/// Sync the persisted participant set of a flow with a desired membership
///
/// Additions become `pending` rows, removals delete rows; the owner row is
/// never touched. The two batches are applied independently and are not
/// rolled back: a failed batch surfaces as [`Error::PartialBatchFailure`]
/// naming the principals it covered, and re-running the reconciliation
/// against the partially updated state converges.
pub async fn reconcile<S: Storage>(
    storage: &S,
    flow: &Flow,
    desired: &DesiredMembership,
) -> Result<ReconcileOutcome> {
    let existing = storage.find_all_participants(&flow.id).await?;
    let diff = MembershipDiff::compute(&existing, desired);

    if diff.is_empty() {
        return Ok(ReconcileOutcome::default());
    }

    let mut outcome = ReconcileOutcome::default();
    let mut failed = Vec::new();
    let mut revision = flow.membership_revision;

    if !diff.to_add.is_empty() {
        match storage
            .add_participants(&flow.id, &diff.to_add, revision)
            .await
        {
            Ok(next_revision) => {
                revision = next_revision;
                outcome.added = diff.to_add;
            }
            Err(err @ Error::StaleRevision { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!("Add batch failed for flow {}: {err}", flow.id);
                failed.extend(diff.to_add);
            }
        }
    }

    if !diff.to_remove.is_empty() {
        match storage
            .remove_participants(&flow.id, &diff.to_remove, revision)
            .await
        {
            Ok(_) => outcome.removed = diff.to_remove,
            Err(err @ Error::StaleRevision { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!("Remove batch failed for flow {}: {err}", flow.id);
                failed.extend(diff.to_remove);
            }
        }
    }

    if failed.is_empty() {
        Ok(outcome)
    } else {
        Err(Error::PartialBatchFailure { principals: failed })
    }
}

/// Invite a single principal to a flow
///
/// Adds a `pending` row. Fails when the principal already has a row:
/// [`Error::AlreadyPending`] for a pending one, [`Error::AlreadyMember`]
/// otherwise.
pub async fn invite<S: Storage>(storage: &S, flow: &Flow, principal: Principal) -> Result<()> {
    let existing = storage.find_all_participants(&flow.id).await?;

    if let Some(participant) = existing
        .iter()
        .find(|participant| participant.principal == principal)
    {
        return if participant.role == ParticipantRole::Pending {
            Err(Error::AlreadyPending(principal))
        } else {
            Err(Error::AlreadyMember(principal))
        };
    }

    storage
        .add_participants(&flow.id, &[principal], flow.membership_revision)
        .await?;

    Ok(())
}

/// Accept a pending invitation
///
/// Transitions the caller's `pending` row to `member` and starts the read
/// tracking clock. A no-op when the caller already is a member or the
/// owner; [`Error::NotInvited`] when there is no row at all.
pub async fn accept<S: Storage>(storage: &S, flow_id: &Uuid, user_id: &Uuid) -> Result<()> {
    let participant = storage.find_single_participant(flow_id, user_id).await?;

    match participant {
        None => Err(Error::NotInvited {
            flow_id: *flow_id,
            user_id: *user_id,
        }),
        Some(participant) if participant.role == ParticipantRole::Pending => {
            storage
                .accept_invitation(flow_id, user_id, Utc::now().naive_utc())
                .await?;

            Ok(())
        }
        // re-accepting is not an error
        Some(_) => Ok(()),
    }
}

/// Decline a pending invitation, deleting the row
///
/// Unlike [`accept`] this is not idempotent: only an existing `pending` row
/// can be declined, anything else is [`Error::NotInvited`].
pub async fn decline<S: Storage>(storage: &S, flow_id: &Uuid, user_id: &Uuid) -> Result<()> {
    let participant = storage.find_single_participant(flow_id, user_id).await?;

    match participant {
        Some(participant) if participant.role == ParticipantRole::Pending => {
            storage.decline_invitation(flow_id, user_id).await
        }
        _ => Err(Error::NotInvited {
            flow_id: *flow_id,
            user_id: *user_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::FlowKind;
    use crate::storage::memory::Memory;
    use crate::storage::CreateFlowValues;

    use super::*;

    fn participant(flow_id: Uuid, principal: Principal, role: ParticipantRole) -> Participant {
        Participant {
            flow_id,
            principal,
            role,
            last_read_at: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_diff_correctness() {
        let flow_id = Uuid::new_v4();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();

        let existing = vec![
            participant(flow_id, Principal::User(a), ParticipantRole::Member),
            participant(flow_id, Principal::User(b), ParticipantRole::Pending),
            participant(flow_id, Principal::User(c), ParticipantRole::Owner),
        ];

        let desired = DesiredMembership {
            user_ids: vec![a, d],
            emails: Vec::new(),
        };

        let diff = MembershipDiff::compute(&existing, &desired);

        assert_eq!(vec![Principal::User(d)], diff.to_add);
        assert_eq!(vec![Principal::User(b)], diff.to_remove);
    }

    #[test]
    fn test_diff_owner_in_desired_list_is_ignored() {
        let flow_id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let existing = vec![participant(
            flow_id,
            Principal::User(owner),
            ParticipantRole::Owner,
        )];

        let desired = DesiredMembership {
            user_ids: vec![owner],
            emails: Vec::new(),
        };

        assert!(MembershipDiff::compute(&existing, &desired).is_empty());
    }

    #[test]
    fn test_diff_by_email() {
        let flow_id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let existing = vec![
            participant(flow_id, Principal::User(owner), ParticipantRole::Owner),
            participant(
                flow_id,
                Principal::Email("stays@example.com".to_string()),
                ParticipantRole::Pending,
            ),
            participant(
                flow_id,
                Principal::Email("goes@example.com".to_string()),
                ParticipantRole::Pending,
            ),
        ];

        let desired = DesiredMembership {
            user_ids: Vec::new(),
            emails: vec![
                "stays@example.com".to_string(),
                "new@example.com".to_string(),
            ],
        };

        let diff = MembershipDiff::compute(&existing, &desired);

        assert_eq!(
            vec![Principal::Email("new@example.com".to_string())],
            diff.to_add
        );
        assert_eq!(
            vec![Principal::Email("goes@example.com".to_string())],
            diff.to_remove
        );
    }

    #[test]
    fn test_diff_deduplicates_desired_list() {
        let flow_id = Uuid::new_v4();
        let owner = Uuid::new_v4();

        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        let existing = vec![participant(
            flow_id,
            Principal::User(owner),
            ParticipantRole::Owner,
        )];

        let desired = DesiredMembership {
            user_ids: vec![x, y, x],
            emails: vec![
                "twice@example.com".to_string(),
                "twice@example.com".to_string(),
            ],
        };

        let diff = MembershipDiff::compute(&existing, &desired);

        assert_eq!(
            vec![
                Principal::User(x),
                Principal::User(y),
                Principal::Email("twice@example.com".to_string()),
            ],
            diff.to_add
        );
    }

    async fn shared_flow(storage: &Memory, owner: &Uuid) -> Flow {
        storage
            .create_flow(&CreateFlowValues {
                user_id: owner,
                title: "Us",
                bio: "",
                kind: FlowKind::Shared,
                tags: &[],
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        let desired = DesiredMembership {
            user_ids: vec![friend],
            emails: vec!["outsider@example.com".to_string()],
        };

        let outcome = reconcile(&storage, &flow, &desired).await.unwrap();
        assert_eq!(2, outcome.added.len());

        // second run with the same desired list does nothing, even though the
        // revision we hold is stale by now
        let outcome = reconcile(&storage, &flow, &desired).await.unwrap();
        assert!(outcome.added.is_empty());
        assert!(outcome.removed.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_adds_a_repeated_principal_once() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        let desired = DesiredMembership {
            user_ids: vec![x, y, x],
            emails: Vec::new(),
        };

        reconcile(&storage, &flow, &desired).await.unwrap();

        let participants = storage.find_all_participants(&flow.id).await.unwrap();

        let rows_for_x = participants
            .iter()
            .filter(|participant| participant.principal == Principal::User(x))
            .count();

        assert_eq!(1, rows_for_x);
        assert_eq!(3, participants.len());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_single_owner() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        let desired = DesiredMembership {
            user_ids: vec![Uuid::new_v4()],
            emails: Vec::new(),
        };

        reconcile(&storage, &flow, &desired).await.unwrap();

        // empty the membership again
        let flow = storage.find_single_flow_by_id(&flow.id).await.unwrap().unwrap();
        reconcile(&storage, &flow, &DesiredMembership::default())
            .await
            .unwrap();

        let participants = storage.find_all_participants(&flow.id).await.unwrap();

        let owners = participants
            .iter()
            .filter(|participant| participant.role == ParticipantRole::Owner)
            .count();

        assert_eq!(1, owners);
        assert_eq!(1, participants.len());
    }

    #[tokio::test]
    async fn test_accept_requires_pending_row() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        let result = accept(&storage, &flow.id, &stranger).await;
        assert!(matches!(result, Err(Error::NotInvited { .. })));
    }

    #[tokio::test]
    async fn test_accept_transitions_pending_to_member() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        invite(&storage, &flow, Principal::User(friend)).await.unwrap();
        accept(&storage, &flow.id, &friend).await.unwrap();

        let participant = storage
            .find_single_participant(&flow.id, &friend)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ParticipantRole::Member, participant.role);
        assert!(participant.last_read_at.is_some());

        // re-accepting is a no-op, not an error
        accept(&storage, &flow.id, &friend).await.unwrap();
    }

    #[tokio::test]
    async fn test_decline_removes_row() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        invite(&storage, &flow, Principal::User(friend)).await.unwrap();
        decline(&storage, &flow.id, &friend).await.unwrap();

        let participants = storage.find_all_participants(&flow.id).await.unwrap();

        assert!(!participants
            .iter()
            .any(|participant| participant.principal == Principal::User(friend)));

        // a second decline has nothing to decline
        let result = decline(&storage, &flow.id, &friend).await;
        assert!(matches!(result, Err(Error::NotInvited { .. })));
    }

    #[tokio::test]
    async fn test_invite_conflicts() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let friend = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        invite(&storage, &flow, Principal::User(friend)).await.unwrap();

        let flow = storage.find_single_flow_by_id(&flow.id).await.unwrap().unwrap();
        let result = invite(&storage, &flow, Principal::User(friend)).await;
        assert!(matches!(result, Err(Error::AlreadyPending(_))));

        accept(&storage, &flow.id, &friend).await.unwrap();

        let result = invite(&storage, &flow, Principal::User(friend)).await;
        assert!(matches!(result, Err(Error::AlreadyMember(_))));
    }

    #[tokio::test]
    async fn test_claiming_skips_flows_where_the_user_already_participates() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();
        let user = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        // the same person ends up invited twice, by user ID and by email
        invite(&storage, &flow, Principal::User(user)).await.unwrap();

        let flow = storage.find_single_flow_by_id(&flow.id).await.unwrap().unwrap();
        invite(
            &storage,
            &flow,
            Principal::Email("late@example.com".to_string()),
        )
        .await
        .unwrap();

        let claimed = storage
            .claim_email_invitations("late@example.com", &user)
            .await
            .unwrap();

        // nothing to claim here, the user already has a row
        assert_eq!(0, claimed);

        let participants = storage.find_all_participants(&flow.id).await.unwrap();

        let rows_for_user = participants
            .iter()
            .filter(|participant| participant.principal == Principal::User(user))
            .count();

        assert_eq!(1, rows_for_user);
        assert!(participants.iter().any(|participant| {
            participant.principal == Principal::Email("late@example.com".to_string())
        }));
    }

    #[tokio::test]
    async fn test_stale_revision_is_detected() {
        let storage = Memory::new();
        let owner = Uuid::new_v4();

        let flow = shared_flow(&storage, &owner).await;

        // a concurrent editor bumps the revision
        storage
            .add_participants(&flow.id, &[Principal::User(Uuid::new_v4())], flow.membership_revision)
            .await
            .unwrap();

        // inviting against the stale flow snapshot fails
        let result = invite(
            &storage,
            &flow,
            Principal::Email("late@example.com".to_string()),
        )
        .await;

        assert!(matches!(result, Err(Error::StaleRevision { .. })));
    }
}
