use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_invitation_lifecycle() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, friend_token) = helper::signup(&mut app, "inez", "inez@example.com").await;

    // create shared flow, inviting a user and a bare email address
    let (status_code, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[friend.id],
        &["outsider@example.com"],
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code);
    let flow = flow.unwrap();

    // owner row plus the two invitations
    let members = flow.members.unwrap();
    assert_eq!(3, members.len());
    assert_eq!(
        1,
        members.iter().filter(|member| member.role == "owner").count()
    );
    assert_eq!(
        2,
        members
            .iter()
            .filter(|member| member.role == "pending")
            .count()
    );

    // the invitee cannot read the flow before accepting
    let (status_code, _, error) = helper::single_flow(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!(
        Some("You need to accept the invite to access this shared flow".to_string()),
        error
    );

    // nor is it listed for them
    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert!(flows.unwrap().is_empty());

    // accept
    let (status_code, _) = helper::maybe_accept_invitation(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    // accepting again is a no-op, not an error
    let (status_code, _) = helper::maybe_accept_invitation(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    // the flow is accessible and listed now
    let (status_code, _, _) = helper::single_flow(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::OK, status_code);

    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    let flows = flows.unwrap();
    assert_eq!(1, flows.len());
    assert_eq!("member".to_string(), flows[0].role);

    // a member cannot decline anymore, only pending rows can
    let (status_code, error) =
        helper::maybe_decline_invitation(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert!(error.is_some());
}

#[tokio::test]
async fn test_decline_invitation() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, friend_token) = helper::signup(&mut app, "inez", "inez@example.com").await;

    let (_, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[friend.id],
        &[],
    )
    .await;
    let flow = flow.unwrap();

    let (status_code, _) =
        helper::maybe_decline_invitation(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    // the row is gone
    let (_, members) = helper::list_members(&mut app, &owner_token, &flow.id).await;
    assert_eq!(1, members.unwrap().len());

    // declining again has nothing to decline
    let (status_code, _) =
        helper::maybe_decline_invitation(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
}

#[tokio::test]
async fn test_membership_reconciliation() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, friend_token) = helper::signup(&mut app, "inez", "inez@example.com").await;

    // shared flow with an accepted member and a pending email invite
    let (_, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[friend.id],
        &["outsider@example.com"],
    )
    .await;
    let flow = flow.unwrap();

    helper::maybe_accept_invitation(&mut app, &friend_token, &flow.id).await;

    // edit the member list down to just the email invite
    let payload = helper::members_payload(&[], &["outsider@example.com"]);
    let (status_code, updated, _) =
        helper::maybe_update_flow(&mut app, &owner_token, &flow.id, payload).await;
    assert_eq!(StatusCode::OK, status_code);

    // the member is removed, the untouched email invite stays pending
    let members = updated.unwrap().members.unwrap();
    assert_eq!(2, members.len());
    assert!(!members
        .iter()
        .any(|member| member.user_id == Some(friend.id)));
    assert!(members
        .iter()
        .any(|member| member.email == Some("outsider@example.com".to_string())
            && member.role == "pending"));

    // the removed member lost access
    let (status_code, _, _) = helper::single_flow(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);

    // re-applying the same desired list changes nothing
    let payload = helper::members_payload(&[], &["outsider@example.com"]);
    let (status_code, updated, _) =
        helper::maybe_update_flow(&mut app, &owner_token, &flow.id, payload).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(2, updated.unwrap().members.unwrap().len());
}

#[tokio::test]
async fn test_owner_is_never_removed() {
    let mut app = helper::setup_test_app();

    let (owner, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, _) = helper::signup(&mut app, "inez", "inez@example.com").await;

    let (_, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[friend.id],
        &[],
    )
    .await;
    let flow = flow.unwrap();

    // an empty desired list removes everybody but the owner
    let payload = helper::members_payload(&[], &[]);
    let (status_code, updated, _) =
        helper::maybe_update_flow(&mut app, &owner_token, &flow.id, payload).await;
    assert_eq!(StatusCode::OK, status_code);

    let members = updated.unwrap().members.unwrap();
    assert_eq!(1, members.len());
    assert_eq!(Some(owner.id), members[0].user_id);
    assert_eq!("owner".to_string(), members[0].role);
}

#[tokio::test]
async fn test_invite_requires_owner() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, friend_token) = helper::signup(&mut app, "inez", "inez@example.com").await;

    let (_, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[friend.id],
        &[],
    )
    .await;
    let flow = flow.unwrap();

    helper::maybe_accept_invitation(&mut app, &friend_token, &flow.id).await;

    // a member cannot invite
    let (status_code, _, error) = helper::maybe_invite(
        &mut app,
        &friend_token,
        &flow.id,
        None,
        Some("outsider@example.com"),
    )
    .await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert!(error.is_some());
}

#[tokio::test]
async fn test_invite_conflicts() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let (friend, friend_token) = helper::signup(&mut app, "inez", "inez@example.com").await;

    let flow = helper::create_flow(&mut app, &owner_token, "Us", "shared").await;

    // invite, creating a pending row
    let (status_code, member, _) =
        helper::maybe_invite(&mut app, &owner_token, &flow.id, Some(&friend.id), None).await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert_eq!("pending".to_string(), member.unwrap().role);

    // inviting again conflicts with the pending row
    let (status_code, _, error) =
        helper::maybe_invite(&mut app, &owner_token, &flow.id, Some(&friend.id), None).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(
        Some("An invitation for this flow is already pending".to_string()),
        error
    );

    helper::maybe_accept_invitation(&mut app, &friend_token, &flow.id).await;

    // and after accepting, with the membership
    let (status_code, _, error) =
        helper::maybe_invite(&mut app, &owner_token, &flow.id, Some(&friend.id), None).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Already a member of this flow".to_string()), error);

    // both a user ID and an email is rejected
    let (status_code, _, error) = helper::maybe_invite(
        &mut app,
        &owner_token,
        &flow.id,
        Some(&friend.id),
        Some("inez@example.com"),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(
        Some("Provide either a user ID or an email address".to_string()),
        error
    );
}

#[tokio::test]
async fn test_email_invitation_is_claimed_at_signup() {
    let mut app = helper::setup_test_app();

    let (_, owner_token) = helper::signup(&mut app, "maud", "maud@example.com").await;

    let (_, flow, _) = helper::maybe_create_flow_with_members(
        &mut app,
        &owner_token,
        "Us",
        "shared",
        &[],
        &["late@example.com"],
    )
    .await;
    let flow = flow.unwrap();

    // the invitee signs up with the invited address
    let (late, late_token) = helper::signup(&mut app, "late", "late@example.com").await;

    // the email row now belongs to the new user, still pending
    let (_, members) = helper::list_members(&mut app, &owner_token, &flow.id).await;
    let members = members.unwrap();
    assert!(members
        .iter()
        .any(|member| member.user_id == Some(late.id) && member.role == "pending"));
    assert!(!members
        .iter()
        .any(|member| member.email == Some("late@example.com".to_string())));

    // accepting is still up to them
    let (status_code, _) = helper::maybe_accept_invitation(&mut app, &late_token, &flow.id).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (status_code, _, _) = helper::single_flow(&mut app, &late_token, &flow.id).await;
    assert_eq!(StatusCode::OK, status_code);
}
