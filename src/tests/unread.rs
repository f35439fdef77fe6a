use std::time::Duration;

use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_unread_counts() {
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

    // the owner writes a moment
    let (_, moment, _) = helper::maybe_create_moment(
        &mut app,
        &owner_token,
        &flow.id,
        Some("Day one"),
        Some("<p>Hello</p>"),
    )
    .await;
    let moment = moment.unwrap();

    // unread for the member, not for the author
    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert_eq!(1, flows.unwrap()[0].unread_count);

    let (_, flows) = helper::list_flows(&mut app, &owner_token).await;
    assert_eq!(0, flows.unwrap()[0].unread_count);

    // the member views the moment; the read mark lands after the dwell
    let (status_code, _, _) =
        helper::single_moment(&mut app, &friend_token, &flow.id, &moment.id).await;
    assert_eq!(StatusCode::OK, status_code);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert_eq!(0, flows.unwrap()[0].unread_count);

    // a new moment makes the flow unread again
    helper::maybe_create_moment(&mut app, &owner_token, &flow.id, Some("Day two"), None).await;

    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert_eq!(1, flows.unwrap()[0].unread_count);
}

#[tokio::test]
async fn test_viewing_your_own_moment_marks_nothing() {
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

    // the member authors a moment and the owner one right after
    helper::maybe_create_moment(&mut app, &friend_token, &flow.id, Some("Mine"), None).await;

    let (_, owners, _) =
        helper::maybe_create_moment(&mut app, &owner_token, &flow.id, Some("Reply"), None).await;
    let owners = owners.unwrap();

    // viewing their own moment does not advance the member's read position
    let (status_code, moments) = helper::list_moments(&mut app, &friend_token, &flow.id).await;
    assert_eq!(StatusCode::OK, status_code);

    let mine = moments
        .unwrap()
        .into_iter()
        .find(|moment| moment.user_id == friend.id)
        .unwrap();

    helper::single_moment(&mut app, &friend_token, &flow.id, &mine.id).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    // the owner's moment is still unread
    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert_eq!(1, flows.unwrap()[0].unread_count);

    // reading the owner's moment clears it
    helper::single_moment(&mut app, &friend_token, &flow.id, &owners.id).await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, flows) = helper::list_flows(&mut app, &friend_token).await;
    assert_eq!(0, flows.unwrap()[0].unread_count);
}
