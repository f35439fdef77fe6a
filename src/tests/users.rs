use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_signup_and_login() {
    let mut app = helper::setup_test_app();

    let (status_code, user, _) =
        helper::maybe_signup(&mut app, "maud", "maud@example.com", "verysecret").await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert!(user.is_some());
    let user = user.unwrap();
    assert_eq!("maud".to_string(), user.username);

    let access_token = helper::login_with_password(&mut app, "maud", "verysecret").await;

    // verify the token works
    let (status_code, current) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(user.id, current.unwrap().id);
}

#[tokio::test]
async fn test_signup_duplicates() {
    let mut app = helper::setup_test_app();

    let (status_code, _, _) =
        helper::maybe_signup(&mut app, "maud", "maud@example.com", "verysecret").await;
    assert_eq!(StatusCode::CREATED, status_code);

    // same username
    let (status_code, _, error) =
        helper::maybe_signup(&mut app, "maud", "other@example.com", "verysecret").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Username is already taken".to_string()), error);

    // same email
    let (status_code, _, error) =
        helper::maybe_signup(&mut app, "other", "maud@example.com", "verysecret").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Email address is already in use".to_string()), error);
}

#[tokio::test]
async fn test_change_password() {
    let mut app = helper::setup_test_app();

    let (_, access_token) = helper::signup(&mut app, "maud", "maud@example.com").await;

    // wrong current password
    let (status_code, _, error) =
        helper::maybe_change_password(&mut app, &access_token, "wrong", "newsecret").await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(Some("Invalid password".to_string()), error);

    // change for real
    let (status_code, new_token, _) =
        helper::maybe_change_password(&mut app, &access_token, "verysecret", "newsecret").await;
    assert_eq!(StatusCode::OK, status_code);
    let new_token = new_token.unwrap();

    // the old token is invalidated
    let (status_code, _) = helper::current_user(&mut app, &access_token).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    // the fresh one works
    let (status_code, _) = helper::current_user(&mut app, &new_token).await;
    assert_eq!(StatusCode::OK, status_code);

    // and so does logging in with the new password
    helper::login_with_password(&mut app, "maud", "newsecret").await;
}
