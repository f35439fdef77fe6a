use axum::http::StatusCode;

use crate::tests::helper;

#[tokio::test]
async fn test_invalid_json() {
    let mut app = helper::setup_test_app();

    let (_, access_token) = helper::signup(&mut app, "maud", "maud@example.com").await;
    let flow = helper::create_flow(&mut app, &access_token, "Dear diary", "personal").await;

    // wrong type for a field
    let body = r#"{"title":123}"#;
    let (status_code, _, error) =
        helper::maybe_create_moment_with_raw_body(&mut app, &access_token, &flow.id, body, true)
            .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(error.is_some());
    let error = error.unwrap();
    assert_eq!("Data error".to_string(), error.error);
    // the description also carries the offending field and position
    let description = error.description.unwrap();
    assert!(description.starts_with("Failed to deserialize the JSON body into the target type"));
    assert!(description.contains("title"));

    // syntax error
    let body = r#"{"}"#;
    let (status_code, _, error) =
        helper::maybe_create_moment_with_raw_body(&mut app, &access_token, &flow.id, body, true)
            .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(error.is_some());
    let error = error.unwrap();
    assert_eq!("JSON syntax error".to_string(), error.error);
    assert_eq!(
        Some("EOF while parsing a string at line 1 column 3".to_string()),
        error.description
    );

    // missing content type
    let body = r"{}";
    let (status_code, _, error) =
        helper::maybe_create_moment_with_raw_body(&mut app, &access_token, &flow.id, body, false)
            .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert!(error.is_some());
    let error = error.unwrap();
    assert_eq!(
        "Missing `application/json` content type".to_string(),
        error.error
    );
}
