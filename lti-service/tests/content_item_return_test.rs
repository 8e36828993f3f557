mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

fn jwt_form(jwt: &str) -> String {
    serde_urlencoded::to_string([("JWT", jwt)]).unwrap()
}

const RETURN_PATH: &str = "/lti/api/v1/content-item-return";

#[tokio::test]
async fn test_items_from_pem_registered_tool_are_persisted() {
    let app = TestApp::spawn().await;
    let jwt = deep_linking_response(
        PEM_CLIENT,
        None,
        json!([
            {"type": "ltiResourceLink", "title": "Quiz", "url": "https://tool.example.com/q"},
            {"type": "link", "url": "https://example.com/article"}
        ]),
    );

    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "Successfully received and decoded content item"
    );
    assert_eq!(body["data"]["content_items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["tool_id"], "pem-client-uuid");

    let stored = app.store.content_items().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|item| item.tool_id == "pem-client-uuid"));
    let ids = body["data"]["persisted_ids"].as_array().unwrap();
    assert!(stored.iter().all(|item| ids.contains(&json!(item.uuid))));
}

#[tokio::test]
async fn test_items_verified_through_tool_jwks() {
    let app = TestApp::spawn().await;
    let jwt = deep_linking_response(JWKS_CLIENT, Some(TOOL_KID), json!({"type": "link"}));

    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Second submission is served from the cached keyset.
    let jwt = deep_linking_response(JWKS_CLIENT, Some(TOOL_KID), json!({"type": "html"}));
    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.store.content_items().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_kid_fails_key_resolution() {
    let app = TestApp::spawn().await;
    let jwt = deep_linking_response(JWKS_CLIENT, Some("rotated-away"), json!({"type": "link"}));

    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.store.content_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_issuer_is_not_found_and_writes_nothing() {
    let app = TestApp::spawn().await;
    let jwt = deep_linking_response("unregistered-tool", None, json!([{"type": "link"}]));

    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(app.store.content_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_forged_signature_is_unauthorized() {
    let app = TestApp::spawn().await;
    let jwt = deep_linking_response(PEM_CLIENT, None, json!([{"type": "link"}]));
    let mut parts: Vec<&str> = jwt.split('.').collect();
    let forged = deep_linking_response(PEM_CLIENT, None, json!([{"type": "html"}]));
    let forged_payload = forged.split('.').nth(1).unwrap();
    parts[1] = forged_payload;
    let tampered = parts.join(".");

    let response = app.send(form_post(RETURN_PATH, jwt_form(&tampered))).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.content_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_jwt_field_is_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .send(form_post(RETURN_PATH, "token=abc".to_string()))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_failure_is_internal_error() {
    let app = TestApp::spawn().await;
    app.store.set_reject_writes(true);
    let jwt = deep_linking_response(PEM_CLIENT, None, json!([{"type": "link"}]));

    let response = app.send(form_post(RETURN_PATH, jwt_form(&jwt))).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}
