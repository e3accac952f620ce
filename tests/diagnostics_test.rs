mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{bearer, body_json, spawn_app, twilio_provider};

fn get(uri: &str, auth: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn startup_check_reports_ready_when_carrier_answers() {
    let carrier = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2010-04-01/Accounts/AC123.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sid": "AC123" })))
        .mount(&carrier)
        .await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app.router.clone().oneshot(get("/api/startup/check", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["provider"], "twilio");
    assert_eq!(body["checks"], json!({ "env": true, "database": true, "provider": true }));
}

#[tokio::test]
async fn startup_check_fails_on_rejected_credentials() {
    let carrier = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2010-04-01/Accounts/AC123.json"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Authenticate" })))
        .mount(&carrier)
        .await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app.router.clone().oneshot(get("/api/startup/check", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["checks"]["database"], true);
    assert_eq!(body["checks"]["provider"], false);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("Authenticate"));
}

#[tokio::test]
async fn sender_numbers_are_listed_for_authenticated_callers() {
    let carrier = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2010-04-01/Accounts/AC123/IncomingPhoneNumbers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "incoming_phone_numbers": [
                { "sid": "PN1", "phone_number": "+15559990000", "friendly_name": "Main line" },
            ],
        })))
        .mount(&carrier)
        .await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app.router.clone().oneshot(get("/api/twilio/numbers", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .router
        .clone()
        .oneshot(get("/api/twilio/numbers", Some(bearer("owner-1"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["numbers"],
        json!([{ "sid": "PN1", "phone": "+15559990000", "friendlyName": "Main line" }])
    );
}
