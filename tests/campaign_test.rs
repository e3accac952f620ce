mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use sms_campaign_backend::database::MessageStore;
use sms_campaign_backend::models::{campaign::CampaignStatus, message::MessageStatus};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

use common::{bearer, body_json, eventually, spawn_app, twilio_provider};

fn form_value(req: &MockRequest, key: &str) -> Option<String> {
    url::form_urlencoded::parse(&req.body)
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

async fn accepting_carrier() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .respond_with(|req: &MockRequest| {
            let to = form_value(req, "To").unwrap_or_default();
            ResponseTemplate::new(201).set_body_json(json!({
                "sid": format!("SM{}", to.trim_start_matches('+')),
                "status": "queued",
            }))
        })
        .mount(&server)
        .await;
    server
}

fn submit_request(owner: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/sms/send")
        .header("content-type", "application/json")
        .header("authorization", bearer(owner))
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn literal_template_fans_out_and_completes() {
    let carrier = accepting_carrier().await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app
        .router
        .clone()
        .oneshot(submit_request(
            "owner-1",
            json!({
                "campaignName": "Launch",
                "messageTemplate": "Hi {{name}}",
                "recipients": [{ "phone": "1234567890" }, { "phone": "+44 7400 123456" }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["totalMessages"], 2);
    assert_eq!(body["messageCount"], 2);
    assert_eq!(body["failedToDispatch"], 0);
    assert_eq!(body["estimatedSegments"], 2);
    let campaign_id: Uuid = body["campaignId"].as_str().unwrap().parse().unwrap();

    let messages = app.store.campaign_messages(campaign_id).unwrap();
    assert_eq!(messages.len(), 2);
    let mut phones: Vec<String> = messages.iter().map(|m| m.phone.clone()).collect();
    phones.sort();
    assert_eq!(phones, vec!["+1234567890", "+447400123456"]);
    assert!(messages.iter().all(|m| m.body == "Hi {{name}}"));

    let store = app.store.clone();
    let delivered = eventually(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .campaign_messages(campaign_id)
                .unwrap()
                .iter()
                .all(|m| m.status == MessageStatus::Sent)
        }
    })
    .await;
    assert!(delivered, "messages were not sent");

    let sids: Vec<Option<String>> = app
        .store
        .campaign_messages(campaign_id)
        .unwrap()
        .into_iter()
        .map(|m| m.provider_id)
        .collect();
    assert!(sids.contains(&Some("SM1234567890".into())));
    assert!(sids.contains(&Some("SM447400123456".into())));

    let store = app.store.clone();
    let completed = eventually(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .get_campaign("owner-1", campaign_id)
                .await
                .unwrap()
                .is_some_and(|c| c.status == CampaignStatus::Sent)
        }
    })
    .await;
    assert!(completed, "campaign never reached sent");

    let requests = carrier.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|r| form_value(r, "Body").as_deref() == Some("Hi {{name}}")));
}

#[tokio::test]
async fn fan_out_is_complete_when_some_sends_fail() {
    let carrier = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .respond_with(|req: &MockRequest| {
            let to = form_value(req, "To").unwrap_or_default();
            if to == "+15550666" {
                ResponseTemplate::new(400).set_body_json(json!({
                    "code": 21211,
                    "message": "The 'To' number is not a valid phone number.",
                }))
            } else {
                ResponseTemplate::new(201).set_body_json(json!({
                    "sid": format!("SM{}", to.trim_start_matches('+')),
                    "status": "queued",
                }))
            }
        })
        .mount(&carrier)
        .await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app
        .router
        .clone()
        .oneshot(submit_request(
            "owner-1",
            json!({
                "campaignName": "Mixed",
                "messageTemplate": "Sale today",
                "recipients": [
                    { "phone": "+15550100" },
                    { "phone": "+15550666" },
                    { "phone": "+15550200" },
                ],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["totalMessages"], 3);
    assert_eq!(body["messageCount"], 3);
    let campaign_id: Uuid = body["campaignId"].as_str().unwrap().parse().unwrap();

    let store = app.store.clone();
    let settled = eventually(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .campaign_messages(campaign_id)
                .unwrap()
                .iter()
                .all(|m| m.status != MessageStatus::Queued)
        }
    })
    .await;
    assert!(settled, "messages never left queued");

    let messages = app.store.campaign_messages(campaign_id).unwrap();
    assert_eq!(messages.len(), 3);
    for message in &messages {
        if message.phone == "+15550666" {
            assert_eq!(message.status, MessageStatus::Failed);
            assert_eq!(message.attempts, 3);
            assert!(message
                .error
                .as_deref()
                .is_some_and(|e| e.contains("not a valid phone number")));
        } else {
            assert_eq!(message.status, MessageStatus::Sent);
            assert!(message.error.is_none());
        }
    }

    let store = app.store.clone();
    let completed = eventually(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .get_campaign("owner-1", campaign_id)
                .await
                .unwrap()
                .is_some_and(|c| c.status == CampaignStatus::Sent)
        }
    })
    .await;
    assert!(completed, "campaign never reached sent");
    let campaign = app.store.get_campaign("owner-1", campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.total_messages, 3);
}

#[tokio::test]
async fn campaign_detail_reports_progress() {
    let carrier = accepting_carrier().await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app
        .router
        .clone()
        .oneshot(submit_request(
            "owner-1",
            json!({
                "campaignName": "Detail",
                "messageTemplate": "Hello {{name}}, code {{code}}",
                "recipients": [{ "phone": "15550100", "name": "Ann", "variables": { "code": "42" } }],
            }),
        ))
        .await
        .unwrap();
    let campaign_id = body_json(resp).await["campaignId"].as_str().unwrap().to_string();

    let store = app.store.clone();
    let id: Uuid = campaign_id.parse().unwrap();
    assert!(
        eventually(Duration::from_secs(5), || {
            let store = store.clone();
            async move { store.campaign_progress(id).await.unwrap().sent == 1 }
        })
        .await
    );

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/campaigns/{}", campaign_id))
                .header("authorization", bearer("owner-1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let detail = body_json(resp).await;
    assert_eq!(detail["name"], "Detail");
    assert_eq!(detail["total_messages"], 1);
    assert_eq!(detail["progress"]["sent"], 1);

    let messages = app.store.campaign_messages(id).unwrap();
    assert_eq!(messages[0].body, "Hello Ann, code 42");

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/campaigns/{}", campaign_id))
                .header("authorization", bearer("someone-else"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submission_requires_bearer_token() {
    let carrier = MockServer::start().await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sms/send")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "campaignName": "x",
                        "messageTemplate": "y",
                        "recipients": [{ "phone": "1" }],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/campaigns")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_submissions_persist_nothing() {
    let carrier = MockServer::start().await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    for body in [
        json!({ "campaignName": "Empty", "messageTemplate": "hi", "recipients": [] }),
        json!({ "campaignName": "", "messageTemplate": "hi", "recipients": [{ "phone": "1555" }] }),
        json!({ "campaignName": "NoDigits", "messageTemplate": "hi", "recipients": [{ "phone": "abc" }] }),
    ] {
        let resp = app
            .router
            .clone()
            .oneshot(submit_request("owner-1", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    assert!(app.store.list_campaigns("owner-1").await.unwrap().is_empty());
    assert!(carrier.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn reply_is_sent_and_listed_in_conversation() {
    let carrier = accepting_carrier().await;
    let app = spawn_app(twilio_provider(&carrier)).await;

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reply/send")
                .header("content-type", "application/json")
                .header("authorization", bearer("owner-1"))
                .body(Body::from(
                    json!({ "phone": "+1 (555) 0100", "message": "Thanks!" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["message"]["phone"], "+15550100");
    assert_eq!(body["message"]["status"], "queued");
    let id: Uuid = body["message"]["id"].as_str().unwrap().parse().unwrap();

    let store = app.store.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            let store = store.clone();
            async move {
                store
                    .get_message(id)
                    .await
                    .unwrap()
                    .is_some_and(|m| m.status == MessageStatus::Sent)
            }
        })
        .await
    );

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/conversations/15550100")
                .header("authorization", bearer("owner-1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let thread = body_json(resp).await;
    assert_eq!(thread.as_array().unwrap().len(), 1);
    assert_eq!(thread[0]["body"], "Thanks!");

    let queue = app.queue.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            let queue = queue.clone();
            async move { queue.stats().await.unwrap().completed == 1 }
        })
        .await
    );

    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/queue/status")
                .header("authorization", bearer("owner-1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status = body_json(resp).await;
    assert_eq!(status["backend"], "in_process");
    assert_eq!(status["stats"]["completed"], 1);
    assert_eq!(status["submitLimit"]["current"], 1);
}

#[tokio::test]
async fn submissions_over_the_owner_limit_are_rejected() {
    let carrier = accepting_carrier().await;
    let mut config = common::test_config();
    config.rate_limit.submit_limit = 1;
    let app = common::spawn_app_with(twilio_provider(&carrier), config).await;

    let body = json!({
        "campaignName": "Limited",
        "messageTemplate": "hi",
        "recipients": [{ "phone": "+15550100" }],
    });
    let resp = app
        .router
        .clone()
        .oneshot(submit_request("owner-1", body.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .router
        .clone()
        .oneshot(submit_request("owner-1", body.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let resp = app
        .router
        .clone()
        .oneshot(submit_request("owner-2", body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(app.store.list_campaigns("owner-1").await.unwrap().len(), 1);
}
