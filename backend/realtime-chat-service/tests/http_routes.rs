// HTTP surface: health, metrics and the internal notification endpoints

mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::{hub, TestClient};
use realtime_chat_service::config::Config;
use realtime_chat_service::routes::configure_routes;
use realtime_chat_service::state::AppState;
use serde_json::{json, Value};
use uuid::Uuid;

#[actix_web::test]
async fn test_health_reports_online_users() {
    let (hub, _store) = hub();
    let _client = TestClient::connect(&hub, Some(Uuid::new_v4())).await;
    let state = AppState::new(hub, Config::test_defaults());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "HEALTHY");
    assert_eq!(body["load"]["active_online_users"], 1);
    assert!(body["system"]["service_version"].is_string());
}

#[actix_web::test]
async fn test_metrics_exposes_prometheus_text() {
    let (hub, _store) = hub();
    let _client = TestClient::connect(&hub, Some(Uuid::new_v4())).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(hub, Config::test_defaults())))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = test::read_body(resp).await;
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("chat_connections_total"));
}

#[actix_web::test]
async fn test_emit_event_reaches_user_channel() {
    let (hub, _store) = hub();
    let user = Uuid::new_v4();
    let mut client = TestClient::connect(&hub, Some(user)).await;
    client.drain();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(hub, Config::test_defaults())))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/internal/events")
        .set_json(json!({
            "target": { "type": "user", "id": user },
            "event": "contact:request_received",
            "payload": { "userId": Uuid::new_v4(), "status": "pending" }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["subscribers"], 1);

    let events = client.drain_named("contact:request_received");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["data"]["status"], "pending");
}

#[actix_web::test]
async fn test_emit_event_rejects_unknown_event() {
    let (hub, _store) = hub();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(hub, Config::test_defaults())))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/internal/events")
        .set_json(json!({
            "target": { "type": "room", "id": Uuid::new_v4() },
            "event": "rm_rf",
            "payload": {}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_add_members_route() {
    let (hub, store) = hub();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let group = store.create_group_chat("team", &[alice]).await;
    let mut bob_client = TestClient::connect(&hub, Some(bob)).await;
    bob_client.drain();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState::new(hub, Config::test_defaults())))
            .configure(configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(&format!("/internal/chats/{}/members", group.id))
        .set_json(json!({ "memberIds": [bob] }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["members"], json!([alice, bob]));
    assert_eq!(bob_client.drain_named("added_to_group").len(), 1);

    let empty = test::TestRequest::post()
        .uri(&format!("/internal/chats/{}/members", group.id))
        .set_json(json!({ "memberIds": [] }))
        .to_request();
    assert_eq!(
        test::call_service(&app, empty).await.status(),
        StatusCode::BAD_REQUEST
    );

    let missing = test::TestRequest::post()
        .uri(&format!("/internal/chats/{}/members", Uuid::new_v4()))
        .set_json(json!({ "memberIds": [bob] }))
        .to_request();
    assert_eq!(
        test::call_service(&app, missing).await.status(),
        StatusCode::NOT_FOUND
    );
}
