use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use homeplus_control::{Error, HomesApi, OAuthSession, SwitchState, Token, UpdateIntervals};
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session() -> Arc<OAuthSession> {
    let token = Token {
        access_token: "test_access".to_string(),
        refresh_token: "test_refresh".to_string(),
        expires_in: 3600,
        expires_on: Utc::now().timestamp() + 3600,
        token_type: "Bearer".to_string(),
    };
    Arc::new(
        OAuthSession::builder("client_identifier", "client_secret", "subscription_key")
            .token(token)
            .build(),
    )
}

const ZERO_INTERVALS: UpdateIntervals = UpdateIntervals {
    plant_data: Duration::ZERO,
    topology: Duration::ZERO,
    module_status: Duration::ZERO,
};

fn home_body(modules: serde_json::Value) -> serde_json::Value {
    json!({"body": {"homes": [{"id": "home_1", "name": "My Home", "modules": modules}]}})
}

fn status_body() -> serde_json::Value {
    json!({"body": {"home": {"id": "home_1", "modules": [
        {"id": "gw_1", "reachable": true},
        {"id": "plug_1", "reachable": true, "on": true, "power": 60.0},
        {"id": "cover_1", "reachable": true, "current_position": 25},
        {"id": "remote_1", "reachable": true, "battery_state": "full"}
    ]}}})
}

#[tokio::test]
async fn get_modules_returns_the_interactive_subset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(home_body(json!([
            {"id": "gw_1", "type": "NLG", "name": "Gateway"},
            {"id": "plug_1", "type": "NLP", "name": "Outlet"},
            {"id": "cover_1", "type": "NBR", "name": "Cover"},
            {"id": "remote_1", "type": "NLT", "name": "Remote"}
        ]))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homestatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .mount(&server)
        .await;

    let mut api = HomesApi::new(session()).base_url(server.uri());
    let modules = api.get_modules().await.unwrap();

    assert_eq!(modules.len(), 2, "gateways and remotes are not served");
    assert_eq!(modules["plug_1"].status(), Some(SwitchState::On));
    assert_eq!(modules["cover_1"].level(), Some(25));

    // Non-interactive modules are still reachable through their home.
    assert_eq!(api.homes()["home_1"].modules().len(), 4);
    assert!(api.module_mut("plug_1").is_some());
    assert!(api.module_mut("nope").is_none());
}

#[tokio::test]
async fn fresh_data_is_not_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .and(query_param_is_missing("home_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(home_body(json!([
            {"id": "plug_1", "type": "NLP", "name": "Outlet"}
        ]))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .and(query_param("home_id", "home_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(home_body(json!([
            {"id": "plug_1", "type": "NLP", "name": "Outlet"}
        ]))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homestatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut api = HomesApi::new(session()).base_url(server.uri());
    assert_eq!(api.get_modules().await.unwrap().len(), 1);
    // Second poll inside every interval: served from memory.
    assert_eq!(api.get_modules().await.unwrap().len(), 1);
}

#[tokio::test]
async fn evicted_modules_are_tracked_until_they_reappear() {
    let server = MockServer::start().await;
    let full = home_body(json!([
        {"id": "gw_1", "type": "NLG", "name": "Gateway"},
        {"id": "plug_1", "type": "NLP", "name": "Outlet"}
    ]));
    let shrunk = home_body(json!([
        {"id": "gw_1", "type": "NLG", "name": "Gateway"}
    ]));

    // Listing + topology both read /homesdata, so each poll consumes two.
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(full.clone()))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shrunk))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(full))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homestatus"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .mount(&server)
        .await;

    let mut api = HomesApi::with_intervals(session(), ZERO_INTERVALS).base_url(server.uri());

    let modules = api.get_modules().await.unwrap();
    assert!(modules.contains_key("plug_1"));
    assert!(api.removed_modules().is_empty());

    let modules = api.get_modules().await.unwrap();
    assert!(modules.is_empty());
    let removed = api.removed_modules();
    assert_eq!(removed.len(), 1, "only interactive modules are tracked");
    assert_eq!(removed["plug_1"].status(), Some(SwitchState::On));

    let modules = api.get_modules().await.unwrap();
    assert!(modules.contains_key("plug_1"));
    assert!(api.removed_modules().is_empty(), "a reappeared id leaves the removed map");
}

#[tokio::test]
async fn one_failing_home_does_not_poison_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .and(query_param_is_missing("home_id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"body": {"homes": [
            {"id": "home_1", "name": "My Home", "modules": [
                {"id": "plug_1", "type": "NLP", "name": "Outlet"}
            ]},
            {"id": "home_2", "name": "Country House"}
        ]}})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .and(query_param("home_id", "home_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(home_body(json!([
            {"id": "plug_1", "type": "NLP", "name": "Outlet"}
        ]))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/homestatus"))
        .and(query_param("home_id", "home_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("home_id", "home_2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut api = HomesApi::new(session()).base_url(server.uri());
    let modules = api.get_modules().await.unwrap();

    assert_eq!(modules.len(), 1);
    assert_eq!(modules["plug_1"].status(), Some(SwitchState::On));
    assert!(api.homes()["home_2"].modules().is_empty());
}

#[tokio::test]
async fn listing_failure_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/homesdata"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut api = HomesApi::new(session()).base_url(server.uri());
    let err = api.get_modules().await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));
}
