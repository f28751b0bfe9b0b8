use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dispatch_agent::api::rest::router;
use dispatch_agent::config::Config;
use dispatch_agent::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        poll_interval_ms: 50,
        radius_start_m: 1_500,
        radius_step_m: 1_000,
        radius_max_m: 5_000,
        event_buffer_size: 1024,
    }
}

fn setup() -> axum::Router {
    router(Arc::new(AppState::new(test_config())))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn create_agent(app: &axum::Router, name: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/agents", json!({ "name": name })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

fn order_payload(group_id: &str, group_seq: u32, status: &str, vendor_lng: f64) -> Value {
    json!({
        "vendor": { "name": "Spice Villa", "location": { "lat": 12.9716, "lng": vendor_lng } },
        "customer": { "name": "Asha", "phone": "9876543210" },
        "address": { "line": "44 MG Road" },
        "items": [ { "name": "Thali", "quantity": 1, "price": 180.0 } ],
        "group_id": group_id,
        "group_seq": group_seq,
        "status": status
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["agents"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["runtimes"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("active_runtimes"));
}

#[tokio::test]
async fn create_agent_starts_a_runtime() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;

    assert_eq!(agent["name"], "Ravi");
    assert_eq!(agent["available"], false);
    assert_eq!(agent["status"], "verified");
    assert!(agent["current_group"].is_null());

    let response = app.oneshot(get_request("/health")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["agents"], 1);
    assert_eq!(body["runtimes"], 1);
}

#[tokio::test]
async fn create_agent_rejects_empty_name() {
    let app = setup();
    let response = app
        .oneshot(json_request("POST", "/agents", json!({ "name": "  " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn availability_and_location_updates_roundtrip() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/agents/{id}/availability"),
            json!({ "available": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["available"], true);

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/agents/{id}/location"),
            json!({ "location": { "lat": 12.9716, "lng": 77.5946 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["location"]["lat"], 12.9716);
}

#[tokio::test]
async fn unknown_agent_returns_not_found() {
    let app = setup();
    let response = app
        .oneshot(get_request(
            "/agents/00000000-0000-0000-0000-000000000042",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_order_returns_full_detail_with_codes() {
    let app = setup();
    let group_id = "00000000-0000-0000-0000-00000000000a";
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            order_payload(group_id, 1, "pending", 77.6056),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["order"]["status"], "pending");
    assert_eq!(body["order"]["group_seq"], 1);
    assert!(body["order"]["agent_id"].is_null());
    assert_eq!(body["vendor"]["name"], "Spice Villa");
    assert_eq!(body["items"][0]["name"], "Thali");

    let agent_code = body["order"]["agent_code"].as_str().unwrap();
    let customer_code = body["order"]["customer_code"].as_str().unwrap();
    assert_eq!(agent_code.len(), 6);
    assert_eq!(customer_code.len(), 6);
}

#[tokio::test]
async fn get_unknown_order_returns_not_found() {
    let app = setup();
    let response = app
        .oneshot(get_request(
            "/orders/00000000-0000-0000-0000-000000000042",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_update_persists_but_rejects_direct_delivery() {
    let app = setup();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            order_payload("00000000-0000-0000-0000-00000000000a", 1, "accepted", 77.6056),
        ))
        .await
        .unwrap();
    let order = body_json(response).await;
    let id = order["order"]["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{id}/status"),
            json!({ "status": "preparing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["order"]["status"], "preparing");

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/orders/{id}/status"),
            json!({ "status": "delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn handoff_requires_the_customer_code() {
    let app = setup();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            order_payload(
                "00000000-0000-0000-0000-00000000000a",
                1,
                "on_the_way",
                77.6056,
            ),
        ))
        .await
        .unwrap();
    let order = body_json(response).await;
    let id = order["order"]["id"].as_str().unwrap();
    let customer_code = order["order"]["customer_code"].as_str().unwrap();

    let wrong = if customer_code == "000000" {
        "000001"
    } else {
        "000000"
    };
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{id}/handoff"),
            json!({ "code": wrong }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // short codes never reach the comparison
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{id}/handoff"),
            json!({ "code": "12345" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{id}/handoff"),
            json!({ "code": customer_code }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["order"]["status"], "delivered");
    assert!(!body["order"]["delivered_at"].is_null());
}

#[tokio::test]
async fn rating_endpoints_aggregate_stats() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap();

    for stars in [4, 5] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                &format!("/agents/{id}/rating"),
                json!({
                    "customer_id": "00000000-0000-0000-0000-000000000099",
                    "stars": stars
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/agents/{id}/rating"),
            json!({
                "customer_id": "00000000-0000-0000-0000-000000000099",
                "stars": 6
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/agents/{id}/rating")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["average"], 4.5);
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn resubscribe_recreates_channels() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(post_request(&format!("/agents/{id}/resubscribe")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["resubscribed"], true);

    let response = app
        .oneshot(post_request(
            "/agents/00000000-0000-0000-0000-000000000042/resubscribe",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deregistering_an_agent_stops_its_runtime() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/agents/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get_request("/health")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["agents"], 1);
    assert_eq!(body["runtimes"], 0);

    // a second delete has nothing left to stop
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/agents/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn poller_assigns_nearby_group_and_list_fills_in() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap().to_string();

    app.clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/agents/{id}/location"),
            json!({ "location": { "lat": 12.9716, "lng": 77.5946 } }),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/agents/{id}/availability"),
            json!({ "available": true }),
        ))
        .await
        .unwrap();

    // one-order group whose vendor is ~1.2 km away
    let group_id = "00000000-0000-0000-0000-00000000000a";
    app.clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            order_payload(group_id, 1, "accepted", 77.6056),
        ))
        .await
        .unwrap();

    // a few 50 ms poll cycles plus the refetch round-trip
    tokio::time::sleep(Duration::from_millis(500)).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/agents/{id}")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["current_group"], group_id);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/agents/{id}/orders")))
        .await
        .unwrap();
    let orders = body_json(response).await;
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["order"]["status"], "accepted");
    assert_eq!(orders[0]["order"]["agent_id"].as_str().unwrap(), id);
}

#[tokio::test]
async fn tab_switch_returns_the_new_view() {
    let app = setup();
    let agent = create_agent(&app, "Ravi").await;
    let id = agent["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/agents/{id}/tab"),
            json!({ "tab": "with_you" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body.as_array().unwrap().is_empty());
}
