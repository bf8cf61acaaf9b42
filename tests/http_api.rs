// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! HTTP API tests against an in-memory store and gateway

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use crudflow::gateway::MemoryGateway;
use crudflow::server::{router, AppState};
use crudflow::store::MemoryStore;
use crudflow::FunctionService;

fn user() -> HeaderName {
    HeaderName::from_static("x-user-id")
}

fn test_server() -> (TestServer, Arc<MemoryGateway>) {
    let gateway = Arc::new(MemoryGateway::with_tables(["orders", "items"]));
    let service = Arc::new(FunctionService::new(
        Arc::new(MemoryStore::new()),
        gateway.clone(),
    ));
    let state = AppState::new(service, user(), Duration::from_secs(5));
    let server = TestServer::new(router(state)).unwrap();
    (server, gateway)
}

fn place_order() -> Value {
    json!({
        "name": "place_order",
        "functions": [
            {"idx": 1, "name": "order", "table": "orders", "action": "insert",
             "values": {"customer": {"source": "user"}, "note": {"source": "caller"}}},
            {"idx": 2, "name": "items", "table": "items", "action": "insert", "multiple": true,
             "values": {"order_id": {"source": "step", "step": "order"}, "sku": {"source": "caller"}}},
            {"idx": 3, "name": "placed", "table": "orders", "action": "fetch", "columns": ["*"],
             "filters": [{"column": "customer", "op": "=", "value": {"source": "user"}}]}
        ]
    })
}

#[tokio::test]
async fn test_create_function() {
    let (server, _) = test_server();

    let response = server.post("/api/function/create").json(&place_order()).await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["name"], "place_order");
    assert_eq!(body["functions"].as_array().unwrap().len(), 3);
    assert!(body["fingerprint"].as_str().is_some());
}

#[tokio::test]
async fn test_create_duplicate_conflicts() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server.post("/api/function/create").json(&place_order()).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["kind"], "AlreadyExists");
}

#[tokio::test]
async fn test_create_rejects_forward_reference() {
    let (server, _) = test_server();
    let definition = json!({
        "name": "backwards",
        "functions": [
            {"idx": 1, "table": "items", "action": "insert",
             "values": {"order_id": {"source": "step", "step": "order"}}},
            {"idx": 2, "name": "order", "table": "orders", "action": "insert",
             "values": {"note": {"source": "caller"}}}
        ]
    });

    let response = server.post("/api/function/create").json(&definition).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json::<Value>()["kind"], "ForwardOrSelfReference");

    server
        .get("/api/function/backwards")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_rejects_malformed_body() {
    let (server, _) = test_server();

    let response = server
        .post("/api/function/create")
        .json(&json!({"name": "no_steps_key"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invoke_runs_steps_in_order() {
    let (server, gateway) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server
        .post("/api/place_order")
        .add_header(user(), HeaderValue::from_static("7"))
        .json(&json!({
            "data": {
                "order": {"note": "rush"},
                "items": [{"sku": "a"}, {"sku": "b"}]
            }
        }))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["message"], "success");
    assert_eq!(
        body["placed"],
        json!([{"id": 1, "customer": "7", "note": "rush"}])
    );

    let items = gateway.rows("items").unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|row| row["order_id"] == json!(1)));
}

#[tokio::test]
async fn test_invoke_without_user_is_unauthorized() {
    let (server, gateway) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server
        .post("/api/place_order")
        .json(&json!({"data": {"order": {"note": "rush"}, "items": []}}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let body = response.json::<Value>();
    assert_eq!(body["kind"], "AuthRequired");
    assert_eq!(body["step"], json!({"idx": 1, "name": "order"}));
    assert!(gateway.rows("orders").unwrap().is_empty());
}

#[tokio::test]
async fn test_invoke_missing_input_is_bad_request() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server
        .post("/api/place_order")
        .add_header(user(), HeaderValue::from_static("7"))
        .json(&json!({"data": {}}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "MissingInput");
}

#[tokio::test]
async fn test_invoke_rejects_bad_timeout_header() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server
        .post("/api/place_order")
        .add_header(
            HeaderName::from_static("x-request-timeout-ms"),
            HeaderValue::from_static("soon"),
        )
        .json(&json!({"data": {}}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invoke_unknown_function() {
    let (server, _) = test_server();

    let response = server.post("/api/nothing_here").json(&json!({"data": {}})).await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["kind"], "NotFound");
}

#[tokio::test]
async fn test_list_and_search() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let mut other = place_order();
    other["name"] = json!("refund");
    server.post("/api/function/create").json(&other).await.assert_status_ok();

    let all = server.get("/api/function").await.json::<Value>();
    assert_eq!(all, json!([{"name": "place_order"}, {"name": "refund"}]));

    let found = server
        .get("/api/function")
        .add_query_param("search", "ORDER")
        .await
        .json::<Value>();
    assert_eq!(found, json!([{"name": "place_order"}]));
}

#[tokio::test]
async fn test_replace_steps() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();
    let before = server.get("/api/function/place_order").await.json::<Value>();

    let response = server
        .put("/api/function/place_order")
        .json(&json!({
            "functions": [
                {"idx": 1, "name": "recent", "table": "orders", "action": "fetch",
                 "columns": ["id"], "order": "-id", "limit": 5}
            ]
        }))
        .await;
    response.assert_status_ok();

    let after = response.json::<Value>();
    assert_eq!(after["functions"].as_array().unwrap().len(), 1);
    assert_ne!(after["fingerprint"], before["fingerprint"]);

    let body = server
        .post("/api/place_order")
        .json(&json!({"data": {}}))
        .await
        .json::<Value>();
    assert_eq!(body, json!({"message": "success", "recent": []}));
}

#[tokio::test]
async fn test_replace_name_mismatch() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server
        .put("/api/function/place_order")
        .json(&json!({"name": "other", "functions": []}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_replace_missing_function() {
    let (server, _) = test_server();

    let response = server
        .put("/api/function/ghost")
        .json(&json!({"functions": place_order()["functions"]}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_function() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    let response = server.delete("/api/function/place_order").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>(), json!({"message": "success"}));

    server
        .delete("/api/function/place_order")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .post("/api/place_order")
        .json(&json!({"data": {}}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_browse_table() {
    let (server, _) = test_server();
    server.post("/api/function/create").json(&place_order()).await.assert_status_ok();

    for note in ["rush", "gift", "rush"] {
        server
            .post("/api/place_order")
            .add_header(user(), HeaderValue::from_static("7"))
            .json(&json!({"data": {"order": {"note": note}, "items": []}}))
            .await
            .assert_status_ok();
    }

    let rush = server
        .get("/api/table/orders")
        .add_query_param("filter", "note = rush")
        .add_query_param("sort", "-id")
        .await
        .json::<Value>();
    let ids: Vec<i64> = rush
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 1]);

    let page = server
        .get("/api/table/orders")
        .add_query_param("limit", 1)
        .add_query_param("offset", 1)
        .await
        .json::<Value>();
    assert_eq!(page[0]["note"], "gift");

    server
        .get("/api/table/customers")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/api/table/orders")
        .add_query_param("filter", "customer = $user.id")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
