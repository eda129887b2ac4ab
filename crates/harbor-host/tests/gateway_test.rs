mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{Behavior, TestApp};
use harbor_common::config::WorkerDefaults;
use harbor_host::app::{AppBinding, AppResolver, HandlerDeclaration, HttpMethod};
use harbor_host::error::{HostError, HostResult};
use harbor_host::gateway::{Gateway, ReplyBody};
use harbor_host::transport::{Payload, RequestSnapshot, ResponseSnapshot};
use serde_json::json;

fn shop() -> TestApp {
    TestApp::new(vec![
        HandlerDeclaration::http("get_item", HttpMethod::Get).with_route("/items/:id"),
        HandlerDeclaration::http("create_item", HttpMethod::Post).with_route("/items"),
        HandlerDeclaration::web_socket("live").with_route("/live"),
    ])
    .behavior("get_item", Behavior::Echo)
    .behavior(
        "create_item",
        Behavior::Respond {
            status: 201,
            body: "created",
        },
    )
    .behavior("live", Behavior::Echo)
}

#[tokio::test]
async fn test_http_dispatch_fills_route_params() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let reply = gateway
        .handle_request(
            RequestSnapshot::new("GET", "/shop/items/42"),
            ResponseSnapshot::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.response.status, 200);
    match reply.body {
        ReplyBody::Complete(Payload::Json(value)) => {
            assert_eq!(
                value,
                json!({"path": "/shop/items/42", "params": {"id": "42"}})
            );
        }
        other => panic!("expected a json body, got {other:?}"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_handler_response_status_carries_through() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let reply = gateway
        .handle_request(
            RequestSnapshot::new("POST", "/shop/items"),
            ResponseSnapshot::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.response.status, 201);
    match reply.body {
        ReplyBody::Complete(payload) => assert_eq!(payload, Payload::from("created")),
        ReplyBody::Stream(_) => panic!("expected a complete body"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_method_is_a_routing_error() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let result = gateway
        .handle_request(
            RequestSnapshot::new("DELETE", "/shop/items/42"),
            ResponseSnapshot::new(),
        )
        .await;
    match result {
        Err(HostError::RouteNotMatched { app, method, path }) => {
            assert_eq!(app.as_str(), "shop");
            assert_eq!(method, "DELETE");
            assert_eq!(path, "/shop/items/42");
        }
        other => panic!("expected a routing error, got {other:?}"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_app_reads_as_a_routing_error() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let result = gateway
        .handle_request(
            RequestSnapshot::new("GET", "/ghost/items"),
            ResponseSnapshot::new(),
        )
        .await;
    match result {
        Err(HostError::RouteNotMatched { app, .. }) => assert_eq!(app.as_str(), "ghost"),
        other => panic!("expected a routing error, got {other:?}"),
    }
    // Nothing was loaded for the probe.
    assert_eq!(host.sandbox.load_count("shop"), 0);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_underivable_path_is_rejected() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let result = gateway
        .handle_request(RequestSnapshot::new("GET", "/"), ResponseSnapshot::new())
        .await;
    assert!(matches!(result, Err(HostError::InvalidArgument(_))));
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_socket_message_round_trip() {
    let host = common::fixture()
        .defaults(WorkerDefaults {
            max_workers: 1,
            ..common::worker_defaults()
        })
        .app("shop", shop())
        .build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let request = RequestSnapshot::new("GET", "/shop/live");
    let reply = gateway
        .handle_socket_message(&request, Payload::from("ping"))
        .await
        .unwrap();
    match reply {
        ReplyBody::Complete(payload) => assert_eq!(payload, Payload::from("ping")),
        ReplyBody::Stream(_) => panic!("expected a complete body"),
    }

    // Frames reuse the pooled worker.
    gateway
        .handle_socket_message(&request, Payload::from("pong"))
        .await
        .unwrap();
    assert_eq!(host.sandbox.load_count("shop"), 1);
    host.pool.close().await.unwrap();
}

struct HostHeaderResolver;

#[async_trait]
impl AppResolver for HostHeaderResolver {
    async fn resolve(&self, request: &RequestSnapshot) -> HostResult<Option<AppBinding>> {
        Ok(request
            .host
            .as_deref()
            .and_then(|x| x.strip_suffix(".apps.test"))
            .map(|name| AppBinding {
                app: name.into(),
                path_prefix: String::new(),
            }))
    }
}

#[tokio::test]
async fn test_custom_resolver_maps_by_host_header() {
    let host = common::fixture().app("shop", shop()).build();
    let gateway = Gateway::new(host.pool.clone(), Arc::new(HostHeaderResolver));
    let mut request = RequestSnapshot::new("GET", "/items/7");
    request.host = Some("shop.apps.test".to_string());
    let reply = gateway
        .handle_request(request, ResponseSnapshot::new())
        .await
        .unwrap();
    match reply.body {
        ReplyBody::Complete(Payload::Json(value)) => {
            assert_eq!(value, json!({"path": "/items/7", "params": {"id": "7"}}));
        }
        other => panic!("expected a json body, got {other:?}"),
    }
    host.pool.close().await.unwrap();
}
