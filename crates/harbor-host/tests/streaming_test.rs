mod common;

use bytes::Bytes;
use common::{Behavior, TestApp};
use harbor_host::app::{HandlerDeclaration, HttpMethod};
use harbor_host::error::HostError;
use harbor_host::gateway::{Gateway, ReplyBody};
use harbor_host::transport::{RequestSnapshot, ResponseSnapshot};

#[tokio::test]
async fn test_stream_outcome_delivers_chunks_in_order() {
    let host = common::fixture()
        .app(
            "reports",
            TestApp::rpc_app(&["export"]).behavior(
                "export",
                Behavior::Chunks(vec!["alpha", "beta", "gamma"]),
            ),
        )
        .build();
    let worker = host.worker("reports").await.unwrap();
    let outcome = common::rpc(&worker, "export", "all").await.unwrap();
    let mut stream = outcome.stream.expect("expected a stream outcome");

    let mut chunks = vec![];
    while let Some(chunk) = stream.next_chunk().await {
        chunks.push(chunk.unwrap());
    }
    assert_eq!(
        chunks,
        vec![
            Bytes::from("alpha"),
            Bytes::from("beta"),
            Bytes::from("gamma")
        ]
    );
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_stream_completes_with_no_chunks() {
    let host = common::fixture()
        .app(
            "reports",
            TestApp::rpc_app(&["export"]).behavior("export", Behavior::Chunks(vec![])),
        )
        .build();
    let worker = host.worker("reports").await.unwrap();
    let outcome = common::rpc(&worker, "export", "all").await.unwrap();
    let stream = outcome.stream.expect("expected a stream outcome");
    assert_eq!(stream.collect_bytes().await.unwrap(), Bytes::new());
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_error_fails_the_consumer() {
    let host = common::fixture()
        .app(
            "reports",
            TestApp::rpc_app(&["export"]).behavior(
                "export",
                Behavior::ChunksThenFail(vec!["alpha"], "disk failed"),
            ),
        )
        .build();
    let worker = host.worker("reports").await.unwrap();
    let outcome = common::rpc(&worker, "export", "all").await.unwrap();
    let stream = outcome.stream.expect("expected a stream outcome");
    match stream.collect_bytes().await {
        Err(HostError::ApplicationError(description)) => {
            assert_eq!(description.name, "StreamError");
            assert!(description.message.contains("disk failed"), "got {description}");
        }
        other => panic!("expected a stream error, got {other:?}"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_http_stream_reply() {
    let host = common::fixture()
        .app(
            "reports",
            TestApp::new(vec![
                HandlerDeclaration::http("download", HttpMethod::Get).with_route("/files")
            ])
            .behavior("download", Behavior::Chunks(vec!["alpha", "beta"])),
        )
        .build();
    let gateway = Gateway::with_default_resolver(host.pool.clone());
    let reply = gateway
        .handle_request(
            RequestSnapshot::new("GET", "/reports/files"),
            ResponseSnapshot::new(),
        )
        .await
        .unwrap();
    assert_eq!(reply.response.status, 200);
    match reply.body {
        ReplyBody::Stream(stream) => {
            assert_eq!(
                stream.collect_bytes().await.unwrap(),
                Bytes::from("alphabeta")
            );
        }
        ReplyBody::Complete(_) => panic!("expected a stream body"),
    }
    host.pool.close().await.unwrap();
}
