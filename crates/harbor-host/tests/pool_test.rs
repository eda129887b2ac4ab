mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{worker_defaults, Behavior, TestApp};
use harbor_common::config::{AppOverrides, WorkerDefaults};
use harbor_host::app::{AppName, VersionTag};
use harbor_host::error::HostError;

#[tokio::test]
async fn test_workers_start_lazily() {
    let host = common::fixture()
        .app("orders", TestApp::rpc_app(&["work"]))
        .app("billing", TestApp::rpc_app(&["charge"]))
        .build();
    assert_eq!(host.sandbox.load_count("orders"), 0);
    assert_eq!(host.sandbox.load_count("billing"), 0);

    let worker = host.worker("orders").await.unwrap();
    assert_eq!(worker.app().as_str(), "orders");
    assert_eq!(host.sandbox.load_count("orders"), 1);
    assert_eq!(host.sandbox.load_count("billing"), 0);
    assert_eq!(host.worker_count("orders").await, 1);
    assert_eq!(host.worker_count("billing").await, 0);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_acquires_share_one_launch() {
    let host = common::fixture()
        .defaults(WorkerDefaults {
            max_workers: 1,
            ..worker_defaults()
        })
        .app("orders", TestApp::rpc_app(&["work"]))
        .load_delay(Duration::from_millis(50))
        .build();

    let mut pending = vec![];
    for _ in 0..8 {
        let pool = host.pool.clone();
        pending.push(tokio::spawn(async move {
            pool.get_worker(&AppName::from("orders"), &VersionTag::default())
                .await
        }));
    }
    let mut ids = HashSet::new();
    for task in pending {
        ids.insert(task.await.unwrap().unwrap().id());
    }
    assert_eq!(ids.len(), 1);
    assert_eq!(host.sandbox.load_count("orders"), 1);
    assert_eq!(host.worker_count("orders").await, 1);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_acquires_grow_then_rotate() {
    let host = common::fixture()
        .defaults(WorkerDefaults {
            max_workers: 3,
            ..worker_defaults()
        })
        .app("orders", TestApp::rpc_app(&["work"]))
        .build();

    let a = host.worker("orders").await.unwrap();
    let b = host.worker("orders").await.unwrap();
    let c = host.worker("orders").await.unwrap();
    assert_eq!(host.worker_count("orders").await, 3);
    assert_eq!(host.sandbox.load_count("orders"), 3);
    let distinct: HashSet<_> = [a.id(), b.id(), c.id()].into_iter().collect();
    assert_eq!(distinct.len(), 3);

    // At capacity the same workers come back in cyclic order.
    assert_eq!(host.worker("orders").await.unwrap().id(), a.id());
    assert_eq!(host.worker("orders").await.unwrap().id(), b.id());
    assert_eq!(host.worker("orders").await.unwrap().id(), c.id());
    assert_eq!(host.worker("orders").await.unwrap().id(), a.id());
    assert_eq!(host.sandbox.load_count("orders"), 3);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_launch_rejects_waiters_and_allows_retry() {
    let host = common::fixture()
        .app("broken", TestApp::failing_load("boot script crashed"))
        .load_delay(Duration::from_millis(50))
        .build();

    let mut pending = vec![];
    for _ in 0..2 {
        let pool = host.pool.clone();
        pending.push(tokio::spawn(async move {
            pool.get_worker(&AppName::from("broken"), &VersionTag::default())
                .await
        }));
    }
    for task in pending {
        match task.await.unwrap() {
            Err(HostError::InitError(message)) => {
                assert!(message.contains("boot script crashed"), "got {message}");
            }
            Err(other) => panic!("expected an init error, got {other}"),
            Ok(_) => panic!("expected an init error, got a worker"),
        }
    }
    assert_eq!(host.sandbox.load_count("broken"), 1);
    assert_eq!(host.worker_count("broken").await, 0);

    // The failure is not sticky; the next acquire launches again.
    assert!(matches!(
        host.worker("broken").await,
        Err(HostError::InitError(_))
    ));
    assert_eq!(host.sandbox.load_count("broken"), 2);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_app_is_rejected() {
    let host = common::fixture()
        .app("orders", TestApp::rpc_app(&["work"]))
        .build();
    match host.worker("ghost").await {
        Err(HostError::UnknownApp { app }) => assert_eq!(app.as_str(), "ghost"),
        Err(other) => panic!("expected an unknown app error, got {other}"),
        Ok(_) => panic!("expected an unknown app error, got a worker"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_per_app_max_workers_override() {
    let host = common::fixture()
        .defaults(WorkerDefaults {
            max_workers: 4,
            ..worker_defaults()
        })
        .app("orders", TestApp::rpc_app(&["work"]))
        .override_app(
            "orders",
            AppOverrides {
                max_workers: Some(1),
                ..Default::default()
            },
        )
        .build();
    let a = host.worker("orders").await.unwrap();
    let b = host.worker("orders").await.unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(host.worker_count("orders").await, 1);
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_prepare_warms_every_app() {
    let host = common::fixture()
        .app("orders", TestApp::rpc_app(&["work"]))
        .app("billing", TestApp::rpc_app(&["charge"]))
        .build();
    host.pool.prepare().await.unwrap();
    assert_eq!(host.sandbox.load_count("orders"), 1);
    assert_eq!(host.sandbox.load_count("billing"), 1);
    assert_eq!(host.worker_count("orders").await, 1);
    assert_eq!(host.worker_count("billing").await, 1);
    host.pool.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_reports_window_and_call() {
    let host = common::fixture()
        .defaults(WorkerDefaults {
            call_timeout_secs: 5,
            ..worker_defaults()
        })
        .app(
            "orders",
            TestApp::rpc_app(&["slow"])
                .behavior("slow", Behavior::Sleep(Duration::from_secs(60))),
        )
        .build();
    let worker = host.worker("orders").await.unwrap();
    match common::rpc(&worker, "slow", "job").await {
        Err(HostError::CallTimeout { window, call }) => {
            assert_eq!(window, Duration::from_secs(5));
            assert_eq!(call.handler, "slow");
            assert_eq!(call.app.as_str(), "orders");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    host.pool.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_pool_rejects_acquires() {
    let host = common::fixture()
        .app("orders", TestApp::rpc_app(&["work"]))
        .build();
    host.worker("orders").await.unwrap();
    host.pool.close().await.unwrap();
    assert!(matches!(
        host.worker("orders").await,
        Err(HostError::InternalError(_))
    ));
    // Closing again is a no-op.
    host.pool.close().await.unwrap();
}
