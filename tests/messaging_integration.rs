//! End-to-end messaging tests: registration, dispatch, timeouts, statistics.

use plugflow::{
    FnAsyncHandler, Orchestrator, Request, ResponseStatus, ServiceEndpoint, ServiceFault,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn register_math(orchestrator: &Orchestrator) {
    orchestrator.register_async_service(
        ServiceEndpoint::new("math", "add"),
        Arc::new(FnAsyncHandler(|request: Request| async move {
            let a = request.params.get("a").and_then(Value::as_i64).unwrap_or(0);
            let b = request.params.get("b").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({"sum": a + b}))
        })),
    );
}

#[tokio::test]
async fn test_async_request_response() {
    let orchestrator = Orchestrator::new();
    register_math(&orchestrator);

    let mut params = serde_json::Map::new();
    params.insert("a".to_string(), json!(2));
    params.insert("b".to_string(), json!(40));

    let response = orchestrator
        .send_request_async(Request::new("test", "math", "add").with_params(params))
        .await;
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.payload, json!({"sum": 42}));
}

#[tokio::test]
async fn test_sync_dispatch_runs_inline() {
    let orchestrator = Orchestrator::new();
    orchestrator.register_service(
        ServiceEndpoint::new("clock", "tick"),
        Arc::new(|_request: &Request| Ok(json!("tock"))),
    );

    let response = orchestrator.send_request(&Request::new("test", "clock", "tick"));
    assert!(response.is_success());
    assert_eq!(response.payload, json!("tock"));
}

#[tokio::test]
async fn test_unknown_endpoint_is_not_found() {
    let orchestrator = Orchestrator::new();
    let response = orchestrator
        .send_request_async(Request::new("test", "nobody", "home"))
        .await;
    assert_eq!(response.status, ResponseStatus::NotFound);
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out() {
    let orchestrator = Orchestrator::new();
    orchestrator.register_async_service(
        ServiceEndpoint::new("slow", "work"),
        Arc::new(FnAsyncHandler(|_: Request| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("too late"))
        })),
    );

    let response = orchestrator
        .send_request_async(
            Request::new("test", "slow", "work").with_timeout(Duration::from_millis(50)),
        )
        .await;
    assert_eq!(response.status, ResponseStatus::Timeout);

    // The pending record was consumed by the watchdog; the late handler
    // result is discarded silently.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_handler_fault_maps_to_failure_status() {
    let orchestrator = Orchestrator::new();
    orchestrator.register_async_service(
        ServiceEndpoint::new("strict", "check"),
        Arc::new(FnAsyncHandler(|_: Request| async move {
            Err(ServiceFault::failure("input rejected"))
        })),
    );

    let response = orchestrator
        .send_request_async(Request::new("test", "strict", "check"))
        .await;
    assert_eq!(response.status, ResponseStatus::Failure);
    assert_eq!(response.message, "input rejected");
}

#[tokio::test]
async fn test_unregister_takes_effect_for_new_requests() {
    let orchestrator = Orchestrator::new();
    register_math(&orchestrator);
    assert!(orchestrator.is_registered("math"));

    assert!(orchestrator.unregister_service("math"));
    assert!(!orchestrator.is_registered("math"));

    let response = orchestrator
        .send_request_async(Request::new("test", "math", "add"))
        .await;
    assert_eq!(response.status, ResponseStatus::NotFound);
}

#[tokio::test]
async fn test_concurrent_fan_out() {
    let orchestrator = Arc::new(Orchestrator::new());
    let calls = Arc::new(AtomicU32::new(0));
    {
        let calls = Arc::clone(&calls);
        orchestrator.register_async_service(
            ServiceEndpoint::new("counter", "bump"),
            Arc::new(FnAsyncHandler(move |_: Request| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })),
        );
    }

    let requests = (0..32).map(|i| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .send_request_async(Request::new(format!("client-{i}"), "counter", "bump"))
                .await
        }
    });
    let responses = futures::future::join_all(requests).await;

    assert!(responses.iter().all(|r| r.is_success()));
    assert_eq!(calls.load(Ordering::SeqCst), 32);
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn test_statistics_track_methods_and_errors() {
    let orchestrator = Orchestrator::new();
    register_math(&orchestrator);

    orchestrator
        .send_request_async(Request::new("t", "math", "add"))
        .await;
    orchestrator
        .send_request_async(Request::new("t", "math", "add"))
        .await;
    orchestrator
        .send_request_async(Request::new("t", "missing", "op"))
        .await;

    let stats = orchestrator.get_statistics();
    assert_eq!(stats.requests_sent, 3);
    assert_eq!(stats.responses_received, 3);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.per_method.get("add"), Some(&2));

    orchestrator.reset_statistics();
    assert_eq!(orchestrator.get_statistics().requests_sent, 0);
}

#[tokio::test]
async fn test_shutdown_drains_pending_requests() {
    let orchestrator = Arc::new(Orchestrator::new());
    orchestrator.register_async_service(
        ServiceEndpoint::new("stuck", "forever"),
        Arc::new(FnAsyncHandler(|_: Request| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        })),
    );

    let in_flight = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .send_request_async(Request::new("t", "stuck", "forever"))
                .await
        })
    };
    // Let the request reach the pending map before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orchestrator.pending_count(), 1);

    orchestrator.shutdown();
    let response = in_flight.await.unwrap();
    assert_eq!(response.status, ResponseStatus::InternalError);
    assert_eq!(orchestrator.pending_count(), 0);
}
