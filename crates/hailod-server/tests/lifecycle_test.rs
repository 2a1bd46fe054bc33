//! Shutdown and lifecycle behavior.

mod common;

use std::time::Duration;

use common::{mocks::MockAdapter, round_trip, TestDaemon};
use serde_json::json;

#[tokio::test]
async fn shutdown_releases_every_model_and_unlinks_the_socket() {
    let adapter = MockAdapter::new();
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let clip = daemon.hef("clip_img.hef");
    let depth = daemon.hef("depth.hef");
    let socket_path = daemon.socket_path.clone();

    let mut stream = daemon.connect().await;
    for (path, model_type) in [(&clip, "clip"), (&depth, "depth")] {
        let response = round_trip(
            &mut stream,
            &json!({
                "action": "load_model",
                "model_path": path.display().to_string(),
                "model_type": model_type,
            }),
        )
        .await;
        assert_eq!(response["status"], json!("ok"));
    }

    daemon.shutdown().await;
    assert_eq!(log.count("release"), 2);
    assert!(!socket_path.exists(), "socket file survived shutdown");
}

#[tokio::test]
async fn in_flight_work_completes_during_the_grace_period() {
    let adapter = MockAdapter::new().with_infer_delay(Duration::from_millis(300));
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");

    let socket_path = daemon.socket_path.clone();
    let hef_path = hef.clone();
    let inference = tokio::spawn(async move {
        let mut client = hailod_client::DeviceClient::connect(&socket_path).await.unwrap();
        client.infer(&hef_path, json!({}), "clip", None).await
    });
    // Let the executor pick the request up before stopping the daemon.
    tokio::time::sleep(Duration::from_millis(100)).await;

    daemon.shutdown().await;

    let response = inference.await.unwrap().expect("in-flight inference failed");
    assert!(response.is_ok());
}

#[tokio::test]
async fn requests_after_executor_exit_are_refused() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    // Keep the connection open across shutdown; the socket server answers
    // with the lifecycle error once the executor is gone.
    daemon.shutdown().await;

    common::send_frame(&mut stream, &json!({"action": "ping", "request_id": "late"})).await;
    match common::try_recv_frame(&mut stream).await {
        Some(response) => {
            assert_eq!(response["error"], json!("Device shutting down"));
            assert_eq!(response["request_id"], json!("late"));
        }
        // Equally valid: the daemon already tore the connection down.
        None => {}
    }
}
