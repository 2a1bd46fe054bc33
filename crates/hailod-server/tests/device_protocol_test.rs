//! End-to-end tests of the device socket protocol against a scripted adapter.
//!
//! These run the real daemon assembly (executor thread, Unix socket server,
//! framing) with the mock device, driving it both through raw frames and
//! through the client library.

mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{mocks::MockAdapter, round_trip, send_frame, try_recv_frame, TestDaemon};
use hailod_client::DeviceClient;
use rstest::rstest;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn image_tensor(shape: &[usize], bytes: usize) -> Value {
    json!({
        "dtype": "uint8",
        "shape": shape,
        "data_b64": BASE64.encode(vec![7u8; bytes]),
    })
}

#[tokio::test]
async fn ping_reports_daemon_facts_and_echoes_request_id() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let response = round_trip(&mut stream, &json!({"action": "ping", "request_id": "a"})).await;
    assert_eq!(response["status"], json!("ok"));
    assert_eq!(response["request_id"], json!("a"));
    assert_eq!(response["loaded_models"], json!([]));
    assert_eq!(response["device_id"], json!("hailo-mock"));
    assert!(response["uptime_seconds"].as_u64().is_some());
    assert!(response["queue_depth"].as_u64().is_some());
    assert_eq!(
        response["socket_path"],
        json!(daemon.socket_path.display().to_string())
    );

    daemon.shutdown().await;
}

#[tokio::test]
async fn request_id_is_absent_when_not_sent() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let response = round_trip(&mut stream, &json!({"action": "ping"})).await;
    assert_eq!(response["status"], json!("ok"));
    assert!(response.get("request_id").is_none());

    daemon.shutdown().await;
}

#[tokio::test]
async fn infer_implicitly_loads_and_returns_clip_embedding() {
    let adapter = MockAdapter::new();
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");

    let mut client = DeviceClient::connect(&daemon.socket_path).await.unwrap();
    let response = client
        .infer(
            &hef,
            json!({"image": image_tensor(&[1, 224, 224, 3], 150_528)}),
            "clip",
            None,
        )
        .await
        .unwrap();
    let embedding = response.fields["result"]["embedding"].as_array().unwrap();
    assert_eq!(embedding.len(), 512);
    assert!(response.fields["inference_time_ms"].is_u64());

    // The implicit load is now visible in status, exactly once.
    let status = client.status().await.unwrap();
    let models = status.fields["loaded_models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["model_path"], json!(hef.display().to_string()));
    assert_eq!(models[0]["model_type"], json!("clip"));
    assert_eq!(log.count("load"), 1);

    daemon.shutdown().await;
}

#[tokio::test]
async fn load_model_is_idempotent_and_loads_backend_once() {
    let adapter = MockAdapter::new();
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");
    let mut stream = daemon.connect().await;

    let request = json!({
        "action": "load_model",
        "model_path": hef.display().to_string(),
        "model_type": "clip",
    });
    let first = round_trip(&mut stream, &request).await;
    assert_eq!(first["status"], json!("ok"));
    assert_eq!(first["message"], json!("Model loaded"));

    let second = round_trip(&mut stream, &request).await;
    assert_eq!(second["status"], json!("ok"));
    assert_eq!(second["message"], json!("Model already loaded"));

    assert_eq!(log.count("load"), 1);
    daemon.shutdown().await;
}

#[tokio::test]
async fn unload_model_is_idempotent() {
    let adapter = MockAdapter::new();
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");
    let mut client = DeviceClient::connect(&daemon.socket_path).await.unwrap();

    client.load_model(&hef, "clip", None).await.unwrap();
    client.unload_model(&hef, "clip").await.unwrap();
    // Second unload still succeeds without another backend release.
    client.unload_model(&hef, "clip").await.unwrap();
    assert_eq!(log.count("release"), 1);

    let status = client.status().await.unwrap();
    assert_eq!(status.fields["loaded_models"], json!([]));
    daemon.shutdown().await;
}

#[tokio::test]
async fn unknown_model_type_keeps_the_connection_usable() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let response = round_trip(
        &mut stream,
        &json!({
            "action": "infer",
            "model_type": "xyzzy",
            "model_path": "/m/a.hef",
            "input_data": {},
        }),
    )
    .await;
    assert_eq!(response["error"], json!("Unsupported model_type: xyzzy"));

    let ping = round_trip(&mut stream, &json!({"action": "ping"})).await;
    assert_eq!(ping["status"], json!("ok"));
    daemon.shutdown().await;
}

#[tokio::test]
async fn oversize_frame_is_reported_then_connection_closed() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    // Declared 16 MiB against the default 8 MiB limit; body never sent.
    stream
        .write_all(&0x0100_0000u32.to_be_bytes())
        .await
        .unwrap();
    let response = try_recv_frame(&mut stream).await.unwrap();
    assert_eq!(response["error"], json!("Message too large: 16777216 bytes"));
    assert!(try_recv_frame(&mut stream).await.is_none());

    daemon.shutdown().await;
}

#[tokio::test]
async fn invalid_json_keeps_the_connection_open() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let body = b"not json";
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();
    let response = try_recv_frame(&mut stream).await.unwrap();
    assert!(response["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request:"));

    let ping = round_trip(&mut stream, &json!({"action": "ping"})).await;
    assert_eq!(ping["status"], json!("ok"));
    daemon.shutdown().await;
}

#[rstest]
#[case::load_without_path(
    json!({"action": "load_model", "model_type": "clip"}),
    "Missing required field: model_path"
)]
#[case::load_without_type(
    json!({"action": "load_model", "model_path": "/m/a.hef"}),
    "Missing required field: model_type"
)]
#[case::infer_without_input(
    json!({"action": "infer", "model_path": "/m/a.hef", "model_type": "clip"}),
    "Missing required field: input_data"
)]
#[case::unknown_action(json!({"action": "reboot"}), "Unknown action: reboot")]
#[tokio::test]
async fn validation_errors_are_specific(#[case] request: Value, #[case] expected: &str) {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let response = round_trip(&mut stream, &request).await;
    assert_eq!(response["error"], json!(expected));

    daemon.shutdown().await;
}

#[tokio::test]
async fn missing_model_file_is_reported() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let mut stream = daemon.connect().await;

    let response = round_trip(
        &mut stream,
        &json!({
            "action": "load_model",
            "model_path": "/m/not_downloaded.hef",
            "model_type": "clip",
        }),
    )
    .await;
    assert_eq!(
        response["error"],
        json!("Model file not found: /m/not_downloaded.hef")
    );
    daemon.shutdown().await;
}

#[tokio::test]
async fn backend_inference_failure_releases_the_session() {
    let adapter = MockAdapter::new().with_failing_infer();
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");
    let mut stream = daemon.connect().await;

    let response = round_trip(
        &mut stream,
        &json!({
            "action": "infer",
            "model_path": hef.display().to_string(),
            "model_type": "clip",
            "input_data": {},
        }),
    )
    .await;
    assert_eq!(response["error"], json!("injected inference failure"));
    assert_eq!(log.count("release"), 1);

    let status = round_trip(&mut stream, &json!({"action": "status"})).await;
    assert_eq!(status["loaded_models"], json!([]));
    daemon.shutdown().await;
}

#[tokio::test]
async fn tensor_payloads_round_trip_byte_identical() {
    let daemon = TestDaemon::start(MockAdapter::new()).await;
    let hef = daemon.hef("depth.hef");
    let mut stream = daemon.connect().await;

    // The mock depth backend echoes the input tensor back as the result.
    let bytes: Vec<u8> = (0..48).collect();
    let payload = json!({
        "dtype": "float32",
        "shape": [1, 3, 2, 2],
        "data_b64": BASE64.encode(&bytes),
    });
    let response = round_trip(
        &mut stream,
        &json!({
            "action": "infer",
            "model_path": hef.display().to_string(),
            "model_type": "depth",
            "input_data": { "image": payload.clone() },
        }),
    )
    .await;
    assert_eq!(response["status"], json!("ok"));
    assert_eq!(response["result"], payload);

    daemon.shutdown().await;
}

#[tokio::test]
async fn pipelined_requests_answer_in_order() {
    let adapter = MockAdapter::new().with_infer_delay(Duration::from_millis(50));
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");
    let mut stream = daemon.connect().await;

    // Two requests written back-to-back before reading anything.
    send_frame(
        &mut stream,
        &json!({
            "action": "infer",
            "model_path": hef.display().to_string(),
            "model_type": "clip",
            "input_data": {},
            "request_id": "r1",
        }),
    )
    .await;
    send_frame(&mut stream, &json!({"action": "ping", "request_id": "r2"})).await;

    let first = try_recv_frame(&mut stream).await.unwrap();
    let second = try_recv_frame(&mut stream).await.unwrap();
    assert_eq!(first["request_id"], json!("r1"));
    assert_eq!(second["request_id"], json!("r2"));

    daemon.shutdown().await;
}

#[tokio::test]
async fn concurrent_inferences_never_overlap_on_the_device() {
    let adapter = MockAdapter::new().with_infer_delay(Duration::from_millis(100));
    let log = adapter.log.clone();
    let daemon = TestDaemon::start(adapter).await;
    let hef = daemon.hef("clip_img.hef");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let socket_path = daemon.socket_path.clone();
        let hef = hef.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = DeviceClient::connect(&socket_path).await.unwrap();
            client.infer(&hef, json!({}), "clip", None).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut infers: Vec<_> = log
        .calls()
        .into_iter()
        .filter(|call| call.op == "infer")
        .collect();
    assert_eq!(infers.len(), 4);
    infers.sort_by_key(|call| call.started);
    for pair in infers.windows(2) {
        assert!(
            pair[0].finished <= pair[1].started,
            "device calls overlapped in wall-clock time"
        );
    }

    daemon.shutdown().await;
}
