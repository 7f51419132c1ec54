//! Full-stack flows through the HTTP API
//!
//! Exercises the axum router over a real engine: multipart upload, stats
//! polling, seeding control, and removal, asserting on the JSON the
//! browser client consumes.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use shoal_core::content::{ContentId, Locator};
use shoal_core::swarm::ConnectionKind;
use shoal_web::{AppState, build_router};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::harness::{ScriptedDiscovery, session_handle, start_engine};

async fn api(dir: &TempDir) -> (Router, AppState) {
    let engine = start_engine(dir, Arc::new(ScriptedDiscovery::healthy())).await;
    let state = AppState {
        engine,
        started_at: Instant::now(),
    };
    (build_router(state.clone()), state)
}

fn multipart_upload(file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let boundary = "shoal-flow-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/videos/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn test_full_video_lifecycle_over_http() {
    let dir = TempDir::new().unwrap();
    let (router, state) = api(&dir).await;

    let data: Vec<u8> = (0..200_000).map(|i| (i % 253) as u8).collect();
    let (status, body) = send(&router, multipart_upload("movie.mp4", "video/mp4", &data)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["seeding"], true);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["contentHash"], id.as_str());

    // The upload landed on disk under the library
    let content_id = ContentId::from_hex(&id).unwrap();
    let descriptor = state.engine.content(content_id).await.unwrap();
    assert!(descriptor.stored_path.exists());
    assert_eq!(descriptor.size, 200_000);

    // Peer activity shows up in the per-video stats the client polls
    let handle = session_handle(&state.engine, content_id).await;
    handle
        .peer_connected("10.4.0.1:7000".parse().unwrap(), ConnectionKind::Direct)
        .await
        .unwrap();
    handle
        .peer_transferred("10.4.0.1:7000".parse().unwrap(), 4096, 512)
        .await
        .unwrap();

    let (status, body) = send(&router, get(&format!("/api/videos/{id}/stats"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "seeding");
    assert_eq!(body["data"]["peerCount"], 1);
    assert_eq!(body["data"]["uploaded"], 4096);
    assert_eq!(body["data"]["peers"][0]["address"], "10.4.0.1");
    assert_eq!(body["data"]["peers"][0]["port"], 7000);
    assert_eq!(body["data"]["peers"][0]["type"], "direct");

    let (status, body) = send(&router, get("/api/videos/stats?fresh=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["activeSessions"], 1);
    assert_eq!(body["data"]["totalUploaded"], 4096);
    assert_eq!(body["data"]["sessions"][0]["contentId"], id.as_str());

    let (status, _) = send(&router, request(Method::POST, &format!("/api/videos/{id}/stop"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, get(&format!("/api/videos/{id}/stats"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, request(Method::DELETE, &format!("/api/videos/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(!descriptor.stored_path.exists());

    let (status, body) = send(&router, get("/api/videos")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    state.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_locator_round_trips_through_api() {
    let dir = TempDir::new().unwrap();
    let (router, state) = api(&dir).await;

    let data = vec![9u8; 50_000];
    let (_, body) = send(&router, multipart_upload("talk.webm", "video/webm", &data)).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&router, get(&format!("/api/videos/{id}/locator"))).await;
    assert_eq!(status, StatusCode::OK);
    let locator = body["data"]["locator"].as_str().unwrap();

    let parsed = Locator::parse(locator).unwrap();
    assert_eq!(parsed.content_id.to_string(), id);
    assert_eq!(parsed.display_name.as_deref(), Some("talk.webm"));
    assert_eq!(parsed.total_length, Some(50_000));

    state.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_envelope_is_consistent() {
    let dir = TempDir::new().unwrap();
    let (router, state) = api(&dir).await;

    // Malformed id
    let (status, body) = send(&router, get("/api/videos/not-a-real-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));

    // Well-formed id with no registered content
    let missing = "0a".repeat(20);
    let (status, body) = send(&router, get(&format!("/api/videos/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    // Rejected media type reports the reason
    let (status, body) = send(&router, multipart_upload("notes.txt", "text/plain", b"hi")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("unsupported media type"))
    );

    state.engine.shutdown().await.unwrap();
}
