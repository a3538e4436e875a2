// HTTP API tests
//
// Requests go through the full router (tower oneshot) to a controller backed by
// the scripted capture device.

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{Rig, Script};
use loqa_recorder::audio::DeviceStep;
use loqa_recorder::{create_router, AppState, SessionController};
use serde_json::Value;
use tower::ServiceExt;

struct Server {
    router: Router,
    controller: SessionController,
    worker: tokio::task::JoinHandle<()>,
    device_log: common::CallLog,
    _dir: tempfile::TempDir,
}

fn server(rig: Rig) -> Server {
    let Rig {
        machine,
        events,
        device_log,
        dir,
        ..
    } = rig;
    let (controller, worker) = SessionController::spawn(machine);
    let router = create_router(AppState::new(controller.clone(), events));
    Server {
        router,
        controller,
        worker,
        device_log,
        _dir: dir,
    }
}

async fn call(router: &Router, method: &str, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())?;
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    Ok((status, json))
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let s = server(Rig::new());
    let (status, body) = call(&s.router, "GET", "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_start_stop_cycle() -> Result<()> {
    let s = server(Rig::new());

    let (status, body) = call(&s.router, "POST", "/recording/start").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "recording");
    assert_eq!(body["session"]["state"], "Recording");

    let (status, body) = call(&s.router, "POST", "/recording/start").await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "AlreadyActive");

    let (status, body) = call(&s.router, "GET", "/recording/status").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Recording");

    let (status, body) = call(&s.router, "POST", "/recording/stop").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["report"]["bytes"], 4096);

    let (status, body) = call(&s.router, "POST", "/recording/stop").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert!(body["report"].is_null());

    let (_, history) = call(&s.router, "GET", "/recording/history").await?;
    assert_eq!(history.as_array().map(|h| h.len()), Some(1));
    assert_eq!(history[0]["outcome"]["result"], "completed");

    let (_, events) = call(&s.router, "GET", "/recording/events").await?;
    let lines: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["line"].as_str())
        .collect();
    assert_eq!(lines.iter().filter(|l| l.starts_with("FILE_INFO:")).count(), 1);
    assert!(lines.iter().any(|l| l.starts_with("[State: Released]")));

    s.controller.shutdown().await?;
    s.worker.await?;
    assert_eq!(s.device_log.count(DeviceStep::Release), 1);
    Ok(())
}

#[tokio::test]
async fn test_start_failure_is_server_error() -> Result<()> {
    let s = server(Rig::with_script(Script::failing_at(DeviceStep::Start)));

    let (status, body) = call(&s.router, "POST", "/recording/start").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "StartFailure");

    let (_, body) = call(&s.router, "GET", "/recording/status").await?;
    assert_eq!(body["state"], "Failed");

    let (_, history) = call(&s.router, "GET", "/recording/history").await?;
    assert_eq!(history[0]["outcome"]["result"], "failed");
    assert_eq!(history[0]["outcome"]["kind"], "StartFailure");

    s.controller.shutdown().await?;
    s.worker.await?;
    Ok(())
}

#[tokio::test]
async fn test_requests_after_shutdown_are_unavailable() -> Result<()> {
    let s = server(Rig::new());
    s.controller.shutdown().await?;
    s.worker.await?;

    let (status, body) = call(&s.router, "POST", "/recording/start").await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "ControllerClosed");
    Ok(())
}
