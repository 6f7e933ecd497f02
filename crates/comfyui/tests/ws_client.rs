//! WebSocket handshake behaviour against a stub ComfyUI server.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use comfybridge_comfyui::client::{ComfyUIClient, ComfyUIClientError};
use comfybridge_core::config::ComfyUIConfig;

#[tokio::test]
async fn handshake_401_is_unauthorized() {
    let app = Router::new().route(
        "/ws",
        get(|| async { (StatusCode::UNAUTHORIZED, "invalid token") }),
    );
    let (url, log) = common::spawn(app).await;
    let client = ComfyUIClient::new(&ComfyUIConfig::new(url).with_auth_token("wrong"));

    let err = client.connect("c1").await.err().unwrap();

    assert_matches!(err, ComfyUIClientError::Unauthorized { ref body } if body == "invalid token");
    let seen = log.lock().unwrap();
    assert_eq!(seen[0].uri, "/ws?clientId=c1");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer wrong"));
}

#[tokio::test]
async fn other_handshake_failures_are_connection_errors() {
    let app = Router::new().route(
        "/ws",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "starting up") }),
    );
    let (url, _) = common::spawn(app).await;
    let client = ComfyUIClient::new(&ComfyUIConfig::new(url));

    let err = client.connect("c1").await.err().unwrap();

    assert_matches!(err, ComfyUIClientError::Connection(_));
}
