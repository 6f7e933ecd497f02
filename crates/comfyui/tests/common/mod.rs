#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::net::TcpListener;

/// A request the stub server saw: method, path with query, and the
/// `Authorization` header if present.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub uri: String,
    pub authorization: Option<String>,
}

pub type RequestLog = Arc<Mutex<Vec<SeenRequest>>>;

/// Serve `app` on an ephemeral port, logging every request. Returns
/// the base URL and the log.
pub async fn spawn(app: Router) -> (String, RequestLog) {
    let log: RequestLog = Arc::default();
    let recorder = log.clone();

    let app = app.layer(axum::middleware::from_fn(
        move |req: axum::extract::Request, next: axum::middleware::Next| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(SeenRequest {
                    method: req.method().to_string(),
                    uri: req.uri().to_string(),
                    authorization: req
                        .headers()
                        .get(axum::http::header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                });
                next.run(req).await
            }
        },
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), log)
}
