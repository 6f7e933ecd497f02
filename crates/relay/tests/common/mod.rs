#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use comfybridge_core::config::ComfyUIConfig;
use comfybridge_relay::matcher::PlatformUrlPattern;
use comfybridge_relay::storage::{PlatformStorage, StorageError};
use comfybridge_relay::ComfyRelay;

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Fake ComfyUI server
// ---------------------------------------------------------------------------

/// What the fake server does on the event socket of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Stream progress, record the job in history, send the terminal frame.
    Complete,
    /// Keep the socket open and never finish.
    Silent,
    /// Report a node execution error.
    Error,
    /// Close the socket mid-execution.
    Drop,
}

/// A `POST /prompt` the server accepted.
#[derive(Debug, Clone)]
pub struct SubmittedPrompt {
    pub prompt_id: String,
    pub client_id: String,
    pub workflow: Value,
}

/// A file received on `/upload/image`.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// An image the fake job produces.
#[derive(Debug, Clone)]
pub struct OutputImage {
    pub node_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct Recorded {
    prompts: Vec<SubmittedPrompt>,
    uploads: Vec<UploadedFile>,
    completed: Vec<String>,
    views: Vec<String>,
    ws_connections: usize,
}

pub struct FakeComfyUI {
    pub script: Script,
    pub required_token: Option<String>,
    pub outputs: Vec<OutputImage>,
    /// Answer `{}` from history even after completion.
    pub forget_history: bool,
    /// Record the job as failed in history.
    pub history_error: bool,
    /// Output filenames `/view` answers 404 for.
    pub missing_views: Vec<String>,
    recorded: Mutex<Recorded>,
}

impl FakeComfyUI {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            required_token: None,
            outputs: vec![OutputImage {
                node_id: "9".into(),
                filename: "ComfyUI_00001_.png".into(),
                bytes: b"\x89PNG output".to_vec(),
            }],
            forget_history: false,
            history_error: false,
            missing_views: Vec::new(),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.required_token = Some(token.to_string());
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputImage>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn forgetting_history(mut self) -> Self {
        self.forget_history = true;
        self
    }

    pub fn failing_in_history(mut self) -> Self {
        self.history_error = true;
        self
    }

    pub fn without_view(mut self, filename: &str) -> Self {
        self.missing_views.push(filename.to_string());
        self
    }

    /// Filenames requested from `/view`, in order.
    pub fn views(&self) -> Vec<String> {
        self.recorded.lock().unwrap().views.clone()
    }

    pub fn prompts(&self) -> Vec<SubmittedPrompt> {
        self.recorded.lock().unwrap().prompts.clone()
    }

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.recorded.lock().unwrap().uploads.clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.recorded.lock().unwrap().ws_connections
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.required_token else {
            return true;
        };
        let expected = format!("Bearer {token}");
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }

    fn prompt_for_client(&self, client_id: &str) -> Option<String> {
        self.recorded
            .lock()
            .unwrap()
            .prompts
            .iter()
            .find(|p| p.client_id == client_id)
            .map(|p| p.prompt_id.clone())
    }

    fn mark_completed(&self, prompt_id: &str) {
        self.recorded
            .lock()
            .unwrap()
            .completed
            .push(prompt_id.to_string());
    }

    fn is_completed(&self, prompt_id: &str) -> bool {
        self.recorded
            .lock()
            .unwrap()
            .completed
            .iter()
            .any(|id| id == prompt_id)
    }
}

type Shared = Arc<FakeComfyUI>;

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized: invalid token").into_response()
}

/// Serve `fake` on an ephemeral port. Returns the base URL.
pub async fn spawn(fake: Shared) -> String {
    let app = Router::new()
        .route("/prompt", post(submit_prompt))
        .route("/upload/image", post(upload_image))
        .route("/ws", get(ws_handler))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(view))
        .route("/queue", get(queue))
        .route("/system_stats", get(system_stats))
        .with_state(fake);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn submit_prompt(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }

    let client_id = body["client_id"].as_str().unwrap_or_default().to_string();
    let mut recorded = fake.recorded.lock().unwrap();
    let number = recorded.prompts.len();
    let prompt_id = format!("prompt-{number}");
    recorded.prompts.push(SubmittedPrompt {
        prompt_id: prompt_id.clone(),
        client_id,
        workflow: body["prompt"].clone(),
    });

    Json(json!({"prompt_id": prompt_id, "number": number, "node_errors": {}})).into_response()
}

async fn upload_image(
    State(fake): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("image") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.png").to_string();
        let bytes = field.bytes().await.unwrap().to_vec();
        fake.recorded.lock().unwrap().uploads.push(UploadedFile {
            name: name.clone(),
            bytes,
        });
        return Json(json!({"name": name, "subfolder": "", "type": "input"})).into_response();
    }

    (StatusCode::BAD_REQUEST, "missing image field").into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(fake): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }

    fake.recorded.lock().unwrap().ws_connections += 1;
    let client_id = params.get("clientId").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| run_script(socket, fake, client_id))
}

async fn send_json(socket: &mut WebSocket, value: Value) {
    let _ = socket.send(Message::Text(value.to_string().into())).await;
}

async fn run_script(mut socket: WebSocket, fake: Shared, client_id: String) {
    send_json(
        &mut socket,
        json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": 1}}, "sid": client_id}}),
    )
    .await;

    let Some(prompt_id) = fake.prompt_for_client(&client_id) else {
        return;
    };

    // Noise for another job and an unknown frame type.
    send_json(
        &mut socket,
        json!({"type": "executing", "data": {"node": null, "prompt_id": "someone-else"}}),
    )
    .await;
    send_json(&mut socket, json!({"type": "crystools.monitor", "data": {}})).await;
    send_json(
        &mut socket,
        json!({"type": "execution_start", "data": {"prompt_id": prompt_id}}),
    )
    .await;

    match fake.script {
        Script::Complete => {
            send_json(
                &mut socket,
                json!({"type": "executing", "data": {"node": "3", "prompt_id": prompt_id}}),
            )
            .await;
            send_json(
                &mut socket,
                json!({"type": "progress", "data": {"value": 10, "max": 20, "prompt_id": prompt_id, "node": "3"}}),
            )
            .await;
            let _ = socket.send(Message::Binary(vec![1, 2, 3, 4].into())).await;
            fake.mark_completed(&prompt_id);
            send_json(
                &mut socket,
                json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}}),
            )
            .await;
        }
        Script::Silent => {}
        Script::Error => {
            send_json(
                &mut socket,
                json!({"type": "execution_error", "data": {
                    "prompt_id": prompt_id,
                    "node_id": "3",
                    "node_type": "KSampler",
                    "exception_message": "CUDA out of memory",
                    "exception_type": "torch.OutOfMemoryError"
                }}),
            )
            .await;
        }
        Script::Drop => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }

    // Hold the socket until the client goes away.
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn history(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Path(prompt_id): Path<String>,
) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }
    if fake.forget_history || !fake.is_completed(&prompt_id) {
        return Json(json!({})).into_response();
    }

    let mut outputs = Map::new();
    for image in &fake.outputs {
        let node = outputs
            .entry(image.node_id.clone())
            .or_insert_with(|| json!({"images": []}));
        if let Some(images) = node["images"].as_array_mut() {
            images.push(json!({"filename": image.filename, "subfolder": "", "type": "output"}));
        }
    }

    let status = if fake.history_error {
        json!({
            "status_str": "error",
            "completed": false,
            "messages": [
                ["execution_start", {"prompt_id": prompt_id}],
                ["execution_error", {
                    "prompt_id": prompt_id,
                    "node_id": "8",
                    "exception_message": "VAE decode failed",
                    "exception_type": "RuntimeError"
                }]
            ]
        })
    } else {
        json!({"status_str": "success", "completed": true, "messages": []})
    };

    let mut body = Map::new();
    body.insert(
        prompt_id,
        json!({"prompt": [], "outputs": outputs, "status": status}),
    );
    Json(Value::Object(body)).into_response()
}

async fn view(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }
    let filename = params.get("filename").cloned().unwrap_or_default();
    fake.recorded.lock().unwrap().views.push(filename.clone());
    if fake.missing_views.contains(&filename) {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    match fake.outputs.iter().find(|o| o.filename == filename) {
        Some(image) => image.bytes.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn queue(State(fake): State<Shared>) -> Response {
    let recorded = fake.recorded.lock().unwrap();
    let running: Vec<Value> = recorded
        .prompts
        .iter()
        .filter(|p| !recorded.completed.contains(&p.prompt_id))
        .enumerate()
        .map(|(i, p)| json!([i, p.prompt_id, {}, {}, []]))
        .collect();
    Json(json!({"queue_running": running, "queue_pending": []})).into_response()
}

async fn system_stats(State(fake): State<Shared>, headers: HeaderMap) -> Response {
    if !fake.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"system": {"os": "posix", "comfyui_version": "0.3.0"}, "devices": []}))
        .into_response()
}

// ---------------------------------------------------------------------------
// In-memory platform storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    stored: Mutex<Vec<StoredFile>>,
    counter: AtomicUsize,
}

impl MemoryStorage {
    pub fn with_file(self, url: &str, bytes: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn stored(&self) -> Vec<StoredFile> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformStorage for MemoryStorage {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }

    async fn store(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://platform.test/files/out-{n}/{filename}");
        self.files.lock().unwrap().insert(url.clone(), bytes.clone());
        self.stored.lock().unwrap().push(StoredFile {
            url: url.clone(),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            bytes,
        });
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Relay construction
// ---------------------------------------------------------------------------

pub fn test_config(base_url: &str) -> ComfyUIConfig {
    ComfyUIConfig::new(base_url)
        .with_execution_timeout(Duration::from_secs(10))
        .with_request_timeout(Duration::from_secs(5))
}

pub fn build_relay(config: ComfyUIConfig, storage: Arc<MemoryStorage>) -> ComfyRelay {
    ComfyRelay::new(config, storage, Arc::new(PlatformUrlPattern::default())).unwrap()
}
