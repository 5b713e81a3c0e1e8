#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io::Read,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Bytes, extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse,
    routing::post, Router,
};
use flate2::read::GzDecoder;
use serde_json::{json, Value as JsonValue};

/// One request as observed by the mock server, after gzip decoding.
#[derive(Clone, Debug)]
pub struct Captured {
    pub stmt: String,
    pub args: Option<JsonValue>,
    pub bulk_args: Option<JsonValue>,
    pub authorization: Option<String>,
    pub default_schema: Option<String>,
    pub content_encoding: Option<String>,
    pub body_len: usize,
}

#[derive(Clone)]
enum Script {
    /// Responses popped in request order (teacher-style queue).
    Queue(Arc<Mutex<VecDeque<(StatusCode, String)>>>),
    /// Statement-driven dispatch for cursor traffic: FETCH statements pop
    /// row batches, everything else gets an empty ok envelope.
    Cursor {
        cols: Vec<String>,
        col_types: Vec<JsonValue>,
        batches: Arc<Mutex<VecDeque<JsonValue>>>,
    },
}

#[derive(Clone)]
struct MockState {
    script: Script,
    captured: Arc<Mutex<Vec<Captured>>>,
    hits: Arc<AtomicUsize>,
}

pub struct MockSql {
    pub host: String,
    pub port: u16,
    captured: Arc<Mutex<Vec<Captured>>>,
    hits: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for MockSql {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockSql {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.captured.lock().expect("captured mutex must not be poisoned").clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.captured().into_iter().map(|req| req.stmt).collect()
    }

    /// Waits until a captured statement starts with `prefix`, for async
    /// producers that finish after the assertion point.
    pub async fn wait_for_statement(&self, prefix: &str) {
        for _ in 0..200 {
            if self.statements().iter().any(|stmt| stmt.starts_with(prefix)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "statement starting with '{prefix}' never arrived; saw {:?}",
            self.statements()
        );
    }
}

/// Standard success envelope.
pub fn ok_body(
    cols: &[&str],
    col_types: &[JsonValue],
    rows: JsonValue,
    rowcount: i64,
) -> (StatusCode, String) {
    let body = json!({
        "cols": cols,
        "col_types": col_types,
        "rows": rows,
        "rowcount": rowcount,
        "duration": 0.5,
    });
    (StatusCode::OK, body.to_string())
}

/// Empty success envelope, as returned for DDL and transaction control.
pub fn empty_ok() -> (StatusCode, String) {
    ok_body(&[], &[], json!([]), 0)
}

pub fn bulk_body(results: JsonValue) -> (StatusCode, String) {
    let body = json!({
        "cols": [],
        "col_types": [],
        "results": results,
        "duration": 0.5,
    });
    (StatusCode::OK, body.to_string())
}

pub fn error_body(status: StatusCode, message: &str, code: i64) -> (StatusCode, String) {
    let body = json!({"error": {"message": message, "code": code}});
    (status, body.to_string())
}

/// Spawns a mock `/_sql` endpoint answering from a response queue.
pub async fn spawn_scripted(responses: Vec<(StatusCode, String)>) -> MockSql {
    spawn(Script::Queue(Arc::new(Mutex::new(responses.into())))).await
}

/// Spawns a mock `/_sql` endpoint for cursor traffic: `FETCH` statements
/// pop batches of rows, all other statements succeed with an empty body.
pub async fn spawn_cursor(
    cols: &[&str],
    col_types: &[JsonValue],
    batches: Vec<JsonValue>,
) -> MockSql {
    spawn(Script::Cursor {
        cols: cols.iter().map(|col| (*col).to_owned()).collect(),
        col_types: col_types.to_vec(),
        batches: Arc::new(Mutex::new(batches.into())),
    })
    .await
}

async fn spawn(script: Script) -> MockSql {
    let state = MockState {
        script,
        captured: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/_sql", post(sql_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server must run");
    });

    MockSql {
        host: address.ip().to_string(),
        port: address.port(),
        captured: state.captured,
        hits: state.hits,
        task,
    }
}

async fn sql_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let content_encoding = header_string(&headers, "content-encoding");
    let decoded = if content_encoding.as_deref() == Some("gzip") {
        let mut decoder = GzDecoder::new(body.as_ref());
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .expect("gzip body must decode");
        decoded
    } else {
        body.to_vec()
    };
    let payload: JsonValue = serde_json::from_slice(&decoded).expect("body must be JSON");
    let stmt = payload["stmt"].as_str().unwrap_or_default().to_owned();

    state
        .captured
        .lock()
        .expect("captured mutex must not be poisoned")
        .push(Captured {
            stmt: stmt.clone(),
            args: payload.get("args").cloned(),
            bulk_args: payload.get("bulk_args").cloned(),
            authorization: header_string(&headers, "authorization"),
            default_schema: header_string(&headers, "default-schema"),
            content_encoding,
            body_len: body.len(),
        });

    let (status, body) = match &state.script {
        Script::Queue(responses) => responses
            .lock()
            .expect("response queue mutex must not be poisoned")
            .pop_front()
            .unwrap_or((
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": {"message": "no scripted response left", "code": 5000}})
                    .to_string(),
            )),
        Script::Cursor {
            cols,
            col_types,
            batches,
        } => {
            if stmt.starts_with("FETCH") {
                let rows = batches
                    .lock()
                    .expect("batch queue mutex must not be poisoned")
                    .pop_front()
                    .unwrap_or_else(|| json!([]));
                let col_refs: Vec<&str> = cols.iter().map(String::as_str).collect();
                ok_body(&col_refs, col_types, rows, -1)
            } else {
                empty_ok()
            }
        }
    };

    (
        status,
        [("content-type", "application/json")],
        body,
    )
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}
