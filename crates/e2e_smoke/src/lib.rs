//! In-process harness for end-to-end gateway tests: a scripted telemetry feed plus a
//! gateway wired to it with a manual clock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use pitwall_gateway::clock::ManualClock;
use pitwall_gateway::config::{GatewayConfig, StartupError};
use pitwall_gateway::http::{AppState, routes};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Fixture {
    status: StatusCode,
    body: String,
}

#[derive(Default)]
struct FeedState {
    fixtures: Mutex<HashMap<String, Fixture>>,
    calls: Mutex<HashMap<String, usize>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scripted upstream feed.
///
/// Fixtures are keyed by path (`"position"`) or by path plus query string
/// (`"sessions?meeting_key=1219"`); the more specific key wins and parameter order does
/// not matter. Unknown keys answer 404. Every request is counted per path.
pub struct MockFeed {
    addr: SocketAddr,
    state: Arc<FeedState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MockFeed {
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(FeedState::default());
        let app = Router::new()
            .fallback(serve_fixture)
            .with_state(state.clone());
        let (addr, shutdown, task) = spawn_server(app).await?;

        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serves `body` with 200 for `key`.
    pub fn set(&self, key: &str, body: Value) {
        self.set_status(key, StatusCode::OK, body);
    }

    pub fn set_status(&self, key: &str, status: StatusCode, body: Value) {
        self.set_raw(key, status, &body.to_string());
    }

    /// Serves `body` verbatim as `application/json`, valid JSON or not.
    pub fn set_raw(&self, key: &str, status: StatusCode, body: &str) {
        let key = match key.split_once('?') {
            Some((path, query)) => fixture_key(path, Some(query)),
            None => fixture_key(key, None),
        };
        locked(&self.state.fixtures).insert(
            key,
            Fixture {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Requests received for `path`, regardless of query string.
    pub fn calls(&self, path: &str) -> usize {
        locked(&self.state.calls).get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        locked(&self.state.calls).values().sum()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

async fn serve_fixture(State(state): State<Arc<FeedState>>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/').to_string();
    *locked(&state.calls).entry(path.clone()).or_insert(0) += 1;

    let fixture = {
        let fixtures = locked(&state.fixtures);
        uri.query()
            .and_then(|query| fixtures.get(&fixture_key(&path, Some(query))))
            .or_else(|| fixtures.get(&path))
            .cloned()
    };

    match fixture {
        Some(fixture) => (
            fixture.status,
            [(header::CONTENT_TYPE, "application/json")],
            fixture.body,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"detail": "Not Found"})),
        )
            .into_response(),
    }
}

fn fixture_key(path: &str, query: Option<&str>) -> String {
    let mut pairs = query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .collect::<Vec<_>>();
    if pairs.is_empty() {
        return path.to_string();
    }
    pairs.sort_unstable();
    format!("{}?{}", path, pairs.join("&"))
}

/// A gateway bound to an ephemeral port, talking to a [`MockFeed`].
pub struct TestGateway {
    addr: SocketAddr,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub enum HarnessError {
    Config(StartupError),
    Io(std::io::Error),
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessError::Config(err) => write!(f, "gateway config rejected: {}", err),
            HarnessError::Io(err) => write!(f, "listener failed: {}", err),
        }
    }
}

impl std::error::Error for HarnessError {}

impl TestGateway {
    /// Starts a gateway against `feed`. `overrides` are extra config keys; retries are
    /// off unless an override turns them on.
    pub async fn start(feed: &MockFeed, overrides: &[(&str, &str)]) -> Result<Self, HarnessError> {
        let mut kv = HashMap::from([
            ("PITWALL_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
            ("PITWALL_UPSTREAM_URL".to_string(), feed.base_url()),
            ("PITWALL_UPSTREAM_TIMEOUT_MS".to_string(), "2000".to_string()),
            ("PITWALL_UPSTREAM_RETRY_MAX_ATTEMPTS".to_string(), "0".to_string()),
        ]);
        kv.extend(
            overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        let config = GatewayConfig::from_kv(&kv).map_err(HarnessError::Config)?;
        let clock = Arc::new(ManualClock::new());
        let state = AppState::new(config, clock.clone()).map_err(HarnessError::Config)?;
        let (addr, shutdown, task) = spawn_server(routes(state.clone()))
            .await
            .map_err(HarnessError::Io)?;

        Ok(Self {
            addr,
            state,
            clock,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

pub async fn spawn_server(
    app: Router,
) -> std::io::Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    Ok((addr, shutdown_tx, handle))
}
