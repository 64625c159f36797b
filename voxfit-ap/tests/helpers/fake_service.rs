//! Fake synthesis service for harness tests
//!
//! An axum server plays the HTTP side (readiness and streaming endpoints);
//! a `sh -c` script plays the process side (diagnostic output, lifetime).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use voxfit_ap::HarnessTimings;
use voxfit_common::config::{RequestConfig, ServiceConfig};

/// What the streaming endpoint does
#[derive(Debug, Clone)]
pub enum StreamBehavior {
    /// `count` chunks of `size` bytes
    Chunks { count: usize, size: usize },
    /// `count` chunks, then the connection is aborted
    ChunksThenAbort { count: usize, size: usize },
    /// Fixed status and body
    Status { code: u16, body: &'static str },
    /// Given bytes split into `chunk_size` pieces
    Bytes { data: Vec<u8>, chunk_size: usize },
}

#[derive(Clone)]
struct ServiceState {
    ready: bool,
    behavior: StreamBehavior,
    last_query: Arc<Mutex<Option<HashMap<String, String>>>>,
}

/// Running fake service endpoints
pub struct FakeService {
    pub base_url: String,
    last_query: Arc<Mutex<Option<HashMap<String, String>>>>,
    handle: JoinHandle<()>,
}

impl FakeService {
    pub fn readiness_url(&self) -> String {
        format!("{}/docs", self.base_url)
    }

    pub fn stream_url(&self) -> String {
        format!("{}/tts_stream", self.base_url)
    }

    /// Query parameters of the last streaming request
    pub fn last_query(&self) -> Option<HashMap<String, String>> {
        self.last_query.lock().unwrap().clone()
    }

    /// Service process config running `script` under `sh -c`
    pub fn service_config(&self, script: &str) -> ServiceConfig {
        ServiceConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: Default::default(),
            working_dir: None,
            readiness_url: self.readiness_url(),
        }
    }

    pub fn request_config(&self, max_chunks: usize) -> RequestConfig {
        RequestConfig {
            stream_url: self.stream_url(),
            text: "Hello, this is a test of the streaming mode.".to_string(),
            speaker_wav: "lisa.wav".to_string(),
            language: "en".to_string(),
            max_chunks,
            read_timeout_secs: 5,
        }
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Timings scaled down for tests
pub fn fast_timings(ready_timeout: Duration) -> HarnessTimings {
    HarnessTimings {
        ready_timeout,
        poll_interval: Duration::from_millis(50),
        readiness_probe_timeout: Duration::from_millis(500),
        startup_delay: Duration::ZERO,
        terminate_grace: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
    }
}

async fn docs(State(state): State<ServiceState>) -> StatusCode {
    if state.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn tts_stream(
    State(state): State<ServiceState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    *state.last_query.lock().unwrap() = Some(params);

    match state.behavior {
        StreamBehavior::Status { code, body } => {
            let status = StatusCode::from_u16(code).unwrap();
            (status, body).into_response()
        }
        StreamBehavior::Chunks { count, size } => {
            let stream = async_stream::stream! {
                for i in 0..count {
                    yield Ok::<Bytes, std::io::Error>(Bytes::from(vec![(i % 251) as u8; size]));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            Body::from_stream(stream).into_response()
        }
        StreamBehavior::ChunksThenAbort { count, size } => {
            let stream = async_stream::stream! {
                for _ in 0..count {
                    yield Ok::<Bytes, std::io::Error>(Bytes::from(vec![1u8; size]));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                yield Err(std::io::Error::new(std::io::ErrorKind::Other, "synthesis crashed"));
            };
            Body::from_stream(stream).into_response()
        }
        StreamBehavior::Bytes { data, chunk_size } => {
            let stream = async_stream::stream! {
                for chunk in data.chunks(chunk_size) {
                    yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(chunk));
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            };
            Body::from_stream(stream).into_response()
        }
    }
}

/// Serve readiness and streaming endpoints on an ephemeral local port
pub async fn start_fake_service(ready: bool, behavior: StreamBehavior) -> FakeService {
    let last_query = Arc::new(Mutex::new(None));
    let state = ServiceState {
        ready,
        behavior,
        last_query: Arc::clone(&last_query),
    };

    let app = Router::new()
        .route("/docs", get(docs))
        .route("/tts_stream", get(tts_stream))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeService {
        base_url: format!("http://{}", addr),
        last_query,
        handle,
    }
}
