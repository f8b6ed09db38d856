//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use llamactl_shared::{HubEvent, ModelStatus};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Configuration for wait operations
pub struct WaitConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    pub description: &'static str,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(50),
            description: "condition",
        }
    }
}

impl WaitConfig {
    pub fn with_description(description: &'static str) -> Self {
        Self {
            description,
            ..Default::default()
        }
    }
}

/// Wait for an async condition to become true
pub async fn wait_for<F, Fut>(config: WaitConfig, condition: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..config.max_attempts {
        if condition().await {
            return Ok(());
        }
        sleep(config.interval).await;
    }
    anyhow::bail!("timed out waiting for {}", config.description)
}

/// Next status change for `model`, skipping every other event.
pub async fn next_status(
    events: &mut mpsc::UnboundedReceiver<HubEvent>,
    model: &str,
) -> Option<ModelStatus> {
    let next = async {
        while let Some(event) = events.recv().await {
            if let HubEvent::StatusChange {
                model_name, status, ..
            } = event
            {
                if model_name == model {
                    return Some(status);
                }
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(10), next)
        .await
        .ok()
        .flatten()
}

/// A `/metrics` endpoint serving a fixed payload, or 500 while `failing` is set.
pub struct StubServer {
    pub port: u16,
    pub hits: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl StubServer {
    pub async fn start(body: &'static str) -> Self {
        Self::start_slow(body, Duration::ZERO).await
    }

    /// Like [`StubServer::start`], but every response is held back for `delay`.
    pub async fn start_slow(body: &'static str, delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let arrivals = Arc::new(Mutex::new(Vec::new()));

        let app = {
            let hits = hits.clone();
            let failing = failing.clone();
            let arrivals = arrivals.clone();
            Router::new().route(
                "/metrics",
                get(move || {
                    let hits = hits.clone();
                    let failing = failing.clone();
                    let arrivals = arrivals.clone();
                    async move {
                        arrivals.lock().unwrap().push(Instant::now());
                        hits.fetch_add(1, Ordering::SeqCst);
                        if !delay.is_zero() {
                            sleep(delay).await;
                        }
                        if failing.load(Ordering::SeqCst) {
                            (StatusCode::INTERNAL_SERVER_ERROR, "")
                        } else {
                            (StatusCode::OK, body)
                        }
                    }
                }),
            )
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            port,
            hits,
            failing,
            arrivals,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// When each request reached the handler, oldest first.
    pub fn arrivals(&self) -> Vec<Instant> {
        self.arrivals.lock().unwrap().clone()
    }
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
