//! The Agent's minimal HTTP control surface: `GET /status` and `POST
//! /stop`, bound to a loopback TCP socket chosen by the OS so many runs
//! can coexist without port collisions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use engine::Scheduler;
use executor::Signal;
use store::RunRecord;

#[derive(Clone)]
pub struct ControlState {
    pub scheduler: Arc<Scheduler>,
    pub status: watch::Receiver<RunRecord>,
}

/// A bound control server plus the means to shut it down.
pub struct ControlServer {
    pub addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl ControlServer {
    /// Bind to `127.0.0.1:0` and start serving in the background.
    pub async fn spawn(state: ControlState) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/status", get(status))
            .route("/stop", post(stop))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(Self { addr, shutdown: Some(tx), handle })
    }

    /// Signal the server to stop and wait for it to drain.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

async fn status(State(state): State<ControlState>) -> impl IntoResponse {
    Json(state.status.borrow().clone())
}

async fn stop(State(state): State<ControlState>) -> impl IntoResponse {
    state.scheduler.signal(Signal::Term).await;
    (StatusCode::OK, "OK")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}
