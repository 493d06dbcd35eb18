//! Local HTTP endpoint through which other processes inject notifications.
//!
//! `POST /custom` with `{"title": ..., "text": ...}` runs the message through
//! [`NotificationRouter::send_custom_message`], so the length guard and
//! channel activity checks apply exactly as for internal events.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::delivery::{DeliveryError, NotificationRouter};
use crate::relay_transport::{self, TransportError};

pub const DEFAULT_TRIGGER_BIND: &str = "127.0.0.1:7878";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomMessage {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomResponse {
    pub dispatched: usize,
}

pub fn app(router: NotificationRouter) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/custom", post(custom_message))
        .with_state(router)
}

async fn healthcheck() -> impl IntoResponse {
    StatusCode::OK
}

async fn custom_message(
    State(router): State<NotificationRouter>,
    Json(message): Json<CustomMessage>,
) -> impl IntoResponse {
    if message.title.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "title must not be blank").into_response();
    }
    match router.send_custom_message(&message.title, &message.text) {
        Ok(dispatched) => (StatusCode::ACCEPTED, Json(CustomResponse { dispatched })).into_response(),
        Err(DeliveryError::Validation(detail)) => {
            (StatusCode::PAYLOAD_TOO_LARGE, detail).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// A running trigger server.
pub struct TriggerServer {
    addr: std::net::SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TriggerServer {
    pub async fn bind(bind_addr: &str, router: NotificationRouter) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let server = axum::serve(listener, app(router)).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                crate::plog!("trigger: server error: {}", e);
            }
        });

        crate::plog!("trigger: listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
        crate::plog!("trigger: stopped");
    }
}

/// Client side of `partyrelay send`: hand a message to a running instance.
/// Blocking.
pub fn post_custom(base_url: &str, title: &str, text: &str) -> Result<usize, TransportError> {
    let agent = relay_transport::agent();
    let response = agent
        .post(&relay_transport::endpoint(base_url, "custom"))
        .send_json(CustomMessage {
            title: title.to_string(),
            text: text.to_string(),
        })?;
    let body: CustomResponse = response
        .into_json()
        .map_err(|e| TransportError::Decode(e.to_string()))?;
    Ok(body.dispatched)
}
