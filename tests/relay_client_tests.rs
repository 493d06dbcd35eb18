use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::sync::oneshot;

use partyrelay::client::{ClientError, RelayClient, SignedRequest};
use partyrelay::config::{Settings, SharedSettings};
use partyrelay::crypto::{is_valid_nonce, sign};
use partyrelay::delivery::{
    DeliveryChannel, DeliveryError, NotificationRouter, MAX_EXTERNAL_TEXT_LEN,
};
use partyrelay::relay_transport::TransportError;
use partyrelay::trusted_time::{TimeError, TimeSource};

const SECRET: &str = "s3cret";
const TOKEN: &str = "user-token";

#[derive(Clone)]
struct MockRelay {
    requests: Arc<Mutex<Vec<SignedRequest>>>,
    status: StatusCode,
}

async fn record(
    State(relay): State<MockRelay>,
    Json(request): Json<SignedRequest>,
) -> (StatusCode, &'static str) {
    relay.requests.lock().unwrap().push(request);
    let body = if relay.status.is_success() { "ok" } else { "relay down" };
    (relay.status, body)
}

async fn start_relay(status: StatusCode) -> (String, MockRelay, oneshot::Sender<()>) {
    let relay = MockRelay {
        requests: Arc::new(Mutex::new(Vec::new())),
        status,
    };
    let app = Router::new()
        .route("/send", post(record))
        .with_state(relay.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), relay, shutdown_tx)
}

struct FixedClock {
    calls: AtomicUsize,
    result: Result<String, TimeError>,
}

impl FixedClock {
    fn at(timestamp: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Ok(timestamp.to_string()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result: Err(TimeError::Io("offline".into())),
        })
    }
}

impl TimeSource for FixedClock {
    fn trusted_timestamp(&self) -> Result<String, TimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn settings(token: &str, secret: &str, enabled: bool) -> SharedSettings {
    SharedSettings::new(Settings {
        discord_user_token: token.into(),
        user_secret_key: secret.into(),
        enable_discord_bot: enabled,
        ..Settings::default()
    })
}

async fn send(client: Arc<RelayClient>, title: &str, text: &str) -> Result<(), ClientError> {
    let (title, text) = (title.to_string(), text.to_string());
    tokio::task::spawn_blocking(move || client.send(&title, &text))
        .await
        .expect("send task")
}

#[tokio::test]
async fn posts_a_verifiable_signed_request() {
    let (url, relay, shutdown) = start_relay(StatusCode::OK).await;
    let client = Arc::new(RelayClient::new(
        &url,
        settings(TOKEN, SECRET, true),
        FixedClock::at("1700000000"),
    ));

    send(client, "2/8: Party join", "Alice joined").await.expect("send");

    let requests = relay.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.user_token, TOKEN);
    assert_eq!(request.title, "2/8: Party join");
    assert_eq!(request.text, "Alice joined");
    assert_eq!(request.timestamp, "1700000000");
    assert!(is_valid_nonce(&request.nonce));
    assert_eq!(
        request.hash,
        sign(SECRET, &request.signed_fields()).unwrap()
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn every_send_uses_a_fresh_nonce() {
    let (url, relay, shutdown) = start_relay(StatusCode::OK).await;
    let client = Arc::new(RelayClient::new(
        &url,
        settings(TOKEN, SECRET, true),
        FixedClock::at("1700000000"),
    ));

    send(Arc::clone(&client), "t", "x").await.expect("first");
    send(client, "t", "x").await.expect("second");

    let requests = relay.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].nonce, requests[1].nonce);
    assert_ne!(requests[0].hash, requests[1].hash);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn http_error_reports_status_and_body() {
    let (url, _relay, shutdown) = start_relay(StatusCode::INTERNAL_SERVER_ERROR).await;
    let client = Arc::new(RelayClient::new(
        &url,
        settings(TOKEN, SECRET, true),
        FixedClock::at("1700000000"),
    ));

    let err = send(client, "t", "x").await.unwrap_err();
    match err {
        ClientError::Transport(TransportError::Status { code, body }) => {
            assert_eq!(code, 500);
            assert_eq!(body, "relay down");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn missing_credentials_never_reach_the_network() {
    let (url, relay, shutdown) = start_relay(StatusCode::OK).await;

    for shared in [
        settings(TOKEN, SECRET, false),
        settings("   ", SECRET, true),
        settings(TOKEN, "", true),
        settings(TOKEN, "\t\n", true),
    ] {
        let clock = FixedClock::at("1700000000");
        let client = Arc::new(RelayClient::new(&url, shared, clock.clone()));
        assert!(!client.is_active());
        let err = send(client, "t", "x").await.unwrap_err();
        assert!(matches!(err, ClientError::Inactive), "{err:?}");
        assert_eq!(clock.calls.load(Ordering::SeqCst), 0);
    }
    assert!(relay.requests.lock().unwrap().is_empty());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn no_trusted_time_aborts_the_delivery() {
    let (url, relay, shutdown) = start_relay(StatusCode::OK).await;
    let client = Arc::new(RelayClient::new(
        &url,
        settings(TOKEN, SECRET, true),
        FixedClock::failing(),
    ));

    let channel = Arc::clone(&client);
    let err = tokio::task::spawn_blocking(move || channel.deliver("t", "x"))
        .await
        .expect("deliver task")
        .unwrap_err();
    assert!(matches!(err, DeliveryError::TimeUnavailable(_)), "{err:?}");
    assert!(relay.requests.lock().unwrap().is_empty());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn router_delivers_custom_messages_and_rejects_oversized_ones() {
    let (url, relay, shutdown) = start_relay(StatusCode::OK).await;
    let client: Arc<dyn DeliveryChannel> = Arc::new(RelayClient::new(
        &url,
        settings(TOKEN, SECRET, true),
        FixedClock::at("1700000000"),
    ));
    let router = NotificationRouter::new(vec![client]);

    let oversized = "x".repeat(MAX_EXTERNAL_TEXT_LEN + 1);
    let err = router.send_custom_message("Custom", &oversized).unwrap_err();
    assert!(matches!(err, DeliveryError::Validation(_)));

    assert_eq!(router.send_custom_message("Custom", "hello").unwrap(), 1);
    for _ in 0..50 {
        if !relay.requests.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let requests = relay.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "hello");

    let _ = shutdown.send(());
}
