use std::net::UdpSocket;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use tokio::sync::oneshot;

use partyrelay::trusted_time::{NetworkTime, TimeError, TimeSource, NTP_UNIX_OFFSET_SECS};

const UNIX_SECS: u64 = 1_700_000_000;

/// Answers a single NTP request with `reply_len` bytes carrying `UNIX_SECS`.
fn start_ntp_server(reply_len: usize) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind ntp");
    let addr = socket.local_addr().expect("ntp addr");
    std::thread::spawn(move || {
        let mut request = [0u8; 48];
        let Ok((_, peer)) = socket.recv_from(&mut request) else {
            return;
        };
        assert_eq!(request[0], 0x1B);
        let mut reply = [0u8; 48];
        reply[0] = 0x1C;
        let ntp_secs = (UNIX_SECS + NTP_UNIX_OFFSET_SECS) as u32;
        reply[40..44].copy_from_slice(&ntp_secs.to_be_bytes());
        reply[44..48].copy_from_slice(&0x8000_0000u32.to_be_bytes());
        let _ = socket.send_to(&reply[..reply_len], peer);
    });
    addr.to_string()
}

/// A UDP port nobody answers on.
fn silent_ntp_server() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind silent ntp");
    let addr = socket.local_addr().expect("silent addr").to_string();
    (socket, addr)
}

async fn start_time_api(utc_datetime: &'static str) -> (String, oneshot::Sender<()>) {
    let app = Router::new().route(
        "/api/timezone/Etc/UTC",
        get(move || async move { Json(serde_json::json!({ "utc_datetime": utc_datetime })) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind time api");
    let addr = listener.local_addr().expect("time api addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (
        format!("http://{}/api/timezone/Etc/UTC", addr),
        shutdown_tx,
    )
}

async fn timestamp(time: NetworkTime) -> Result<String, TimeError> {
    tokio::task::spawn_blocking(move || time.trusted_timestamp())
        .await
        .expect("time task")
}

#[tokio::test]
async fn ntp_reply_is_used_directly() {
    let ntp = start_ntp_server(48);
    let time = NetworkTime::new(ntp, "http://127.0.0.1:9/unused");
    assert_eq!(timestamp(time).await.unwrap(), UNIX_SECS.to_string());
}

#[tokio::test]
async fn short_ntp_reply_falls_back_to_http() {
    let ntp = start_ntp_server(40);
    let (api, shutdown) = start_time_api("2023-11-14T22:13:20.123456+00:00").await;
    let time = NetworkTime::new(ntp, api);
    assert_eq!(timestamp(time).await.unwrap(), UNIX_SECS.to_string());
    let _ = shutdown.send(());
}

#[tokio::test]
async fn silent_ntp_server_times_out_into_fallback() {
    let (_socket, ntp) = silent_ntp_server();
    let (api, shutdown) = start_time_api("2023-11-14T22:13:20Z").await;
    let time = NetworkTime::new(ntp, api).with_ntp_timeout(Duration::from_millis(200));
    assert_eq!(timestamp(time).await.unwrap(), UNIX_SECS.to_string());
    let _ = shutdown.send(());
}

#[tokio::test]
async fn both_sources_failing_is_unavailable() {
    let ntp = start_ntp_server(12);
    let (api, shutdown) = start_time_api("not a date").await;
    let time = NetworkTime::new(ntp, api);

    match timestamp(time).await {
        Err(TimeError::Unavailable { ntp, http }) => {
            assert!(matches!(*ntp, TimeError::ProtocolViolation(_)), "{ntp:?}");
            assert!(matches!(*http, TimeError::ProtocolViolation(_)), "{http:?}");
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
    let _ = shutdown.send(());
}
