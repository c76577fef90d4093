//! End-to-end transport and supervision tests.
//!
//! These tests exercise the reachability probe, the reconnect policy, and a
//! supervisor tick over real sockets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use streamwatch::transport::BoxFuture;
use streamwatch::{
    reachable, Connector, Endpoint, FallbackActuator, ProcessProbe, ReconnectPolicy,
    SessionConfig, StatusTracker, Supervisor, SupervisorSettings, TickOutcome, WatchdogError,
    WebSocketConnector,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

struct Running;

impl ProcessProbe for Running {
    fn is_running(&self) -> BoxFuture<'_, streamwatch::Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}

#[derive(Clone, Default)]
struct CountingFallback(Arc<AtomicU32>);

impl FallbackActuator for CountingFallback {
    fn trigger_start(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn supervisor(
    endpoint: Endpoint,
    fallback: CountingFallback,
    use_fallback: bool,
) -> Supervisor<WebSocketConnector, Running, CountingFallback> {
    let status = Arc::new(StatusTracker::new());
    Supervisor::new(
        endpoint,
        WebSocketConnector::new(Arc::clone(&status), SessionConfig::default()),
        ReconnectPolicy::default()
            .with_max_attempts(2)
            .with_delay(Duration::from_millis(50)),
        Running,
        fallback,
        status,
        SupervisorSettings {
            check_interval: Duration::from_secs(10),
            status_grace: Duration::from_millis(300),
            use_fallback,
        },
    )
}

/// Peer that completes a no-auth handshake, answers the status query with
/// `output_active`, and returns every request it saw afterwards
async fn spawn_peer(output_active: bool) -> (Endpoint, JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        // Reachability probes connect and hang up; wait for the real upgrade
        let mut ws = loop {
            let (stream, _) = listener.accept().await.unwrap();
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                break ws;
            }
        };
        let hello = json!({"op": 0, "d": {"obsWebSocketVersion": "5.0.1", "rpcVersion": 1}});
        ws.send(Message::Text(hello.to_string())).await.unwrap();

        let mut requests = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["op"] != 6 {
                continue;
            }
            if frame["d"]["requestType"] == "GetStreamStatus" {
                let reply = json!({
                    "op": 7,
                    "d": {
                        "requestType": "GetStreamStatus",
                        "requestId": frame["d"]["requestId"],
                        "requestStatus": {"result": true, "code": 100},
                        "responseData": {"outputActive": output_active}
                    }
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
            requests.push(frame);
        }
        requests
    });

    (Endpoint::new("127.0.0.1", port, None), handle)
}

fn request_types(requests: &[Value]) -> Vec<&str> {
    requests
        .iter()
        .filter_map(|r| r["d"]["requestType"].as_str())
        .collect()
}

#[tokio::test]
async fn test_probe_distinguishes_listener_from_closed_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port(), None);
    let closed = Endpoint::new("127.0.0.1", closed_port().await, None);

    assert!(reachable(&open, Duration::from_secs(1)).await);
    assert!(!reachable(&closed, Duration::from_secs(1)).await);

    let connector =
        WebSocketConnector::new(Arc::new(StatusTracker::new()), SessionConfig::default());
    assert!(connector.probe(&open, Duration::from_secs(1)).await);
    assert!(!connector.probe(&closed, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_policy_fails_fast_on_unreachable_endpoint() {
    let endpoint = Endpoint::new("127.0.0.1", closed_port().await, None);
    let connector =
        WebSocketConnector::new(Arc::new(StatusTracker::new()), SessionConfig::default());
    let policy = ReconnectPolicy::default().with_delay(Duration::from_secs(30));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        policy.establish(&connector, &endpoint),
    )
    .await
    .expect("unreachable endpoint must not wait out the retry delay");

    assert!(matches!(result, Err(WatchdogError::TransportUnreachable(_))));
}

#[tokio::test]
async fn test_policy_retries_handshake_failures() {
    // Accepts TCP but hangs up before the upgrade completes
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port(), None);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let connector =
        WebSocketConnector::new(Arc::new(StatusTracker::new()), SessionConfig::default());
    let policy = ReconnectPolicy::default()
        .with_max_attempts(3)
        .with_delay(Duration::from_millis(20));

    let result = policy.establish(&connector, &endpoint).await;

    assert!(matches!(
        result,
        Err(WatchdogError::RetriesExhausted { attempts: 3, .. })
    ));
}

#[tokio::test]
async fn test_unreachable_endpoint_triggers_fallback() {
    let endpoint = Endpoint::new("127.0.0.1", closed_port().await, None);
    let fallback = CountingFallback::default();
    let mut supervisor = supervisor(endpoint, fallback.clone(), true);

    assert_eq!(
        supervisor.tick().await.unwrap(),
        TickOutcome::FallbackTriggered
    );
    assert_eq!(fallback.0.load(Ordering::SeqCst), 1);
    assert!(!supervisor.has_usable_session());
}

#[tokio::test]
async fn test_unreachable_endpoint_without_fallback_degrades() {
    let endpoint = Endpoint::new("127.0.0.1", closed_port().await, None);
    let fallback = CountingFallback::default();
    let mut supervisor = supervisor(endpoint, fallback.clone(), false);

    assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::Degraded);
    assert_eq!(fallback.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inactive_stream_gets_start_request() {
    let (endpoint, peer) = spawn_peer(false).await;
    let fallback = CountingFallback::default();
    let supervisor = supervisor(endpoint, fallback.clone(), true);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stopper.cancel();
    });
    supervisor.run(shutdown).await;

    let requests = peer.await.unwrap();
    assert_eq!(
        request_types(&requests),
        ["GetStreamStatus", "GetStreamStatus", "StartStream"]
    );
    // Correlation ids are unique and increasing
    let ids: Vec<u64> = requests
        .iter()
        .filter_map(|r| r["d"]["requestId"].as_str()?.parse().ok())
        .collect();
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(fallback.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_active_stream_is_left_alone() {
    let (endpoint, peer) = spawn_peer(true).await;
    let fallback = CountingFallback::default();
    let mut supervisor = supervisor(endpoint, fallback.clone(), true);

    assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::Streaming);
    assert!(supervisor.has_usable_session());
    drop(supervisor);

    let requests = peer.await.unwrap();
    assert!(!request_types(&requests).contains(&"StartStream"));
}
