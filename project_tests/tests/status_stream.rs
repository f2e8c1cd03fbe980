//! End-to-end tests: the real SSE transport against a scripted local server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_statusstream::streams::{
    ClientOptions, ConnectionState, ProbeStatus, SseTransport, StatusEvent, StatusStreamClient,
    StreamError, TemplateEndpoint, TransportError,
};
use project_tests::{frame, status_json, MockSseServer, Reply};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Watch {
    client: StatusStreamClient,
    states: UnboundedReceiver<ConnectionState>,
    statuses: UnboundedReceiver<StatusEvent>,
    errors: Arc<Mutex<Vec<StreamError>>>,
}

impl Watch {
    async fn next_state(&mut self) -> ConnectionState {
        timeout(WAIT, self.states.recv())
            .await
            .expect("timed out waiting for a state change")
            .expect("state channel closed")
    }

    async fn wait_for(&mut self, wanted: ConnectionState) {
        while self.next_state().await != wanted {}
    }

    async fn next_status(&mut self) -> StatusEvent {
        timeout(WAIT, self.statuses.recv())
            .await
            .expect("timed out waiting for a status")
            .expect("status channel closed")
    }

    fn errors(&self) -> Vec<StreamError> {
        self.errors.lock().unwrap().clone()
    }
}

fn watch(server: &MockSseServer, resource: i64, tune: impl FnOnce(ClientOptions) -> ClientOptions) -> Watch {
    let (state_tx, states) = unbounded_channel();
    let (status_tx, statuses) = unbounded_channel();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);

    let options = ClientOptions::new(resource)
        .on_connection_state_change(move |s| {
            let _ = state_tx.send(s);
        })
        .on_status_update(move |e| {
            let _ = status_tx.send(e.clone());
        })
        .on_error(move |e| sink.lock().unwrap().push(e.clone()));

    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    let client = StatusStreamClient::new(
        tune(options),
        Arc::new(TemplateEndpoint::new(server.url("/api/monitors/{id}/stream"))),
        Arc::new(SseTransport::with_client(http, None)),
    )
    .unwrap();

    Watch {
        client,
        states,
        statuses,
        errors,
    }
}

#[tokio::test]
async fn delivers_decoded_statuses_and_skips_malformed_ones() {
    let server = MockSseServer::start(vec![Reply::Events {
        frames: vec![
            frame("status", &status_json(42, "success", 120)),
            frame("status", "{\"monitor_id\": 42, \"status\":"),
            ": keep-alive\n\n".to_string(),
            frame("message", &status_json(42, "timeout", 1)),
            frame("result", &status_json(42, "failed", 900)),
        ],
        hold: true,
    }])
    .await
    .unwrap();

    let mut w = watch(&server, 42, |o| o);
    w.client.connect();
    w.wait_for(ConnectionState::Connected).await;

    let first = w.next_status().await;
    assert_eq!(first.status, ProbeStatus::Success);
    assert_eq!(first.response_time_ms, Some(120.0));

    let second = w.next_status().await;
    assert_eq!(second.status, ProbeStatus::Failed);
    assert_eq!(w.client.latest_status(), Some(second));
    assert!(w.client.is_connected());
    assert!(w.errors().is_empty());

    let request = server.requests()[0].to_ascii_lowercase();
    assert!(request.starts_with("get /api/monitors/42/stream "));
    assert!(request.contains("accept: text/event-stream"));
}

#[tokio::test]
async fn recovers_from_remote_close_and_server_errors() {
    let server = MockSseServer::start(vec![
        Reply::Events {
            frames: vec![frame("status", &status_json(7, "success", 50))],
            hold: false,
        },
        Reply::Status(503),
        Reply::Events {
            frames: vec![frame("status", &status_json(7, "running", 60))],
            hold: true,
        },
    ])
    .await
    .unwrap();

    let mut w = watch(&server, 7, |o| o.base_reconnect_delay(Duration::from_millis(50)));
    w.client.connect();
    w.wait_for(ConnectionState::Connected).await;
    w.wait_for(ConnectionState::Reconnecting).await;
    w.wait_for(ConnectionState::Connected).await;

    assert_eq!(w.next_status().await.status, ProbeStatus::Success);
    assert_eq!(w.next_status().await.status, ProbeStatus::Running);
    assert_eq!(server.connections(), 3);
    assert_eq!(
        w.errors(),
        vec![
            StreamError::Transport(TransportError::Closed),
            StreamError::Transport(TransportError::Status { status: 503 }),
        ]
    );
    assert_eq!(w.client.reconnect_attempt(), 0);
    assert_eq!(w.client.reconnect_delay(), Duration::from_millis(50));
}

#[tokio::test]
async fn gives_up_after_the_attempt_ceiling() {
    let server = MockSseServer::start(vec![Reply::Status(500)]).await.unwrap();

    let mut w = watch(&server, 1, |o| {
        o.base_reconnect_delay(Duration::from_millis(20))
            .max_reconnect_attempts(3)
    });
    w.client.connect();
    w.wait_for(ConnectionState::Error).await;

    let errors = w.errors();
    assert_eq!(errors.len(), 4);
    assert!(errors[..3]
        .iter()
        .all(|e| *e == StreamError::Transport(TransportError::Status { status: 500 })));
    assert_eq!(errors[3], StreamError::Exhausted { attempts: 3 });
    assert_eq!(
        w.client.last_error().map(|e| e.to_string()),
        Some("failed to connect after 3 attempts".to_string())
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn disconnect_closes_the_stream_for_good() {
    let server = MockSseServer::start(vec![Reply::Events {
        frames: vec![frame("status", &status_json(3, "success", 10))],
        hold: true,
    }])
    .await
    .unwrap();

    let mut w = watch(&server, 3, |o| o.base_reconnect_delay(Duration::from_millis(20)));
    w.client.connect();
    w.wait_for(ConnectionState::Connected).await;
    w.next_status().await;

    w.client.disconnect();
    assert_eq!(w.next_state().await, ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 1);
    assert!(w.errors().is_empty());
    let snapshot = w.client.snapshot();
    assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
    assert!(snapshot.latest_status.is_none());
}
