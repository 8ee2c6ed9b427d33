#![allow(clippy::unwrap_used)]
// End-to-end tests for `Bridge` over the HTTP polling transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moonlink_core::{
    Bridge, BridgeConfig, CONNECTION_PATH, ConnectionState, LinkNotice, MemoryStore, StateStore,
    StateValue, TransportMode,
};

const DEADLINE: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

async fn mock_get(server: &MockServer, route: &str, result: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": result })))
        .mount(server)
        .await;
}

async fn moonraker() -> MockServer {
    let server = MockServer::start().await;
    mock_get(&server, "/printer/info", json!({"state": "ready", "hostname": "voron"})).await;
    mock_get(
        &server,
        "/server/info",
        json!({"klippy_connected": true, "klippy_state": "ready", "components": []}),
    )
    .await;
    mock_get(&server, "/printer/objects/list", json!({"objects": ["extruder", "print_stats"]})).await;
    mock_get(
        &server,
        "/printer/objects/query",
        json!({
            "eventtime": 5.2,
            "status": {
                "extruder": {"temperature": 200.04, "target": 200.0},
                "print_stats": {"state": "standby", "filename": ""}
            }
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/server/spoolman/spool_id"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Spoolman not configured"}
        })))
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".into(),
        port: server.address().port(),
        transport: TransportMode::HttpPoll,
        poll_interval: Duration::from_secs(60),
        ..BridgeConfig::default()
    }
}

async fn wait_for_notice(notices: &mut broadcast::Receiver<LinkNotice>, wanted: &LinkNotice) {
    tokio::time::timeout(DEADLINE, async {
        loop {
            if &notices.recv().await.unwrap() == wanted {
                return;
            }
        }
    })
    .await
    .unwrap();
}

async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(DEADLINE, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_polling_bridge_synchronizes_state_tree() {
    let server = moonraker().await;
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn StateStore> = store.clone();
    let bridge = Bridge::new(config_for(&server), shared).unwrap();
    let mut notices = bridge.notices();

    bridge.start().await.unwrap();
    wait_for_notice(&mut notices, &LinkNotice::Synchronized).await;
    assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Open);

    let value = |p: &str| store.get(p).and_then(|e| e.value);
    assert_eq!(value("extruder.temperature"), Some(StateValue::Number(200.0)));
    assert_eq!(value("print_stats.state"), Some(StateValue::Text("standby".into())));
    assert_eq!(value(CONNECTION_PATH), Some(StateValue::Bool(true)));

    wait_until(|| store.get("klippy_connected").is_some()).await;
    assert_eq!(value("klippy_connected"), Some(StateValue::Bool(true)));
    // An empty array is not materialized.
    assert!(store.get("components").is_none());

    bridge.shutdown().await.unwrap();
    assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Disconnected);
    assert_eq!(value(CONNECTION_PATH), Some(StateValue::Bool(false)));
}

#[tokio::test]
async fn test_control_write_is_dispatched_and_acknowledged() {
    let server = moonraker().await;
    Mock::given(method("POST"))
        .and(path("/printer/print/pause"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn StateStore> = store.clone();
    let bridge = Bridge::new(config_for(&server), shared).unwrap();
    bridge.start().await.unwrap();

    wait_until(|| store.is_subscribed("control.printPause")).await;
    store.request_write("control.printPause", StateValue::Bool(true));

    wait_until(|| {
        store
            .get("control.printPause")
            .is_some_and(|e| e.ack && e.value == Some(StateValue::Bool(true)))
    })
    .await;

    bridge.shutdown().await.unwrap();
}
