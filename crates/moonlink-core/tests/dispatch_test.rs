#![allow(clippy::unwrap_used)]
// Integration tests for `CommandDispatcher` against a mocked Moonraker.

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moonlink_api::{MoonrakerClient, TransportConfig};
use moonlink_core::{CommandDispatcher, DispatchOutcome, StateValue};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, CommandDispatcher) {
    let server = MockServer::start().await;
    let dispatcher = dispatcher_for(&server.uri());
    (server, dispatcher)
}

fn dispatcher_for(uri: &str) -> CommandDispatcher {
    let client = MoonrakerClient::new(Url::parse(uri).unwrap(), &TransportConfig::default()).unwrap();
    CommandDispatcher::new(client)
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "result": "ok" }))
}

fn pressed() -> StateValue {
    StateValue::Bool(true)
}

// ── Outcomes ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_button_press_is_sent() {
    let (server, dispatcher) = setup().await;

    Mock::given(method("POST"))
        .and(path("/printer/emergency_stop"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    let outcome = dispatcher
        .dispatch(None, "control.emergencyStop", &pressed())
        .await;
    assert_eq!(outcome, DispatchOutcome::Sent);
}

#[tokio::test]
async fn test_gcode_script_travels_as_query() {
    let (server, dispatcher) = setup().await;

    Mock::given(method("POST"))
        .and(path("/printer/gcode/script"))
        .and(query_param("script", "G28 X Y"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    let outcome = dispatcher
        .dispatch(None, "control.runGcode", &StateValue::Text("G28 X Y".into()))
        .await;
    assert_eq!(outcome, DispatchOutcome::Sent);
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let (server, dispatcher) = setup().await;

    Mock::given(method("POST"))
        .and(path("/machine/reboot"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ok())
        .expect(1)
        .mount(&server)
        .await;

    let token = SecretString::from("access-1".to_owned());
    let outcome = dispatcher
        .dispatch(Some(&token), "control.systemReboot", &pressed())
        .await;
    assert_eq!(outcome, DispatchOutcome::Sent);
}

#[tokio::test]
async fn test_error_envelope_is_rejected() {
    let (server, dispatcher) = setup().await;

    Mock::given(method("POST"))
        .and(path("/printer/print/resume"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "Print is not paused" }
        })))
        .mount(&server)
        .await;

    let outcome = dispatcher
        .dispatch(None, "control.printResume", &pressed())
        .await;
    match outcome {
        DispatchOutcome::Rejected { message } => assert!(message.contains("Print is not paused"), "{message}"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_ok_result_is_rejected() {
    let (server, dispatcher) = setup().await;

    Mock::given(method("POST"))
        .and(path("/server/restart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "busy" })))
        .mount(&server)
        .await;

    let outcome = dispatcher
        .dispatch(None, "control.restartServer", &pressed())
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Rejected {
            message: "busy".into()
        }
    );
}

#[tokio::test]
async fn test_unreachable_host_fails() {
    // Nothing listens on port 1.
    let dispatcher = dispatcher_for("http://127.0.0.1:1");
    let outcome = dispatcher
        .dispatch(None, "control.printCancel", &pressed())
        .await;
    assert!(matches!(outcome, DispatchOutcome::Failed { .. }), "{outcome:?}");
}

// ── Ignored writes ──────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_paths_and_released_buttons_make_no_call() {
    let (server, dispatcher) = setup().await;

    let outcome = dispatcher
        .dispatch(None, "extruder.target", &StateValue::Number(200.0))
        .await;
    assert_eq!(outcome, DispatchOutcome::Ignored);

    let outcome = dispatcher
        .dispatch(None, "control.printPause", &StateValue::Bool(false))
        .await;
    assert_eq!(outcome, DispatchOutcome::Ignored);

    assert!(server.received_requests().await.unwrap().is_empty());
}
