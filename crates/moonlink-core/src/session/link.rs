// ── Live link state machine ──
//
// One `Session` owns everything that lives for the duration of a bridge:
// the transport handle, the authorization, the correlator, the flattener
// caches, the liveness timers and the reconnect/login/refresh/poll timer
// slots. It consumes typed `LinkEvent`s from a single channel; every
// spawned HTTP call and every timer reports back through that channel, so
// all state changes happen on the session task.

use std::future::Future;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use moonlink_api::{
    Authorization, Error as ApiError, LoginTokens, MoonrakerClient, TransportEvent, WebSocketHandle,
};

use super::{ConnectionState, LinkNotice};
use crate::command::{CommandDispatcher, ControlCommand, DispatchOutcome};
use crate::config::{AuthSettings, BridgeConfig, TransportMode};
use crate::correlator::{Correlator, Inbound};
use crate::error::CoreError;
use crate::flatten::{FlattenOptions, FlattenReport, Flattener};
use crate::liveness::LivenessTracker;
use crate::store::{StateMeta, StateStore, StateValue, ValueType, WriteIntent};
use crate::timer::TimerSlot;

/// Connection indicator maintained by the session itself.
pub const CONNECTION_PATH: &str = "info.connection";

// ── Requests and notifications ───────────────────────────────────────

/// What a pending request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    PrinterInfo,
    ServerInfo,
    SpoolId,
    ObjectsList,
    ObjectsStatus,
    ObjectsSubscribe,
}

impl RequestKind {
    fn method(self) -> &'static str {
        match self {
            Self::PrinterInfo => "printer.info",
            Self::ServerInfo => "server.info",
            Self::SpoolId => "server.spoolman.get_spool_id",
            Self::ObjectsList => "printer.objects.list",
            Self::ObjectsStatus => "printer.objects.query",
            Self::ObjectsSubscribe => "printer.objects.subscribe",
        }
    }

    /// Request ids are fixed per kind; a repeat supersedes the older one.
    fn id(self) -> &'static str {
        match self {
            Self::SpoolId => "printer.spoolID",
            Self::ObjectsStatus => "printer.objects.status",
            other => other.method(),
        }
    }
}

/// Requests sent as soon as the link opens.
const BOOTSTRAP: [RequestKind; 4] = [
    RequestKind::PrinterInfo,
    RequestKind::ServerInfo,
    RequestKind::SpoolId,
    RequestKind::ObjectsList,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotificationKind {
    StatusUpdate,
    KlippyReady,
    KlippyShutdown,
    KlippyDisconnected,
}

// ── Events ───────────────────────────────────────────────────────────

/// Everything that can happen to a session.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Socket task report, stamped with the connection generation.
    Transport { generation: u64, event: TransportEvent },
    LoggedIn(Result<LoginTokens, ApiError>),
    OneShotIssued(Result<SecretString, ApiError>),
    Refreshed(Result<SecretString, ApiError>),
    /// Reply to a REST poll standing in for a socket request.
    Polled {
        generation: u64,
        id: String,
        result: Result<Value, ApiError>,
    },
    CommandFinished {
        path: String,
        value: StateValue,
        outcome: DispatchOutcome,
    },
    ReconnectDue(u64),
    LoginRetryDue(u64),
    RefreshDue(u64),
    PollDue(u64),
}

// ── Session ──────────────────────────────────────────────────────────

pub(crate) struct Session {
    config: BridgeConfig,
    store: Arc<dyn StateStore>,
    client: MoonrakerClient,
    dispatcher: CommandDispatcher,

    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    state: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<LinkNotice>,

    correlator: Correlator<RequestKind, NotificationKind>,
    flattener: Flattener,
    liveness: LivenessTracker,

    auth: Option<Authorization>,
    transport: Option<WebSocketHandle>,
    /// Bumped on every connect and teardown; events stamped with an older
    /// value belong to a link that no longer exists.
    generation: u64,
    /// The current link is usable (socket open, or HTTP polling active).
    linked: bool,
    /// `Synchronized` was already announced for the current link.
    synchronized: bool,
    controls_seeded: bool,
    objects: Vec<String>,

    reconnect: TimerSlot,
    login_retry: TimerSlot,
    refresh: TimerSlot,
    poll: TimerSlot,
}

impl Session {
    pub(crate) fn new(
        config: BridgeConfig,
        store: Arc<dyn StateStore>,
        state: watch::Sender<ConnectionState>,
        notices: broadcast::Sender<LinkNotice>,
    ) -> Result<Self, CoreError> {
        let client = MoonrakerClient::new(config.api_base_url()?, &config.transport_config())?;
        let dispatcher = CommandDispatcher::new(client.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut correlator = Correlator::new();
        correlator.on_notification("notify_status_update", NotificationKind::StatusUpdate);
        correlator.on_notification("notify_klippy_ready", NotificationKind::KlippyReady);
        correlator.on_notification("notify_klippy_shutdown", NotificationKind::KlippyShutdown);
        correlator.on_notification("notify_klippy_disconnected", NotificationKind::KlippyDisconnected);

        let flattener = Flattener::new(config.liveness_timeout());

        Ok(Self {
            config,
            store,
            client,
            dispatcher,
            events_tx,
            events_rx,
            state,
            notices,
            correlator,
            flattener,
            liveness: LivenessTracker::new(),
            auth: None,
            transport: None,
            generation: 0,
            linked: false,
            synchronized: false,
            controls_seeded: false,
            objects: Vec::new(),
            reconnect: TimerSlot::new(),
            login_retry: TimerSlot::new(),
            refresh: TimerSlot::new(),
            poll: TimerSlot::new(),
        })
    }

    /// Drive the session until `cancel` fires or a fatal error occurs.
    /// Always shuts down cleanly before returning.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), CoreError> {
        let mut intents = self.store.write_intents();
        let mut intents_open = true;
        self.prepare_store();
        self.begin_open();

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = self.handle(event) {
                        break Err(e);
                    }
                }
                expiry = self.liveness.next_expiry() => {
                    self.liveness.expire(&expiry, self.store.as_ref());
                }
                intent = intents.recv(), if intents_open => match intent {
                    Ok(intent) => self.on_intent(intent),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "write intents dropped, receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("write intent stream closed");
                        intents_open = false;
                    }
                },
            }
        };

        self.shutdown().await;
        outcome
    }

    /// Apply one event. Only a failed token refresh is fatal.
    pub(crate) fn handle(&mut self, event: LinkEvent) -> Result<(), CoreError> {
        match event {
            LinkEvent::Transport { generation, event } => {
                if generation == self.generation {
                    self.on_transport(event);
                } else {
                    debug!(generation, current = self.generation, "event from superseded link ignored");
                }
            }
            LinkEvent::LoggedIn(result) => self.on_logged_in(result),
            LinkEvent::OneShotIssued(result) => self.on_one_shot(result),
            LinkEvent::Refreshed(result) => return self.on_refreshed(result),
            LinkEvent::Polled { generation, id, result } => {
                if generation == self.generation && self.linked {
                    self.on_polled(&id, result);
                }
            }
            LinkEvent::CommandFinished { path, value, outcome } => {
                CommandDispatcher::acknowledge(self.store.as_ref(), &path, value, &outcome);
            }
            LinkEvent::ReconnectDue(epoch) => {
                if self.reconnect.accept(epoch) {
                    info!("trying to reconnect");
                    self.begin_open();
                }
            }
            LinkEvent::LoginRetryDue(epoch) => {
                if self.login_retry.accept(epoch) {
                    self.begin_open();
                }
            }
            LinkEvent::RefreshDue(epoch) => {
                if self.refresh.accept(epoch) {
                    self.refresh_access_token();
                }
            }
            LinkEvent::PollDue(epoch) => {
                if self.poll.accept(epoch) {
                    self.poll_once();
                }
            }
        }
        Ok(())
    }

    /// Cancel every timer, close the transport, then report `Closed`.
    pub(crate) async fn shutdown(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.reconnect.cancel();
        self.login_retry.cancel();
        self.refresh.cancel();
        self.poll.cancel();
        self.liveness.cancel_all();
        self.correlator.clear();
        self.linked = false;

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }

        self.store.write_value(CONNECTION_PATH, StateValue::Bool(false), true);
        self.set_state(ConnectionState::Disconnected);
        self.notify(LinkNotice::Closed {
            reason: "shutdown".into(),
        });
        info!("bridge stopped");
    }

    // ── Opening ──────────────────────────────────────────────────────

    fn prepare_store(&self) {
        self.store.ensure_channel("info", "Information");
        self.store.upsert_state(
            CONNECTION_PATH,
            &StateMeta {
                name: "If connected to Moonraker".into(),
                value_type: ValueType::Boolean,
                role: "indicator.connected".into(),
                unit: String::new(),
                readable: true,
                writable: false,
            },
        );
        self.store.write_value(CONNECTION_PATH, StateValue::Bool(false), true);
    }

    /// Run the open sequence: login if needed, one-shot token if needed,
    /// then the transport.
    fn begin_open(&mut self) {
        self.set_state(ConnectionState::Connecting);

        let credentials = match &self.config.auth {
            AuthSettings::Disabled => None,
            AuthSettings::Credentials { username, password } => Some((username.clone(), password.clone())),
        };
        let Some((username, password)) = credentials else {
            self.connect_transport(None);
            return;
        };

        if let Some(auth) = &self.auth {
            let access = auth.access_token.clone();
            self.request_one_shot(access);
            return;
        }

        debug!(user = %username, "logging in");
        let client = self.client.clone();
        self.spawn_reporting(async move { LinkEvent::LoggedIn(client.login(&username, &password).await) });
    }

    fn request_one_shot(&self, access: SecretString) {
        let client = self.client.clone();
        self.spawn_reporting(async move { LinkEvent::OneShotIssued(client.oneshot_token(&access).await) });
    }

    fn on_logged_in(&mut self, result: Result<LoginTokens, ApiError>) {
        match result {
            Ok(tokens) => {
                info!(user = tokens.username.as_deref().unwrap_or("-"), "authenticated with Moonraker");
                let access = tokens.token.clone();
                self.auth = Some(Authorization::from(tokens));
                self.refresh
                    .arm(self.config.token_refresh_interval, &self.events_tx, LinkEvent::RefreshDue);
                self.request_one_shot(access);
            }
            Err(e) => {
                error!(error = %e, "login failed");
                self.notify(LinkNotice::Error {
                    message: e.to_string(),
                });
                self.set_state(ConnectionState::Disconnected);
                info!(
                    retry_in_s = self.config.login_retry_delay.as_secs(),
                    "will try to log in again"
                );
                self.login_retry
                    .arm(self.config.login_retry_delay, &self.events_tx, LinkEvent::LoginRetryDue);
            }
        }
    }

    fn on_one_shot(&mut self, result: Result<SecretString, ApiError>) {
        match result {
            Ok(token) => {
                if let Some(auth) = self.auth.as_mut() {
                    auth.one_shot = Some(token.clone());
                }
                self.connect_transport(Some(&token));
            }
            Err(e) => {
                warn!(error = %e, "one-shot token request failed, authorization invalidated");
                self.auth = None;
                self.refresh.cancel();
                self.notify(LinkNotice::Error {
                    message: e.to_string(),
                });
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn connect_transport(&mut self, one_shot: Option<&SecretString>) {
        self.generation += 1;

        if self.config.transport == TransportMode::HttpPoll {
            self.linked = true;
            self.on_open();
            return;
        }

        let url = match self.config.websocket_url(one_shot.map(|token| token.expose_secret())) {
            Ok(url) => url,
            Err(e) => {
                self.on_failure(&e.to_string());
                return;
            }
        };

        let tx = self.events_tx.clone();
        let generation = self.generation;
        let sink = move |event: TransportEvent| {
            let _ = tx.send(LinkEvent::Transport { generation, event });
        };
        match WebSocketHandle::connect(url, &self.config.transport_config(), self.config.heartbeat, sink) {
            Ok(handle) => self.transport = Some(handle),
            Err(e) => self.on_failure(&e.to_string()),
        }
    }

    fn on_open(&mut self) {
        info!(host = %self.config.host, port = self.config.port, transport = %self.config.transport, "connected to Moonraker");
        self.synchronized = false;
        self.set_state(ConnectionState::Open);
        self.store.write_value(CONNECTION_PATH, StateValue::Bool(true), true);
        self.notify(LinkNotice::Opened);

        for kind in BOOTSTRAP {
            self.send_request(kind, None);
        }
        self.arm_poll();
    }

    // ── Closing ──────────────────────────────────────────────────────

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.linked = true;
                self.on_open();
            }
            TransportEvent::Frame(text) => {
                let inbound = self.correlator.on_frame(&text);
                self.on_inbound(inbound);
            }
            TransportEvent::Closed { reason } => {
                info!(reason = %reason, "connection closed");
                self.teardown();
                self.notify(LinkNotice::Closed { reason });
                self.schedule_reconnect();
            }
            TransportEvent::Failed(e) => self.on_failure(&e.to_string()),
        }
    }

    fn on_failure(&mut self, message: &str) {
        error!(error = message, "connection error");
        self.teardown();
        self.notify(LinkNotice::Error {
            message: message.to_owned(),
        });
        self.schedule_reconnect();
    }

    /// Forget the current link. Pending requests are dropped unresolved.
    fn teardown(&mut self) {
        self.generation += 1;
        self.linked = false;
        self.poll.cancel();
        self.correlator.clear();
        // Dropping the handle cancels the socket task.
        self.transport = None;
        self.store.write_value(CONNECTION_PATH, StateValue::Bool(false), true);
        self.set_state(ConnectionState::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        self.login_retry.cancel();
        info!(retry_in_s = self.config.reconnect_delay.as_secs(), "reconnect scheduled");
        self.reconnect
            .arm(self.config.reconnect_delay, &self.events_tx, LinkEvent::ReconnectDue);
    }

    // ── Requests ─────────────────────────────────────────────────────

    fn send_request(&mut self, kind: RequestKind, params: Option<Value>) {
        let request = self.correlator.request(kind.method(), params, kind.id(), kind);

        match self.config.transport {
            TransportMode::WebSocket => {
                let text = match request.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(method = kind.method(), error = %e, "request not encodable");
                        self.correlator.abandon(kind.id());
                        return;
                    }
                };
                let Some(transport) = &self.transport else {
                    debug!(method = kind.method(), "no transport, request left pending");
                    return;
                };
                if let Err(e) = transport.send(text) {
                    warn!(method = kind.method(), error = %e, "request not sent");
                }
            }
            TransportMode::HttpPoll => {
                let Some(path) = request.rest_path() else {
                    debug!(method = kind.method(), "no REST equivalent, request skipped");
                    self.correlator.abandon(kind.id());
                    return;
                };
                let client = self.client.clone();
                let bearer = self.bearer();
                let generation = self.generation;
                let id = kind.id().to_owned();
                self.spawn_reporting(async move {
                    let result = client.get_result(&path, bearer.as_ref()).await;
                    LinkEvent::Polled { generation, id, result }
                });
            }
        }
    }

    fn on_polled(&mut self, id: &str, result: Result<Value, ApiError>) {
        match result {
            Ok(value) => {
                let inbound = self.correlator.resolve(id, value);
                self.on_inbound(inbound);
            }
            Err(e) if e.is_transport() => self.on_failure(&e.to_string()),
            Err(e) => {
                warn!(id, error = %e, "poll request failed");
                self.correlator.abandon(id);
            }
        }
    }

    fn arm_poll(&mut self) {
        self.poll.arm(self.config.poll_interval, &self.events_tx, LinkEvent::PollDue);
    }

    fn poll_once(&mut self) {
        if !self.linked {
            return;
        }
        self.send_request(RequestKind::ServerInfo, None);
        if self.config.transport == TransportMode::HttpPoll {
            if self.objects.is_empty() {
                self.send_request(RequestKind::ObjectsList, None);
            } else {
                let params = self.objects_params();
                self.send_request(RequestKind::ObjectsStatus, Some(params));
            }
        }
        self.arm_poll();
    }

    fn objects_params(&self) -> Value {
        let objects: Map<String, Value> = self
            .objects
            .iter()
            .map(|name| (name.clone(), Value::Null))
            .collect();
        json!({ "objects": objects })
    }

    // ── Inbound ──────────────────────────────────────────────────────

    fn on_inbound(&mut self, inbound: Inbound<RequestKind, NotificationKind>) {
        match inbound {
            Inbound::Response {
                resolver,
                result,
                latency,
            } => {
                debug!(request = ?resolver, ?latency, "response received");
                self.on_response(resolver, &result);
            }
            Inbound::Notification { handler, params } => self.on_notification(handler, &params),
            Inbound::RpcError {
                resolver: Some(kind), ..
            } => debug!(request = ?kind, "request answered with an error"),
            Inbound::RpcError { .. } | Inbound::Unexpected | Inbound::Malformed => {}
        }
    }

    fn on_response(&mut self, kind: RequestKind, result: &Value) {
        match kind {
            RequestKind::PrinterInfo => {
                self.flatten(result);
                CommandDispatcher::provision(self.store.as_ref());
                if !self.controls_seeded {
                    CommandDispatcher::seed(self.store.as_ref());
                    self.controls_seeded = true;
                }
            }
            RequestKind::ServerInfo | RequestKind::SpoolId => {
                self.flatten(result);
            }
            RequestKind::ObjectsList => {
                self.objects = result
                    .get("objects")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                debug!(objects = self.objects.len(), "printer objects listed");
                if self.objects.is_empty() {
                    return;
                }
                let params = self.objects_params();
                self.send_request(RequestKind::ObjectsStatus, Some(params.clone()));
                self.send_request(RequestKind::ObjectsSubscribe, Some(params));
            }
            RequestKind::ObjectsStatus | RequestKind::ObjectsSubscribe => {
                if let Some(status) = result.get("status") {
                    let report = self.flatten(status);
                    debug!(
                        leaves = report.leaves,
                        changed = report.values_changed,
                        "object status applied"
                    );
                }
                if kind == RequestKind::ObjectsStatus && !self.synchronized {
                    self.synchronized = true;
                    self.notify(LinkNotice::Synchronized);
                }
            }
        }
    }

    fn on_notification(&mut self, kind: NotificationKind, params: &Value) {
        match kind {
            NotificationKind::StatusUpdate => {
                // `[{object: fields, ...}, eventtime]`; only objects flatten.
                if let Value::Array(items) = params {
                    for item in items {
                        self.flatten(item);
                    }
                }
            }
            NotificationKind::KlippyReady => {
                info!("klippy ready");
                self.send_request(RequestKind::ServerInfo, None);
                self.send_request(RequestKind::ObjectsList, None);
            }
            NotificationKind::KlippyShutdown | NotificationKind::KlippyDisconnected => {
                warn!(notification = ?kind, "klippy went away");
                self.send_request(RequestKind::ServerInfo, None);
            }
        }
    }

    fn flatten(&mut self, node: &Value) -> FlattenReport {
        self.flattener.flatten(
            self.store.as_ref(),
            &mut self.liveness,
            node,
            None,
            FlattenOptions::default(),
        )
    }

    // ── Authorization refresh ────────────────────────────────────────

    fn refresh_access_token(&self) {
        let Some(auth) = &self.auth else {
            return;
        };
        let client = self.client.clone();
        let refresh = auth.refresh_token.clone();
        self.spawn_reporting(async move { LinkEvent::Refreshed(client.refresh_access_token(&refresh).await) });
    }

    fn on_refreshed(&mut self, result: Result<SecretString, ApiError>) -> Result<(), CoreError> {
        match result {
            Ok(token) => {
                if let Some(auth) = self.auth.as_mut() {
                    auth.access_token = token;
                    debug!("access token refreshed");
                    self.refresh
                        .arm(self.config.token_refresh_interval, &self.events_tx, LinkEvent::RefreshDue);
                }
                Ok(())
            }
            Err(e) if self.auth.is_none() => {
                debug!(error = %e, "refresh for a discarded authorization failed, ignored");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "access token refresh failed, restarting");
                self.notify(LinkNotice::Error {
                    message: e.to_string(),
                });
                Err(CoreError::RestartRequired {
                    reason: format!("token refresh failed: {e}"),
                })
            }
        }
    }

    // ── Write intents ────────────────────────────────────────────────

    fn on_intent(&self, intent: WriteIntent) {
        if ControlCommand::from_path(&intent.path).is_none() {
            debug!(path = %intent.path, "write intent on non-control path ignored");
            return;
        }
        let dispatcher = self.dispatcher.clone();
        let bearer = self.bearer();
        self.spawn_reporting(async move {
            let outcome = dispatcher.dispatch(bearer.as_ref(), &intent.path, &intent.value).await;
            LinkEvent::CommandFinished {
                path: intent.path,
                value: intent.value,
                outcome,
            }
        });
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn bearer(&self) -> Option<SecretString> {
        self.auth.as_ref().map(|a| a.access_token.clone())
    }

    fn spawn_reporting<F>(&self, task: F)
    where
        F: Future<Output = LinkEvent> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn notify(&self, notice: LinkNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;

    struct Harness {
        session: Session,
        store: Arc<MemoryStore>,
        notices: broadcast::Receiver<LinkNotice>,
        state: watch::Receiver<ConnectionState>,
    }

    fn harness(config: BridgeConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (notice_tx, notices) = broadcast::channel(32);
        let shared: Arc<dyn StateStore> = store.clone();
        let session = Session::new(config, shared, state_tx, notice_tx).unwrap();
        Harness {
            session,
            store,
            notices,
            state,
        }
    }

    /// A session whose socket just opened, without a real socket.
    fn opened() -> Harness {
        let mut h = harness(BridgeConfig::default());
        h.session.prepare_store();
        h.session.generation = 1;
        h.session.handle(transport(1, TransportEvent::Opened)).unwrap();
        h
    }

    fn transport(generation: u64, event: TransportEvent) -> LinkEvent {
        LinkEvent::Transport { generation, event }
    }

    fn frame(h: &mut Harness, text: &str) {
        let generation = h.session.generation;
        h.session
            .handle(transport(generation, TransportEvent::Frame(text.to_owned())))
            .unwrap();
    }

    fn drain(notices: &mut broadcast::Receiver<LinkNotice>) -> Vec<LinkNotice> {
        std::iter::from_fn(|| notices.try_recv().ok()).collect()
    }

    fn with_credentials() -> BridgeConfig {
        BridgeConfig {
            auth: AuthSettings::Credentials {
                username: "maker".into(),
                password: SecretString::from("hunter2".to_owned()),
            },
            ..BridgeConfig::default()
        }
    }

    fn authorization() -> Authorization {
        Authorization {
            access_token: SecretString::from("access".to_owned()),
            refresh_token: SecretString::from("refresh".to_owned()),
            one_shot: None,
        }
    }

    #[tokio::test]
    async fn open_sends_bootstrap_requests() {
        let mut h = opened();
        assert_eq!(*h.state.borrow(), ConnectionState::Open);
        assert_eq!(drain(&mut h.notices), vec![LinkNotice::Opened]);
        assert_eq!(h.store.get(CONNECTION_PATH).unwrap().value, Some(StateValue::Bool(true)));
        for id in ["printer.info", "server.info", "printer.spoolID", "printer.objects.list"] {
            assert!(h.session.correlator.is_pending(id), "{id}");
        }
        assert!(h.session.poll.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn close_drops_pending_and_schedules_one_reconnect() {
        let mut h = opened();
        assert_eq!(h.session.correlator.pending_len(), 4);

        h.session
            .handle(transport(1, TransportEvent::Closed { reason: "bye".into() }))
            .unwrap();
        assert_eq!(h.session.correlator.pending_len(), 0);
        assert!(h.session.reconnect.is_armed());
        assert!(!h.session.poll.is_armed());
        assert_eq!(*h.state.borrow(), ConnectionState::Disconnected);
        assert_eq!(h.store.get(CONNECTION_PATH).unwrap().value, Some(StateValue::Bool(false)));

        // A late failure from the same socket no longer counts.
        h.session
            .handle(transport(
                1,
                TransportEvent::Failed(ApiError::WebSocketConnect("reset".into())),
            ))
            .unwrap();

        tokio::time::sleep(h.session.config.reconnect_delay + Duration::from_millis(1)).await;
        let due = h.session.events_rx.try_recv().unwrap();
        assert!(matches!(due, LinkEvent::ReconnectDue(_)));
        assert!(h.session.events_rx.try_recv().is_err(), "exactly one reconnect");
    }

    #[tokio::test]
    async fn events_from_superseded_link_are_ignored() {
        let mut h = opened();
        h.session.generation = 2;
        h.session
            .handle(transport(1, TransportEvent::Closed { reason: "old".into() }))
            .unwrap();
        assert!(!h.session.reconnect.is_armed());
        assert_eq!(*h.state.borrow(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn printer_info_provisions_controls() {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"printer.info","result":{"state":"ready","hostname":"voron"}}"#,
        );

        assert_eq!(h.store.get("state").unwrap().value, Some(StateValue::Text("ready".into())));
        let stop = h.store.get("control.emergencyStop").unwrap();
        assert_eq!(stop.value, Some(StateValue::Bool(false)));
        assert!(h.store.is_subscribed("control.runGcode"));
    }

    #[tokio::test]
    async fn object_list_leads_to_status_and_subscription() {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"printer.objects.list","result":{"objects":["extruder","heater_bed"]}}"#,
        );
        assert!(h.session.correlator.is_pending("printer.objects.status"));
        assert!(h.session.correlator.is_pending("printer.objects.subscribe"));
        drain(&mut h.notices);

        let status = r#"{"jsonrpc":"2.0","id":"printer.objects.status","result":{"eventtime":1.0,"status":{"extruder":{"temperature":210.04}}}}"#;
        frame(&mut h, status);
        assert_eq!(
            h.store.get("extruder.temperature").unwrap().value,
            Some(StateValue::Number(210.0))
        );
        assert_eq!(drain(&mut h.notices), vec![LinkNotice::Synchronized]);

        // Announced once per link.
        h.session.send_request(RequestKind::ObjectsStatus, None);
        frame(&mut h, status);
        assert!(drain(&mut h.notices).is_empty());
    }

    #[tokio::test]
    async fn status_notifications_flatten_every_object() {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{"extruder":{"target":215},"fan":{"speed":0.5}},12.3]}"#,
        );
        assert_eq!(h.store.get("extruder.target").unwrap().value, Some(StateValue::Number(215.0)));
        assert_eq!(h.store.get("fan.speed").unwrap().value, Some(StateValue::Number(0.5)));
    }

    #[tokio::test]
    async fn error_replies_keep_the_link_open() {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"printer.spoolID","error":{"code":-32601,"message":"Method not found"}}"#,
        );
        frame(&mut h, "garbage");
        assert!(!h.session.correlator.is_pending("printer.spoolID"));
        assert_eq!(*h.state.borrow(), ConnectionState::Open);
        assert!(!h.session.reconnect.is_armed());
    }

    /// Fire the poll slot the way its timer would.
    fn poll_due(h: &mut Harness) {
        let epoch = h
            .session
            .poll
            .arm(Duration::from_secs(60), &h.session.events_tx, LinkEvent::PollDue);
        h.session.handle(LinkEvent::PollDue(epoch)).unwrap();
    }

    #[tokio::test]
    async fn poll_requeries_server_info_and_rearms() {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"server.info","result":{"klippy_connected":true}}"#,
        );
        assert!(!h.session.correlator.is_pending("server.info"));

        poll_due(&mut h);
        assert!(h.session.correlator.is_pending("server.info"));
        assert!(!h.session.correlator.is_pending("printer.objects.status"));
        assert!(h.session.poll.is_armed());
    }

    #[tokio::test]
    async fn http_poll_also_requeries_object_status() {
        let mut h = harness(BridgeConfig {
            transport: TransportMode::HttpPoll,
            ..BridgeConfig::default()
        });
        h.session.linked = true;
        h.session.objects = vec!["extruder".into(), "heater_bed".into()];

        poll_due(&mut h);
        assert!(h.session.correlator.is_pending("server.info"));
        assert!(h.session.correlator.is_pending("printer.objects.status"));
        assert!(h.session.poll.is_armed());
    }

    #[tokio::test]
    async fn poll_is_skipped_without_a_link() {
        let mut h = harness(BridgeConfig::default());
        poll_due(&mut h);
        assert_eq!(h.session.correlator.pending_len(), 0);
        assert!(!h.session.poll.is_armed());
    }

    /// An open session with the bootstrap replies already answered.
    fn settled() -> Harness {
        let mut h = opened();
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"server.info","result":{"klippy_connected":true}}"#,
        );
        frame(
            &mut h,
            r#"{"jsonrpc":"2.0","id":"printer.objects.list","result":{"objects":[]}}"#,
        );
        assert!(!h.session.correlator.is_pending("server.info"));
        assert!(!h.session.correlator.is_pending("printer.objects.list"));
        h
    }

    #[tokio::test]
    async fn klippy_ready_relists_objects() {
        let mut h = settled();
        frame(&mut h, r#"{"jsonrpc":"2.0","method":"notify_klippy_ready"}"#);
        assert!(h.session.correlator.is_pending("server.info"));
        assert!(h.session.correlator.is_pending("printer.objects.list"));
    }

    #[tokio::test]
    async fn klippy_shutdown_and_disconnect_requery_server_info() {
        for method in ["notify_klippy_shutdown", "notify_klippy_disconnected"] {
            let mut h = settled();
            frame(&mut h, &format!(r#"{{"jsonrpc":"2.0","method":"{method}"}}"#));
            assert!(h.session.correlator.is_pending("server.info"), "{method}");
            assert!(!h.session.correlator.is_pending("printer.objects.list"), "{method}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_failure_schedules_retry() {
        let mut h = harness(with_credentials());
        h.session
            .handle(LinkEvent::LoggedIn(Err(ApiError::Authentication {
                message: "bad password".into(),
            })))
            .unwrap();
        assert!(h.session.login_retry.is_armed());
        assert!(!h.session.reconnect.is_armed());
        assert!(h.session.transport.is_none());
        assert_eq!(*h.state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn login_success_arms_refresh() {
        let mut h = harness(with_credentials());
        h.session
            .handle(LinkEvent::LoggedIn(Ok(LoginTokens {
                username: Some("maker".into()),
                token: SecretString::from("access".to_owned()),
                refresh_token: SecretString::from("refresh".to_owned()),
            })))
            .unwrap();
        assert!(h.session.auth.is_some());
        assert!(h.session.refresh.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_failure_invalidates_authorization() {
        let mut h = harness(with_credentials());
        h.session.auth = Some(authorization());
        h.session
            .handle(LinkEvent::OneShotIssued(Err(ApiError::Authentication {
                message: "expired".into(),
            })))
            .unwrap();
        assert!(h.session.auth.is_none());
        assert!(h.session.reconnect.is_armed());
        assert!(!h.session.refresh.is_armed());
    }

    #[tokio::test]
    async fn one_shot_token_is_kept_on_the_authorization() {
        let mut h = harness(with_credentials());
        h.session.auth = Some(authorization());
        h.session
            .handle(LinkEvent::OneShotIssued(Ok(SecretString::from("ticket".to_owned()))))
            .unwrap();
        let auth = h.session.auth.as_ref().unwrap();
        assert_eq!(auth.one_shot.as_ref().unwrap().expose_secret(), "ticket");
        assert!(h.session.transport.is_some());
    }

    #[tokio::test]
    async fn refresh_failure_after_invalidation_is_ignored() {
        let mut h = harness(with_credentials());
        assert!(h.session.auth.is_none());
        h.session
            .handle(LinkEvent::Refreshed(Err(ApiError::Authentication {
                message: "refresh token revoked".into(),
            })))
            .unwrap();
        assert!(h.session.auth.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_requires_restart() {
        let mut h = harness(with_credentials());
        h.session.auth = Some(authorization());
        let err = h
            .session
            .handle(LinkEvent::Refreshed(Err(ApiError::Authentication {
                message: "refresh token revoked".into(),
            })))
            .unwrap_err();
        assert!(matches!(err, CoreError::RestartRequired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_success_replaces_access_token() {
        let mut h = harness(with_credentials());
        h.session.auth = Some(authorization());
        h.session
            .handle(LinkEvent::Refreshed(Ok(SecretString::from("fresh".to_owned()))))
            .unwrap();
        let auth = h.session.auth.as_ref().unwrap();
        assert_eq!(auth.access_token.expose_secret(), "fresh");
        assert!(h.session.refresh.is_armed());
    }

    #[tokio::test]
    async fn command_outcome_acknowledges_on_success() {
        let mut h = opened();
        h.store.request_write("control.printPause", StateValue::Bool(true));
        h.session
            .handle(LinkEvent::CommandFinished {
                path: "control.printPause".into(),
                value: StateValue::Bool(true),
                outcome: DispatchOutcome::Sent,
            })
            .unwrap();
        assert!(h.store.get("control.printPause").unwrap().ack);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything_then_reports_closed() {
        let mut h = opened();
        h.session.schedule_reconnect();
        h.session
            .liveness
            .arm("klippy_connected", Duration::from_secs(5), StateValue::Bool(false));
        drain(&mut h.notices);

        h.session.shutdown().await;
        assert!(!h.session.reconnect.is_armed());
        assert!(!h.session.poll.is_armed());
        assert!(!h.session.liveness.is_armed("klippy_connected"));
        assert_eq!(h.session.correlator.pending_len(), 0);
        assert_eq!(*h.state.borrow(), ConnectionState::Disconnected);
        assert_eq!(
            drain(&mut h.notices),
            vec![LinkNotice::Closed {
                reason: "shutdown".into()
            }]
        );
    }
}
