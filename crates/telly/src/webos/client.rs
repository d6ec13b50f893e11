//! The protocol client.
//!
//! [`TvClient`] owns one logical session with one TV. All session state lives
//! in a single mutex-guarded [`Session`]; the connect path and the receive task
//! both mutate it under that lock and never hold it across an await. Semantic
//! changes are reported on an unbounded [`ClientEvent`] channel.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::commands::TvCommand;
use super::connection::ConnectionState;
use super::connection::Endpoint;
use super::connection::TransportKind;
use super::error::ClientError;
use super::inputs::ForegroundSource;
use super::inputs::SoundOutput;
use super::inputs::TvInput;
use super::link::Connector;
use super::link::FrameReceiver;
use super::link::FrameSender;
use super::link::Link;
use super::protocol;
use super::protocol::Inbound;
use super::protocol::MessageType;
use super::protocol::PayloadFields;
use super::protocol::RequestKind;
use crate::device::TvConfiguration;
use crate::store::KeyStore;

pub const SECURE_PORT: u16 = 3001;
pub const PLAIN_PORT: u16 = 3000;

/// Timeouts and ports used by the client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Bound on opening the socket plus registration, per transport.
    pub connect_timeout: Duration,
    /// Bound on waiting for a correlated response.
    pub request_timeout: Duration,
    pub secure_port: u16,
    pub plain_port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            secure_port: SECURE_PORT,
            plain_port: PLAIN_PORT,
        }
    }
}

/// Best-effort view of what the TV can do, rebuilt from pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TvCapabilities {
    /// Transport the current session runs over.
    pub transport: Option<TransportKind>,
    /// Icon per input, as reported by the input list.
    pub input_icons: HashMap<TvInput, String>,
}

impl TvCapabilities {
    /// Whether the TV already labels `input` as a PC.
    pub fn is_pc_mode(&self, input: TvInput) -> Option<bool> {
        self.input_icons
            .get(&input)
            .map(|icon| icon.to_ascii_lowercase().contains("pc"))
    }
}

/// Everything the client currently knows about the TV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TvSnapshot {
    pub connection: ConnectionState,
    /// `None` until the TV reports what it is showing.
    pub foreground: Option<ForegroundSource>,
    pub volume: Option<u8>,
    pub muted: Option<bool>,
    pub sound_output: SoundOutput,
    pub capabilities: TvCapabilities,
}

/// Typed notifications from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    VolumeChanged { volume: u8, muted: Option<bool> },
    InputChanged(Option<ForegroundSource>),
    SoundOutputChanged(SoundOutput),
    CapabilitiesChanged(TvCapabilities),
    /// Every raw inbound frame, tagged with its declared type.
    Captured { kind: String, raw: String },
}

pub type ClientEventSender = mpsc::UnboundedSender<ClientEvent>;
pub type ClientEventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

type Reply = oneshot::Sender<Result<PayloadFields, ClientError>>;
type Response = oneshot::Receiver<Result<PayloadFields, ClientError>>;

struct PendingRequest {
    uri: &'static str,
    reply: Reply,
}

#[derive(Default)]
struct Session {
    state: ConnectionState,
    registered: bool,
    /// Bumped by every connect and disconnect; stale work compares against it.
    generation: u64,
    outgoing: Option<FrameSender>,
    tasks: Vec<JoinHandle<()>>,
    pending: HashMap<String, PendingRequest>,
    foreground: Option<ForegroundSource>,
    volume: Option<u8>,
    muted: Option<bool>,
    sound_output: SoundOutput,
    capabilities: TvCapabilities,
}

struct Inner {
    connector: Arc<dyn Connector>,
    keys: Arc<dyn KeyStore>,
    events: ClientEventSender,
    options: ClientOptions,
    next_id: AtomicU64,
    session: Mutex<Session>,
}

/// Client for the TV's SSAP WebSocket API. Cheap to clone; clones share the
/// session.
#[derive(Clone)]
pub struct TvClient {
    inner: Arc<Inner>,
}

impl TvClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        keys: Arc<dyn KeyStore>,
        options: ClientOptions,
    ) -> (Self, ClientEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let client = Self {
            inner: Arc::new(Inner {
                connector,
                keys,
                events,
                options,
                next_id: AtomicU64::new(1),
                session: Mutex::new(Session::default()),
            }),
        };
        (client, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    pub fn snapshot(&self) -> TvSnapshot {
        let s = self.inner.lock();
        TvSnapshot {
            connection: s.state.clone(),
            foreground: s.foreground.clone(),
            volume: s.volume,
            muted: s.muted,
            sound_output: s.sound_output,
            capabilities: s.capabilities.clone(),
        }
    }

    /// Connect and register, trying the secure transport first and the plain
    /// one second.
    ///
    /// Returns `Ok` without doing anything if a session is already live or
    /// being set up. Only transport failures and timeouts move on to the plain
    /// transport; a rejected registration is returned as is. Fails with the
    /// last attempt's error if both transports fail, or with
    /// `ConnectionClosed` if `disconnect` is called meanwhile.
    pub async fn connect(&self, config: &TvConfiguration) -> Result<(), ClientError> {
        let generation = {
            let mut s = self.inner.lock();
            if s.state.is_busy() {
                warn!(address = %config.ip_address, state = %s.state, "connect ignored, session already active");
                return Ok(());
            }
            s.generation += 1;
            self.inner.set_state(&mut s, ConnectionState::Connecting);
            s.generation
        };

        let address = config.key_address();
        let stored_key = match self.inner.keys.load_key(&address) {
            Ok(key) => key,
            Err(e) => {
                warn!(address = %address, error = %e, "failed to load pairing key, pairing from scratch");
                None
            }
        };

        let host = config.ip_address.to_string();
        let endpoints = [
            Endpoint::new(TransportKind::Secure, host.clone(), self.inner.options.secure_port),
            Endpoint::new(TransportKind::Plain, host, self.inner.options.plain_port),
        ];

        let mut last_error = ClientError::NotConnected;
        for endpoint in endpoints {
            let cancelled = self.inner.lock().generation != generation;
            if cancelled {
                debug!(address = %address, "connect cancelled");
                return Err(ClientError::ConnectionClosed);
            }

            match self.attempt(&endpoint, stored_key.as_deref()).await {
                Ok((link, issued_key)) => {
                    if let Some(key) = issued_key.filter(|k| Some(k) != stored_key.as_ref()) {
                        match self.inner.keys.save_key(&address, &key) {
                            Ok(()) => info!(address = %address, "stored new pairing key"),
                            Err(e) => warn!(address = %address, error = %e, "failed to store pairing key"),
                        }
                    }
                    return self.establish(generation, link);
                }
                Err(e) if e.allows_fallback() => {
                    warn!(address = %address, endpoint = %endpoint, error = %e, "connect attempt failed");
                    last_error = e;
                }
                Err(e) => {
                    warn!(address = %address, endpoint = %endpoint, error = %e, "connect rejected");
                    last_error = e;
                    break;
                }
            }
        }

        let mut s = self.inner.lock();
        if s.generation == generation {
            self.inner.set_state(&mut s, ConnectionState::Disconnected);
        }
        Err(last_error)
    }

    /// Open one transport and register over it, within one shared deadline.
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        client_key: Option<&str>,
    ) -> Result<(Link, Option<String>), ClientError> {
        let limit = self.inner.options.connect_timeout;
        let started = Instant::now();
        let deadline = started + limit;
        debug!(endpoint = %endpoint, paired = client_key.is_some(), "opening transport");

        let mut link = match timeout_at(deadline, self.inner.connector.open(endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClientError::transport(
                    endpoint,
                    format!("timed out after {:?}", limit),
                ))
            }
        };

        let register_id = self.inner.next_id();
        link.send(protocol::encode_register(&register_id, client_key))?;

        match timeout_at(deadline, self.await_registration(&mut link, &register_id)).await {
            Ok(result) => result.map(|key| (link, key)),
            Err(_) => Err(ClientError::HandshakeTimeout {
                endpoint: endpoint.to_string(),
                elapsed: started.elapsed(),
            }),
        }
    }

    async fn await_registration(
        &self,
        link: &mut Link,
        register_id: &str,
    ) -> Result<Option<String>, ClientError> {
        loop {
            let raw = match link.recv().await {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ClientError::transport(
                        link.endpoint(),
                        "closed during registration",
                    ))
                }
            };

            let msg = match protocol::decode(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(endpoint = %link.endpoint(), error = %e, "ignoring undecodable frame");
                    continue;
                }
            };
            self.inner.capture(&msg, raw);

            match msg.kind {
                MessageType::Registered => return Ok(msg.fields.client_key),
                MessageType::Error if msg.id.as_deref() == Some(register_id) => {
                    return Err(ClientError::CommandFailed {
                        uri: "register".to_string(),
                        message: msg.failure().unwrap_or_default(),
                    });
                }
                MessageType::Response if msg.fields.pairing_type.as_deref() == Some("PROMPT") => {
                    info!(endpoint = %link.endpoint(), "waiting for the pairing prompt to be accepted on the TV");
                }
                _ => debug!(endpoint = %link.endpoint(), kind = msg.kind.as_str(), "frame during registration"),
            }
        }
    }

    /// Install a registered link as the live session.
    fn establish(&self, generation: u64, link: Link) -> Result<(), ClientError> {
        let parts = link.into_parts().ok_or(ClientError::ConnectionClosed)?;

        {
            let mut s = self.inner.lock();
            if s.generation != generation {
                if let Some(pump) = parts.pump {
                    pump.abort();
                }
                debug!(endpoint = %parts.endpoint, "connect cancelled after registration");
                return Err(ClientError::ConnectionClosed);
            }

            let reader = tokio::spawn(read_loop(
                Arc::downgrade(&self.inner),
                generation,
                parts.incoming,
            ));
            s.outgoing = Some(parts.outgoing);
            s.tasks.extend(parts.pump);
            s.tasks.push(reader);
            s.registered = true;
            s.capabilities.transport = Some(parts.endpoint.kind);
            self.inner
                .emit(ClientEvent::CapabilitiesChanged(s.capabilities.clone()));
            self.inner.set_state(&mut s, ConnectionState::Connected);
        }
        info!(endpoint = %parts.endpoint, "connected");

        self.bootstrap();
        Ok(())
    }

    /// Populate input, capability and volume state without being asked.
    ///
    /// Frames go out in order before this returns; the one-shot queries are
    /// then awaited on their own tasks through the pending table.
    fn bootstrap(&self) {
        let steps = [
            (RequestKind::Subscribe, TvCommand::GetForegroundApp),
            (RequestKind::Request, TvCommand::GetForegroundApp),
            (RequestKind::Request, TvCommand::GetInputList),
            (RequestKind::Subscribe, TvCommand::GetVolume),
        ];
        for (kind, command) in steps {
            let uri = command.uri();
            let sent = match kind {
                RequestKind::Subscribe => self.dispatch(kind, &command).map(|_| ()),
                RequestKind::Request => self.start_request(&command).map(|(id, response)| {
                    let client = self.clone();
                    tokio::spawn(async move {
                        match client.await_response(id, &command, response).await {
                            Ok(_) => debug!(uri, "bootstrap query answered"),
                            Err(ClientError::ConnectionClosed) => {}
                            Err(e) => warn!(uri, error = %e, "bootstrap query failed"),
                        }
                    });
                }),
            };
            if let Err(e) = sent {
                warn!(uri, error = %e, "bootstrap request failed");
            }
        }
    }

    /// Send a command without waiting for the reply.
    pub fn send_command(&self, command: TvCommand) -> Result<(), ClientError> {
        self.dispatch(RequestKind::Request, &command).map(|_| ())
    }

    /// Subscribe to changes of the value `command` reads.
    pub fn subscribe(&self, command: TvCommand) -> Result<(), ClientError> {
        self.dispatch(RequestKind::Subscribe, &command).map(|_| ())
    }

    /// Send a command and wait for its correlated response.
    pub async fn request(&self, command: TvCommand) -> Result<PayloadFields, ClientError> {
        let (id, response) = self.start_request(&command)?;
        self.await_response(id, &command, response).await
    }

    /// Register a pending entry for `command` and send it.
    fn start_request(&self, command: &TvCommand) -> Result<(String, Response), ClientError> {
        let (reply, response) = oneshot::channel();
        let mut s = self.inner.lock();
        let outgoing = live_sender(&s)?.clone();
        let id = self.inner.next_id();
        s.pending.insert(
            id.clone(),
            PendingRequest {
                uri: command.uri(),
                reply,
            },
        );
        let frame = protocol::encode_request(&id, RequestKind::Request, command);
        if outgoing.send(frame).is_err() {
            s.pending.remove(&id);
            return Err(ClientError::ConnectionClosed);
        }
        debug!(id = %id, uri = command.uri(), "request sent");
        Ok((id, response))
    }

    async fn await_response(
        &self,
        id: String,
        command: &TvCommand,
        response: Response,
    ) -> Result<PayloadFields, ClientError> {
        let limit = self.inner.options.request_timeout;
        match timeout(limit, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.inner.lock().pending.remove(&id);
                warn!(id = %id, uri = command.uri(), "request timed out");
                Err(ClientError::CommandFailed {
                    uri: command.uri().to_string(),
                    message: format!("no response after {:?}", limit),
                })
            }
        }
    }

    fn dispatch(&self, kind: RequestKind, command: &TvCommand) -> Result<String, ClientError> {
        let s = self.inner.lock();
        let outgoing = live_sender(&s)?;
        let id = self.inner.next_id();
        outgoing
            .send(protocol::encode_request(&id, kind, command))
            .map_err(|_| ClientError::ConnectionClosed)?;
        debug!(id = %id, uri = command.uri(), ?kind, "sent");
        Ok(id)
    }

    /// Tear the session down. Idempotent.
    ///
    /// Cancels an in-flight connect, stops the socket, and fails every pending
    /// request with `ConnectionClosed`.
    pub fn disconnect(&self) {
        let mut s = self.inner.lock();
        s.generation += 1;
        for task in s.tasks.drain(..) {
            task.abort();
        }
        if s.state != ConnectionState::Disconnected {
            info!(state = %s.state, "disconnecting");
        }
        self.inner.teardown(&mut s);
        self.inner.set_state(&mut s, ConnectionState::Disconnected);
    }
}

fn live_sender(s: &Session) -> Result<&FrameSender, ClientError> {
    if !(s.state.is_connected() && s.registered) {
        return Err(ClientError::NotConnected);
    }
    s.outgoing.as_ref().ok_or(ClientError::NotConnected)
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn capture(&self, msg: &Inbound, raw: String) {
        self.emit(ClientEvent::Captured {
            kind: msg.kind.as_str().to_string(),
            raw,
        });
    }

    fn set_state(&self, s: &mut Session, state: ConnectionState) {
        if s.state == state {
            return;
        }
        debug!(from = %s.state, to = %state, "connection state changed");
        s.state = state.clone();
        self.emit(ClientEvent::StateChanged(state));
    }

    fn teardown(&self, s: &mut Session) {
        s.outgoing = None;
        s.registered = false;
        s.capabilities.transport = None;
        for (id, pending) in s.pending.drain() {
            debug!(id = %id, uri = pending.uri, "failing pending request");
            let _ = pending.reply.send(Err(ClientError::ConnectionClosed));
        }
    }

    fn handle_frame(&self, generation: u64, raw: String) {
        let msg = match protocol::decode(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        let mut s = self.lock();
        if s.generation != generation {
            return;
        }
        self.capture(&msg, raw);

        if matches!(msg.kind, MessageType::Response | MessageType::Push) {
            self.apply_fields(&mut s, &msg.fields);
        }

        let Some(id) = msg.id.as_deref() else {
            return;
        };
        match s.pending.remove(id) {
            Some(pending) => {
                let result = match msg.failure() {
                    Some(message) => Err(ClientError::CommandFailed {
                        uri: pending.uri.to_string(),
                        message,
                    }),
                    None => Ok(msg.fields.clone()),
                };
                let _ = pending.reply.send(result);
            }
            None => {
                if let Some(message) = msg.failure() {
                    warn!(id = %id, error = %message, "command failed");
                }
            }
        }
    }

    fn apply_fields(&self, s: &mut Session, fields: &PayloadFields) {
        if let Some(status) = fields.volume {
            s.volume = Some(status.volume);
            if status.muted.is_some() {
                s.muted = status.muted;
            }
            self.emit(ClientEvent::VolumeChanged {
                volume: status.volume,
                muted: s.muted,
            });
        }

        if let Some(app_id) = &fields.app_id {
            let foreground = ForegroundSource::from_app_id(app_id);
            if foreground != s.foreground {
                debug!(app_id = %app_id, "foreground changed");
                s.foreground = foreground.clone();
                self.emit(ClientEvent::InputChanged(foreground));
            }
        }

        if let Some(devices) = &fields.devices {
            for device in devices {
                let (Ok(input), Some(icon)) = (device.id.parse::<TvInput>(), &device.icon) else {
                    continue;
                };
                s.capabilities.input_icons.insert(input, icon.clone());
            }
            self.emit(ClientEvent::CapabilitiesChanged(s.capabilities.clone()));
        }

        if let Some(raw) = &fields.sound_output {
            let output = SoundOutput::from_wire(raw);
            if output == SoundOutput::Unknown && s.sound_output != SoundOutput::Unknown {
                debug!(reported = %raw, current = %s.sound_output, "ignoring unknown sound output");
            } else if output != s.sound_output {
                s.sound_output = output;
                self.emit(ClientEvent::SoundOutputChanged(output));
            }
        }
    }

    /// The receive path went away underneath a live session.
    fn connection_lost(&self, generation: u64, cause: Option<ClientError>) {
        let mut s = self.lock();
        if s.generation != generation || !s.state.is_connected() {
            return;
        }
        // These handles belong to tasks that have already finished.
        s.tasks.clear();
        self.teardown(&mut s);
        let next = match cause {
            Some(e) => {
                warn!(error = %e, "connection lost");
                ConnectionState::Error(e.to_string())
            }
            None => {
                info!("connection closed by TV");
                ConnectionState::Disconnected
            }
        };
        self.set_state(&mut s, next);
    }
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut incoming: FrameReceiver) {
    let mut cause = None;
    while let Some(frame) = incoming.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match frame {
            Ok(raw) => inner.handle_frame(generation, raw),
            Err(e) => {
                cause = Some(e);
                break;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation, cause);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use async_trait::async_trait;
    use serde_json::json;
    use serde_json::Value;

    use super::*;
    use crate::store::MemoryKeyStore;

    enum Behaviour {
        Refuse,
        Hang,
        Accept,
    }

    /// The TV's end of an accepted link.
    struct ScriptedTv {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<Result<String, ClientError>>,
    }

    impl ScriptedTv {
        async fn next_frame(&mut self) -> Value {
            let raw = self.from_client.recv().await.unwrap();
            serde_json::from_str(&raw).unwrap()
        }

        fn push(&self, frame: Value) {
            self.to_client.send(Ok(frame.to_string())).unwrap();
        }

        /// Answer the registration frame and drain the bootstrap requests.
        async fn accept_registration(&mut self, key: Option<&str>) -> Value {
            let register = self.next_frame().await;
            assert_eq!(register["type"], "register");
            let payload = match key {
                Some(key) => json!({ "client-key": key }),
                None => json!({}),
            };
            self.push(json!({ "type": "registered", "id": register["id"], "payload": payload }));
            for _ in 0..4 {
                self.next_frame().await;
            }
            register
        }
    }

    struct MockConnector {
        behaviours: Mutex<VecDeque<Behaviour>>,
        opened: Mutex<Vec<Endpoint>>,
        tvs: mpsc::UnboundedSender<ScriptedTv>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn open(&self, endpoint: &Endpoint) -> Result<Link, ClientError> {
            self.opened.lock().unwrap().push(endpoint.clone());
            let behaviour = self
                .behaviours
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Behaviour::Refuse);
            match behaviour {
                Behaviour::Refuse => Err(ClientError::transport(endpoint, "connection refused")),
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Accept => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    let _ = self.tvs.send(ScriptedTv {
                        from_client: out_rx,
                        to_client: in_tx,
                    });
                    Ok(Link::new(endpoint.clone(), out_tx, in_rx, None))
                }
            }
        }
    }

    struct Harness {
        client: TvClient,
        events: ClientEventReceiver,
        keys: Arc<MemoryKeyStore>,
        connector: Arc<MockConnector>,
        tvs: mpsc::UnboundedReceiver<ScriptedTv>,
    }

    fn harness(behaviours: Vec<Behaviour>) -> Harness {
        let (tv_tx, tvs) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            behaviours: Mutex::new(behaviours.into()),
            opened: Mutex::new(Vec::new()),
            tvs: tv_tx,
        });
        let keys = Arc::new(MemoryKeyStore::new());
        let (client, events) =
            TvClient::new(connector.clone(), keys.clone(), ClientOptions::default());
        Harness {
            client,
            events,
            keys,
            connector,
            tvs,
        }
    }

    fn config() -> TvConfiguration {
        TvConfiguration::new(
            "Living Room",
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)),
            "AA:BB:CC:DD:EE:FF",
        )
    }

    /// Connect against an accepting TV and return its scripted end.
    async fn connected(h: &mut Harness) -> ScriptedTv {
        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });
        let mut tv = h.tvs.recv().await.unwrap();
        tv.accept_registration(Some("key-1")).await;
        task.await.unwrap().unwrap();
        tv
    }

    async fn wait_for(
        events: &mut ClientEventReceiver,
        pred: impl Fn(&ClientEvent) -> bool,
    ) -> ClientEvent {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    fn states(events: &mut ClientEventReceiver) -> Vec<ConnectionState> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::StateChanged(state) = event {
                out.push(state);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_plain_and_bootstraps() {
        let mut h = harness(vec![Behaviour::Refuse, Behaviour::Accept]);
        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });

        let mut tv = h.tvs.recv().await.unwrap();
        let register = tv.next_frame().await;
        assert_eq!(register["payload"]["pairingType"], "PROMPT");
        assert!(register["payload"].get("client-key").is_none());
        tv.push(json!({ "type": "registered", "id": register["id"], "payload": { "client-key": "fresh" } }));

        let bootstrap: Vec<(Value, Value)> = {
            let mut frames = Vec::new();
            for _ in 0..4 {
                let frame = tv.next_frame().await;
                frames.push((frame["type"].clone(), frame["uri"].clone()));
            }
            frames
        };
        assert_eq!(
            bootstrap,
            vec![
                (json!("subscribe"), json!("ssap://com.webos.applicationManager/getForegroundAppInfo")),
                (json!("request"), json!("ssap://com.webos.applicationManager/getForegroundAppInfo")),
                (json!("request"), json!("ssap://tv/getInputList")),
                (json!("subscribe"), json!("ssap://audio/getVolume")),
            ]
        );

        task.await.unwrap().unwrap();

        let opened = h.connector.opened.lock().unwrap().clone();
        assert_eq!(
            opened,
            vec![
                Endpoint::new(TransportKind::Secure, "192.168.1.40", 3001),
                Endpoint::new(TransportKind::Plain, "192.168.1.40", 3000),
            ]
        );
        assert_eq!(
            h.keys.load_key("192.168.1.40").unwrap().as_deref(),
            Some("fresh")
        );
        let snapshot = h.client.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert_eq!(snapshot.capabilities.transport, Some(TransportKind::Plain));
        assert_eq!(
            states(&mut h.events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_queries_resolve_through_pending_table() {
        let mut h = harness(vec![Behaviour::Accept]);
        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });

        let mut tv = h.tvs.recv().await.unwrap();
        let register = tv.next_frame().await;
        tv.push(json!({ "type": "registered", "id": register["id"], "payload": {} }));
        let mut queries = Vec::new();
        for _ in 0..4 {
            let frame = tv.next_frame().await;
            if frame["type"] == "request" {
                queries.push(frame);
            }
        }
        task.await.unwrap().unwrap();
        assert_eq!(h.client.inner.lock().pending.len(), 2);

        tv.push(json!({
            "type": "response",
            "id": queries[0]["id"],
            "payload": { "returnValue": true, "appId": "com.webos.app.hdmi2" },
        }));
        tv.push(json!({
            "type": "response",
            "id": queries[1]["id"],
            "payload": {
                "returnValue": true,
                "devices": [{ "id": "HDMI_2", "label": "PC", "icon": "pc.png" }],
            },
        }));
        wait_for(&mut h.events, |e| {
            matches!(e, ClientEvent::CapabilitiesChanged(c) if !c.input_icons.is_empty())
        })
        .await;

        assert!(h.client.inner.lock().pending.is_empty());
        let snapshot = h.client.snapshot();
        assert_eq!(
            snapshot.foreground,
            Some(ForegroundSource::Input(TvInput::Hdmi2))
        );
        assert_eq!(snapshot.capabilities.is_pc_mode(TvInput::Hdmi2), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_key_is_sent() {
        let mut h = harness(vec![Behaviour::Accept]);
        h.keys.save_key("192.168.1.40", "remembered").unwrap();

        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });
        let mut tv = h.tvs.recv().await.unwrap();
        let register = tv.accept_registration(None).await;
        task.await.unwrap().unwrap();

        assert_eq!(register["payload"]["client-key"], "remembered");
        assert_eq!(
            h.keys.load_key("192.168.1.40").unwrap().as_deref(),
            Some("remembered")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_transports_failing_reports_last_error() {
        let mut h = harness(vec![Behaviour::Refuse, Behaviour::Refuse]);
        let err = h.client.connect(&config()).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::TransportFailure {
                endpoint: "ws://192.168.1.40:3000".into(),
                reason: "connection refused".into(),
            }
        );
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
        assert_eq!(
            states(&mut h.events),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_pairing_does_not_fall_back() {
        let mut h = harness(vec![Behaviour::Accept, Behaviour::Accept]);
        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });

        let mut tv = h.tvs.recv().await.unwrap();
        let register = tv.next_frame().await;
        tv.push(json!({ "type": "error", "id": register["id"], "error": "403 User rejected pairing" }));

        assert_eq!(
            task.await.unwrap(),
            Err(ClientError::CommandFailed {
                uri: "register".into(),
                message: "403 User rejected pairing".into(),
            })
        );
        assert_eq!(
            *h.connector.opened.lock().unwrap(),
            vec![Endpoint::new(TransportKind::Secure, "192.168.1.40", 3001)]
        );
        assert!(h.tvs.try_recv().is_err());
        assert_eq!(h.keys.load_key("192.168.1.40").unwrap(), None);
        assert_eq!(
            states(&mut h.events),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_registration_times_out() {
        let h = harness(vec![Behaviour::Accept, Behaviour::Accept]);
        let err = h.client.connect(&config()).await.unwrap_err();
        match err {
            ClientError::HandshakeTimeout { endpoint, elapsed } => {
                assert_eq!(endpoint, "ws://192.168.1.40:3000");
                assert!(elapsed >= Duration::from_secs(10));
                assert!(elapsed < Duration::from_secs(11));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.connector.opened.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_open_counts_as_transport_failure() {
        let h = harness(vec![Behaviour::Hang, Behaviour::Refuse]);
        let started = Instant::now();
        let err = h.client.connect(&config()).await.unwrap_err();
        assert!(matches!(err, ClientError::TransportFailure { .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(h.connector.opened.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connect_is_ignored() {
        let mut h = harness(vec![Behaviour::Accept]);
        let _tv = connected(&mut h).await;
        states(&mut h.events);

        h.client.connect(&config()).await.unwrap();
        assert_eq!(h.connector.opened.lock().unwrap().len(), 1);
        assert!(states(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let mut h = harness(vec![Behaviour::Accept]);
        let _tv = connected(&mut h).await;
        states(&mut h.events);

        h.client.disconnect();
        h.client.disconnect();
        assert_eq!(states(&mut h.events), vec![ConnectionState::Disconnected]);
        assert_eq!(
            h.client.send_command(TvCommand::ScreenOn),
            Err(ClientError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_inflight_connect() {
        let h = harness(vec![Behaviour::Hang, Behaviour::Accept]);
        let client = h.client.clone();
        let task = tokio::spawn(async move { client.connect(&config()).await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        h.client.disconnect();
        assert_eq!(task.await.unwrap(), Err(ClientError::ConnectionClosed));
        assert_eq!(h.connector.opened.lock().unwrap().len(), 1);
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_commands_need_a_session() {
        let h = harness(vec![]);
        assert_eq!(
            h.client.send_command(TvCommand::PowerOff),
            Err(ClientError::NotConnected)
        );
        assert_eq!(
            h.client.request(TvCommand::GetVolume).await,
            Err(ClientError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_request_fails_on_disconnect() {
        let mut h = harness(vec![Behaviour::Accept]);
        let mut tv = connected(&mut h).await;

        let client = h.client.clone();
        let request = tokio::spawn(async move { client.request(TvCommand::GetInputList).await });
        let frame = tv.next_frame().await;
        assert_eq!(frame["uri"], "ssap://tv/getInputList");

        h.client.disconnect();
        assert_eq!(request.await.unwrap(), Err(ClientError::ConnectionClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_resolves_with_matching_response() {
        let mut h = harness(vec![Behaviour::Accept]);
        let mut tv = connected(&mut h).await;

        let client = h.client.clone();
        let request = tokio::spawn(async move { client.request(TvCommand::GetInputList).await });
        let frame = tv.next_frame().await;
        tv.push(json!({
            "type": "response",
            "id": frame["id"],
            "payload": {
                "returnValue": true,
                "devices": [
                    { "id": "HDMI_1", "label": "Console", "icon": "game.png" },
                    { "id": "HDMI_2", "label": "PC", "icon": "pc.png" },
                ],
            },
        }));

        let fields = request.await.unwrap().unwrap();
        assert_eq!(fields.devices.unwrap().len(), 2);
        let capabilities = h.client.snapshot().capabilities;
        assert_eq!(capabilities.is_pc_mode(TvInput::Hdmi2), Some(true));
        assert_eq!(capabilities.is_pc_mode(TvInput::Hdmi1), Some(false));
        assert_eq!(capabilities.is_pc_mode(TvInput::Hdmi3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_response_fails_request() {
        let mut h = harness(vec![Behaviour::Accept]);
        let mut tv = connected(&mut h).await;

        let client = h.client.clone();
        let request = tokio::spawn(async move { client.request(TvCommand::GetSoundOutput).await });
        let frame = tv.next_frame().await;
        tv.push(json!({ "type": "error", "id": frame["id"], "error": "404 no such service" }));

        assert_eq!(
            request.await.unwrap(),
            Err(ClientError::CommandFailed {
                uri: "ssap://com.webos.service.apiadapter/audio/getSoundOutput".into(),
                message: "404 no such service".into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_update_snapshot() {
        let mut h = harness(vec![Behaviour::Accept]);
        let tv = connected(&mut h).await;

        tv.push(json!({ "type": "push", "id": "2", "payload": { "volume": 21, "muted": false } }));
        let event = wait_for(&mut h.events, |e| matches!(e, ClientEvent::VolumeChanged { .. })).await;
        assert_eq!(
            event,
            ClientEvent::VolumeChanged {
                volume: 21,
                muted: Some(false)
            }
        );

        tv.push(json!({ "type": "push", "id": "3", "payload": { "appId": "com.webos.app.hdmi2" } }));
        let event = wait_for(&mut h.events, |e| matches!(e, ClientEvent::InputChanged(_))).await;
        assert_eq!(
            event,
            ClientEvent::InputChanged(Some(ForegroundSource::Input(TvInput::Hdmi2)))
        );

        let snapshot = h.client.snapshot();
        assert_eq!(snapshot.volume, Some(21));
        assert_eq!(snapshot.muted, Some(false));
        assert_eq!(
            snapshot.foreground,
            Some(ForegroundSource::Input(TvInput::Hdmi2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_sound_output_does_not_replace_known() {
        let mut h = harness(vec![Behaviour::Accept]);
        let tv = connected(&mut h).await;

        tv.push(json!({ "type": "push", "payload": { "soundOutput": "external_arc" } }));
        wait_for(&mut h.events, |e| matches!(e, ClientEvent::SoundOutputChanged(_))).await;

        tv.push(json!({ "type": "push", "payload": { "soundOutput": "mystery_box" } }));
        tv.push(json!({ "type": "push", "payload": { "volume": 3 } }));
        wait_for(&mut h.events, |e| matches!(e, ClientEvent::VolumeChanged { .. })).await;

        assert_eq!(h.client.snapshot().sound_output, SoundOutput::Arc);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_frame_is_captured() {
        let mut h = harness(vec![Behaviour::Accept]);
        let tv = connected(&mut h).await;

        tv.push(json!({ "type": "hello", "payload": { "anything": 1 } }));
        let event = wait_for(&mut h.events, |e| {
            matches!(e, ClientEvent::Captured { kind, .. } if kind == "hello")
        })
        .await;
        let ClientEvent::Captured { raw, .. } = event else {
            unreachable!()
        };
        assert!(raw.contains("anything"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_moves_to_error() {
        let mut h = harness(vec![Behaviour::Accept]);
        let tv = connected(&mut h).await;
        states(&mut h.events);

        tv.to_client
            .send(Err(ClientError::TransportFailure {
                endpoint: "wss://192.168.1.40:3001".into(),
                reason: "reset by peer".into(),
            }))
            .unwrap();
        let event = wait_for(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
        assert!(matches!(event, ClientEvent::StateChanged(ConnectionState::Error(_))));

        // A fresh connect is allowed from the error state.
        assert!(!h.client.state().is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_disconnects() {
        let mut h = harness(vec![Behaviour::Accept]);
        let tv = connected(&mut h).await;
        states(&mut h.events);

        drop(tv);
        let event = wait_for(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
        assert_eq!(event, ClientEvent::StateChanged(ConnectionState::Disconnected));
    }
}
