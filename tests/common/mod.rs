//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;

use session_keeper::config::{CircuitBreakerConfig, ReconnectConfig, StoreConfig};
use session_keeper::connection::{
    AuthState, ConnectionState, EventSink, Handshake, Identity, ManagerConfig, ReasonCode,
    StateChange, Transport, TransportError, TransportEvent,
};
use session_keeper::credentials::{
    CredentialBackend, CredentialRecord, CredentialStore, SqliteBackend,
};

/// One scripted reaction to `Transport::open`.
#[derive(Debug, Clone)]
pub enum Step {
    Open(Identity),
    Fail(ReasonCode),
    /// Never completes.
    Stall,
}

/// Transport that follows a script and exposes the event sinks it was given.
///
/// Once the script runs out every open stalls.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    sinks: Mutex<Vec<EventSink>>,
    auth: Mutex<Vec<AuthState>>,
    opens: AtomicU32,
    closes: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            sinks: Mutex::new(Vec::new()),
            auth: Mutex::new(Vec::new()),
            opens: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        })
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn auth_states(&self) -> Vec<AuthState> {
        self.auth.lock().unwrap().clone()
    }

    /// Sink handed to the `n`th open (0-based).
    pub fn sink(&self, n: usize) -> EventSink {
        self.sinks.lock().unwrap()[n].clone()
    }

    pub fn last_sink(&self) -> EventSink {
        self.sinks.lock().unwrap().last().cloned().expect("no open yet")
    }

    /// Report an event on the most recent connection.
    pub fn emit(&self, event: TransportEvent) {
        self.last_sink().emit(event);
    }

    pub fn disconnect(&self, reason: ReasonCode) {
        self.last_sink().disconnected(reason);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Handle = u64;

    async fn open(
        &self,
        auth: AuthState,
        events: EventSink,
    ) -> Result<Handshake<u64>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.auth.lock().unwrap().push(auth);
        let generation = events.generation();
        self.sinks.lock().unwrap().push(events);

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Stall);
        match step {
            Step::Open(identity) => Ok(Handshake {
                handle: generation,
                identity,
            }),
            Step::Fail(reason) => Err(TransportError::Rejected(reason)),
            Step::Stall => std::future::pending().await,
        }
    }

    async fn close(&self, _handle: u64) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend whose writes always fail; reads see an empty database.
pub struct FailingBackend {
    inner: SqliteBackend,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self {
            inner: SqliteBackend::open_in_memory().unwrap(),
        }
    }
}

impl CredentialBackend for FailingBackend {
    fn read(&self, key: &str) -> rusqlite::Result<Option<CredentialRecord>> {
        self.inner.read(key)
    }
    fn write_batch(&self, _records: &[CredentialRecord]) -> rusqlite::Result<()> {
        Err(rusqlite::Error::InvalidQuery)
    }
    fn apply(&self, _upserts: &[CredentialRecord], _removals: &[String]) -> rusqlite::Result<()> {
        Err(rusqlite::Error::InvalidQuery)
    }
    fn remove(&self, key: &str) -> rusqlite::Result<bool> {
        self.inner.remove(key)
    }
    fn remove_all(&self) -> rusqlite::Result<usize> {
        self.inner.remove_all()
    }
    fn remove_session(&self) -> rusqlite::Result<usize> {
        self.inner.remove_session()
    }
    fn prune(&self, cutoff: i64, protected: &[String]) -> rusqlite::Result<usize> {
        self.inner.prune(cutoff, protected)
    }
    fn keys(&self, kind: Option<&str>) -> rusqlite::Result<Vec<String>> {
        self.inner.keys(kind)
    }
    fn checkpoint(&self) -> rusqlite::Result<()> {
        self.inner.checkpoint()
    }
}

/// Store settings with fast retries.
pub fn store_config() -> StoreConfig {
    StoreConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..StoreConfig::default()
    }
}

pub fn memory_store() -> Arc<CredentialStore> {
    memory_store_with(&store_config())
}

pub fn memory_store_with(config: &StoreConfig) -> Arc<CredentialStore> {
    let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
    Arc::new(CredentialStore::with_backend(backend, config))
}

pub fn failing_store() -> Arc<CredentialStore> {
    Arc::new(CredentialStore::with_backend(
        Arc::new(FailingBackend::new()),
        &store_config(),
    ))
}

/// Manager settings scaled down to milliseconds.
pub fn manager_config(threshold: u32, cooldown_ms: u64) -> ManagerConfig {
    ManagerConfig {
        reconnect: ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter: 0.2,
            restart_delay_ms: 10,
            clear_on_logout: true,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: threshold,
            window_secs: 3600,
            cooldown_ms,
        },
        connect_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_secs(2),
    }
}

/// Wait until the watched state satisfies `pred`.
pub async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("manager dropped");
}

/// Receive transitions until `stop` returns true for one of them.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<StateChange>,
    mut stop: impl FnMut(&StateChange) -> bool,
) -> Vec<StateChange> {
    let mut seen = Vec::new();
    loop {
        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transition")
            .expect("transition channel closed");
        seen.push(change);
        if stop(&change) {
            return seen;
        }
    }
}

/// Instruction for the mock gateway's current connection.
#[derive(Debug, Clone)]
pub enum GatewayCommand {
    Text(String),
    Close(u16),
}

/// WebSocket gateway speaking the reference session protocol.
pub struct MockGateway {
    pub addr: SocketAddr,
    hellos: Arc<Mutex<Vec<Vec<u8>>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<GatewayCommand>>>>,
}

impl MockGateway {
    pub fn url(&self) -> String {
        format!("ws://{}/session", self.addr)
    }

    /// Identity payloads received in each connection's first frame.
    pub fn hellos(&self) -> Vec<Vec<u8>> {
        self.hellos.lock().unwrap().clone()
    }

    pub fn send(&self, command: GatewayCommand) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    pub fn authenticate(&self, creds: &[u8]) -> bool {
        self.send(GatewayCommand::Text(format!(
            r#"{{"type":"authenticated","creds":{:?}}}"#,
            creds
        )))
    }

    pub fn close_with_status(&self, status: u16) -> bool {
        self.send(GatewayCommand::Close(4000 + status))
    }
}

/// Start a gateway on an ephemeral port. A non-empty hello counts as a known
/// identity.
pub async fn start_mock_gateway() -> MockGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hellos = Arc::new(Mutex::new(Vec::new()));
    let current = Arc::new(Mutex::new(None));

    let gateway = MockGateway {
        addr,
        hellos: hellos.clone(),
        current: current.clone(),
    };

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let hellos = hellos.clone();
            let current = current.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                let (mut writer, mut reader) = ws.split();

                let hello = loop {
                    match reader.next().await {
                        Some(Ok(Message::Binary(data))) => break data.to_vec(),
                        Some(Ok(_)) => continue,
                        _ => return,
                    }
                };
                let registered = !hello.is_empty();
                hellos.lock().unwrap().push(hello);

                let (tx, mut rx) = mpsc::unbounded_channel();
                *current.lock().unwrap() = Some(tx);

                let ready = format!(r#"{{"type":"ready","registered":{registered}}}"#);
                if writer.send(Message::text(ready)).await.is_err() {
                    return;
                }

                loop {
                    tokio::select! {
                        command = rx.recv() => match command {
                            Some(GatewayCommand::Text(text)) => {
                                let _ = writer.send(Message::text(text)).await;
                            }
                            Some(GatewayCommand::Close(code)) => {
                                let frame = CloseFrame {
                                    code: CloseCode::from(code),
                                    reason: String::from("gateway closed").into(),
                                };
                                let _ = writer.send(Message::Close(Some(frame))).await;
                                break;
                            }
                            None => break,
                        },
                        message = reader.next() => match message {
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            });
        }
    });

    gateway
}
