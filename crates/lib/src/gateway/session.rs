//! Gateway session: owns the connection lifecycle.
//!
//! `connect()` spawns one task that loops over connections: open the transport,
//! wait for hello, start heartbeats, identify, then decode and dispatch every
//! inbound frame until the transport closes. Lost connections are retried with
//! backoff until the policy gives up or `disconnect()` is called.
//!
//! Inbound frames, heartbeat ticks, the hello deadline, and shutdown are all
//! handled in a single `select!` loop, so envelope handling never runs
//! concurrently with itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::bus::EventBus;
use super::codec::{self, Envelope, Opcode};
use super::error::GatewayError;
use super::event::Event;
use super::heartbeat::HeartbeatScheduler;
use super::transport::{Connector, Transport};
use crate::credentials::Credentials;

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Opening the transport. `attempt` is 1 for the first try of a streak.
    Connecting { attempt: u32 },
    AwaitingHello,
    Identifying,
    Live,
    /// Waiting `next_delay` before reconnect attempt `attempt`.
    Reconnecting { attempt: u32, next_delay: Duration },
}

/// Session tuning taken from config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Close and reconnect when hello has not arrived this long after open.
    pub hello_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Why a single connection ended.
enum ConnectionEnd {
    Shutdown,
    Lost { reached_live: bool },
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    credentials: Credentials,
    bus: EventBus,
    options: SessionOptions,
    state_tx: watch::Sender<ConnectionState>,
    last_sequence: AtomicU64,
    connected: AtomicBool,
    running: Mutex<Option<Running>>,
}

/// Handle to the gateway session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                credentials,
                bus: EventBus::new(),
                options,
                state_tx,
                last_sequence: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                running: Mutex::new(None),
            }),
        }
    }

    /// Start the session task. A no-op when it is already running.
    /// Never fails; connection problems show up as state changes and logs.
    pub fn connect(&self) {
        let mut running = self.shared.lock_running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            log::debug!("gateway session already running, ignoring connect");
            return;
        }
        let (shutdown, shutdown_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move { shared.run(shutdown_rx).await });
        *running = Some(Running { handle, shutdown });
    }

    /// Tear down: stop heartbeats, close the transport, and stop reconnecting.
    pub async fn disconnect(&self) {
        let running = self.shared.lock_running().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(());
            if let Err(e) = running.handle.await {
                log::warn!("gateway session task ended abnormally: {}", e);
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// True while a transport is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Last sequence number seen; echoed in heartbeats.
    pub fn last_sequence(&self) -> u64 {
        self.shared.last_sequence.load(Ordering::SeqCst)
    }

    /// Bus on which dispatched events are published.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn credentials(&self) -> &Credentials {
        &self.shared.credentials
    }

    /// Replace the token used by the next identify. Does not reconnect.
    pub fn set_token(&self, token: Option<String>) {
        self.shared.credentials.set_token(token);
    }
}

impl Shared {
    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state.clone());
        if prev != state {
            log::info!("gateway state: {:?} -> {:?}", prev, state);
        }
    }

    /// Session task: connect, serve, and reconnect until shut down or out of attempts.
    async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        let policy = &self.options.reconnect;
        let mut failures: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting {
                attempt: failures + 1,
            });
            let connected = tokio::select! {
                _ = &mut shutdown => break,
                res = self.connector.connect() => res,
            };
            let end = match connected {
                Ok(transport) => self.serve(transport, &mut shutdown).await,
                Err(e) => {
                    log::warn!("gateway connect failed: {}", e);
                    ConnectionEnd::Lost {
                        reached_live: false,
                    }
                }
            };
            match end {
                ConnectionEnd::Shutdown => break,
                ConnectionEnd::Lost { reached_live } => {
                    if reached_live {
                        failures = 0;
                    }
                    failures += 1;
                    if !policy.should_retry(failures) {
                        log::error!(
                            "gateway reconnect gave up after {} attempts",
                            failures - 1
                        );
                        break;
                    }
                    let delay = policy.next_delay(failures);
                    log::warn!(
                        "gateway connection lost, reconnecting in {:?} (attempt {})",
                        delay,
                        failures
                    );
                    self.set_state(ConnectionState::Reconnecting {
                        attempt: failures,
                        next_delay: delay,
                    });
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drive one open transport until it closes or shutdown is requested.
    async fn serve(
        &self,
        mut transport: Box<dyn Transport>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> ConnectionEnd {
        self.connected.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::AwaitingHello);

        let mut conn = Connection {
            phase: ConnectionState::AwaitingHello,
            heartbeat: HeartbeatScheduler::new(),
            heard_since_identify: false,
        };
        // Ticks are forwarded over a per-connection channel, so none outlive this connection.
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<()>();
        let hello_deadline = tokio::time::sleep(self.options.hello_timeout);
        tokio::pin!(hello_deadline);

        let end = loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    transport.close().await;
                    break ConnectionEnd::Shutdown;
                }
                _ = &mut hello_deadline, if conn.phase == ConnectionState::AwaitingHello => {
                    log::warn!("{}", GatewayError::HelloTimeout(self.options.hello_timeout));
                    transport.close().await;
                    break ConnectionEnd::Lost { reached_live: false };
                }
                Some(()) = tick_rx.recv() => {
                    let seq = self.last_sequence.load(Ordering::SeqCst);
                    log::debug!("> heartbeat (s={})", seq);
                    if let Err(e) = transport.send(codec::encode(&Envelope::heartbeat(seq))).await {
                        log::warn!("heartbeat send failed: {}", e);
                        break conn.lost();
                    }
                }
                frame = transport.recv() => match frame {
                    None => {
                        if conn.phase == ConnectionState::Live && !conn.heard_since_identify {
                            log::warn!("{}", GatewayError::AuthenticationRejected);
                        } else {
                            log::info!("gateway transport closed");
                        }
                        break conn.lost();
                    }
                    Some(Err(e)) => {
                        log::warn!("{}", e);
                        transport.close().await;
                        break conn.lost();
                    }
                    Some(Ok(text)) => {
                        if let Err(e) = self.handle_frame(&text, &mut conn, transport.as_mut(), &tick_tx).await {
                            log::warn!("{}", e);
                            transport.close().await;
                            break conn.lost();
                        }
                    }
                },
            }
        };

        conn.heartbeat.stop();
        drop(transport);
        self.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        end
    }

    /// Handle one inbound frame. Only transport failures are returned; text that
    /// is not an envelope is logged and dropped without touching any state.
    async fn handle_frame(
        &self,
        text: &str,
        conn: &mut Connection,
        transport: &mut dyn Transport,
        tick_tx: &mpsc::UnboundedSender<()>,
    ) -> Result<(), GatewayError> {
        let (envelope, event) = match decode_inbound(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("dropping inbound message: {}", e);
                return Ok(());
            }
        };
        log::debug!("< op={:?} s={:?} t={:?}", envelope.op, envelope.s, envelope.t);
        if conn.phase == ConnectionState::Live {
            conn.heard_since_identify = true;
        }

        if let Some(seq) = envelope.s {
            self.last_sequence.store(seq, Ordering::SeqCst);
        }
        if let Some(event) = event {
            let report = self.bus.publish(event.event_type(), &event);
            if report.failed > 0 {
                log::debug!(
                    "{}: {} handler(s) failed, {} ok",
                    event.event_type(),
                    report.failed,
                    report.delivered
                );
            }
        }

        if envelope.op == Opcode::Hello {
            if conn.phase != ConnectionState::AwaitingHello {
                log::warn!("ignoring repeated hello");
                return Ok(());
            }
            let interval = match envelope.hello_interval() {
                Ok(interval) => interval,
                Err(e) => {
                    log::warn!("dropping hello: {}", e);
                    return Ok(());
                }
            };
            conn.phase = ConnectionState::Identifying;
            self.set_state(ConnectionState::Identifying);

            let tx = tick_tx.clone();
            conn.heartbeat.start(interval, move || {
                let _ = tx.send(());
            });

            let token = self.credentials.get_token();
            if token.is_none() {
                log::warn!("identifying without a token");
            }
            log::debug!("> identify");
            transport
                .send(codec::encode(&Envelope::identify(token.as_deref(), false)))
                .await?;
            conn.phase = ConnectionState::Live;
            self.set_state(ConnectionState::Live);
        }
        Ok(())
    }
}

/// Per-connection state, dropped when the connection ends.
struct Connection {
    phase: ConnectionState,
    heartbeat: HeartbeatScheduler,
    heard_since_identify: bool,
}

impl Connection {
    fn lost(&self) -> ConnectionEnd {
        ConnectionEnd::Lost {
            reached_live: self.phase == ConnectionState::Live,
        }
    }
}

/// Decode an envelope and, when it carries an event type, its event.
fn decode_inbound(text: &str) -> Result<(Envelope, Option<Event>), GatewayError> {
    let envelope = codec::decode(text)?;
    let event = envelope
        .t
        .as_deref()
        .map(|t| Event::from_dispatch(t, envelope.d.clone()));
    Ok((envelope, event))
}
