//! Wheelhouse production server.
//!
//! Production server implementation using axum WebSockets for transport,
//! Tokio for the async runtime, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps [`wheelhouse_core`]'s
//! action-based arbitration with real I/O. The [`ServerDriver`] follows the
//! Sans-IO pattern, while [`Server`] executes its actions against live
//! sockets and drives the scheduler tick.
//!
//! Every event (accept, message, close, tick) is processed to completion
//! under one async mutex, and the resulting actions are executed before the
//! lock is released. Outbound delivery goes through per-connection unbounded
//! channels, so execution never blocks on a slow client.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`Server`]: Production runtime that executes `ServerDriver` actions
//! - [`WsTransport`]: WebSocket endpoint via axum
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod fanout;
mod registry;
mod server_error;
mod system_env;
mod transport;

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
pub use driver::{LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use fanout::{
    ACTUATOR_CONNECTED, ACTUATOR_DISCONNECTED, EMERGENCY_STOP_FAILED, EMERGENCY_STOP_SENT,
    REMOVED_BY_ADMIN,
};
use futures::StreamExt;
pub use registry::{ConnectionInfo, ConnectionRegistry, Role};
pub use server_error::ServerError as DriverError;
pub use system_env::SystemEnv;
use tokio::sync::{Mutex, RwLock, mpsc};
pub use transport::{Outbound, WsTransport};
use wheelhouse_core::env::Environment;
use wheelhouse_proto::{ServerMessage, SessionId};

/// Shared state for all connections.
struct SharedState {
    /// The single writer for arbitration state
    driver: Mutex<ServerDriver<SystemEnv>>,
    /// Session ID to that connection's outbound queue
    outbound: RwLock<HashMap<SessionId, mpsc::UnboundedSender<Outbound>>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4000")
    pub bind_address: String,
    /// Driver configuration (timing, limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:4000".to_string(), driver: DriverConfig::default() }
    }
}

/// Production Wheelhouse server.
///
/// Wraps `ServerDriver` with the WebSocket transport and system environment.
pub struct Server {
    /// Driver plus outbound routing
    shared: Arc<SharedState>,
    /// Listening socket
    transport: WsTransport,
    /// Environment
    env: SystemEnv,
    /// Scheduler tick period
    tick_interval: Duration,
}

impl Server {
    /// Validate the configuration and bind the listening socket.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), config.driver)?;
        let tick_interval = driver.tick_interval();

        let transport = WsTransport::bind(&config.bind_address).await?;

        let shared = Arc::new(SharedState {
            driver: Mutex::new(driver),
            outbound: RwLock::new(HashMap::new()),
        });

        Ok(Self { shared, transport, env, tick_interval })
    }

    /// Run the server: serve `/ws` and tick the scheduler.
    ///
    /// This method runs until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        let ticker = tokio::spawn(tick_loop(Arc::clone(&self.shared), self.env, self.tick_interval));

        let router = Router::new().route("/ws", get(ws_handler)).with_state(self.shared);
        let result = self.transport.serve(router).await;

        ticker.abort();
        result
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }
}

/// Drive the scheduler: one tick per interval.
async fn tick_loop(shared: Arc<SharedState>, env: SystemEnv, interval: Duration) {
    loop {
        env.sleep(interval).await;
        dispatch(&shared, ServerEvent::Tick).await;
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<SharedState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, shared))
}

/// Handle a single WebSocket connection.
async fn handle_connection(socket: WebSocket, shared: Arc<SharedState>) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(transport::pump_outbound(sink, rx));

    let session_id = {
        let mut driver = shared.driver.lock().await;
        let session_id = driver.allocate_session_id();
        shared.outbound.write().await.insert(session_id, tx);

        match driver.process_event(ServerEvent::ConnectionAccepted { session_id }) {
            Ok(actions) => execute_actions(actions, &shared).await,
            Err(e) => tracing::error!("accept failed for {}: {}", session_id, e),
        }
        session_id
    };

    tracing::debug!("New connection: {}", session_id);

    while is_open(&shared, session_id).await {
        let Some(msg) = stream.next().await else {
            break;
        };

        match msg {
            Ok(Message::Text(text)) => {
                let event = ServerEvent::MessageReceived { session_id, text: text.to_string() };
                dispatch(&shared, event).await;
            },
            Ok(Message::Close(_)) => {
                tracing::debug!("{} sent close frame", session_id);
                break;
            },
            Ok(Message::Binary(_)) => {
                tracing::debug!("ignoring binary frame from {}", session_id);
            },
            // Pings are answered by the WebSocket layer
            Ok(_) => {},
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", session_id, e);
                break;
            },
        }
    }

    shared.outbound.write().await.remove(&session_id);
    dispatch(&shared, ServerEvent::ConnectionClosed {
        session_id,
        reason: "connection closed".to_string(),
    })
    .await;
}

async fn is_open(shared: &SharedState, session_id: SessionId) -> bool {
    shared.outbound.read().await.contains_key(&session_id)
}

/// Process one event under the driver lock and execute its actions.
async fn dispatch(shared: &SharedState, event: ServerEvent) {
    let mut driver = shared.driver.lock().await;
    match driver.process_event(event) {
        Ok(actions) => execute_actions(actions, shared).await,
        Err(e) => tracing::warn!("Event processing error: {}", e),
    }
}

/// Encode an outbound message as one text frame.
fn encode_frame(message: &ServerMessage) -> Result<String, ServerError> {
    Ok(message.encode()?)
}

/// Execute server actions.
async fn execute_actions(actions: Vec<ServerAction>, shared: &SharedState) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, message } => {
                let text = match encode_frame(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Dropping {} for {}: {}", message.event(), session_id, e);
                        continue;
                    },
                };

                let outbound = shared.outbound.read().await;
                match outbound.get(&session_id) {
                    Some(tx) => {
                        if tx.send(Outbound::Text(text)).is_err() {
                            tracing::debug!("SendToSession: {} writer gone", session_id);
                        }
                    },
                    None => tracing::debug!("SendToSession: session {} not found", session_id),
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!("Closing connection {}: {}", session_id, reason);
                if let Some(tx) = shared.outbound.write().await.remove(&session_id) {
                    let _ = tx.send(Outbound::Close(reason));
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use wheelhouse_proto::{Countdown, ProtocolError};

    use super::*;

    #[test]
    fn outbound_frames_are_envelopes() {
        let text = encode_frame(&ServerMessage::Countdown(Countdown { time_remaining: 7 })).unwrap();
        assert_eq!(text, r#"{"event":"countdown","data":{"timeRemaining":7}}"#);
    }

    #[test]
    fn encode_failures_surface_as_protocol_errors() {
        let err = ServerError::from(ProtocolError::Encode("non-finite float".to_string()));
        assert!(matches!(err, ServerError::Protocol(ProtocolError::Encode(_))));
        assert_eq!(err.to_string(), "protocol error: encode failed: non-finite float");
    }
}
