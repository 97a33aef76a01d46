//! Server driver.
//!
//! Ties together the [`Arbiter`] (queue, scheduler, relay, admin plane), the
//! [`ConnectionRegistry`] (who is connected, in which role) and the
//! notification fan-out. Every connection event, decoded message and tick
//! goes through [`ServerDriver::process_event`] and comes back as a list of
//! [`ServerAction`]s for the runtime to execute.

use wheelhouse_core::{Arbiter, ArbiterAction, ArbiterConfig, ArbiterError, env::Environment};
use wheelhouse_proto::{
    ActuatorStatus, AdminRequest, ClientMessage, ErrorPayload, Identify, ServerMessage,
    SessionAssigned, SessionId,
};

use crate::{
    fanout::{ACTUATOR_CONNECTED, ACTUATOR_DISCONNECTED, FanOut},
    registry::ConnectionRegistry,
    server_error::ServerError,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Arbitration configuration (timing bounds, tick, heartbeat, deadband)
    pub arbiter: ArbiterConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { arbiter: ArbiterConfig::default(), max_connections: 1_000 }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Id allocated with [`ServerDriver::allocate_session_id`]
        session_id: SessionId,
    },

    /// A text message was received from a connection
    MessageReceived {
        /// Connection that sent the message
        session_id: SessionId,
        /// Raw JSON text
        text: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Periodic scheduler tick
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send a message to a specific session
    SendToSession {
        /// Target session ID
        session_id: SessionId,
        /// Message to send
        message: ServerMessage,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: SessionId,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// Single logical writer for all arbitration state; the runtime serializes
/// events into it.
pub struct ServerDriver<E>
where
    E: Environment,
{
    /// Turn arbitration
    arbiter: Arbiter<E::Instant>,
    /// Connection roles
    registry: ConnectionRegistry,
    /// Environment (time, RNG)
    env: E,
    /// Server configuration
    config: ServerConfig,
}

impl<E> ServerDriver<E>
where
    E: Environment,
{
    /// Create a new server driver.
    ///
    /// # Errors
    ///
    /// `Config` if the arbiter configuration is inconsistent.
    pub fn new(env: E, config: ServerConfig) -> Result<Self, ServerError> {
        config.arbiter.validate()?;
        Ok(Self {
            arbiter: Arbiter::new(config.arbiter.clone()),
            registry: ConnectionRegistry::new(),
            env,
            config,
        })
    }

    /// Fresh session id not used by any live connection.
    ///
    /// Ids are random: they are the only client credential.
    pub fn allocate_session_id(&self) -> SessionId {
        loop {
            let candidate = SessionId::new(self.env.random_u64());
            if !self.registry.contains(candidate) {
                return candidate;
            }
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::MessageReceived { session_id, text } => {
                self.handle_message_received(session_id, &text)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        session_id: SessionId,
    ) -> Result<Vec<ServerAction>, ServerError> {
        if self.registry.len() >= self.config.max_connections {
            return Ok(vec![
                ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::Error(ErrorPayload::new(
                        ErrorPayload::SERVER_FULL,
                        "too many connections",
                    )),
                },
                ServerAction::CloseConnection {
                    session_id,
                    reason: "max connections exceeded".to_string(),
                },
            ]);
        }

        if !self.registry.register(session_id) {
            return Err(ServerError::SessionAlreadyExists(session_id));
        }

        Ok(vec![
            ServerAction::SendToSession {
                session_id,
                message: ServerMessage::Session(SessionAssigned { sid: session_id }),
            },
            ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {session_id} accepted"),
            },
        ])
    }

    /// Handle a text message received from a connection.
    fn handle_message_received(
        &mut self,
        session_id: SessionId,
        text: &str,
    ) -> Result<Vec<ServerAction>, ServerError> {
        if !self.registry.contains(session_id) {
            return Err(ServerError::SessionNotFound(session_id));
        }

        let message = match ClientMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                return Ok(vec![
                    ServerAction::SendToSession {
                        session_id,
                        message: ServerMessage::Error(ErrorPayload::invalid_message(
                            e.to_string(),
                        )),
                    },
                    ServerAction::Log {
                        level: LogLevel::Warn,
                        message: format!("undecodable message from {session_id}: {e}"),
                    },
                ]);
            },
        };

        let now = self.env.now();
        let actions = match message {
            ClientMessage::RequestControl => {
                if self.registry.actuator() == Some(session_id) {
                    return Ok(vec![
                        ServerAction::SendToSession {
                            session_id,
                            message: ServerMessage::Error(ErrorPayload::forbidden(
                                "actuator cannot queue for control",
                            )),
                        },
                        ServerAction::Log {
                            level: LogLevel::Warn,
                            message: format!("actuator {session_id} asked for control"),
                        },
                    ]);
                }
                let (admission, actions) = self.arbiter.enqueue(session_id, now);
                let mut out = vec![ServerAction::Log {
                    level: LogLevel::Debug,
                    message: format!("{session_id} queued at {}", admission.position()),
                }];
                out.extend(self.fan_out(actions));
                return Ok(out);
            },

            ClientMessage::Heartbeat(heartbeat) => {
                match self.arbiter.heartbeat(session_id, heartbeat.seconds_remaining, now) {
                    Ok(actions) => actions,
                    // Late heartbeats from a former holder are expected
                    Err(e) => {
                        return Ok(vec![ServerAction::Log {
                            level: LogLevel::Debug,
                            message: format!("ignored heartbeat: {e}"),
                        }]);
                    },
                }
            },

            ClientMessage::EndTurn => match self.arbiter.release(session_id, now) {
                Ok(actions) => actions,
                Err(e) => return Ok(self.reject(session_id, &e)),
            },

            ClientMessage::Control(payload) => match self.arbiter.submit(session_id, &payload) {
                Ok(actions) => actions,
                Err(e) => return Ok(self.reject(session_id, &e)),
            },

            ClientMessage::Identify(identify) => return Ok(self.handle_identify(session_id, identify)),

            ClientMessage::Admin(request) => return Ok(self.handle_admin(session_id, request)),
        };

        Ok(self.fan_out(actions))
    }

    /// Record the client kind; the vehicle attaches as actuator.
    fn handle_identify(&mut self, session_id: SessionId, identify: Identify) -> Vec<ServerAction> {
        let is_actuator = identify.is_actuator();
        self.registry.set_user_agent(session_id, identify.user_agent.clone());

        if !is_actuator {
            return vec![ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("{session_id} identified as {:?}", identify.user_agent),
            }];
        }

        let mut out = Vec::new();
        if let Some(previous) = self.registry.attach_actuator(session_id) {
            out.push(ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("actuator {previous} displaced by {session_id}"),
            });
        }
        out.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("actuator attached: {session_id}"),
        });

        // A queued participant that turns out to be the vehicle gives up its place
        let mut actions = if self.arbiter.queue().contains(session_id) {
            self.arbiter.disconnect(session_id, self.env.now())
        } else {
            Vec::new()
        };
        actions.extend(self.arbiter.actuator_attached());
        actions.push(ArbiterAction::Notice(ACTUATOR_CONNECTED.to_string()));
        out.extend(self.actuator_status(true));
        out.extend(self.fan_out(actions));
        out
    }

    /// Admin plane. Only observers (connections that asked for the queue
    /// snapshot) may mutate.
    fn handle_admin(&mut self, session_id: SessionId, request: AdminRequest) -> Vec<ServerAction> {
        let now = self.env.now();

        if request == AdminRequest::RequestQueue {
            if !self.registry.promote_admin(session_id) {
                return vec![ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::Error(ErrorPayload::forbidden(
                        "actuator cannot observe the queue",
                    )),
                }];
            }
            return vec![
                ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::AdminQueue(self.arbiter.snapshot()),
                },
                ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::ActuatorStatus(ActuatorStatus {
                        connected: self.registry.actuator().is_some(),
                    }),
                },
            ];
        }

        if !self.registry.is_admin(session_id) {
            return vec![
                ServerAction::SendToSession {
                    session_id,
                    message: ServerMessage::Error(ErrorPayload::forbidden(format!(
                        "{} requires an admin observer",
                        request.event()
                    ))),
                },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!("{session_id} sent {} without admin rights", request.event()),
                },
            ];
        }

        let result = match request {
            AdminRequest::RequestQueue => Ok(Vec::new()),
            AdminRequest::UpdateUser(update) => {
                self.arbiter.update_session(update.sid, update.time_allowed)
            },
            AdminRequest::RemoveUser(remove) => self.arbiter.remove_session(remove.sid, now),
            AdminRequest::ForceNext => Ok(self.arbiter.force_next(now)),
            AdminRequest::EmergencyStop => Ok(self.arbiter.emergency_stop()),
            AdminRequest::SetDefaultTime(set) => self.arbiter.set_default_time_allowed(set.time),
            AdminRequest::Resume => Ok(self.arbiter.resume(now)),
            AdminRequest::MoveUser(mv) => self.arbiter.move_session(mv.sid, mv.position),
        };

        match result {
            Ok(actions) => self.fan_out(actions),
            Err(e) => self.reject(session_id, &e),
        }
    }

    /// Handle a connection being closed.
    fn handle_connection_closed(&mut self, session_id: SessionId, reason: &str) -> Vec<ServerAction> {
        let Some(info) = self.registry.unregister(session_id) else {
            return Vec::new();
        };

        let mut out = vec![ServerAction::Log {
            level: LogLevel::Info,
            message: format!("connection {session_id} closed: {reason}"),
        }];

        if info.role == crate::registry::Role::Actuator {
            out.push(ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("actuator detached: {session_id}"),
            });
            out.extend(self.actuator_status(false));
            out.extend(self.fan_out(vec![ArbiterAction::Notice(ACTUATOR_DISCONNECTED.to_string())]));
        }

        let now = self.env.now();
        let actions = self.arbiter.disconnect(session_id, now);
        out.extend(self.fan_out(actions));
        out
    }

    /// Handle the periodic scheduler tick.
    fn handle_tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        let actions = self.arbiter.tick(now);
        self.fan_out(actions)
    }

    fn fan_out(&self, actions: Vec<ArbiterAction>) -> Vec<ServerAction> {
        FanOut::new(&self.registry, &self.arbiter, self.env.wall_clock_secs()).run(actions)
    }

    fn actuator_status(&self, connected: bool) -> Vec<ServerAction> {
        self.registry
            .admins()
            .map(|session_id| ServerAction::SendToSession {
                session_id,
                message: ServerMessage::ActuatorStatus(ActuatorStatus { connected }),
            })
            .collect()
    }

    /// Error reply plus a log line for a rejected request.
    fn reject(&self, session_id: SessionId, error: &ArbiterError) -> Vec<ServerAction> {
        vec![
            ServerAction::SendToSession {
                session_id,
                message: ServerMessage::Error(error.to_payload()),
            },
            ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("rejected request from {session_id}: {error}"),
            },
        ]
    }

    /// Arbitration state.
    pub fn arbiter(&self) -> &Arbiter<E::Instant> {
        &self.arbiter
    }

    /// Connection roles.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Tick interval the runtime should use.
    pub fn tick_interval(&self) -> std::time::Duration {
        self.config.arbiter.tick_interval
    }

    /// Environment the driver reads time and randomness from.
    pub fn env(&self) -> &E {
        &self.env
    }
}

impl<E> std::fmt::Debug for ServerDriver<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connection_count", &self.registry.len())
            .field("queue_len", &self.arbiter.queue().len())
            .field("holder", &self.arbiter.holder())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use wheelhouse_proto::{ProtocolError, events};

    use super::*;

    /// Manual clock; each `advance` moves virtual time forward.
    #[derive(Clone, Default)]
    struct TestEnv {
        millis: Arc<AtomicU64>,
        counter: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        fn wall_clock_secs(&self) -> u64 {
            1_700_000_000 + self.now().as_secs()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = n.to_le_bytes()[i % 8];
            }
        }
    }

    fn driver() -> (ServerDriver<TestEnv>, TestEnv) {
        let env = TestEnv::default();
        (ServerDriver::new(env.clone(), ServerConfig::default()).unwrap(), env)
    }

    fn connect(server: &mut ServerDriver<TestEnv>) -> SessionId {
        let session_id = server.allocate_session_id();
        server.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();
        session_id
    }

    fn send(server: &mut ServerDriver<TestEnv>, session_id: SessionId, text: &str) -> Vec<ServerAction> {
        server
            .process_event(ServerEvent::MessageReceived { session_id, text: text.to_string() })
            .unwrap()
    }

    fn sent_to(actions: &[ServerAction], target: SessionId) -> Vec<&ServerMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::SendToSession { session_id, message } if *session_id == target => {
                    Some(message)
                },
                _ => None,
            })
            .collect()
    }

    fn notices(actions: &[ServerAction], target: SessionId) -> Vec<&str> {
        sent_to(actions, target)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::AdminNotification(n) => Some(n.message.as_str()),
                _ => None,
            })
            .collect()
    }

    fn error_code(actions: &[ServerAction], target: SessionId) -> Option<String> {
        sent_to(actions, target).into_iter().find_map(|m| match m {
            ServerMessage::Error(e) => Some(e.code.clone()),
            _ => None,
        })
    }

    #[test]
    fn accepted_connection_learns_its_session_id() {
        let (mut server, _) = driver();
        let session_id = server.allocate_session_id();

        let actions = server.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();

        assert_eq!(server.connection_count(), 1);
        assert_eq!(sent_to(&actions, session_id), vec![&ServerMessage::Session(
            SessionAssigned { sid: session_id }
        )]);
    }

    #[test]
    fn server_rejects_when_max_connections_exceeded() {
        let env = TestEnv::default();
        let config = ServerConfig { max_connections: 2, ..Default::default() };
        let mut server = ServerDriver::new(env, config).unwrap();

        connect(&mut server);
        connect(&mut server);
        let session_id = server.allocate_session_id();
        let actions = server.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();

        assert_eq!(server.connection_count(), 2);
        assert_eq!(error_code(&actions, session_id).as_deref(), Some(ErrorPayload::SERVER_FULL));
        assert!(matches!(actions.last(), Some(ServerAction::CloseConnection { .. })));
    }

    #[test]
    fn duplicate_accept_is_an_error() {
        let (mut server, _) = driver();
        let session_id = connect(&mut server);

        let result = server.process_event(ServerEvent::ConnectionAccepted { session_id });
        assert!(matches!(result, Err(ServerError::SessionAlreadyExists(id)) if id == session_id));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ServerConfig::default();
        config.arbiter.tick_interval = Duration::ZERO;

        assert!(matches!(
            ServerDriver::new(TestEnv::default(), config),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn first_request_is_granted_immediately() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);

        let actions = send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);

        assert_eq!(sent_to(&actions, alice), vec![&ServerMessage::TimeStart(90)]);
        assert_eq!(server.arbiter().holder(), Some(alice));
    }

    #[test]
    fn waiting_session_gets_its_position() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);
        let bob = connect(&mut server);

        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);
        let actions = send(&mut server, bob, r#"{"event":"userRequestAdd"}"#);

        assert_eq!(sent_to(&actions, bob), vec![&ServerMessage::QueuePosition(
            wheelhouse_proto::QueuePosition { position: 0, queue_length: 2 }
        )]);
        assert!(sent_to(&actions, alice).is_empty());
    }

    #[test]
    fn malformed_message_gets_error_reply() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);

        let actions = send(&mut server, alice, "not json");

        assert_eq!(error_code(&actions, alice).as_deref(), Some(ErrorPayload::INVALID_MESSAGE));
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn message_from_unknown_session_is_an_error() {
        let (mut server, _) = driver();

        let result = server.process_event(ServerEvent::MessageReceived {
            session_id: SessionId::new(77),
            text: r#"{"event":"userRequestAdd"}"#.to_string(),
        });
        assert!(matches!(result, Err(ServerError::SessionNotFound(_))));
    }

    #[test]
    fn control_from_non_holder_is_rejected() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);
        let bob = connect(&mut server);
        let pi = connect(&mut server);
        send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);
        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);

        let actions = send(&mut server, bob, r#"{"event":"controlData","data":{"t":100,"s":0}}"#);

        assert_eq!(error_code(&actions, bob).as_deref(), Some(ErrorPayload::NOT_HOLDER));
        assert!(sent_to(&actions, pi).is_empty());
    }

    #[test]
    fn holder_command_reaches_actuator() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);
        let pi = connect(&mut server);
        let attach = send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"pi"}}"#);
        assert!(matches!(
            sent_to(&attach, pi)[..],
            [ServerMessage::ActuatorCommand(cmd)] if cmd.drive().is_neutral()
        ));

        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);
        let actions =
            send(&mut server, alice, r#"{"event":"message","data":{"throttle":"forward","turn":"left"}}"#);

        match sent_to(&actions, pi)[..] {
            [ServerMessage::ActuatorCommand(cmd)] => {
                assert_eq!(cmd.throttle_percent, 100);
                assert_eq!(cmd.turn_percent, -100);
                assert!(!cmd.emergency);
            },
            ref other => panic!("unexpected {other:?}"),
        }
    }

    /// Holder with an attached vehicle; returns (holder, vehicle).
    fn driving(server: &mut ServerDriver<TestEnv>) -> (SessionId, SessionId) {
        let alice = connect(server);
        let pi = connect(server);
        send(server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);
        send(server, alice, r#"{"event":"userRequestAdd"}"#);
        (alice, pi)
    }

    fn forwarded(actions: &[ServerAction], pi: SessionId) -> Option<(i8, i8)> {
        sent_to(actions, pi).into_iter().find_map(|m| match m {
            ServerMessage::ActuatorCommand(cmd) => Some((cmd.throttle_percent, cmd.turn_percent)),
            _ => None,
        })
    }

    #[test]
    fn signed_slider_values_keep_their_magnitude() {
        let (mut server, _) = driver();
        let (alice, pi) = driving(&mut server);

        let actions = send(
            &mut server,
            alice,
            r#"{"event":"message","data":{"throttle":"forward","turn":"left","throttleValue":20,"turnValue":-10}}"#,
        );

        assert_eq!(forwarded(&actions, pi), Some((20, -10)));
    }

    #[test]
    fn unsigned_percentages_follow_the_direction_words() {
        let (mut server, _) = driver();
        let (alice, pi) = driving(&mut server);

        let actions = send(
            &mut server,
            alice,
            r#"{"event":"message","data":{"throttle":"backward","turn":"right","throttle_percent":15,"turn_percent":30}}"#,
        );

        assert_eq!(forwarded(&actions, pi), Some((-15, 30)));
    }

    #[test]
    fn numeric_throttle_string_drives_at_that_speed() {
        let (mut server, _) = driver();
        let (alice, pi) = driving(&mut server);

        let actions =
            send(&mut server, alice, r#"{"event":"message","data":{"throttle":"50","turn":"none"}}"#);

        assert_eq!(error_code(&actions, alice), None);
        assert_eq!(forwarded(&actions, pi), Some((50, 0)));
    }

    #[test]
    fn actuator_cannot_queue_for_control() {
        let (mut server, _) = driver();
        let pi = connect(&mut server);
        send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);

        let actions = send(&mut server, pi, r#"{"event":"userRequestAdd"}"#);

        assert_eq!(error_code(&actions, pi).as_deref(), Some(ErrorPayload::FORBIDDEN));
        assert!(server.arbiter().queue().is_empty());
        assert_eq!(server.arbiter().holder(), None);
    }

    #[test]
    fn holder_that_identifies_as_actuator_gives_up_its_turn() {
        let (mut server, _) = driver();
        let pi = connect(&mut server);
        let bob = connect(&mut server);
        send(&mut server, pi, r#"{"event":"userRequestAdd"}"#);
        send(&mut server, bob, r#"{"event":"userRequestAdd"}"#);

        let actions = send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);

        assert!(!server.arbiter().queue().contains(pi));
        assert_eq!(server.arbiter().holder(), Some(bob));
        assert!(sent_to(&actions, pi).iter().all(|m| matches!(
            m,
            ServerMessage::ActuatorCommand(_) | ServerMessage::ControlOff
        )));
    }

    #[test]
    fn admin_operations_require_observer_registration() {
        let (mut server, _) = driver();
        let mallory = connect(&mut server);

        let actions = send(&mut server, mallory, r#"{"event":"adminEmergencyStop"}"#);
        assert_eq!(error_code(&actions, mallory).as_deref(), Some(ErrorPayload::FORBIDDEN));
        assert!(!server.arbiter().is_frozen());

        let actions = send(&mut server, mallory, r#"{"event":"adminRequestQueue"}"#);
        assert!(matches!(sent_to(&actions, mallory)[..], [
            ServerMessage::AdminQueue(_),
            ServerMessage::ActuatorStatus(ActuatorStatus { connected: false })
        ]));

        send(&mut server, mallory, r#"{"event":"adminEmergencyStop"}"#);
        assert!(server.arbiter().is_frozen());
    }

    #[test]
    fn admin_out_of_range_update_is_reported() {
        let (mut server, _) = driver();
        let admin = connect(&mut server);
        let alice = connect(&mut server);
        send(&mut server, admin, r#"{"event":"adminRequestQueue"}"#);
        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);

        let text = format!(
            r#"{{"event":"{}","data":{{"sid":"{alice}","timeAllowed":5}}}}"#,
            events::ADMIN_UPDATE_USER
        );
        let actions = send(&mut server, admin, &text);

        assert_eq!(error_code(&actions, admin).as_deref(), Some(ErrorPayload::OUT_OF_RANGE));
    }

    #[test]
    fn emergency_stop_notifies_everyone_and_stops_actuator() {
        let (mut server, _) = driver();
        let admin = connect(&mut server);
        let alice = connect(&mut server);
        let pi = connect(&mut server);
        send(&mut server, admin, r#"{"event":"adminRequestQueue"}"#);
        send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);
        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);

        let actions = send(&mut server, admin, r#"{"event":"adminEmergencyStop"}"#);

        let to_pi = sent_to(&actions, pi);
        assert!(matches!(to_pi[..], [ServerMessage::ActuatorCommand(cmd)] if cmd.emergency));
        assert!(sent_to(&actions, alice).contains(&&ServerMessage::ControlOff));
        assert!(sent_to(&actions, alice).contains(&&ServerMessage::EmergencyStop));
        assert!(sent_to(&actions, admin).contains(&&ServerMessage::EmergencyStop));
        assert_eq!(server.arbiter().queue().current_index(), None);
        assert_eq!(server.arbiter().queue().len(), 1);
        assert_eq!(notices(&actions, admin), vec![crate::EMERGENCY_STOP_SENT]);
    }

    #[test]
    fn ticks_count_down_and_expire() {
        let (mut server, env) = driver();
        let alice = connect(&mut server);
        let admin = connect(&mut server);
        send(&mut server, admin, r#"{"event":"adminRequestQueue"}"#);
        send(&mut server, admin, r#"{"event":"adminSetDefaultTime","data":{"time":10}}"#);
        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);

        let mut seen_control_off = false;
        for _ in 0..10 {
            env.advance(Duration::from_secs(1));
            send(&mut server, alice, r#"{"event":"timeleft","data":{"message":5}}"#);
            let actions = server.process_event(ServerEvent::Tick).unwrap();
            seen_control_off |= sent_to(&actions, alice).contains(&&ServerMessage::ControlOff);
        }

        assert!(seen_control_off);
        assert_eq!(server.arbiter().holder(), None);
        assert!(server.arbiter().queue().is_empty());
    }

    #[test]
    fn holder_disconnect_stops_vehicle_and_promotes_next() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);
        let bob = connect(&mut server);
        let pi = connect(&mut server);
        send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);
        send(&mut server, alice, r#"{"event":"userRequestAdd"}"#);
        send(&mut server, bob, r#"{"event":"userRequestAdd"}"#);

        let actions = server
            .process_event(ServerEvent::ConnectionClosed {
                session_id: alice,
                reason: "client disconnect".to_string(),
            })
            .unwrap();

        assert!(matches!(
            sent_to(&actions, pi)[..],
            [ServerMessage::ActuatorCommand(cmd)] if cmd.drive().is_neutral()
        ));
        assert_eq!(sent_to(&actions, bob), vec![&ServerMessage::TimeStart(90)]);
        assert_eq!(server.connection_count(), 2);
    }

    #[test]
    fn actuator_detach_is_reported_to_admins() {
        let (mut server, _) = driver();
        let admin = connect(&mut server);
        let pi = connect(&mut server);
        send(&mut server, admin, r#"{"event":"adminRequestQueue"}"#);
        let attach = send(&mut server, pi, r#"{"event":"identify","data":{"user_agent":"Pi"}}"#);
        assert!(sent_to(&attach, admin)
            .contains(&&ServerMessage::ActuatorStatus(ActuatorStatus { connected: true })));

        let actions = server
            .process_event(ServerEvent::ConnectionClosed { session_id: pi, reason: "eof".into() })
            .unwrap();

        assert!(sent_to(&actions, admin)
            .contains(&&ServerMessage::ActuatorStatus(ActuatorStatus { connected: false })));
        assert_eq!(server.registry().actuator(), None);
        assert_eq!(notices(&attach, admin), vec![ACTUATOR_CONNECTED]);
        assert_eq!(notices(&actions, admin), vec![ACTUATOR_DISCONNECTED]);
    }

    #[test]
    fn emergency_stop_without_actuator_is_reported_as_failed() {
        let (mut server, _) = driver();
        let admin = connect(&mut server);
        send(&mut server, admin, r#"{"event":"adminRequestQueue"}"#);

        let actions = send(&mut server, admin, r#"{"event":"adminEmergencyStop"}"#);

        assert_eq!(notices(&actions, admin), vec![crate::EMERGENCY_STOP_FAILED]);
        assert!(server.arbiter().is_frozen());
    }

    #[test]
    fn closing_unknown_connection_is_a_no_op() {
        let (mut server, _) = driver();
        let actions = server
            .process_event(ServerEvent::ConnectionClosed {
                session_id: SessionId::new(5),
                reason: "eof".to_string(),
            })
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn late_heartbeat_is_silently_ignored() {
        let (mut server, _) = driver();
        let alice = connect(&mut server);

        let actions = send(&mut server, alice, r#"{"event":"timeleft","data":{"message":3}}"#);

        assert!(sent_to(&actions, alice).is_empty());
    }

    #[test]
    fn decode_errors_name_the_problem() {
        let err = ClientMessage::decode(r#"{"event":"nope"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(_)));
    }
}
