//! Simulation server wrapper for deterministic tests.
//!
//! `SimServer` wraps `ServerDriver` with a `SimEnv` and stands in for the
//! WebSocket runtime: tests open connections, send text frames, and advance
//! the virtual clock one tick at a time. Everything the driver addresses to
//! a session lands in that session's outbox, in order.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    time::Duration,
};

use wheelhouse_proto::{AdminRequest, ClientMessage, Identify, ServerMessage, SessionId};
use wheelhouse_server::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};

use crate::{
    SimEnv,
    invariants::{Milestone, SystemSnapshot},
};

/// Test-driven simulation server.
///
/// Nothing runs on its own: time moves only through [`SimServer::tick`] and
/// [`SimServer::advance`].
pub struct SimServer {
    /// The action-based server driver
    driver: ServerDriver<SimEnv>,
    /// Shared with the driver
    env: SimEnv,
    /// Delivered messages per open session
    outboxes: BTreeMap<SessionId, Vec<ServerMessage>>,
    /// Sessions the driver asked to close
    closed: BTreeSet<SessionId>,
    /// Log lines in emission order
    logs: Vec<(LogLevel, String)>,
    /// Grants and vehicle stops, for ordering checks
    milestones: Vec<Milestone>,
    /// Whether an actuator has been attached from before the first grant
    /// without a gap
    actuator_continuous: bool,
}

impl SimServer {
    /// Simulation server with seed 0.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the configuration is rejected.
    pub fn new(config: DriverConfig) -> io::Result<Self> {
        Self::with_seed(0, config)
    }

    /// Simulation server with its own RNG seed.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the configuration is rejected.
    pub fn with_seed(seed: u64, config: DriverConfig) -> io::Result<Self> {
        let env = SimEnv::with_seed(seed);
        let driver = ServerDriver::new(env.clone(), config)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        Ok(Self {
            driver,
            env,
            outboxes: BTreeMap::new(),
            closed: BTreeSet::new(),
            logs: Vec::new(),
            milestones: Vec::new(),
            actuator_continuous: false,
        })
    }

    /// Open a connection and return its session id.
    ///
    /// The `session` greeting stays in the outbox.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn connect(&mut self) -> io::Result<SessionId> {
        let session_id = self.driver.allocate_session_id();
        self.outboxes.insert(session_id, Vec::new());
        self.dispatch(ServerEvent::ConnectionAccepted { session_id })?;
        Ok(session_id)
    }

    /// Open a connection that identifies as the vehicle.
    ///
    /// # Errors
    ///
    /// Propagates driver and encoding errors.
    pub fn attach_actuator(&mut self) -> io::Result<SessionId> {
        let session_id = self.connect()?;
        if self.driver.arbiter().turns_granted() == 0 {
            self.actuator_continuous = true;
        }
        let identify = ClientMessage::Identify(Identify { user_agent: "Pi".to_string() });
        self.send(session_id, &identify)?;
        Ok(session_id)
    }

    /// Open a connection registered as an admin observer.
    ///
    /// # Errors
    ///
    /// Propagates driver and encoding errors.
    pub fn register_admin(&mut self) -> io::Result<SessionId> {
        let session_id = self.connect()?;
        self.send(session_id, &ClientMessage::Admin(AdminRequest::RequestQueue))?;
        Ok(session_id)
    }

    /// Send a typed client message.
    ///
    /// # Errors
    ///
    /// Encoding failures and driver errors.
    pub fn send(&mut self, session_id: SessionId, message: &ClientMessage) -> io::Result<()> {
        let text = message.encode().map_err(|e| io::Error::other(e.to_string()))?;
        self.send_text(session_id, text)
    }

    /// Send a raw text frame, as a misbehaving client would.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn send_text(&mut self, session_id: SessionId, text: impl Into<String>) -> io::Result<()> {
        self.dispatch(ServerEvent::MessageReceived { session_id, text: text.into() })
    }

    /// Close a connection from the client side.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn disconnect(&mut self, session_id: SessionId) -> io::Result<()> {
        if self.driver.registry().actuator() == Some(session_id) {
            self.actuator_continuous = false;
        }
        self.outboxes.remove(&session_id);
        self.dispatch(ServerEvent::ConnectionClosed {
            session_id,
            reason: "client closed".to_string(),
        })
    }

    /// Advance virtual time by one tick interval and run the scheduler.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn tick(&mut self) -> io::Result<()> {
        self.env.advance(self.driver.tick_interval());
        self.dispatch(ServerEvent::Tick)
    }

    /// Run `n` ticks.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn ticks(&mut self, n: usize) -> io::Result<()> {
        for _ in 0..n {
            self.tick()?;
        }
        Ok(())
    }

    /// Move the clock without ticking.
    pub fn advance(&self, by: Duration) {
        self.env.advance(by);
    }

    /// Messages delivered to a session so far.
    pub fn outbox(&self, session_id: SessionId) -> &[ServerMessage] {
        self.outboxes.get(&session_id).map_or(&[], Vec::as_slice)
    }

    /// Drain a session's outbox.
    pub fn take_outbox(&mut self, session_id: SessionId) -> Vec<ServerMessage> {
        self.outboxes.get_mut(&session_id).map(std::mem::take).unwrap_or_default()
    }

    /// Whether the driver closed this connection.
    pub fn is_closed(&self, session_id: SessionId) -> bool {
        self.closed.contains(&session_id)
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &ServerDriver<SimEnv> {
        &self.driver
    }

    /// The simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Log lines emitted so far.
    pub fn logs(&self) -> &[(LogLevel, String)] {
        &self.logs
    }

    /// Capture state for invariant checking.
    pub fn snapshot(&self) -> SystemSnapshot {
        let arbiter = self.driver.arbiter();
        let time = arbiter.config().time;
        let snapshot = arbiter.snapshot();

        SystemSnapshot::new(snapshot.queue, snapshot.current_index)
            .with_frozen(snapshot.frozen)
            .with_bounds(time.min_time_allowed, time.max_time_allowed)
            .with_turns_granted(arbiter.turns_granted())
            .with_milestones(self.milestones.clone(), self.actuator_continuous)
    }

    fn dispatch(&mut self, event: ServerEvent) -> io::Result<()> {
        let actions =
            self.driver.process_event(event).map_err(|e| io::Error::other(e.to_string()))?;
        self.execute_actions(actions);
        Ok(())
    }

    fn execute_actions(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::SendToSession { session_id, message } => {
                    self.record_milestone(session_id, &message);
                    if let Some(outbox) = self.outboxes.get_mut(&session_id) {
                        outbox.push(message);
                    }
                },
                ServerAction::CloseConnection { session_id, reason } => {
                    self.log(LogLevel::Debug, &format!("closing {session_id}: {reason}"));
                    self.closed.insert(session_id);
                    // The runtime reports every close back to the driver
                    let actions = self
                        .driver
                        .process_event(ServerEvent::ConnectionClosed { session_id, reason })
                        .unwrap_or_default();
                    self.execute_actions(actions);
                },
                ServerAction::Log { level, message } => {
                    self.log(level, &message);
                    self.logs.push((level, message));
                },
            }
        }
    }

    fn record_milestone(&mut self, session_id: SessionId, message: &ServerMessage) {
        match message {
            ServerMessage::TimeStart(_) => self.milestones.push(Milestone::Grant(session_id)),
            ServerMessage::ActuatorCommand(cmd) if cmd.drive().is_neutral() => {
                if self.driver.registry().actuator() == Some(session_id) {
                    self.milestones.push(Milestone::Stop);
                }
            },
            _ => {},
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}
