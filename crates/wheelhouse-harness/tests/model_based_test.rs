//! Model-based property tests.
//!
//! Random operation sequences are applied to both [`ModelWorld`] and a real
//! [`SimServer`]. After every step the results must agree, the observable
//! queue state must match, and the standard invariants must hold on the
//! real server.

use std::collections::BTreeMap;

use proptest::prelude::*;
use wheelhouse_core::{ArbiterConfig, GlobalConfig};
use wheelhouse_harness::{
    ClientId, Invariant, InvariantRegistry, ModelWorld, ObservableState, Operation, OperationError,
    OperationResult, SimServer, StopBeforeEveryGrant,
};
use wheelhouse_proto::{
    AdminRequest, ClientMessage, ControlPayload, ErrorPayload, Heartbeat, MoveUser, RemoveUser,
    ServerMessage, SessionId, SetDefaultTime, UpdateUser,
};
use wheelhouse_server::DriverConfig;

const NUM_CLIENTS: u8 = 4;

/// Short turns and the default heartbeat window, so expiries of every kind
/// show up in short sequences.
fn arbiter_config() -> ArbiterConfig {
    ArbiterConfig {
        time: GlobalConfig { default_time_allowed: 12, ..GlobalConfig::default() },
        ..ArbiterConfig::default()
    }
}

/// The real server, driven the way the model is.
struct RealWorld {
    server: SimServer,
    admin: SessionId,
    /// Live session per participant
    sessions: BTreeMap<ClientId, SessionId>,
    /// Last session a participant had, kept after it disconnects
    stale: BTreeMap<ClientId, SessionId>,
}

impl RealWorld {
    fn new(seed: u64) -> Self {
        let config = DriverConfig { arbiter: arbiter_config(), ..DriverConfig::default() };
        let mut server = SimServer::with_seed(seed, config).unwrap();
        server.attach_actuator().unwrap();
        let admin = server.register_admin().unwrap();
        Self { server, admin, sessions: BTreeMap::new(), stale: BTreeMap::new() }
    }

    fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Connect { client } => {
                if self.sessions.contains_key(&client) {
                    return OperationResult::Error(OperationError::AlreadyConnected);
                }
                let sid = self.server.connect().unwrap();
                self.sessions.insert(client, sid);
                OperationResult::Ok
            },
            Operation::Disconnect { client } => {
                let Some(sid) = self.sessions.remove(&client) else {
                    return OperationResult::Error(OperationError::NotConnected);
                };
                self.stale.insert(client, sid);
                self.server.disconnect(sid).unwrap();
                OperationResult::Ok
            },
            Operation::RequestControl { client } => {
                self.participant(client, &ClientMessage::RequestControl)
            },
            Operation::EndTurn { client } => self.participant(client, &ClientMessage::EndTurn),
            Operation::Heartbeat { client } => {
                let heartbeat = ClientMessage::Heartbeat(Heartbeat { seconds_remaining: 0 });
                self.participant(client, &heartbeat)
            },
            Operation::Drive { client, throttle, steer } => {
                let payload = ControlPayload::Percent {
                    throttle: f64::from(throttle),
                    steer: f64::from(steer),
                };
                self.participant(client, &ClientMessage::Control(payload))
            },
            Operation::Tick => {
                self.server.tick().unwrap();
                OperationResult::Ok
            },
            Operation::ForceNext => self.admin(AdminRequest::ForceNext),
            Operation::EmergencyStop => self.admin(AdminRequest::EmergencyStop),
            Operation::Resume => self.admin(AdminRequest::Resume),
            Operation::RemoveUser { target } => {
                let sid = self.target(target);
                self.admin(AdminRequest::RemoveUser(RemoveUser { sid }))
            },
            Operation::UpdateUser { target, seconds } => {
                let sid = self.target(target);
                let time_allowed = i64::from(seconds);
                self.admin(AdminRequest::UpdateUser(UpdateUser { sid, time_allowed }))
            },
            Operation::SetDefaultTime { seconds } => {
                self.admin(AdminRequest::SetDefaultTime(SetDefaultTime { time: i64::from(seconds) }))
            },
            Operation::MoveUser { target, position } => {
                let sid = self.target(target);
                let position = usize::from(position);
                self.admin(AdminRequest::MoveUser(MoveUser { sid, position }))
            },
        }
    }

    fn participant(&mut self, client: ClientId, message: &ClientMessage) -> OperationResult {
        let Some(&sid) = self.sessions.get(&client) else {
            return OperationResult::Error(OperationError::NotConnected);
        };
        self.server.take_outbox(sid);
        self.server.send(sid, message).unwrap();
        result_from(&self.server.take_outbox(sid))
    }

    fn admin(&mut self, request: AdminRequest) -> OperationResult {
        self.server.take_outbox(self.admin);
        self.server.send(self.admin, &ClientMessage::Admin(request)).unwrap();
        result_from(&self.server.take_outbox(self.admin))
    }

    /// Session id an admin would name for this participant. Never-seen
    /// participants get an id no connection holds.
    fn target(&self, client: ClientId) -> SessionId {
        self.sessions
            .get(&client)
            .or_else(|| self.stale.get(&client))
            .copied()
            .unwrap_or(SessionId::new(u64::from(client) + 1))
    }

    fn observable_state(&self) -> ObservableState {
        let arbiter = self.server.driver().arbiter();
        let participants: BTreeMap<SessionId, ClientId> =
            self.sessions.iter().map(|(client, sid)| (*sid, *client)).collect();
        let client_of = |sid: SessionId| participants.get(&sid).copied().unwrap_or(u8::MAX);

        let queue = arbiter.queue();
        ObservableState {
            queue: queue.iter().map(|s| client_of(s.id())).collect(),
            allowances: queue.iter().map(|s| s.time_allowed()).collect(),
            holder: arbiter.holder().map(client_of),
            holder_remaining: queue.holder().map(|s| s.time_remaining()),
            frozen: arbiter.is_frozen(),
            default_time_allowed: arbiter.config().time.default_time_allowed,
        }
    }
}

fn result_from(replies: &[ServerMessage]) -> OperationResult {
    let code = replies.iter().find_map(|m| match m {
        ServerMessage::Error(err) => Some(err.code.as_str()),
        _ => None,
    });

    match code {
        None => OperationResult::Ok,
        Some(ErrorPayload::NOT_HOLDER) => OperationResult::Error(OperationError::NotHolder),
        Some(ErrorPayload::NOT_FOUND) => OperationResult::Error(OperationError::NotFound),
        Some(ErrorPayload::OUT_OF_RANGE) => OperationResult::Error(OperationError::OutOfRange),
        Some(ErrorPayload::INVALID_POSITION) => {
            OperationResult::Error(OperationError::InvalidPosition)
        },
        Some(other) => panic!("unexpected error code {other}"),
    }
}

fn client() -> impl Strategy<Value = ClientId> {
    0..NUM_CLIENTS
}

fn seconds() -> impl Strategy<Value = u16> {
    prop_oneof![
        1 => 0u16..10,
        6 => 10u16..40,
        1 => 2990u16..3010,
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => client().prop_map(|client| Operation::Connect { client }),
        1 => client().prop_map(|client| Operation::Disconnect { client }),
        4 => client().prop_map(|client| Operation::RequestControl { client }),
        1 => client().prop_map(|client| Operation::EndTurn { client }),
        3 => client().prop_map(|client| Operation::Heartbeat { client }),
        2 => (client(), -100i8..=100, -100i8..=100)
            .prop_map(|(client, throttle, steer)| Operation::Drive { client, throttle, steer }),
        6 => Just(Operation::Tick),
        1 => Just(Operation::ForceNext),
        1 => Just(Operation::EmergencyStop),
        1 => Just(Operation::Resume),
        1 => client().prop_map(|target| Operation::RemoveUser { target }),
        1 => (client(), seconds())
            .prop_map(|(target, seconds)| Operation::UpdateUser { target, seconds }),
        1 => seconds().prop_map(|seconds| Operation::SetDefaultTime { seconds }),
        1 => (client(), 0u8..6)
            .prop_map(|(target, position)| Operation::MoveUser { target, position }),
    ]
}

fn run(seed: u64, ops: &[Operation]) -> Result<(), TestCaseError> {
    let mut model = ModelWorld::new(usize::from(NUM_CLIENTS), &arbiter_config());
    let mut real = RealWorld::new(seed);
    let invariants = InvariantRegistry::standard();

    for (step, op) in ops.iter().enumerate() {
        let expected = model.apply(op);
        let actual = real.apply(op);
        prop_assert_eq!(expected, actual, "step {}: {:?}", step, op);

        prop_assert_eq!(
            model.observable_state(),
            real.observable_state(),
            "state diverged at step {}: {:?}",
            step,
            op
        );

        if let Err(violations) = invariants.check_all(&real.server.snapshot()) {
            return Err(TestCaseError::fail(format!(
                "step {step} ({op:?}) violated: {violations:?}"
            )));
        }
    }
    Ok(())
}

#[test]
fn prop_server_matches_model() {
    proptest!(ProptestConfig::with_cases(256), |(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 1..120)
    )| {
        run(seed, &ops)?;
    });
}

#[test]
fn prop_every_turn_starts_with_a_stopped_vehicle() {
    proptest!(|(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 1..200)
    )| {
        let mut real = RealWorld::new(seed);
        for op in &ops {
            real.apply(op);
        }

        let snapshot = real.server.snapshot();
        prop_assert!(snapshot.actuator_continuous);
        prop_assert!(StopBeforeEveryGrant.check(&snapshot).is_ok());
    });
}

#[test]
fn disconnected_holder_is_replaced_in_both_worlds() {
    let ops = [
        Operation::Connect { client: 0 },
        Operation::Connect { client: 1 },
        Operation::RequestControl { client: 0 },
        Operation::RequestControl { client: 1 },
        Operation::Disconnect { client: 0 },
        Operation::Tick,
        Operation::RemoveUser { target: 0 },
    ];
    run(1, &ops).unwrap();
}

#[test]
fn frozen_queue_agrees_in_both_worlds() {
    let ops = [
        Operation::Connect { client: 0 },
        Operation::Connect { client: 1 },
        Operation::RequestControl { client: 0 },
        Operation::RequestControl { client: 1 },
        Operation::EmergencyStop,
        Operation::Tick,
        Operation::MoveUser { target: 1, position: 0 },
        Operation::Drive { client: 0, throttle: 50, steer: 0 },
        Operation::Resume,
        Operation::Heartbeat { client: 1 },
    ];
    run(2, &ops).unwrap();
}
