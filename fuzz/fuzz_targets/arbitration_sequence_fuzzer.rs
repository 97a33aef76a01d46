//! Fuzz target for the arbitration state machine behind the driver
//!
//! # Strategy
//!
//! - Participants connect, queue, drive and vanish at random
//! - Admin requests with arbitrary targets and out-of-range values
//! - Raw garbage frames interleaved with valid ones
//! - Ticks with and without heartbeats
//!
//! # Invariants
//!
//! - At most one holder, always inside the queue
//! - Holder countdown stays in 1..=allowance
//! - Frozen means nobody holds control
//! - The vehicle is stopped before every new turn

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wheelhouse_harness::{InvariantRegistry, SimServer};
use wheelhouse_proto::{
    AdminRequest, ClientMessage, ControlPayload, Heartbeat, MoveUser, RemoveUser, SessionId,
    SetDefaultTime, UpdateUser,
};
use wheelhouse_server::DriverConfig;

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    steps: Vec<Step>,
}

#[derive(Debug, Arbitrary)]
enum Step {
    Connect,
    Disconnect { who: u8 },
    Request { who: u8 },
    EndTurn { who: u8 },
    Heartbeat { who: u8, reported: i64 },
    Drive { who: u8, throttle: f64, steer: f64 },
    Garbage { who: u8, text: String },
    Tick,
    Admin(AdminStep),
}

#[derive(Debug, Arbitrary)]
enum AdminStep {
    ForceNext,
    EmergencyStop,
    Resume,
    Remove { who: u8 },
    Update { who: u8, seconds: i64 },
    SetDefault { seconds: i64 },
    Move { who: u8, position: u8 },
}

fuzz_target!(|scenario: Scenario| {
    let mut server = SimServer::with_seed(scenario.seed, DriverConfig::default())
        .expect("default config is valid");
    server.attach_actuator().expect("actuator attaches");
    let admin = server.register_admin().expect("admin registers");

    let invariants = InvariantRegistry::standard();
    let mut sessions: Vec<SessionId> = Vec::new();
    let pick = |sessions: &[SessionId], who: u8| -> Option<SessionId> {
        if sessions.is_empty() {
            None
        } else {
            Some(sessions[usize::from(who) % sessions.len()])
        }
    };

    for step in scenario.steps.into_iter().take(256) {
        match step {
            Step::Connect => {
                let sid = server.connect().expect("connect");
                if !server.is_closed(sid) {
                    sessions.push(sid);
                }
            },
            Step::Disconnect { who } => {
                if let Some(sid) = pick(&sessions, who) {
                    sessions.retain(|s| *s != sid);
                    server.disconnect(sid).expect("disconnect");
                }
            },
            Step::Request { who } => send(&mut server, pick(&sessions, who), ClientMessage::RequestControl),
            Step::EndTurn { who } => send(&mut server, pick(&sessions, who), ClientMessage::EndTurn),
            Step::Heartbeat { who, reported } => send(
                &mut server,
                pick(&sessions, who),
                ClientMessage::Heartbeat(Heartbeat { seconds_remaining: reported }),
            ),
            Step::Drive { who, throttle, steer } => send(
                &mut server,
                pick(&sessions, who),
                ClientMessage::Control(ControlPayload::Percent { throttle, steer }),
            ),
            Step::Garbage { who, text } => {
                if let Some(sid) = pick(&sessions, who) {
                    server.send_text(sid, text).expect("garbage is answered, not fatal");
                }
            },
            Step::Tick => server.tick().expect("tick"),
            Step::Admin(step) => {
                let target = |who| pick(&sessions, who).unwrap_or(SessionId::new(1));
                let request = match step {
                    AdminStep::ForceNext => AdminRequest::ForceNext,
                    AdminStep::EmergencyStop => AdminRequest::EmergencyStop,
                    AdminStep::Resume => AdminRequest::Resume,
                    AdminStep::Remove { who } => AdminRequest::RemoveUser(RemoveUser { sid: target(who) }),
                    AdminStep::Update { who, seconds } => AdminRequest::UpdateUser(UpdateUser {
                        sid: target(who),
                        time_allowed: seconds,
                    }),
                    AdminStep::SetDefault { seconds } => {
                        AdminRequest::SetDefaultTime(SetDefaultTime { time: seconds })
                    },
                    AdminStep::Move { who, position } => AdminRequest::MoveUser(MoveUser {
                        sid: target(who),
                        position: usize::from(position),
                    }),
                };
                send(&mut server, Some(admin), ClientMessage::Admin(request));
            },
        }

        invariants.assert_all(&server.snapshot(), "during fuzzed sequence");
    }
});

fn send(server: &mut SimServer, sid: Option<SessionId>, message: ClientMessage) {
    if let Some(sid) = sid {
        server.send(sid, &message).expect("registered session");
    }
}
