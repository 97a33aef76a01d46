//! Notification fan-out.
//!
//! Turns [`ArbiterAction`]s into addressed [`ServerAction`]s. Everything sent
//! is an idempotent snapshot or scalar, so a client that misses one message
//! is corrected by the next. Messages addressed to sessions that are no
//! longer registered are dropped here rather than in the transport.

use std::{ops::Sub, time::Duration};

use wheelhouse_core::{Arbiter, ArbiterAction, ExpiryReason};
use wheelhouse_proto::{
    ActuatorCommand, AdminNotification, Countdown, QueuePosition, Removed, ServerMessage,
    SessionId,
};

use crate::{
    driver::{LogLevel, ServerAction},
    registry::ConnectionRegistry,
};

/// Reason sent with `removed` when an admin takes a session out.
pub const REMOVED_BY_ADMIN: &str = "Removed by admin";

/// Admin notice when the vehicle identifies itself.
pub const ACTUATOR_CONNECTED: &str = "Raspberry Pi connected to server";

/// Admin notice when the vehicle's connection goes away.
pub const ACTUATOR_DISCONNECTED: &str = "Raspberry Pi disconnected from server";

/// Admin notice for an emergency stop that reached the vehicle.
pub const EMERGENCY_STOP_SENT: &str = "EMERGENCY STOP command sent to Raspberry Pi";

/// Admin notice for an emergency stop with no vehicle to receive it.
pub const EMERGENCY_STOP_FAILED: &str = "EMERGENCY STOP failed - No Raspberry Pi connected";

/// Fan-out context for one batch of arbiter actions.
pub(crate) struct FanOut<'a, I> {
    registry: &'a ConnectionRegistry,
    arbiter: &'a Arbiter<I>,
    timestamp: u64,
    out: Vec<ServerAction>,
}

impl<'a, I> FanOut<'a, I>
where
    I: Copy + Sub<Output = Duration>,
{
    pub(crate) fn new(
        registry: &'a ConnectionRegistry,
        arbiter: &'a Arbiter<I>,
        timestamp: u64,
    ) -> Self {
        Self { registry, arbiter, timestamp, out: Vec::new() }
    }

    /// Address every action and return what the runtime must execute.
    pub(crate) fn run(mut self, actions: Vec<ArbiterAction>) -> Vec<ServerAction> {
        for action in actions {
            self.dispatch(action);
        }
        self.out
    }

    fn dispatch(&mut self, action: ArbiterAction) {
        match action {
            ArbiterAction::Granted { session_id, time_allowed } => {
                self.send(session_id, ServerMessage::TimeStart(time_allowed));
                self.log(LogLevel::Info, format!("{session_id} granted control for {time_allowed}s"));
            },

            ArbiterAction::Countdown { session_id, time_remaining } => {
                self.send(session_id, ServerMessage::Countdown(Countdown { time_remaining }));
                if let Some(session) = self.arbiter.queue().get(session_id) {
                    self.to_admins(&ServerMessage::AdminRow(session.row()));
                }
            },

            ArbiterAction::Revoked { session_id, reason } => {
                self.send(session_id, ServerMessage::ControlOff);
                if reason == ExpiryReason::Removed {
                    self.send_removed(session_id);
                }
                self.log(
                    LogLevel::Info,
                    format!("{session_id} lost control: {}", reason.describe()),
                );
            },

            ArbiterAction::Actuate { command, emergency } => match self.registry.actuator() {
                Some(actuator) => {
                    let command = ActuatorCommand::from_drive(command, emergency);
                    self.send(actuator, ServerMessage::ActuatorCommand(command));
                },
                None => self.log(
                    LogLevel::Debug,
                    format!("no actuator connected, dropping {command:?}"),
                ),
            },

            ArbiterAction::QueueChanged => self.queue_changed(),

            ArbiterAction::SessionUpdated(row) => {
                self.to_admins(&ServerMessage::AdminRow(row));
            },

            ArbiterAction::SessionRemoved(session_id) => self.send_removed(session_id),

            ArbiterAction::EmergencyStopped { holder } => {
                let viewers: Vec<_> = self.registry.viewers().collect();
                for session_id in viewers {
                    self.send(session_id, ServerMessage::EmergencyStop);
                }
                let message = match holder {
                    Some(holder) => format!("emergency stop, {holder} lost control"),
                    None => "emergency stop with no holder".to_string(),
                };
                self.log(LogLevel::Warn, message);

                let notice = if self.registry.actuator().is_some() {
                    EMERGENCY_STOP_SENT
                } else {
                    EMERGENCY_STOP_FAILED
                };
                self.notify_admins(notice.to_string());
            },

            ArbiterAction::Resumed => {
                self.log(LogLevel::Info, "promotion resumed".to_string());
            },

            ArbiterAction::Diverged { session_id, reported, authoritative } => {
                self.send(
                    session_id,
                    ServerMessage::Countdown(Countdown { time_remaining: authoritative }),
                );
                self.log(
                    LogLevel::Debug,
                    format!(
                        "{session_id} reported {reported}s left, correcting to {authoritative}s"
                    ),
                );
            },

            ArbiterAction::Notice(message) => self.notify_admins(message),

            ArbiterAction::Warning(err) => self.log(LogLevel::Warn, err.to_string()),
        }
    }

    fn queue_changed(&mut self) {
        self.to_admins(&ServerMessage::AdminQueue(self.arbiter.snapshot()));

        let queue = self.arbiter.queue();
        let holder = queue.holder_id();
        let queue_length = queue.len();
        let waiting: Vec<SessionId> =
            queue.iter().map(|s| s.id()).filter(|id| Some(*id) != holder).collect();

        for (position, session_id) in waiting.into_iter().enumerate() {
            self.send(
                session_id,
                ServerMessage::QueuePosition(QueuePosition { position, queue_length }),
            );
        }
    }

    fn notify_admins(&mut self, message: String) {
        self.log(LogLevel::Info, format!("admin: {message}"));
        let notification = AdminNotification { message, timestamp: self.timestamp };
        self.to_admins(&ServerMessage::AdminNotification(notification));
    }

    fn send_removed(&mut self, session_id: SessionId) {
        self.send(
            session_id,
            ServerMessage::Removed(Removed { reason: REMOVED_BY_ADMIN.to_string() }),
        );
    }

    fn to_admins(&mut self, message: &ServerMessage) {
        let admins: Vec<_> = self.registry.admins().collect();
        for session_id in admins {
            self.send(session_id, message.clone());
        }
    }

    fn send(&mut self, session_id: SessionId, message: ServerMessage) {
        if self.registry.contains(session_id) {
            self.out.push(ServerAction::SendToSession { session_id, message });
        }
    }

    fn log(&mut self, level: LogLevel, message: String) {
        self.out.push(ServerAction::Log { level, message });
    }
}
