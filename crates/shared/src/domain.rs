use std::fmt;

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// The two peers a session talks to, each over its own channel connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    Robot,
    Scanner,
}

impl Peer {
    pub fn as_str(self) -> &'static str {
        match self {
            Peer::Robot => "ROBOT",
            Peer::Scanner => "SCANNER",
        }
    }
}

/// Authoritative workflow phase, owned exclusively by the phase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    StartUp,
    Calibration,
    Planning,
    Targeting,
    MoveToTarget,
    Emergency,
}

impl Phase {
    pub fn wire_name(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::StartUp => "START_UP",
            Phase::Calibration => "CALIBRATION",
            Phase::Planning => "PLANNING",
            Phase::Targeting => "TARGETING",
            Phase::MoveToTarget => "MOVE_TO_TARGET",
            Phase::Emergency => "EMERGENCY",
        }
    }
}

/// The fixed command vocabulary carried as wire-level string payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartUp,
    Calibration,
    Planning,
    Targeting,
    MoveToTarget,
    Stop,
    Emergency,
    RetractNeedle,
    CurrentPosition,
    GetStatus,
    StartSequence,
    StopSequence,
}

impl CommandKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            CommandKind::StartUp => "START_UP",
            CommandKind::Calibration => "CALIBRATION",
            CommandKind::Planning => "PLANNING",
            CommandKind::Targeting => "TARGETING",
            CommandKind::MoveToTarget => "MOVE_TO_TARGET",
            CommandKind::Stop => "STOP",
            CommandKind::Emergency => "EMERGENCY",
            CommandKind::RetractNeedle => "RETRACT_NEEDLE",
            CommandKind::CurrentPosition => "CURRENT_POSITION",
            CommandKind::GetStatus => "GET_STATUS",
            CommandKind::StartSequence => "START_SEQUENCE",
            CommandKind::StopSequence => "STOP_SEQUENCE",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "START_UP" => CommandKind::StartUp,
            "CALIBRATION" => CommandKind::Calibration,
            "PLANNING" => CommandKind::Planning,
            "TARGETING" => CommandKind::Targeting,
            "MOVE_TO_TARGET" => CommandKind::MoveToTarget,
            "STOP" => CommandKind::Stop,
            "EMERGENCY" => CommandKind::Emergency,
            "RETRACT_NEEDLE" => CommandKind::RetractNeedle,
            "CURRENT_POSITION" => CommandKind::CurrentPosition,
            "GET_STATUS" => CommandKind::GetStatus,
            "START_SEQUENCE" => CommandKind::StartSequence,
            "STOP_SEQUENCE" => CommandKind::StopSequence,
            _ => return None,
        })
    }

    /// The workflow phase this command requests, if it is phase-advancing.
    pub fn target_phase(self) -> Option<Phase> {
        Some(match self {
            CommandKind::StartUp => Phase::StartUp,
            CommandKind::Calibration => Phase::Calibration,
            CommandKind::Planning => Phase::Planning,
            CommandKind::Targeting => Phase::Targeting,
            CommandKind::MoveToTarget => Phase::MoveToTarget,
            CommandKind::Emergency => Phase::Emergency,
            _ => return None,
        })
    }

    /// Scanner-side sequence control; everything else goes to the robot.
    pub fn peer(self) -> Peer {
        match self {
            CommandKind::StartSequence | CommandKind::StopSequence => Peer::Scanner,
            _ => Peer::Robot,
        }
    }
}

/// The fixed 21-entry status table, indexed 0-20. Index 1 is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Invalid,
    Ok,
    UnknownError,
    PanicMode,
    NotFound,
    AccessDenied,
    Busy,
    TimeOut,
    Overflow,
    ChecksumError,
    ConfigError,
    ResourceError,
    UnknownInstruction,
    NotReady,
    ManualMode,
    Disabled,
    NotPresent,
    UnknownVersion,
    HardwareFailure,
    ShutDown,
    NumTypes,
}

impl StatusCode {
    pub const TABLE: [StatusCode; 21] = [
        StatusCode::Invalid,
        StatusCode::Ok,
        StatusCode::UnknownError,
        StatusCode::PanicMode,
        StatusCode::NotFound,
        StatusCode::AccessDenied,
        StatusCode::Busy,
        StatusCode::TimeOut,
        StatusCode::Overflow,
        StatusCode::ChecksumError,
        StatusCode::ConfigError,
        StatusCode::ResourceError,
        StatusCode::UnknownInstruction,
        StatusCode::NotReady,
        StatusCode::ManualMode,
        StatusCode::Disabled,
        StatusCode::NotPresent,
        StatusCode::UnknownVersion,
        StatusCode::HardwareFailure,
        StatusCode::ShutDown,
        StatusCode::NumTypes,
    ];

    pub fn from_index(index: u16) -> Result<Self, ProtocolError> {
        Self::TABLE
            .get(index as usize)
            .copied()
            .ok_or(ProtocolError::UnknownStatusCode(index))
    }

    pub fn index(self) -> u16 {
        Self::TABLE.iter().position(|c| *c == self).unwrap_or(0) as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Invalid => "STATUS_INVALID",
            StatusCode::Ok => "STATUS_OK",
            StatusCode::UnknownError => "STATUS_UNKNOWN_ERROR",
            StatusCode::PanicMode => "STATUS_PANIC_MODE",
            StatusCode::NotFound => "STATUS_NOT_FOUND",
            StatusCode::AccessDenied => "STATUS_ACCESS_DENIED",
            StatusCode::Busy => "STATUS_BUSY",
            StatusCode::TimeOut => "STATUS_TIME_OUT",
            StatusCode::Overflow => "STATUS_OVERFLOW",
            StatusCode::ChecksumError => "STATUS_CHECKSUM_ERROR",
            StatusCode::ConfigError => "STATUS_CONFIG_ERROR",
            StatusCode::ResourceError => "STATUS_RESOURCE_ERROR",
            StatusCode::UnknownInstruction => "STATUS_UNKNOWN_INSTRUCTION",
            StatusCode::NotReady => "STATUS_NOT_READY",
            StatusCode::ManualMode => "STATUS_MANUAL_MODE",
            StatusCode::Disabled => "STATUS_DISABLED",
            StatusCode::NotPresent => "STATUS_NOT_PRESENT",
            StatusCode::UnknownVersion => "STATUS_UNKNOWN_VERSION",
            StatusCode::HardwareFailure => "STATUS_HARDWARE_FAILURE",
            StatusCode::ShutDown => "STATUS_SHUT_DOWN",
            StatusCode::NumTypes => "STATUS_NUM_TYPES",
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

/// Command-class prefix for outbound message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPrefix {
    /// Phase and query commands.
    Cmd,
    /// Planned target transform.
    Tgt,
    /// Calibration (registration) transform.
    Clb,
    /// Scan-plane transform stream.
    Plane,
    /// Tracked needle-tip transform stream.
    Npos,
}

impl CommandPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandPrefix::Cmd => "CMD",
            CommandPrefix::Tgt => "TGT",
            CommandPrefix::Clb => "CLB",
            CommandPrefix::Plane => "PLANE",
            CommandPrefix::Npos => "NPOS",
        }
    }

    pub fn from_str_prefix(s: &str) -> Option<Self> {
        Some(match s {
            "CMD" => CommandPrefix::Cmd,
            "TGT" => CommandPrefix::Tgt,
            "CLB" => CommandPrefix::Clb,
            "PLANE" => CommandPrefix::Plane,
            "NPOS" => CommandPrefix::Npos,
            _ => return None,
        })
    }
}

/// Opaque per-session command identifier: a command-class prefix plus an
/// `HHMMSSffffff` sub-second stamp. Unique within a session as long as no two
/// commands of the same class are issued within one microsecond tick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId {
    prefix: CommandPrefix,
    stamp: String,
}

impl CommandId {
    pub fn new(prefix: CommandPrefix, at: DateTime<Local>) -> Self {
        let stamp = format!(
            "{:02}{:02}{:02}{:06}",
            at.hour(),
            at.minute(),
            at.second(),
            at.timestamp_subsec_micros()
        );
        Self { prefix, stamp }
    }

    pub fn now(prefix: CommandPrefix) -> Self {
        Self::new(prefix, Local::now())
    }

    /// Parse `PREFIX_HHMMSSffffff`. Acknowledgment correlation strips the
    /// `ACK_` device prefix before calling this, so downstream code never
    /// slices name strings itself.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let (prefix, stamp) = raw
            .split_once('_')
            .ok_or_else(|| ProtocolError::MalformedCommandId(raw.to_string()))?;
        let prefix = CommandPrefix::from_str_prefix(prefix)
            .ok_or_else(|| ProtocolError::MalformedCommandId(raw.to_string()))?;
        if stamp.len() != 12 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::MalformedCommandId(raw.to_string()));
        }
        Ok(Self {
            prefix,
            stamp: stamp.to_string(),
        })
    }

    pub fn prefix(&self) -> CommandPrefix {
        self.prefix
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    /// `HH:MM:SS:ffffff`, the command-log timestamp form of the stamp.
    pub fn log_timestamp(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            &self.stamp[0..2],
            &self.stamp[2..4],
            &self.stamp[4..6],
            &self.stamp[6..12]
        )
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix.as_str(), self.stamp)
    }
}

/// An outstanding command awaiting its acknowledgment/status pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: CommandId,
    pub kind: CommandKind,
    pub acknowledged: bool,
}
