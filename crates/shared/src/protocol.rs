use geometry::RigidTransform;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{CommandId, CommandKind, Peer, StatusCode},
    error::ProtocolError,
};

/// Wire-level message body. Framing, device naming and query semantics come
/// from the underlying medical-imaging network standard; this type only
/// mirrors the three message classes the session consumes and produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Status { code: u16, sub_code: u16 },
    Transform { matrix: RigidTransform },
    Query { device: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub body: MessageBody,
}

impl Message {
    /// A one-shot command message, named by its command id.
    pub fn command(id: &CommandId, kind: CommandKind) -> Self {
        Self {
            name: id.to_string(),
            body: MessageBody::Text {
                text: kind.wire_name().to_string(),
            },
        }
    }

    /// A persistent outbound command payload, registered once and re-pushed
    /// per tick (position polling, needle retraction).
    pub fn persistent_command(kind: CommandKind) -> Self {
        Self {
            name: kind.wire_name().to_string(),
            body: MessageBody::Text {
                text: kind.wire_name().to_string(),
            },
        }
    }

    pub fn transform(id: &CommandId, matrix: RigidTransform) -> Self {
        Self {
            name: id.to_string(),
            body: MessageBody::Transform { matrix },
        }
    }

    /// Explicit status query against the peer's STATUS device.
    pub fn status_query() -> Self {
        Self {
            name: "GET_STATUS".to_string(),
            body: MessageBody::Query {
                device: "STATUS".to_string(),
            },
        }
    }
}

/// Which inbound transform stream a transform message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformChannel {
    /// Echo of the last transform we sent, for verification.
    AckEcho,
    /// Robot-adjusted reachable target.
    ReachableTarget,
    /// Periodic robot position report.
    CurrentPosition,
}

/// What a status report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusContext {
    /// Result of a phase-transition attempt, tagged with the command kind.
    Command(CommandKind),
    /// Response to an explicit status query; informational only.
    CurrentStatus,
}

/// The closed set of typed events the core ingests. Wire names are parsed
/// exactly once, here; the correlation key travels structurally from then on.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AcknowledgmentReceived {
        peer: Peer,
        id: CommandId,
        command: CommandKind,
    },
    StatusReceived {
        peer: Peer,
        context: StatusContext,
        code: StatusCode,
    },
    TransformReceived {
        peer: Peer,
        channel: TransformChannel,
        matrix: RigidTransform,
    },
    /// Robot-reported flag that terminates tracked-tip streaming.
    TargetReached { peer: Peer, reached: bool },
}

impl InboundEvent {
    pub fn parse(peer: Peer, message: &Message) -> Result<Self, ProtocolError> {
        match &message.body {
            MessageBody::Text { text } => {
                if let Some(stamp) = message.name.strip_prefix("ACK_") {
                    let id = CommandId::parse(&format!("CMD_{stamp}"))?;
                    let command = CommandKind::from_wire_name(text)
                        .ok_or_else(|| ProtocolError::UnknownCommand(text.clone()))?;
                    return Ok(InboundEvent::AcknowledgmentReceived { peer, id, command });
                }
                if message.name == "HAS_REACHED_TARGET" {
                    return Ok(InboundEvent::TargetReached {
                        peer,
                        reached: text.trim() == "1",
                    });
                }
                Err(ProtocolError::UnrecognizedMessage(message.name.clone()))
            }
            MessageBody::Status { code, .. } => {
                let code = StatusCode::from_index(*code)?;
                let context = if message.name == "CURRENT_STATUS" {
                    StatusContext::CurrentStatus
                } else {
                    let kind = CommandKind::from_wire_name(&message.name)
                        .ok_or_else(|| ProtocolError::UnrecognizedMessage(message.name.clone()))?;
                    StatusContext::Command(kind)
                };
                Ok(InboundEvent::StatusReceived {
                    peer,
                    context,
                    code,
                })
            }
            MessageBody::Transform { matrix } => {
                let channel = if message.name.starts_with("ACK") {
                    TransformChannel::AckEcho
                } else if message.name == "REACHABLE_TARGET" {
                    TransformChannel::ReachableTarget
                } else if message.name == "CURRENT_POSITION" {
                    TransformChannel::CurrentPosition
                } else {
                    return Err(ProtocolError::UnrecognizedMessage(message.name.clone()));
                };
                Ok(InboundEvent::TransformReceived {
                    peer,
                    channel,
                    matrix: *matrix,
                })
            }
            MessageBody::Query { .. } => {
                Err(ProtocolError::UnrecognizedMessage(message.name.clone()))
            }
        }
    }
}
