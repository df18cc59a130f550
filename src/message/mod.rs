//! Frames exchanged with the heater

pub mod command;
pub mod status_message;

pub use command::Command;
pub use status_message::StatusMessage;

use crate::codec::MARKER;

pub const RESP_BIND_REQUEST: u8 = 0x20;
pub const RESP_BIND_ACCEPTED: u8 = 0x21;
pub const RESP_BIND_REJECTED: u8 = 0x22;
pub const RESP_CMD_ACK: u8 = 0x41;
pub const RESP_REG_ADDR: u8 = 0x43;
pub const RESP_WRITE_ACK: u8 = 0x44;
pub const RESP_PARA: u8 = 0x46;
pub const RESP_STATUS: u8 = 0xFF;

/// A notification received from the heater
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Status(StatusMessage),
    /// The heater wants this client to identify itself
    BindRequest,
    BindAccepted,
    BindRejected,
    /// A button press was acknowledged
    CommandAck { button: Option<u8> },
    /// Readback of a short parameter
    Parameter { kind: Option<u8>, value: Option<u8> },
    /// A well formed frame this client has no use for
    Other(u8),
}

impl Notification {
    /// Classify a raw notification. Frames that are not for this protocol, and status
    /// broadcasts too short to decode, yield `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 || data[0] != MARKER {
            return None;
        }

        let notification = match data[2] {
            RESP_STATUS => Self::Status(StatusMessage::new(data)?),
            RESP_BIND_REQUEST => Self::BindRequest,
            RESP_BIND_ACCEPTED => Self::BindAccepted,
            RESP_BIND_REJECTED => Self::BindRejected,
            RESP_CMD_ACK => Self::CommandAck { button: data.get(3).copied() },
            RESP_PARA => Self::Parameter {
                kind: data.get(3).copied(),
                value: data.get(5).copied(),
            },
            other => Self::Other(other),
        };
        Some(notification)
    }
}
