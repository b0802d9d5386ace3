//! Error types for mqflow.

use std::io;

use thiserror::Error;

/// Main error type for mqflow.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Not found")]
    NotFound,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Invalid input: {0}")]
    Invalid(&'static str),

    #[error("Packet exceeds the peer's maximum packet size")]
    OversizePacket,
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        match e {
            SendError::OversizePacket => Error::OversizePacket,
            SendError::Io(e) => Error::Io(e),
        }
    }
}

/// MQTT protocol errors raised by the delivery state machines.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid QoS: {0}")]
    InvalidQos(u8),

    #[error("Ack QoS does not match message QoS for mid {0}")]
    AckQosMismatch(u16),

    #[error("Ack out of order in QoS 2 flow for mid {0}")]
    AckOutOfOrder(u16),

    #[error("Ack for mid {0} is only valid on a QoS 2 message")]
    AckNotQos2(u16),
}

/// Errors surfaced by the packet send layer.
///
/// An oversize packet is a benign completion: the message is retired
/// without being sent. Any other I/O failure leaves the delivery state
/// untouched so the scheduling layer can retry on the next writability
/// event.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Packet exceeds the peer's maximum packet size")]
    OversizePacket,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SendError {
    /// True if the send failed because the socket buffer is full.
    pub fn is_would_block(&self) -> bool {
        matches!(self, SendError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
