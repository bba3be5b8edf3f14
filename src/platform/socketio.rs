//! Minimal Socket.IO v4 text-frame decoder.
//!
//! Packet layout:
//! `<packet type>[<# of binary attachments>-][<namespace>,][<ack id>][JSON payload]`
//!
//! Only text event packets are consumed here; when the attachment count is
//! greater than zero the following frames are raw binary and are ignored by
//! the session client.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SocketIoError {
    #[error("unhandled message version: {0}")]
    InvalidVersion(u8),
    #[error("unhandled message type: {0}")]
    InvalidType(u8),
    #[error("invalid packet")]
    InvalidPacket,
}

/// Socket.IO message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl MessageType {
    fn from_byte(data: u8) -> Result<Self, SocketIoError> {
        match data {
            0 => Ok(Self::Connect),
            1 => Ok(Self::Disconnect),
            2 => Ok(Self::Event),
            3 => Ok(Self::Ack),
            4 => Ok(Self::ConnectError),
            5 => Ok(Self::BinaryEvent),
            6 => Ok(Self::BinaryAck),
            other => Err(SocketIoError::InvalidType(other)),
        }
    }
}

/// A decoded Socket.IO v4 message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageV4 {
    pub message_type: MessageType,
    pub attachments: usize,
    pub namespace: String,
    pub id: usize,
    pub payload: Vec<u8>,
}

/// Decode a v4 text frame.
pub fn unmarshal_v4(data: &[u8]) -> Result<MessageV4, SocketIoError> {
    if data.len() < 2 {
        return Err(SocketIoError::InvalidPacket);
    }
    let version = data[0].wrapping_sub(b'0');
    if version != 4 {
        return Err(SocketIoError::InvalidVersion(version));
    }
    let message_type = MessageType::from_byte(data[1].wrapping_sub(b'0'))?;

    let mut msg = MessageV4 {
        message_type,
        attachments: 0,
        namespace: String::new(),
        id: 0,
        payload: Vec::new(),
    };

    let mut idx = 2;

    // Optional attachment count, terminated by '-'.
    if idx < data.len() && data[idx].is_ascii_digit() {
        while idx < data.len() && data[idx] != b'-' {
            msg.attachments = msg.attachments * 10 + (data[idx] - b'0') as usize;
            idx += 1;
        }
        if idx < data.len() && data[idx] == b'-' {
            idx += 1;
        }
    }

    // Optional namespace, '/'-prefixed and ','-terminated.
    if idx < data.len() && data[idx] == b'/' {
        let start = idx;
        while idx < data.len() && data[idx] != b',' {
            idx += 1;
        }
        msg.namespace = String::from_utf8_lossy(&data[start..idx]).into_owned();
        if idx < data.len() && data[idx] == b',' {
            idx += 1;
        }
    }

    // Optional acknowledgement id, up to the payload start.
    while idx < data.len() && data[idx].is_ascii_digit() {
        msg.id = msg.id * 10 + (data[idx] - b'0') as usize;
        idx += 1;
    }

    // Payload begins with '{' or '['.
    if idx < data.len() && (data[idx] == b'{' || data[idx] == b'[') {
        msg.payload = data[idx..].to_vec();
    }

    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_with_namespace() {
        let msg = unmarshal_v4(b"42/channels,[\"stream\",{\"uuid\":\"u\"}]").unwrap();
        assert_eq!(msg.message_type, MessageType::Event);
        assert_eq!(msg.namespace, "/channels");
        assert_eq!(msg.payload, b"[\"stream\",{\"uuid\":\"u\"}]");
        assert_eq!(msg.attachments, 0);
    }

    #[test]
    fn test_connect_without_payload() {
        let msg = unmarshal_v4(b"40/channels,").unwrap();
        assert_eq!(msg.message_type, MessageType::Connect);
        assert_eq!(msg.namespace, "/channels");
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_event_with_ack_id() {
        let msg = unmarshal_v4(b"4212[\"ping\"]").unwrap();
        assert_eq!(msg.message_type, MessageType::Event);
        assert_eq!(msg.id, 12);
        assert_eq!(msg.payload, b"[\"ping\"]");
    }

    #[test]
    fn test_binary_event_with_attachments() {
        let msg = unmarshal_v4(b"451-/channels,[\"bin\",{\"_placeholder\":true,\"num\":0}]")
            .unwrap();
        assert_eq!(msg.message_type, MessageType::BinaryEvent);
        assert_eq!(msg.attachments, 1);
        assert_eq!(msg.namespace, "/channels");
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert_eq!(
            unmarshal_v4(b"32[\"x\"]").unwrap_err(),
            SocketIoError::InvalidVersion(3)
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert_eq!(
            unmarshal_v4(b"49[\"x\"]").unwrap_err(),
            SocketIoError::InvalidType(9)
        );
    }

    #[test]
    fn test_rejects_short_packet() {
        assert_eq!(unmarshal_v4(b"4").unwrap_err(), SocketIoError::InvalidPacket);
    }
}
