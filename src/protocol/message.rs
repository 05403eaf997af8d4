//! Protocol message definitions
//!
//! Defines the requests, response codes and record headers exchanged with
//! the MessageU server.

use std::fmt;

use super::{IDENTITY_SIZE, PUBLIC_KEY_SIZE};

/// Server-assigned client identifier, compared byte-wise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Identity([u8; IDENTITY_SIZE]);

impl Identity {
    /// The all-zero identity, used before registration
    pub const UNASSIGNED: Identity = Identity([0u8; IDENTITY_SIZE]);

    pub const fn from_bytes(bytes: [u8; IDENTITY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build an identity from a slice that must be exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; IDENTITY_SIZE]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s.trim()).ok().and_then(|bytes| Self::from_slice(&bytes))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Request operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestCode {
    Register = 600,
    UsersList = 601,
    PublicKey = 602,
    SendMessage = 603,
    PullPending = 604,
}

/// Response operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Registered = 2100,
    UsersList = 2101,
    PublicKey = 2102,
    MessageSent = 2103,
    PendingMessages = 2104,
    GeneralError = 9000,
}

impl ResponseCode {
    /// Payload size the code is bound to, `None` for variable payloads
    pub fn fixed_payload_size(self) -> Option<usize> {
        match self {
            Self::Registered => Some(IDENTITY_SIZE),
            Self::PublicKey => Some(IDENTITY_SIZE + PUBLIC_KEY_SIZE),
            Self::MessageSent => Some(IDENTITY_SIZE + 4),
            Self::UsersList | Self::PendingMessages | Self::GeneralError => None,
        }
    }
}

/// Kind of message carried between two clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Ask the peer to send a symmetric key
    KeyRequest = 1,
    /// Symmetric key encrypted with the recipient's public key
    KeyDeliver = 2,
    Text = 3,
    File = 4,
}

impl MessageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::KeyRequest),
            2 => Some(Self::KeyDeliver),
            3 => Some(Self::Text),
            4 => Some(Self::File),
            _ => None,
        }
    }

    pub fn type_id(self) -> u8 {
        self as u8
    }
}

/// All requests understood by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Register a new user
    Register {
        name: String,
        public_key: [u8; PUBLIC_KEY_SIZE],
    },

    /// List every registered user except the sender
    UsersList,

    /// Fetch the public key of a user
    PublicKey {
        target: Identity,
    },

    /// Leave a message for another user
    SendMessage {
        target: Identity,
        kind: MessageType,
        content: Vec<u8>,
    },

    /// Fetch and drain the messages waiting for the sender
    PullPending,
}

impl Request {
    pub fn code(&self) -> RequestCode {
        match self {
            Request::Register { .. } => RequestCode::Register,
            Request::UsersList => RequestCode::UsersList,
            Request::PublicKey { .. } => RequestCode::PublicKey,
            Request::SendMessage { .. } => RequestCode::SendMessage,
            Request::PullPending => RequestCode::PullPending,
        }
    }

    /// Response code that acknowledges this request
    pub fn expected_response(&self) -> ResponseCode {
        match self {
            Request::Register { .. } => ResponseCode::Registered,
            Request::UsersList => ResponseCode::UsersList,
            Request::PublicKey { .. } => ResponseCode::PublicKey,
            Request::SendMessage { .. } => ResponseCode::MessageSent,
            Request::PullPending => ResponseCode::PendingMessages,
        }
    }
}

/// Header preceding every request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub sender: Identity,
    pub version: u8,
    pub code: u16,
    pub payload_len: u32,
}

/// Header preceding every response payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    /// Raw code; may be one the client does not know
    pub code: u16,
    pub payload_len: u32,
}

/// Header of one record inside a pending-messages payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingHeader {
    pub sender: Identity,
    pub message_id: u32,
    /// Raw type tag; unknown tags are kept so the caller can skip them
    pub type_tag: u8,
    pub content_len: u32,
}

/// One entry of the users-list payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub id: Identity,
    pub name: String,
}

/// Acknowledgement of a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReceipt {
    pub target: Identity,
    pub message_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hex_roundtrip() {
        let id = Identity::from_bytes([0xab; IDENTITY_SIZE]);
        assert_eq!(id.to_hex(), "ab".repeat(16));
        assert_eq!(Identity::from_hex(&id.to_hex()), Some(id));
        assert_eq!(Identity::from_hex("abcd"), None);
        assert_eq!(Identity::from_hex("zz"), None);
    }

    #[test]
    fn test_fixed_payload_sizes() {
        assert_eq!(ResponseCode::Registered.fixed_payload_size(), Some(16));
        assert_eq!(ResponseCode::PublicKey.fixed_payload_size(), Some(176));
        assert_eq!(ResponseCode::MessageSent.fixed_payload_size(), Some(20));
        assert_eq!(ResponseCode::UsersList.fixed_payload_size(), None);
        assert_eq!(ResponseCode::PendingMessages.fixed_payload_size(), None);
    }

    #[test]
    fn test_message_type_ids() {
        assert_eq!(MessageType::KeyRequest.type_id(), 1);
        assert_eq!(MessageType::File.type_id(), 4);
        assert_eq!(MessageType::from_u8(2), Some(MessageType::KeyDeliver));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(5), None);
    }
}
