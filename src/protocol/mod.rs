//! Protocol module - Defines the wire protocol spoken with the MessageU server
//!
//! Every exchange is one request followed by one response, packed without
//! padding and little-endian:
//! - Request: 16 bytes sender id, 1 byte version, 2 bytes code, 4 bytes payload length
//! - Response: 1 byte version, 2 bytes code, 4 bytes payload length
//! - Variable length payload

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Protocol version sent in every request header
pub const CLIENT_VERSION: u8 = 2;

/// Size of a client identity
pub const IDENTITY_SIZE: usize = 16;

/// Size of the fixed, NUL-padded name field
pub const NAME_FIELD_SIZE: usize = 255;

/// Longest username that still leaves room for the terminator
pub const MAX_USERNAME_LEN: usize = NAME_FIELD_SIZE - 1;

/// Size of an encoded public key
pub const PUBLIC_KEY_SIZE: usize = 160;

/// Size of a symmetric key
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// Request header: id(16) + version(1) + code(2) + payload length(4)
pub const REQUEST_HEADER_SIZE: usize = IDENTITY_SIZE + 1 + 2 + 4;

/// Response header: version(1) + code(2) + payload length(4)
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// Send-message payload header: target(16) + type(1) + content length(4)
pub const MESSAGE_HEADER_SIZE: usize = IDENTITY_SIZE + 1 + 4;

/// Pending message record header: sender(16) + message id(4) + type(1) + content length(4)
pub const PENDING_HEADER_SIZE: usize = IDENTITY_SIZE + 4 + 1 + 4;

/// One entry of the users list: id(16) + name(255)
pub const USER_ENTRY_SIZE: usize = IDENTITY_SIZE + NAME_FIELD_SIZE;
