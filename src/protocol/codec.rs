//! Protocol codec for encoding requests and decoding responses
//!
//! Every request is built by one pure function from its `Request` variant;
//! responses are decoded from raw payload slices.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::{
    Identity, MessageReceipt, PendingHeader, Request, RequestHeader, ResponseHeader, UserEntry,
    CLIENT_VERSION, IDENTITY_SIZE, MAX_USERNAME_LEN, MESSAGE_HEADER_SIZE, NAME_FIELD_SIZE,
    PENDING_HEADER_SIZE, PUBLIC_KEY_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
    USER_ENTRY_SIZE,
};

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Declared payload length {declared} does not match actual payload length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Username must be 1 to {max} characters without NUL bytes, got {len}")]
    InvalidName { len: usize, max: usize },

    #[error("Incomplete {what}: need {needed} bytes, have {available}")]
    Incomplete {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Users list size {size} is not a multiple of {record} bytes")]
    RaggedUsersList { size: usize, record: usize },
}

fn length_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge(len))
}

fn require(what: &'static str, buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Incomplete {
            what,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Encode the payload of a request, without its header
pub fn encode_payload(request: &Request) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();

    match request {
        Request::Register { name, public_key } => {
            if name.is_empty() || name.len() > MAX_USERNAME_LEN || name.bytes().any(|b| b == 0) {
                return Err(CodecError::InvalidName {
                    len: name.len(),
                    max: MAX_USERNAME_LEN,
                });
            }
            let mut field = [0u8; NAME_FIELD_SIZE];
            field[..name.len()].copy_from_slice(name.as_bytes());
            buf.put_slice(&field);
            buf.put_slice(public_key);
        }
        Request::UsersList | Request::PullPending => {}
        Request::PublicKey { target } => {
            buf.put_slice(target.as_bytes());
        }
        Request::SendMessage {
            target,
            kind,
            content,
        } => {
            buf.reserve(MESSAGE_HEADER_SIZE + content.len());
            buf.put_slice(target.as_bytes());
            buf.put_u8(kind.type_id());
            buf.put_u32_le(length_u32(content.len())?);
            buf.put_slice(content);
        }
    }

    Ok(buf.to_vec())
}

/// Encode a complete request frame (header followed by payload)
pub fn encode_request(sender: &Identity, request: &Request) -> Result<Vec<u8>, CodecError> {
    let payload = encode_payload(request)?;
    // Registration happens before an identity exists.
    let sender = match request {
        Request::Register { .. } => Identity::UNASSIGNED,
        _ => *sender,
    };
    let header = RequestHeader {
        sender,
        version: CLIENT_VERSION,
        code: request.code() as u16,
        payload_len: length_u32(payload.len())?,
    };
    encode_frame(&header, &payload)
}

/// Join a header and a payload, rejecting a header whose declared length
/// disagrees with the payload
pub fn encode_frame(header: &RequestHeader, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if header.payload_len as usize != payload.len() {
        return Err(CodecError::LengthMismatch {
            declared: header.payload_len as usize,
            actual: payload.len(),
        });
    }

    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + payload.len());
    buf.put_slice(header.sender.as_bytes());
    buf.put_u8(header.version);
    buf.put_u16_le(header.code);
    buf.put_u32_le(header.payload_len);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Decode a request header, as the server sees it
#[cfg(test)]
pub fn decode_request_header(buf: &[u8]) -> Result<RequestHeader, CodecError> {
    require("request header", buf, REQUEST_HEADER_SIZE)?;
    let mut cursor = buf;
    let sender = read_identity(&mut cursor);
    Ok(RequestHeader {
        sender,
        version: cursor.get_u8(),
        code: cursor.get_u16_le(),
        payload_len: cursor.get_u32_le(),
    })
}

/// Decode the response header found at the start of `buf`
pub fn decode_response_header(buf: &[u8]) -> Result<ResponseHeader, CodecError> {
    require("response header", buf, RESPONSE_HEADER_SIZE)?;
    let mut cursor = buf;
    Ok(ResponseHeader {
        version: cursor.get_u8(),
        code: cursor.get_u16_le(),
        payload_len: cursor.get_u32_le(),
    })
}

/// Decode the header of one pending message record at the start of `buf`
pub fn decode_pending_header(buf: &[u8]) -> Result<PendingHeader, CodecError> {
    require("pending message header", buf, PENDING_HEADER_SIZE)?;
    let mut cursor = buf;
    let sender = read_identity(&mut cursor);
    Ok(PendingHeader {
        sender,
        message_id: cursor.get_u32_le(),
        type_tag: cursor.get_u8(),
        content_len: cursor.get_u32_le(),
    })
}

/// Decode a registration response payload
pub fn decode_identity(payload: &[u8]) -> Result<Identity, CodecError> {
    require("identity", payload, IDENTITY_SIZE)?;
    let mut cursor = payload;
    Ok(read_identity(&mut cursor))
}

/// Decode a public-key response payload
pub fn decode_public_key(payload: &[u8]) -> Result<(Identity, [u8; PUBLIC_KEY_SIZE]), CodecError> {
    require("public key", payload, IDENTITY_SIZE + PUBLIC_KEY_SIZE)?;
    let mut cursor = payload;
    let id = read_identity(&mut cursor);
    let mut key = [0u8; PUBLIC_KEY_SIZE];
    cursor.copy_to_slice(&mut key);
    Ok((id, key))
}

/// Decode a message-sent response payload
pub fn decode_receipt(payload: &[u8]) -> Result<MessageReceipt, CodecError> {
    require("message receipt", payload, IDENTITY_SIZE + 4)?;
    let mut cursor = payload;
    let target = read_identity(&mut cursor);
    Ok(MessageReceipt {
        target,
        message_id: cursor.get_u32_le(),
    })
}

/// Decode a users-list payload, preserving server order
pub fn decode_users_list(payload: &[u8]) -> Result<Vec<UserEntry>, CodecError> {
    if payload.len() % USER_ENTRY_SIZE != 0 {
        return Err(CodecError::RaggedUsersList {
            size: payload.len(),
            record: USER_ENTRY_SIZE,
        });
    }

    Ok(payload
        .chunks_exact(USER_ENTRY_SIZE)
        .map(|chunk| {
            let mut cursor = chunk;
            let id = read_identity(&mut cursor);
            // The last byte of the field is reserved for the terminator.
            let field = &cursor[..MAX_USERNAME_LEN];
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            let name = String::from_utf8_lossy(&field[..end]).into_owned();
            UserEntry { id, name }
        })
        .collect())
}

fn read_identity(cursor: &mut &[u8]) -> Identity {
    let mut id = [0u8; IDENTITY_SIZE];
    cursor.copy_to_slice(&mut id);
    Identity::from_bytes(id)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a users-list payload from (id byte, name) pairs
    pub fn users_payload(users: &[(u8, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (id, name) in users {
            buf.extend_from_slice(&[*id; IDENTITY_SIZE]);
            let mut field = [0u8; NAME_FIELD_SIZE];
            field[..name.len()].copy_from_slice(name.as_bytes());
            buf.extend_from_slice(&field);
        }
        buf
    }

    /// Build one pending message record
    pub fn pending_record(sender: &Identity, message_id: u32, tag: u8, content: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_slice(sender.as_bytes());
        buf.put_u32_le(message_id);
        buf.put_u8(tag);
        buf.put_u32_le(content.len() as u32);
        buf.put_slice(content);
        buf.to_vec()
    }

    /// Build a response header followed by its payload
    pub fn response(code: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(CLIENT_VERSION);
        buf.put_u16_le(code);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
        buf.to_vec()
    }
}
