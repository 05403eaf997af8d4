//! Decoding of pending-message batches
//!
//! A batch is a back-to-back run of records with no count field:
//! sender(16) | message id(4) | type(1) | content length(4) | content.
//! Records are decoded until the payload is exhausted.

use std::fmt;

use zeroize::Zeroizing;

use super::directory::Directory;
use super::{MessagingError, MessagingResult};
use crate::crypto::{KeyPair, SymmetricKey};
use crate::protocol::{decode_pending_header, Identity, MessageType, PENDING_HEADER_SIZE};

/// What a pending record turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// The sender asked for a symmetric key
    KeyRequest,
    /// A symmetric key from the sender was stored
    KeyReceived,
    /// Decrypted text or file content
    Plaintext(Vec<u8>),
    /// The record carried no content
    NoContent,
    /// A key was available but the content did not decrypt
    DecryptionFailed,
    /// No symmetric key is known for the sender
    CannotDecrypt,
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageContent::KeyRequest => f.write_str("Request for symmetric key"),
            MessageContent::KeyReceived => f.write_str("Symmetric key received"),
            MessageContent::Plaintext(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            MessageContent::NoContent => f.write_str("Message with no content"),
            MessageContent::DecryptionFailed => f.write_str("Decryption failed"),
            MessageContent::CannotDecrypt => f.write_str("Can't decrypt message"),
        }
    }
}

/// One decoded pending message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sender: Identity,
    /// Sender's name, when the sender is in the directory
    pub username: Option<String>,
    pub message_id: u32,
    pub kind: MessageType,
    pub content: MessageContent,
}

/// Result of decoding a batch: the messages plus notes about records that
/// produced no message
#[derive(Debug, Default)]
pub struct PullOutcome {
    pub messages: Vec<ReceivedMessage>,
    pub notes: Vec<String>,
}

/// Decode a pending-messages payload.
///
/// Symmetric keys delivered in the batch are stored in `directory` as they
/// are decoded, so later records from the same sender can use them.
/// A key delivery that fails to decrypt, or yields a key of the wrong size,
/// aborts the whole batch; other per-record problems only produce a
/// placeholder or a note.
pub fn decode_pending(
    payload: &[u8],
    directory: &mut Directory,
    keys: &KeyPair,
) -> MessagingResult<PullOutcome> {
    let mut outcome = PullOutcome::default();
    let mut cursor = 0;

    while cursor < payload.len() {
        let header = decode_pending_header(&payload[cursor..])?;
        cursor += PENDING_HEADER_SIZE;

        let declared = header.content_len as usize;
        let remaining = payload.len() - cursor;
        if declared > remaining {
            return Err(MessagingError::RecordOverrun {
                message_id: header.message_id,
                declared,
                remaining,
            });
        }
        let content = &payload[cursor..cursor + declared];
        cursor += declared;

        let username = directory.by_id(&header.sender).map(|p| p.username.clone());

        let Some(kind) = MessageType::from_u8(header.type_tag) else {
            tracing::warn!(
                "Skipping message {} with unknown type {}",
                header.message_id,
                header.type_tag
            );
            outcome.notes.push(format!(
                "Message {} has unknown type {} and was skipped",
                header.message_id, header.type_tag
            ));
            continue;
        };

        let content = match kind {
            MessageType::KeyRequest => MessageContent::KeyRequest,
            MessageType::KeyDeliver => {
                if content.is_empty() {
                    outcome.notes.push(format!(
                        "Message {}: can't decrypt symmetric key, content length is 0",
                        header.message_id
                    ));
                    continue;
                }

                let raw = Zeroizing::new(keys.decrypt(content).map_err(|source| {
                    MessagingError::KeyDecryption {
                        message_id: header.message_id,
                        source,
                    }
                })?);
                let key = SymmetricKey::from_slice(&raw).ok_or(MessagingError::InvalidKeyLength {
                    message_id: header.message_id,
                    len: raw.len(),
                })?;

                if !directory.set_symmetric_key(&header.sender, key) {
                    tracing::warn!("Symmetric key from unknown sender {}", header.sender);
                    outcome.notes.push(format!(
                        "Message {}: can't store symmetric key, sender {} is unknown",
                        header.message_id, header.sender
                    ));
                    continue;
                }
                MessageContent::KeyReceived
            }
            MessageType::Text | MessageType::File => {
                if content.is_empty() {
                    MessageContent::NoContent
                } else {
                    match directory
                        .by_id(&header.sender)
                        .and_then(|p| p.symmetric_key.as_ref())
                    {
                        Some(key) => match key.decrypt(content) {
                            Ok(plain) => MessageContent::Plaintext(plain),
                            Err(e) => {
                                tracing::warn!("Message {} failed to decrypt: {}", header.message_id, e);
                                MessageContent::DecryptionFailed
                            }
                        },
                        None => MessageContent::CannotDecrypt,
                    }
                }
            }
        };

        outcome.messages.push(ReceivedMessage {
            sender: header.sender,
            username,
            message_id: header.message_id,
            kind,
            content,
        });
    }

    Ok(outcome)
}
