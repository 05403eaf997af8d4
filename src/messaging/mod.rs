//! Messaging module - Secure messaging on top of the protocol client
//!
//! The `Messenger` owns the local identity and the directory of peers. It
//! picks the crypto transform for every outgoing message and decodes
//! incoming batches, updating peer key material as keys arrive.

mod directory;
mod inbox;

pub use directory::*;
pub use inbox::*;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::{CryptoError, KeyPair, PublicKey, SymmetricKey};
use crate::network::{ClientError, ProtocolClient};
use crate::protocol::{CodecError, Identity, MessageReceipt, MessageType, MAX_USERNAME_LEN};

/// Messaging errors
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("Malformed pending messages: {0}")]
    Malformed(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity storage error: {0}")]
    Storage(#[from] ConfigError),

    #[error("Not registered yet")]
    NotRegistered,

    #[error("Already registered as '{0}'")]
    AlreadyRegistered(String),

    #[error("Invalid username '{0}': use 1 to {} letters or digits", MAX_USERNAME_LEN)]
    InvalidUsername(String),

    #[error("Server has no users registered")]
    NoUsers,

    #[error("User '{0}' not found, refresh the users list first")]
    UnknownUser(String),

    #[error("You can't send a message to yourself")]
    SelfMessage,

    #[error("Missing symmetric key for '{0}'")]
    MissingSymmetricKey(String),

    #[error("Missing public key for '{0}'")]
    MissingPublicKey(String),

    #[error("Server acknowledged client {actual}, expected {expected}")]
    RecipientMismatch { expected: Identity, actual: Identity },

    #[error("Public key received for {0}, who is not in the users list")]
    UnlistedKeyOwner(Identity),

    #[error("Message {message_id}: failed to decrypt symmetric key: {source}")]
    KeyDecryption {
        message_id: u32,
        #[source]
        source: CryptoError,
    },

    #[error("Message {message_id}: symmetric key is {len} bytes")]
    InvalidKeyLength { message_id: u32, len: usize },

    #[error("Message {message_id} declares {declared} content bytes but only {remaining} remain")]
    RecordOverrun {
        message_id: u32,
        declared: usize,
        remaining: usize,
    },

    #[error("Failed reading file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type MessagingResult<T> = Result<T, MessagingError>;

/// Persistence for the local identity
pub trait IdentityStore {
    /// Load the stored identity, `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<SelfRecord>, ConfigError>;

    fn store(&self, me: &SelfRecord) -> Result<(), ConfigError>;
}

/// Check a username before registering it
pub fn validate_username(username: &str) -> MessagingResult<()> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && username.bytes().all(|b| b.is_ascii_alphanumeric());
    if !valid {
        return Err(MessagingError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Secure messaging session for one local user
pub struct Messenger<S: IdentityStore> {
    client: ProtocolClient,
    store: S,
    /// Local user; `None` until registered or loaded
    me: Option<SelfRecord>,
    /// Peers from the last users-list refresh
    directory: Directory,
}

impl<S: IdentityStore> Messenger<S> {
    pub fn new(client: ProtocolClient, store: S) -> Self {
        Self {
            client,
            store,
            me: None,
            directory: Directory::new(),
        }
    }

    #[cfg(test)]
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    #[cfg(test)]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn me(&self) -> Option<&SelfRecord> {
        self.me.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.me.is_some()
    }

    fn require_me(&self) -> MessagingResult<&SelfRecord> {
        self.me.as_ref().ok_or(MessagingError::NotRegistered)
    }

    /// Load a previously stored identity. Returns false when none exists.
    pub fn load_identity(&mut self) -> MessagingResult<bool> {
        match self.store.load()? {
            Some(me) => {
                tracing::info!("Loaded identity '{}' ({})", me.username, me.id);
                self.me = Some(me);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Register `username` with a fresh key pair and persist the result
    pub async fn register(&mut self, username: &str) -> MessagingResult<Identity> {
        if let Some(me) = &self.me {
            return Err(MessagingError::AlreadyRegistered(me.username.clone()));
        }
        validate_username(username)?;

        let keys = KeyPair::generate()?;
        let public_key = keys.public_key()?;
        let id = self.client.register(username, public_key.as_bytes()).await?;

        let me = SelfRecord {
            username: username.to_string(),
            id,
            keys,
        };
        let stored = self.store.store(&me);
        self.me = Some(me);
        stored?;

        Ok(id)
    }

    /// Replace the directory with the server's current users list
    pub async fn refresh_users(&mut self) -> MessagingResult<&[PeerRecord]> {
        let id = self.require_me()?.id;
        let users = self.client.users_list(&id).await?;
        if users.is_empty() {
            return Err(MessagingError::NoUsers);
        }

        self.directory.replace(users);
        tracing::info!("Directory refreshed with {} users", self.directory.len());
        Ok(self.directory.peers())
    }

    /// Names in the directory, in server order
    pub fn usernames(&self) -> Vec<&str> {
        self.directory.usernames()
    }

    /// Fetch and cache the public key of `username`
    pub async fn fetch_public_key(&mut self, username: &str) -> MessagingResult<Identity> {
        let me_id = self.require_me()?.id;
        let target = self
            .directory
            .by_name(username)
            .ok_or_else(|| MessagingError::UnknownUser(username.to_string()))?
            .id;

        let (owner, key) = self.client.public_key(&me_id, &target).await?;
        if !self.directory.set_public_key(&owner, PublicKey::from_bytes(key)) {
            return Err(MessagingError::UnlistedKeyOwner(owner));
        }

        tracing::info!("Stored public key of '{}'", username);
        Ok(owner)
    }

    /// Encrypt `plaintext` for `username` as required by `kind` and send it
    pub async fn send(
        &mut self,
        username: &str,
        kind: MessageType,
        plaintext: &[u8],
    ) -> MessagingResult<MessageReceipt> {
        let me = self.require_me()?;
        if username == me.username {
            return Err(MessagingError::SelfMessage);
        }
        let me_id = me.id;

        let peer = self
            .directory
            .by_name(username)
            .ok_or_else(|| MessagingError::UnknownUser(username.to_string()))?;
        let target = peer.id;

        let content = match kind {
            MessageType::Text | MessageType::File => {
                let key = peer
                    .symmetric_key
                    .as_ref()
                    .ok_or_else(|| MessagingError::MissingSymmetricKey(username.to_string()))?;
                key.encrypt(plaintext)
            }
            MessageType::KeyRequest => Vec::new(),
            MessageType::KeyDeliver => {
                let public_key = peer
                    .public_key
                    .clone()
                    .ok_or_else(|| MessagingError::MissingPublicKey(username.to_string()))?;
                let key = SymmetricKey::generate();
                // Cached before the server acknowledges, so it always matches
                // the key that went out.
                self.directory.set_symmetric_key(&target, key.clone());
                public_key.encrypt(key.as_bytes())?
            }
        };

        let receipt = self
            .client
            .send_message(&me_id, &target, kind, content)
            .await?;
        if receipt.target != target {
            return Err(MessagingError::RecipientMismatch {
                expected: target,
                actual: receipt.target,
            });
        }

        tracing::info!("Sent {:?} message {} to '{}'", kind, receipt.message_id, username);
        Ok(receipt)
    }

    /// Read the file at `path` and send its content to `username`
    pub async fn send_file(
        &mut self,
        username: &str,
        path: &Path,
    ) -> MessagingResult<MessageReceipt> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| MessagingError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
        self.send(username, MessageType::File, &content).await
    }

    /// Fetch and decode every message waiting on the server
    pub async fn pull_pending(&mut self) -> MessagingResult<PullOutcome> {
        let me_id = self.require_me()?.id;
        let payload = self.client.pull_pending(&me_id).await?;

        let me = self.me.as_ref().ok_or(MessagingError::NotRegistered)?;
        let outcome = decode_pending(&payload, &mut self.directory, &me.keys)?;
        tracing::info!(
            "Decoded {} pending messages ({} notes)",
            outcome.messages.len(),
            outcome.notes.len()
        );
        Ok(outcome)
    }
}
