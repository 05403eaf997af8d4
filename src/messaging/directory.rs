//! Directory cache of known peers and the key material negotiated with them

use crate::crypto::{KeyPair, PublicKey, SymmetricKey};
use crate::protocol::{Identity, UserEntry};

/// The local user
#[derive(Debug, Clone)]
pub struct SelfRecord {
    pub username: String,
    pub id: Identity,
    pub keys: KeyPair,
}

/// A peer known from the last users-list refresh
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: Identity,
    pub username: String,
    pub public_key: Option<PublicKey>,
    pub symmetric_key: Option<SymmetricKey>,
}

impl PeerRecord {
    pub fn new(id: Identity, username: String) -> Self {
        Self {
            id,
            username,
            public_key: None,
            symmetric_key: None,
        }
    }
}

/// Known peers, in the order the server listed them
#[derive(Debug, Default)]
pub struct Directory {
    peers: Vec<PeerRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every entry; keys negotiated earlier are dropped
    pub fn replace(&mut self, users: Vec<UserEntry>) {
        self.peers = users
            .into_iter()
            .map(|user| PeerRecord::new(user.id, user.name))
            .collect();
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn usernames(&self) -> Vec<&str> {
        self.peers.iter().map(|p| p.username.as_str()).collect()
    }

    /// First peer with this exact username
    pub fn by_name(&self, username: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.username == username)
    }

    pub fn by_id(&self, id: &Identity) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.id == *id)
    }

    fn by_id_mut(&mut self, id: &Identity) -> Option<&mut PeerRecord> {
        self.peers.iter_mut().find(|p| p.id == *id)
    }

    /// Store a public key; false if the peer is unknown
    pub fn set_public_key(&mut self, id: &Identity, key: PublicKey) -> bool {
        match self.by_id_mut(id) {
            Some(peer) => {
                peer.public_key = Some(key);
                true
            }
            None => false,
        }
    }

    /// Store a symmetric key; false if the peer is unknown
    pub fn set_symmetric_key(&mut self, id: &Identity, key: SymmetricKey) -> bool {
        match self.by_id_mut(id) {
            Some(peer) => {
                peer.symmetric_key = Some(key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IDENTITY_SIZE;

    fn entry(id: u8, name: &str) -> UserEntry {
        UserEntry {
            id: Identity::from_bytes([id; IDENTITY_SIZE]),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut directory = Directory::new();
        directory.replace(vec![entry(1, "alice"), entry(2, "bob")]);
        let bob = Identity::from_bytes([2; IDENTITY_SIZE]);
        assert!(directory.set_symmetric_key(&bob, SymmetricKey::generate()));

        directory.replace(vec![entry(2, "bob"), entry(3, "carol")]);
        assert_eq!(directory.usernames(), ["bob", "carol"]);
        assert!(directory.by_name("alice").is_none());
        assert!(directory.by_id(&bob).unwrap().symmetric_key.is_none());
    }

    #[test]
    fn test_lookup_and_key_storage() {
        let mut directory = Directory::new();
        directory.replace(vec![entry(1, "alice")]);
        let alice = Identity::from_bytes([1; IDENTITY_SIZE]);
        let stranger = Identity::from_bytes([9; IDENTITY_SIZE]);

        assert_eq!(directory.by_name("alice").unwrap().id, alice);
        assert!(directory.by_name("Alice").is_none());

        let key = SymmetricKey::from_bytes([5; 16]);
        assert!(directory.set_symmetric_key(&alice, key.clone()));
        assert!(!directory.set_symmetric_key(&stranger, key.clone()));
        assert_eq!(directory.by_id(&alice).unwrap().symmetric_key, Some(key));

        let public = PublicKey::from_bytes([1; 160]);
        assert!(directory.set_public_key(&alice, public.clone()));
        assert!(!directory.set_public_key(&stranger, public));
        assert_eq!(directory.len(), 1);
    }
}
