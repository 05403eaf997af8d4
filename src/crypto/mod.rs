//! Crypto module - Key material and ciphers used between MessageU clients
//!
//! - Symmetric: AES-128-CBC with an all-zero IV and PKCS#7 padding
//! - Asymmetric: RSA-1024 (e = 17) with OAEP/SHA-1; the public key travels as
//!   a 160-byte X.509 SubjectPublicKeyInfo DER document

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::protocol::{PUBLIC_KEY_SIZE, SYMMETRIC_KEY_SIZE};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// RSA modulus size in bits
const RSA_BITS: usize = 1024;

/// Public exponent; keeps the encoded public key at exactly 160 bytes
const RSA_EXPONENT: u32 = 17;

const ZERO_IV: [u8; 16] = [0u8; 16];

/// Crypto errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Encoded public key is {0} bytes, expected {}", PUBLIC_KEY_SIZE)]
    PublicKeySize(usize),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Per-peer AES-128 key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice that must be exactly 16 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; SYMMETRIC_KEY_SIZE]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    pub fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.0.into(), &ZERO_IV.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
    }

    pub fn decrypt(&self, cipher: &[u8]) -> CryptoResult<Vec<u8>> {
        Aes128CbcDec::new(&self.0.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(cipher)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A peer's public key in its 160-byte wire form
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Encrypt `plain` so that only the key's owner can read it
    pub fn encrypt(&self, plain: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = RsaPublicKey::from_public_key_der(&self.0)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), plain)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}..)", hex::encode(&self.0[..8]))
    }
}

/// The local user's RSA key pair
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate() -> CryptoResult<Self> {
        let exponent = BigUint::from(RSA_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, RSA_BITS, &exponent)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self { private })
    }

    /// Load a key pair from its PKCS#8 DER encoding
    pub fn from_pkcs8_der(der: &[u8]) -> CryptoResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { private })
    }

    /// PKCS#8 DER encoding of the private key
    pub fn to_pkcs8_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// The public half in its 160-byte wire form
    pub fn public_key(&self) -> CryptoResult<PublicKey> {
        let doc = self
            .private
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let bytes = <[u8; PUBLIC_KEY_SIZE]>::try_from(doc.as_bytes())
            .map_err(|_| CryptoError::PublicKeySize(doc.as_bytes().len()))?;
        Ok(PublicKey(bytes))
    }

    pub fn decrypt(&self, cipher: &[u8]) -> CryptoResult<Vec<u8>> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), cipher)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyPair(..)")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_roundtrip_lengths() {
        let key = SymmetricKey::generate();
        for len in [0usize, 1, 1024, 1025] {
            let plain: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let cipher = key.encrypt(&plain);
            assert_eq!(cipher.len() % 16, 0);
            assert!(cipher.len() > plain.len());
            assert_eq!(key.decrypt(&cipher).unwrap(), plain, "length {}", len);
        }
    }

    #[test]
    fn test_symmetric_wrong_key_fails_or_differs() {
        let key = SymmetricKey::from_bytes([1; SYMMETRIC_KEY_SIZE]);
        let other = SymmetricKey::from_bytes([2; SYMMETRIC_KEY_SIZE]);
        let cipher = key.encrypt(b"attack at dawn");
        match other.decrypt(&cipher) {
            Ok(plain) => assert_ne!(plain, b"attack at dawn"),
            Err(CryptoError::Decrypt(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_symmetric_rejects_partial_block() {
        let key = SymmetricKey::generate();
        assert!(key.decrypt(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_key_pair_roundtrip() {
        let pair = KeyPair::generate().unwrap();
        let public = pair.public_key().unwrap();
        assert_eq!(public.as_bytes().len(), PUBLIC_KEY_SIZE);

        let sym = SymmetricKey::generate();
        let cipher = public.encrypt(sym.as_bytes()).unwrap();
        let plain = pair.decrypt(&cipher).unwrap();
        assert_eq!(plain.as_slice(), sym.as_bytes());

        let reloaded = KeyPair::from_pkcs8_der(&pair.to_pkcs8_der().unwrap()).unwrap();
        assert_eq!(reloaded.public_key().unwrap(), public);
        assert!(pair.decrypt(&cipher[1..]).is_err());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        let public = PublicKey::from_bytes([0x42; PUBLIC_KEY_SIZE]);
        assert!(matches!(
            public.encrypt(b"x"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }
}
