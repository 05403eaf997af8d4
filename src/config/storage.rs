//! Server address and identity files
//!
//! `server.info` holds a single `host:port` line.
//! `me.info` holds the registered username, the identity as 32 hex digits,
//! and the base64 PKCS#8 private key, which may span several lines.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

use super::{ConfigError, ConfigResult};
use crate::crypto::KeyPair;
use crate::messaging::{IdentityStore, SelfRecord};
use crate::network::ServerAddress;
use crate::protocol::Identity;

/// Width of the wrapped base64 key lines
const KEY_LINE_WIDTH: usize = 64;

/// Read and validate the server address file
pub fn load_server_address(path: &Path) -> ConfigResult<ServerAddress> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path)?;
    let line = contents.lines().next().unwrap_or("").trim();
    line.parse::<ServerAddress>()
        .map_err(|e| ConfigError::InvalidServerInfo {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Identity persisted in a plain text file
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidIdentity {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn parse(&self, contents: &str) -> ConfigResult<SelfRecord> {
        let mut lines = contents.lines();

        let username = lines
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| self.invalid("missing username"))?;

        let id = lines
            .next()
            .and_then(Identity::from_hex)
            .ok_or_else(|| self.invalid("identity must be 32 hex digits"))?;

        let encoded: String = lines.flat_map(|line| line.trim().chars()).collect();
        if encoded.is_empty() {
            return Err(self.invalid("missing private key"));
        }
        let der = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| self.invalid(format!("private key is not base64: {}", e)))?,
        );
        let keys = KeyPair::from_pkcs8_der(&der).map_err(|e| self.invalid(e.to_string()))?;

        Ok(SelfRecord {
            username: username.to_string(),
            id,
            keys,
        })
    }
}

impl IdentityStore for IdentityFile {
    fn load(&self) -> ConfigResult<Option<SelfRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        self.parse(&contents).map(Some)
    }

    fn store(&self, me: &SelfRecord) -> ConfigResult<()> {
        let der = Zeroizing::new(
            me.keys
                .to_pkcs8_der()
                .map_err(|e| self.invalid(e.to_string()))?,
        );
        let encoded = Zeroizing::new(STANDARD.encode(der.as_slice()));

        let mut contents = Zeroizing::new(format!("{}\n{}\n", me.username, me.id.to_hex()));
        for chunk in encoded.as_bytes().chunks(KEY_LINE_WIDTH) {
            contents.push_str(&String::from_utf8_lossy(chunk));
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, contents.as_bytes())?;

        tracing::debug!("Identity written to {}", self.path.display());
        Ok(())
    }
}
