//! Credential collaborator: sealed tracker identities.
//!
//! Identities are stored with their user and password sealed under a
//! master key (AES-256-GCM, one nonce per secret). Connectors obtain the
//! plaintext through [`Keyring::decrypt`] right before talking to a tracker.
//!
//! ```text
//! seal_identity(name, user, password) ──► Identity { user: Sealed, password: Sealed }
//!                                               │   (persisted by the store)
//!                                               ▼
//!                       decrypt(&Identity) ──► Credentials { user, password }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::Identity;

mod encryption;

/// A secret sealed under the master key. Both parts are base64.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Plaintext credentials for one identity.
///
/// Never persist or log these.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Holds the master key and seals/opens identities.
pub struct Keyring {
    key: Vec<u8>,
}

impl Keyring {
    /// Builds a keyring from a base64-encoded 32-byte master key.
    pub fn new(key_base64: &str) -> Result<Self> {
        let key = encryption::validate_key(key_base64).context("Invalid encryption key")?;
        Ok(Self { key })
    }

    /// Seals a new identity. The returned identity is not yet persisted (`id == 0`).
    pub fn seal_identity(&self, name: &str, user: &str, password: &str) -> Result<Identity> {
        Ok(Identity {
            id: 0,
            name: name.to_string(),
            user: encryption::seal(user, &self.key).context("Failed to seal identity user")?,
            password: encryption::seal(password, &self.key)
                .context("Failed to seal identity password")?,
        })
    }

    /// Opens an identity's secrets.
    pub fn decrypt(&self, identity: &Identity) -> Result<Credentials> {
        let user = encryption::open(&identity.user, &self.key)
            .with_context(|| format!("Failed to decrypt user of identity '{}'", identity.name))?;
        let password = encryption::open(&identity.password, &self.key).with_context(|| {
            format!("Failed to decrypt password of identity '{}'", identity.name)
        })?;
        Ok(Credentials { user, password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    fn keyring(byte: u8) -> Keyring {
        Keyring::new(&BASE64.encode([byte; 32])).expect("valid key")
    }

    #[test]
    fn test_seal_and_decrypt_identity() {
        let keyring = keyring(0);
        let identity = keyring
            .seal_identity("jira", "alice@example.com", "api-token")
            .unwrap();

        assert_eq!(identity.id, 0);
        assert_ne!(identity.user.ciphertext, "alice@example.com");
        assert_ne!(identity.password.ciphertext, "api-token");

        let creds = keyring.decrypt(&identity).unwrap();
        assert_eq!(creds.user, "alice@example.com");
        assert_eq!(creds.password, "api-token");
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let identity = keyring(0).seal_identity("jira", "alice", "pw").unwrap();
        let err = keyring(9).decrypt(&identity).unwrap_err();
        assert!(format!("{:#}", err).contains("identity 'jira'"));
    }

    #[test]
    fn test_invalid_master_key_rejected() {
        assert!(Keyring::new(&BASE64.encode([0u8; 8])).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            user: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }
}
