//! Venue credential resolution: environment variables, then OS keyring,
//! then fallback files, evaluated once at trader startup. An incomplete
//! result is a fatal `VenueAuthFailure`.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::PipelineError;

const KEYRING_SERVICE: &str = "pattern_trader";
const KEYRING_KEY_USER: &str = "binance_api_key";
const KEYRING_SECRET_USER: &str = "binance_api_secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// An empty or partial set is "invalid".
    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

/// Resolves venue credentials in priority order: (i) environment
/// variables `BINANCE_API_KEY`/`BINANCE_API_SECRET`, (ii) OS keyring if
/// available, (iii) `b_key.txt`/`b_secret.txt` in `<base>/`.
pub fn resolve(base: &Path) -> Result<Credentials, PipelineError> {
    if let Some(creds) = from_env() {
        if creds.is_valid() {
            debug!("resolved venue credentials from environment variables");
            return Ok(creds);
        }
    }

    if let Some(creds) = from_keyring() {
        if creds.is_valid() {
            debug!("resolved venue credentials from OS keyring");
            return Ok(creds);
        }
    }

    if let Some(creds) = from_files(base) {
        if creds.is_valid() {
            debug!("resolved venue credentials from key/secret files");
            return Ok(creds);
        }
    }

    warn!("no complete set of venue credentials found in env, keyring, or files");
    Err(PipelineError::VenueAuthFailure)
}

fn from_env() -> Option<Credentials> {
    let api_key = std::env::var("BINANCE_API_KEY").ok()?;
    let api_secret = std::env::var("BINANCE_API_SECRET").ok()?;
    Some(Credentials { api_key, api_secret })
}

fn from_keyring() -> Option<Credentials> {
    let key_entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_KEY_USER).ok()?;
    let secret_entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_SECRET_USER).ok()?;
    let api_key = key_entry.get_password().ok()?;
    let api_secret = secret_entry.get_password().ok()?;
    Some(Credentials { api_key, api_secret })
}

fn from_files(base: &Path) -> Option<Credentials> {
    let api_key = std::fs::read_to_string(base.join("b_key.txt")).ok()?;
    let api_secret = std::fs::read_to_string(base.join("b_secret.txt")).ok()?;
    Some(Credentials {
        api_key: api_key.trim().to_string(),
        api_secret: api_secret.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_credentials_are_invalid() {
        let creds = Credentials { api_key: String::new(), api_secret: "x".to_string() };
        assert!(!creds.is_valid());
    }

    #[test]
    fn complete_credentials_are_valid() {
        let creds = Credentials { api_key: "k".to_string(), api_secret: "s".to_string() };
        assert!(creds.is_valid());
    }

    #[test]
    fn files_fallback_reads_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_key.txt"), "mykey\n").unwrap();
        std::fs::write(dir.path().join("b_secret.txt"), "mysecret\n").unwrap();
        let creds = from_files(dir.path()).unwrap();
        assert_eq!(creds.api_key, "mykey");
        assert_eq!(creds.api_secret, "mysecret");
    }

    #[test]
    fn files_fallback_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(from_files(dir.path()).is_none());
    }
}
