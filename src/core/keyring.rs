//! Credential storage for the relay API key.

use keyring::Entry;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, PoisonError};

const KEYRING_SERVICE: &str = "relaychat";
const KEYRING_USER: &str = "relay-api-key";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked or inaccessible). Permanent errors surface the underlying
/// cause directly so callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Where the bearer credential for the relay lives between sessions.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, KeyringAccessError>;
    fn set(&self, credential: &str) -> Result<(), KeyringAccessError>;
    fn clear(&self) -> Result<(), KeyringAccessError>;
}

/// Platform keyring (Secret Service, Keychain, Windows Credential Manager).
#[derive(Debug, Default)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry() -> Result<Entry, KeyringAccessError> {
        Ok(Entry::new(KEYRING_SERVICE, KEYRING_USER)?)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Result<Option<String>, KeyringAccessError> {
        match Self::entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, credential: &str) -> Result<(), KeyringAccessError> {
        Ok(Self::entry()?.set_password(credential)?)
    }

    fn clear(&self) -> Result<(), KeyringAccessError> {
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Credential held in memory only, e.g. from an environment variable or in
/// tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(credential: Option<String>) -> Self {
        Self {
            credential: Mutex::new(credential),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<String>, KeyringAccessError> {
        Ok(self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, credential: &str) -> Result<(), KeyringAccessError> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(credential.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), KeyringAccessError> {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
