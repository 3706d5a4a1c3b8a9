use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session credential must not be empty")]
    EmptyCredential,
    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Opaque session token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Result<Self, SessionError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(SessionError::EmptyCredential);
        }
        Ok(Self(token))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(<redacted>)")
    }
}

/// Where a credential lives between runs.
pub trait CredentialBackend: Send {
    fn load(&self) -> Result<Option<String>, SessionError>;
    fn save(&mut self, token: &str) -> Result<(), SessionError>;
    fn erase(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend;

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>, SessionError> {
        Ok(None)
    }

    fn save(&mut self, _token: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn erase(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

pub struct SessionStore {
    credential: Option<SessionCredential>,
    backend: Box<dyn CredentialBackend>,
    erase_pending: bool,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            credential: None,
            backend: Box::new(MemoryBackend),
            erase_pending: false,
        }
    }

    /// Builds a store over `backend`, restoring any credential it still holds.
    /// A blank persisted value is treated as absent and erased. When the
    /// backend cannot be read, whatever it holds is erased and the store
    /// starts signed out; the error surfaces only if that erase fails too.
    pub fn with_backend(backend: Box<dyn CredentialBackend>) -> Result<Self, SessionError> {
        let mut store = Self {
            credential: None,
            backend,
            erase_pending: false,
        };
        let loaded = match store.backend.load() {
            Ok(loaded) => loaded,
            Err(load_err) => {
                warn!(event = "session_restore_failed", error = %load_err);
                if let Err(erase_err) = store.backend.erase() {
                    error!(event = "session_erase_failed", error = %erase_err);
                    return Err(load_err);
                }
                return Ok(store);
            }
        };
        if let Some(token) = loaded {
            match SessionCredential::new(token) {
                Ok(credential) => {
                    info!(event = "session_restored");
                    store.credential = Some(credential);
                }
                Err(_) => store.backend.erase()?,
            }
        }
        Ok(store)
    }

    pub fn set_credential(&mut self, token: impl Into<String>) -> Result<(), SessionError> {
        let credential = SessionCredential::new(token)?;
        self.backend.save(credential.expose())?;
        self.credential = Some(credential);
        self.erase_pending = false;
        info!(event = "session_started");
        Ok(())
    }

    /// Idempotent. The in-memory credential is gone even when the backend
    /// fails; a failed erase is retried on the next clear and on drop.
    pub fn clear_credential(&mut self) -> Result<(), SessionError> {
        let had_credential = self.credential.take().is_some();
        if let Err(err) = self.backend.erase() {
            self.erase_pending = true;
            return Err(err);
        }
        self.erase_pending = false;
        if had_credential {
            info!(event = "session_cleared");
        } else {
            debug!(event = "session_clear_noop");
        }
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|credential| !credential.expose().is_empty())
    }

    pub fn credential(&self) -> Option<&SessionCredential> {
        self.credential.as_ref()
    }

    /// True while a cleared credential may still sit in the backend.
    pub fn erase_pending(&self) -> bool {
        self.erase_pending
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        if !self.erase_pending {
            return;
        }
        match self.backend.erase() {
            Ok(()) => info!(event = "session_erase_retried"),
            Err(err) => error!(event = "session_erase_failed", error = %err),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
