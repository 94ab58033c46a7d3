use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::{FeedError, Result};
use crate::storage::IdentityDatabase;

/// Source of the signed-in identity.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self) -> Option<String>;

    /// Forget the current identity. Fails with [`FeedError::Auth`] when
    /// nobody is signed in.
    fn sign_out(&self) -> Result<()>;
}

/// Identity persisted in the local database, surviving restarts.
pub struct StoredIdentity {
    db: Mutex<IdentityDatabase>,
}

impl StoredIdentity {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(IdentityDatabase::open(path)?),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(IdentityDatabase::in_memory()?),
        })
    }

    pub fn sign_in(&self, identity: &str) -> Result<()> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(FeedError::Validation { field: "identity" });
        }
        self.db().save_identity(identity)?;
        log::info!("Signed in as {identity}");
        Ok(())
    }

    fn db(&self) -> std::sync::MutexGuard<'_, IdentityDatabase> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdentityProvider for StoredIdentity {
    fn current_identity(&self) -> Option<String> {
        match self.db().get_identity() {
            Ok(identity) => identity.map(|row| row.identity),
            Err(err) => {
                log::warn!("Failed to read identity: {err}");
                None
            }
        }
    }

    fn sign_out(&self) -> Result<()> {
        if self.db().clear_identity()? {
            log::info!("Signed out");
            Ok(())
        } else {
            Err(FeedError::Auth("nobody is signed in"))
        }
    }
}

/// In-memory identity, for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    current: Mutex<Option<String>>,
}

impl StaticIdentity {
    pub fn signed_in(identity: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(Some(identity.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, identity: impl Into<String>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.into());
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn sign_out(&self) -> Result<()> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|_| ())
            .ok_or(FeedError::Auth("nobody is signed in"))
    }
}
