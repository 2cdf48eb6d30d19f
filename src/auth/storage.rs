//! Durable storage for the current session.
//!
//! A session is the pair of access and refresh tokens. Stores hold exactly
//! one session per origin and replace both tokens in a single write, so a
//! reader never sees a new access token next to an old refresh token (or the
//! reverse). There is no expiry logic here.
//!
//! Three backends are provided:
//! - [`MemoryStore`]: process-local, used by tests and short-lived tools
//! - [`FileStore`]: one JSON document per backend origin in the platform data directory
//! - [`KeyringStore`]: the OS keychain (macOS Keychain, Windows Credential
//!   Manager, Secret Service on Linux)
//!
//! # Example
//!
//! ```
//! use peloton::auth::storage::{MemoryStore, SessionStore};
//! use peloton::auth::Session;
//! use secrecy::SecretString;
//!
//! let store = MemoryStore::new();
//! store
//!     .store(&Session::new(
//!         SecretString::from("access"),
//!         Some(SecretString::from("refresh")),
//!     ))
//!     .unwrap();
//! assert!(store.load().unwrap().is_some());
//!
//! store.clear().unwrap();
//! assert!(store.load().unwrap().is_none());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Session;
use crate::error::{PelotonError, PelotonResult};
use crate::util;

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Service name for keyring entries.
const SERVICE_NAME: &str = "peloton";

/// On-disk layout shared by the file and keyring backends.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(
        rename = "refreshToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    refresh_token: Option<String>,
}

impl StoredSession {
    fn from_session(session: &Session) -> Self {
        Self {
            access_token: session.access_token().expose_secret().to_string(),
            refresh_token: session
                .refresh_token()
                .map(|token| token.expose_secret().to_string()),
        }
    }

    fn into_session(self) -> Session {
        Session::new(
            SecretString::from(self.access_token),
            self.refresh_token.map(SecretString::from),
        )
    }
}

/// Persisted holder for the current session.
pub trait SessionStore: Send + Sync {
    /// Returns the stored session, or `None` if nobody is logged in.
    ///
    /// # Errors
    ///
    /// Returns `PelotonError::Storage` if the backend cannot be read.
    fn load(&self) -> PelotonResult<Option<Session>>;

    /// Replaces both tokens in one write.
    ///
    /// # Errors
    ///
    /// Returns `PelotonError::Storage` if the backend cannot be written.
    fn store(&self, session: &Session) -> PelotonResult<()>;

    /// Removes both tokens. Clearing an empty store is not an error.
    ///
    /// # Errors
    ///
    /// Returns `PelotonError::Storage` if the backend cannot be written.
    fn clear(&self) -> PelotonResult<()>;

    /// Stores tokens minted by a refresh of `presented`.
    ///
    /// The swap only happens if the stored refresh token is still
    /// `presented`; the current refresh token is kept when `refresh_token`
    /// is `None`. Returns `None` without writing if the session was cleared
    /// or replaced since `presented` was read.
    ///
    /// # Errors
    ///
    /// Returns `PelotonError::Storage` if the backend cannot be read or written.
    fn update_access_token(
        &self,
        presented: &SecretString,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> PelotonResult<Option<Session>>;
}

/// Builds the session that replaces `current` after refreshing `presented`,
/// or `None` if `current` no longer holds `presented`.
fn rotate(
    current: Option<&Session>,
    presented: &SecretString,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
) -> Option<Session> {
    let held = current?.refresh_token()?;
    if held.expose_secret() != presented.expose_secret() {
        return None;
    }
    Some(Session::new(
        access_token,
        Some(refresh_token.unwrap_or_else(|| held.clone())),
    ))
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local session store.
#[derive(Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `session`.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> PelotonResult<Option<Session>> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn store(&self, session: &Session) -> PelotonResult<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> PelotonResult<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn update_access_token(
        &self,
        presented: &SecretString,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> PelotonResult<Option<Session>> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = rotate(guard.as_ref(), presented, access_token, refresh_token);
        if let Some(session) = &updated {
            *guard = Some(session.clone());
        }
        Ok(updated)
    }
}

// ============================================================================
// File
// ============================================================================

/// Session store backed by one JSON file per backend origin.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so the pair is replaced in one step.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store at an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates the store for `base_url` under the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no origin or the data directory cannot
    /// be determined.
    pub fn for_origin(base_url: &str) -> PelotonResult<Self> {
        let dir = util::get_data_dir()
            .ok_or_else(|| PelotonError::storage("could not determine data directory"))?;
        Ok(Self::new(
            dir.join("sessions")
                .join(format!("{}.json", origin_file_stem(base_url)?)),
        ))
    }

    /// Returns the path of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileStore {
    fn read(&self) -> PelotonResult<Option<Session>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No session file found");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session file");
                return Err(PelotonError::storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let stored: StoredSession = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Session file is corrupt");
            PelotonError::storage(format!("corrupt session file: {e}"))
        })?;
        Ok(Some(stored.into_session()))
    }

    fn write(&self, session: &Session) -> PelotonResult<()> {
        let json = serde_json::to_string(&StoredSession::from_session(session))
            .map_err(|e| PelotonError::storage(format!("failed to encode session: {e}")))?;
        atomic_write(&self.path, &json)?;
        debug!(path = %self.path.display(), "Stored session");
        Ok(())
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> PelotonResult<Option<Session>> {
        self.read()
    }

    fn store(&self, session: &Session) -> PelotonResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(session)
    }

    fn clear(&self) -> PelotonResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted session file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PelotonError::storage(format!(
                "failed to delete {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn update_access_token(
        &self,
        presented: &SecretString,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> PelotonResult<Option<Session>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = rotate(self.read()?.as_ref(), presented, access_token, refresh_token);
        if let Some(session) = &updated {
            self.write(session)?;
        }
        Ok(updated)
    }
}

/// Writes `contents` to `path` using write-to-temp-then-rename.
fn atomic_write(path: &Path, contents: &str) -> PelotonResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| PelotonError::storage(format!("failed to create {}: {e}", parent.display())))?;

    let temp_name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("session"),
        Uuid::new_v4()
    );
    let temp_path = parent.join(temp_name);

    fs::write(&temp_path, contents)
        .map_err(|e| PelotonError::storage(format!("failed to write temp file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "Failed to restrict session file permissions");
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        PelotonError::storage(format!("failed to rename temp file: {e}"))
    })
}

/// Turns a base URL into a filesystem-safe name for its origin.
fn origin_file_stem(base_url: &str) -> PelotonResult<String> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| PelotonError::config(format!("invalid base URL '{base_url}': {e}")))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(PelotonError::config(format!(
            "base URL '{base_url}' has no origin"
        )));
    }
    Ok(util::sanitize_filename(&origin.ascii_serialization()))
}

// ============================================================================
// Keyring
// ============================================================================

/// Session store backed by the OS keychain.
///
/// The pair is saved as one JSON secret per origin so both tokens change
/// together. Writes from one process are serialized; the keychain offers no
/// cross-process lock.
pub struct KeyringStore {
    account: String,
    write_lock: Mutex<()>,
}

impl KeyringStore {
    /// Creates the keychain store for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no origin.
    pub fn for_origin(base_url: &str) -> PelotonResult<Self> {
        Ok(Self {
            account: format!("session_{}", origin_file_stem(base_url)?),
            write_lock: Mutex::new(()),
        })
    }

    fn entry(&self) -> PelotonResult<Entry> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }

    fn read(&self) -> PelotonResult<Option<Session>> {
        let secret = match self.entry()?.get_password() {
            Ok(secret) => secret,
            Err(keyring::Error::NoEntry) => {
                debug!("No session found in keyring");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load session from keyring");
                return Err(e.into());
            }
        };

        match serde_json::from_str::<StoredSession>(&secret) {
            Ok(stored) => Ok(Some(stored.into_session())),
            Err(e) => {
                warn!(error = %e, "Keyring session is corrupt - clearing it");
                self.delete()?;
                Ok(None)
            }
        }
    }

    fn write(&self, session: &Session) -> PelotonResult<()> {
        let json = serde_json::to_string(&StoredSession::from_session(session))
            .map_err(|e| PelotonError::storage(format!("failed to encode session: {e}")))?;
        self.entry()?.set_password(&json)?;
        debug!("Stored session in keyring");
        Ok(())
    }

    fn delete(&self) -> PelotonResult<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => debug!("Deleted session from keyring"),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => {
                warn!(error = %e, "Failed to delete session from keyring");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> PelotonResult<Option<Session>> {
        self.read()
    }

    fn store(&self, session: &Session) -> PelotonResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(session)
    }

    fn clear(&self) -> PelotonResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.delete()
    }

    fn update_access_token(
        &self,
        presented: &SecretString,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    ) -> PelotonResult<Option<Session>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = rotate(self.read()?.as_ref(), presented, access_token, refresh_token);
        if let Some(session) = &updated {
            self.write(session)?;
        }
        Ok(updated)
    }
}
