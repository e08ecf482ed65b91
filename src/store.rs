// Credential persistence. Two stores share the `CredentialStore` contract:
// a directory of `.auth` files and a local-storage style key/value map.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Session credential as persisted in an auth record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub handle: String,
    pub did: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

impl Credential {
    pub fn is_complete(&self) -> bool {
        !self.handle.is_empty()
            && !self.did.is_empty()
            && !self.access_jwt.is_empty()
            && !self.refresh_jwt.is_empty()
    }

    /// Expiry from the access token's `exp` claim, if it can be decoded.
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        jwt_expiry(&self.access_jwt)
    }

    /// Undecodable tokens count as expired so they are never reused blindly.
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        match self.access_expires_at() {
            Some(exp) => exp <= now,
            None => true,
        }
    }
}

fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp, 0).single()
}

/// Store entry key: `(prefix, handle)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub prefix: String,
    pub handle: String,
}

impl CredentialKey {
    pub fn new(prefix: &str, handle: &str) -> Self {
        CredentialKey {
            prefix: prefix.to_string(),
            handle: handle.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}.auth", self.prefix, self.handle)
    }
}

pub trait CredentialStore {
    /// `Ok(None)` when no entry exists for the key.
    fn load(&self, key: &CredentialKey) -> Result<Option<Credential>>;
    /// Create or overwrite the entry for the key.
    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<()>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn load(&self, key: &CredentialKey) -> Result<Option<Credential>> {
        (**self).load(key)
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<()> {
        (**self).save(key, credential)
    }
}

/// File-backed store: one `<dir>/<prefix><handle>.auth` JSON file per account.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn path_for(&self, key: &CredentialKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl CredentialStore for FileStore {
    fn load(&self, key: &CredentialKey) -> Result<Option<Credential>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let location = path.display().to_string();
        let data = fs::read_to_string(&path).map_err(|e| Error::persistence(&location, e))?;
        let cred = serde_json::from_str(&data).map_err(|e| Error::persistence(&location, e))?;
        Ok(Some(cred))
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<()> {
        let path = self.path_for(key);
        let location = path.display().to_string();
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&location, e))?;

        let data =
            serde_json::to_string_pretty(credential).map_err(|e| Error::persistence(&location, e))?;
        fs::write(&path, data).map_err(|e| Error::persistence(&location, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::persistence(&location, e))?;
        }
        tracing::debug!(path = %location, "credential saved");
        Ok(())
    }
}

/// String key/value storage with the shape of a browser's local storage.
pub trait LocalStorage {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process local storage, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

const HANDLE_ITEM: &str = "handle";
const PASSWORD_ITEM: &str = "password";

/// Credential store over a `LocalStorage`. Auth records live under the
/// key's file name; the login pair is kept as two plain entries.
#[derive(Debug, Default)]
pub struct LocalStorageStore<L> {
    storage: L,
}

impl<L: LocalStorage> LocalStorageStore<L> {
    pub fn new(storage: L) -> Self {
        LocalStorageStore { storage }
    }

    pub fn remember_login(&self, handle: &str, password: &str) -> Result<()> {
        self.storage.set_item(HANDLE_ITEM, handle)?;
        self.storage.set_item(PASSWORD_ITEM, password)
    }

    /// The remembered `(handle, password)` pair, if both entries are set.
    pub fn stored_login(&self) -> Option<(String, String)> {
        let handle = self.storage.get_item(HANDLE_ITEM)?;
        let password = self.storage.get_item(PASSWORD_ITEM)?;
        Some((handle, password))
    }
}

impl<L: LocalStorage> CredentialStore for LocalStorageStore<L> {
    fn load(&self, key: &CredentialKey) -> Result<Option<Credential>> {
        let name = key.file_name();
        match self.storage.get_item(&name) {
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| Error::persistence(name, e)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<()> {
        let name = key.file_name();
        let data = serde_json::to_string(credential).map_err(|e| Error::persistence(&name, e))?;
        self.storage.set_item(&name, &data)
    }
}
