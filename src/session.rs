// Session lifecycle: resume a persisted credential by refreshing it, or
// log in with the password when there is none or the refresh is rejected.

use crate::api::{SessionService, SessionTokens};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{Credential, CredentialKey, CredentialStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A usable credential. `persist_error` is set when the credential could
/// not be written to the store; it is still valid for this process.
#[derive(Debug)]
pub struct Obtained {
    pub credential: Credential,
    pub persist_error: Option<Error>,
}

/// Owns one credential slot per account key. Construct one per process and
/// pass it where sessions are needed.
pub struct SessionManager<S, R> {
    store: S,
    remote: R,
    slots: Mutex<HashMap<CredentialKey, Credential>>,
}

impl<S: CredentialStore, R: SessionService> SessionManager<S, R> {
    pub fn new(store: S, remote: R) -> Self {
        SessionManager {
            store,
            remote,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Return a valid credential for `config.handle`, refreshing or logging
    /// in as needed. At most one store write per call.
    pub fn obtain(&self, config: &Config) -> Result<Obtained> {
        let key = config.credential_key();
        if key.handle.is_empty() {
            return Err(Error::Configuration("handle is not set".into()));
        }

        // Held across the network round trip so concurrent callers cannot
        // both refresh the same credential.
        let mut slots = self.slots.lock();
        if let Some(cached) = slots.get(&key) {
            if !cached.is_access_expired(Utc::now()) {
                tracing::debug!(handle = %key.handle, "reusing cached session");
                return Ok(Obtained {
                    credential: cached.clone(),
                    persist_error: None,
                });
            }
        }

        let previous = slots.get(&key).cloned().or_else(|| self.load(&key));
        let credential = match previous.and_then(|prev| self.refresh(prev)) {
            Some(refreshed) => refreshed,
            None => self.login(config)?,
        };

        let persist_error = match self.store.save(&key, &credential) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(handle = %key.handle, error = %e, "cannot persist session");
                Some(e)
            }
        };
        slots.insert(key, credential.clone());
        Ok(Obtained {
            credential,
            persist_error,
        })
    }

    /// Drop the in-memory slot. The persisted entry is left alone.
    pub fn forget(&self, config: &Config) {
        self.slots.lock().remove(&config.credential_key());
    }

    fn load(&self, key: &CredentialKey) -> Option<Credential> {
        match self.store.load(key) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(handle = %key.handle, error = %e, "ignoring unreadable credential");
                None
            }
        }
    }

    fn refresh(&self, previous: Credential) -> Option<Credential> {
        match self.remote.refresh_session(&previous.refresh_jwt) {
            Ok(tokens) => {
                tracing::info!(handle = %previous.handle, "session refreshed");
                Some(apply(previous.handle, tokens))
            }
            Err(e) => {
                tracing::warn!(
                    handle = %previous.handle,
                    error = %e,
                    "refresh rejected, logging in again"
                );
                None
            }
        }
    }

    fn login(&self, config: &Config) -> Result<Credential> {
        if config.password.is_empty() {
            return Err(Error::Configuration(format!(
                "no usable saved session for {} and password is not set",
                config.handle
            )));
        }
        let tokens = self
            .remote
            .create_session(&config.handle, &config.password)
            .map_err(|e| Error::Authentication {
                handle: config.handle.clone(),
                source: Box::new(e),
            })?;
        tracing::info!(handle = %config.handle, did = %tokens.did, "session created");
        Ok(apply(config.handle.clone(), tokens))
    }
}

/// The handle stays the one the user configured; the server's DID and
/// tokens replace whatever was there.
fn apply(handle: String, tokens: SessionTokens) -> Credential {
    Credential {
        handle,
        did: tokens.did,
        access_jwt: tokens.access_jwt,
        refresh_jwt: tokens.refresh_jwt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::jwt_with_exp;
    use crate::store::{LocalStorageStore, MemoryStorage};
    use std::cell::Cell;

    struct Remote {
        creates: Cell<u32>,
        refreshes: Cell<u32>,
        exp: i64,
    }

    impl Remote {
        fn new(exp: i64) -> Self {
            Remote {
                creates: Cell::new(0),
                refreshes: Cell::new(0),
                exp,
            }
        }
    }

    impl SessionService for Remote {
        fn create_session(&self, _handle: &str, password: &str) -> Result<SessionTokens> {
            self.creates.set(self.creates.get() + 1);
            if password != "pw" {
                return Err(Error::remote("createSession", "AuthenticationRequired"));
            }
            Ok(SessionTokens {
                did: "did:plc:alice".into(),
                handle: "alice.test".into(),
                access_jwt: jwt_with_exp(self.exp),
                refresh_jwt: format!("refresh-{}", self.creates.get()),
            })
        }

        fn refresh_session(&self, _refresh_jwt: &str) -> Result<SessionTokens> {
            self.refreshes.set(self.refreshes.get() + 1);
            Ok(SessionTokens {
                did: "did:plc:alice".into(),
                handle: "alice.test".into(),
                access_jwt: jwt_with_exp(self.exp),
                refresh_jwt: "refreshed".into(),
            })
        }
    }

    fn config(password: &str) -> Config {
        Config {
            handle: "alice.test".into(),
            password: password.into(),
            ..Config::default()
        }
    }

    #[test]
    fn cached_credential_skips_the_network() {
        let mgr = SessionManager::new(
            LocalStorageStore::new(MemoryStorage::default()),
            Remote::new(Utc::now().timestamp() + 3600),
        );
        let first = mgr.obtain(&config("pw")).unwrap();
        let second = mgr.obtain(&config("pw")).unwrap();
        assert_eq!(first.credential, second.credential);
        assert_eq!(mgr.remote.creates.get(), 1);
        assert_eq!(mgr.remote.refreshes.get(), 0);
    }

    #[test]
    fn expired_cached_credential_is_refreshed() {
        let mgr = SessionManager::new(
            LocalStorageStore::new(MemoryStorage::default()),
            Remote::new(Utc::now().timestamp() - 10),
        );
        mgr.obtain(&config("pw")).unwrap();
        let again = mgr.obtain(&config("pw")).unwrap();
        assert_eq!(again.credential.refresh_jwt, "refreshed");
        assert_eq!(mgr.remote.creates.get(), 1);
        assert_eq!(mgr.remote.refreshes.get(), 1);
    }

    #[test]
    fn wrong_password_is_an_authentication_error() {
        let mgr = SessionManager::new(
            LocalStorageStore::new(MemoryStorage::default()),
            Remote::new(0),
        );
        let err = mgr.obtain(&config("nope")).unwrap_err();
        assert!(matches!(err, Error::Authentication { .. }));
        assert!(err.is_fatal_auth());

        let cause = std::error::Error::source(&err).unwrap();
        assert!(cause.to_string().contains("AuthenticationRequired"));
    }

    #[test]
    fn missing_password_only_matters_without_a_saved_session() {
        let mgr = SessionManager::new(
            LocalStorageStore::new(MemoryStorage::default()),
            Remote::new(Utc::now().timestamp() + 3600),
        );
        let err = mgr.obtain(&config("")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(mgr.remote.creates.get(), 0);
    }

    #[test]
    fn forget_keeps_the_store_entry() {
        let mgr = SessionManager::new(
            LocalStorageStore::new(MemoryStorage::default()),
            Remote::new(Utc::now().timestamp() + 3600),
        );
        let cfg = config("pw");
        mgr.obtain(&cfg).unwrap();
        mgr.forget(&cfg);

        assert!(mgr.store().load(&cfg.credential_key()).unwrap().is_some());
        let again = mgr.obtain(&cfg).unwrap();
        assert_eq!(again.credential.refresh_jwt, "refreshed");
        assert_eq!(mgr.remote.refreshes.get(), 1);
    }
}
