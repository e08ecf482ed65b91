use bsctl::actions::{follow_all_followed_by, follow_one};
use bsctl::api::{Account, ContentService, FollowsPage, SessionService, SessionTokens, TimelinePage};
use bsctl::config::Config;
use bsctl::error::{Error, Result};
use bsctl::session::SessionManager;
use bsctl::store::{Credential, CredentialKey, CredentialStore, FileStore};
use std::cell::{Cell, RefCell};
use tempfile::TempDir;

/// Counts writes on top of a file store.
struct CountingStore {
    inner: FileStore,
    saves: Cell<u32>,
}

impl CredentialStore for CountingStore {
    fn load(&self, key: &CredentialKey) -> Result<Option<Credential>> {
        self.inner.load(key)
    }

    fn save(&self, key: &CredentialKey, credential: &Credential) -> Result<()> {
        self.saves.set(self.saves.get() + 1);
        self.inner.save(key, credential)
    }
}

struct FailingStore;

impl CredentialStore for FailingStore {
    fn load(&self, _key: &CredentialKey) -> Result<Option<Credential>> {
        Ok(None)
    }

    fn save(&self, key: &CredentialKey, _credential: &Credential) -> Result<()> {
        Err(Error::Persistence {
            location: key.file_name(),
            source: "read-only file system".into(),
        })
    }
}

struct Server {
    accept_refresh: bool,
    creates: Cell<u32>,
    refreshes: Cell<u32>,
}

impl Server {
    fn new(accept_refresh: bool) -> Self {
        Server {
            accept_refresh,
            creates: Cell::new(0),
            refreshes: Cell::new(0),
        }
    }
}

impl SessionService for Server {
    fn create_session(&self, handle: &str, _password: &str) -> Result<SessionTokens> {
        self.creates.set(self.creates.get() + 1);
        Ok(SessionTokens {
            did: "did:plc:alice".into(),
            handle: handle.into(),
            access_jwt: "fresh-access".into(),
            refresh_jwt: "fresh-refresh".into(),
        })
    }

    fn refresh_session(&self, _refresh_jwt: &str) -> Result<SessionTokens> {
        self.refreshes.set(self.refreshes.get() + 1);
        if !self.accept_refresh {
            return Err(Error::RemoteCall {
                operation: "com.atproto.server.refreshSession".into(),
                status: Some(400),
                reason: "ExpiredToken: Token has expired".into(),
            });
        }
        Ok(SessionTokens {
            did: "did:plc:alice".into(),
            handle: "alice.test".into(),
            access_jwt: "refreshed-access".into(),
            refresh_jwt: "refreshed-refresh".into(),
        })
    }
}

fn config(dir: &TempDir) -> Config {
    Config {
        handle: "alice.test".into(),
        password: "app-password".into(),
        dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

fn seed(store: &FileStore, cfg: &Config) {
    store
        .save(
            &cfg.credential_key(),
            &Credential {
                handle: "alice.test".into(),
                did: "did:plc:alice".into(),
                access_jwt: "stale-access".into(),
                refresh_jwt: "stale-refresh".into(),
            },
        )
        .unwrap();
}

#[test]
fn first_login_creates_one_session_and_one_record() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let store = CountingStore {
        inner: FileStore::new(dir.path()),
        saves: Cell::new(0),
    };
    let mgr = SessionManager::new(store, Server::new(true));

    let got = mgr.obtain(&cfg).unwrap();
    assert!(got.persist_error.is_none());
    assert_eq!(got.credential.did, "did:plc:alice");
    assert_eq!(mgr.remote().creates.get(), 1);
    assert_eq!(mgr.remote().refreshes.get(), 0);
    assert_eq!(mgr.store().saves.get(), 1);

    let on_disk = FileStore::new(dir.path())
        .load(&cfg.credential_key())
        .unwrap()
        .unwrap();
    assert_eq!(on_disk, got.credential);
}

#[test]
fn persisted_credential_is_refreshed_and_overwritten() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    seed(&FileStore::new(dir.path()), &cfg);

    let server = Server::new(true);
    let mgr = SessionManager::new(FileStore::new(dir.path()), server);
    let got = mgr.obtain(&cfg).unwrap();

    assert_eq!(got.credential.refresh_jwt, "refreshed-refresh");
    let stored = mgr.store().load(&cfg.credential_key()).unwrap().unwrap();
    assert_eq!(stored.access_jwt, "refreshed-access");
}

#[test]
fn saved_session_resumes_without_a_password() {
    let dir = TempDir::new().unwrap();
    let cfg = Config {
        password: String::new(),
        ..config(&dir)
    };
    cfg.validate().unwrap();
    seed(&FileStore::new(dir.path()), &cfg);

    let mgr = SessionManager::new(FileStore::new(dir.path()), Server::new(true));
    let got = mgr.obtain(&cfg).unwrap();
    assert_eq!(got.credential.access_jwt, "refreshed-access");
    assert_eq!(mgr.remote().refreshes.get(), 1);
    assert_eq!(mgr.remote().creates.get(), 0);
}

#[test]
fn rejected_refresh_without_a_password_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let cfg = Config {
        password: String::new(),
        ..config(&dir)
    };
    seed(&FileStore::new(dir.path()), &cfg);

    let mgr = SessionManager::new(FileStore::new(dir.path()), Server::new(false));
    let err = mgr.obtain(&cfg).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(mgr.remote().creates.get(), 0);
}

#[test]
fn rejected_refresh_falls_back_to_password_login() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    seed(&FileStore::new(dir.path()), &cfg);

    let mgr = SessionManager::new(FileStore::new(dir.path()), Server::new(false));
    let got = mgr.obtain(&cfg).unwrap();
    assert_eq!(got.credential.refresh_jwt, "fresh-refresh");

    let raw = std::fs::read_to_string(dir.path().join("alice.test.auth")).unwrap();
    assert!(!raw.contains("stale-refresh"));
    assert!(raw.contains("fresh-refresh"));
}

#[test]
fn unsaved_credential_is_still_returned() {
    let dir = TempDir::new().unwrap();
    let mgr = SessionManager::new(FailingStore, Server::new(true));
    let got = mgr.obtain(&config(&dir)).unwrap();
    assert_eq!(got.credential.access_jwt, "fresh-access");
    assert!(matches!(got.persist_error, Some(Error::Persistence { .. })));
}

/// Three followed accounts; following the second one fails.
struct Graph {
    attempts: RefCell<Vec<String>>,
}

impl ContentService for Graph {
    fn actor_did(&self) -> &str {
        "did:plc:alice"
    }

    fn create_follow(&self, subject_did: &str) -> Result<String> {
        self.attempts.borrow_mut().push(subject_did.to_string());
        if subject_did == "did:plc:two" {
            return Err(Error::RemoteCall {
                operation: "com.atproto.repo.createRecord".into(),
                status: Some(400),
                reason: "InvalidRequest: blocked".into(),
            });
        }
        Ok(format!("at://did:plc:alice/app.bsky.graph.follow/{}", subject_did))
    }

    fn list_follows(&self, _actor: &str, _cursor: Option<&str>) -> Result<FollowsPage> {
        let follows = ["one", "two", "three"]
            .iter()
            .map(|n| Account {
                did: format!("did:plc:{}", n),
                handle: format!("{}.test", n),
                display_name: None,
            })
            .collect();
        Ok(FollowsPage {
            follows,
            cursor: None,
        })
    }

    fn resolve_handle(&self, _handle: &str) -> Result<String> {
        Ok("did:plc:two".into())
    }

    fn timeline(&self, _limit: u32, _cursor: Option<&str>) -> Result<TimelinePage> {
        Ok(TimelinePage::default())
    }

    fn create_post(&self, _text: &str) -> Result<String> {
        Ok("at://did:plc:alice/app.bsky.feed.post/1".into())
    }
}

#[test]
fn bulk_follow_continues_past_a_failure() {
    let graph = Graph {
        attempts: RefCell::new(Vec::new()),
    };
    let report = follow_all_followed_by(&graph, "ref.test").unwrap();

    assert_eq!(
        *graph.attempts.borrow(),
        vec!["did:plc:one", "did:plc:two", "did:plc:three"]
    );
    assert_eq!(report.followed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].account.handle, "two.test");
    assert!(report.to_string().starts_with("followed 2, failed 1"));
}

#[test]
fn single_follow_failure_names_the_target() {
    let graph = Graph {
        attempts: RefCell::new(Vec::new()),
    };
    let err = follow_one(&graph, "two.test").unwrap_err();
    assert!(err.to_string().contains("two.test"));
    assert!(matches!(err, Error::Follow { .. }));
}
