// Configuration: where to talk to and who to log in as. Loaded once by the
// binary and then passed by reference; the core never mutates it.

use crate::error::{Error, Result};
use crate::store::CredentialKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_HOST: &str = "https://bsky.social";
pub const DEFAULT_BGS: &str = "https://bsky.network";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    /// Big-graph-service host, used for network-graph queries.
    #[serde(default = "default_bgs")]
    pub bgs: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub password: String,
    /// Directory holding the `.auth` credential files.
    #[serde(skip)]
    pub dir: PathBuf,
    /// Prefix for credential file names, `<profile>-` or empty.
    #[serde(skip)]
    pub prefix: String,
}

fn default_host() -> String {
    DEFAULT_HOST.into()
}

fn default_bgs() -> String {
    DEFAULT_BGS.into()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            bgs: default_bgs(),
            handle: String::new(),
            password: String::new(),
            dir: PathBuf::from("."),
            prefix: String::new(),
        }
    }
}

impl Config {
    /// Load `config.json` (or `config-<profile>.json`) from the given path or
    /// `<config_dir>/bsky`. A missing file yields defaults so that handle and
    /// password may come from the environment alone.
    pub fn load(path: Option<&Path>, profile: &str) -> Result<Self> {
        let (file, dir) = match path {
            Some(p) => {
                let dir = p.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
                (p.to_path_buf(), dir)
            }
            None => {
                let dir = default_dir()?;
                let name = if profile.is_empty() {
                    "config.json".to_string()
                } else {
                    format!("config-{}.json", profile)
                };
                (dir.join(name), dir)
            }
        };

        let mut cfg = if file.exists() {
            let data = std::fs::read_to_string(&file).map_err(|e| {
                Error::Configuration(format!("cannot read {}: {}", file.display(), e))
            })?;
            serde_json::from_str::<Config>(&data).map_err(|e| {
                Error::Configuration(format!("cannot parse {}: {}", file.display(), e))
            })?
        } else {
            tracing::debug!(path = %file.display(), "config file not found, using defaults");
            Config::default()
        };

        cfg.dir = dir;
        cfg.prefix = if profile.is_empty() {
            String::new()
        } else {
            format!("{}-", profile)
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("BSKY_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("BSKY_HANDLE") {
            self.handle = v;
        }
        if let Ok(v) = std::env::var("BSKY_PASSWORD") {
            self.password = v;
        }
    }

    /// Check the fields every command relies on. The password is only
    /// needed when a fresh login happens, so it is checked there.
    pub fn validate(&self) -> Result<()> {
        if self.handle.trim().is_empty() {
            return Err(Error::Configuration("handle is not set".into()));
        }
        parse_host(&self.host)?;
        parse_host(&self.bgs)?;
        Ok(())
    }

    pub fn credential_key(&self) -> CredentialKey {
        CredentialKey::new(&self.prefix, &self.handle)
    }
}

/// Parse an absolute http(s) host URL.
pub fn parse_host(host: &str) -> Result<Url> {
    let url = Url::parse(host)
        .map_err(|e| Error::Configuration(format!("invalid host {:?}: {}", host, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(Error::Configuration(format!(
            "host {:?} must be an http(s) URL",
            host
        ))),
    }
}

fn default_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("bsky"))
        .ok_or_else(|| Error::Configuration("cannot determine config directory".into()))
}
