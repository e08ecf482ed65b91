// Error kinds shared by the library modules. The binary wraps these in
// `anyhow` for reporting; library code returns `error::Result`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed host or a required field is missing. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Both the refresh and the fresh login failed.
    #[error("cannot create session for {handle}: {source}")]
    Authentication {
        handle: String,
        #[source]
        source: Box<Error>,
    },

    /// A credential could not be read from or written to its store.
    #[error("cannot access credential at {location}: {source}")]
    Persistence {
        location: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{operation} failed: {reason}")]
    RemoteCall {
        operation: String,
        status: Option<u16>,
        reason: String,
    },

    /// Malformed protocol record, e.g. a timestamp in no accepted format.
    #[error("malformed record: {0}")]
    Format(String),

    #[error("cannot follow {target}: {source}")]
    Follow {
        target: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn remote(operation: &str, reason: impl std::fmt::Display) -> Self {
        Error::RemoteCall {
            operation: operation.to_string(),
            status: None,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(
        location: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Persistence {
            location: location.into(),
            source: source.into(),
        }
    }

    /// True for errors that leave the caller without a usable session.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, Error::Authentication { .. } | Error::Configuration(_))
    }
}
