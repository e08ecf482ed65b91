// Library root
// -----------
// This crate exposes the client core used by the `bsctl` binary.
//
// Module responsibilities:
// - `config`: where to connect and which account to use.
// - `store`: session credentials and the stores that persist them.
// - `session`: resume, refresh or create the session for an account.
// - `api`: the XRPC transport and the client factory.
// - `actions`: follow one account or everyone another account follows.
// - `record` / `richtext`: post records, timestamps and span rendering.
// - `ui`: terminal output and the interactive shell.
pub mod actions;
pub mod api;
pub mod config;
pub mod error;
pub mod record;
pub mod richtext;
pub mod session;
pub mod store;
pub mod ui;

pub use error::{Error, Result};
