// Follow actions against the content service. Calls are sequential: the
// bulk follow keeps going past per-account failures and reports them in
// listing order.

use crate::api::{Account, ContentService};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowSuccess {
    pub target: String,
    pub uri: String,
}

#[derive(Debug)]
pub struct FollowFailure {
    pub account: Account,
    pub error: Error,
}

/// Outcome of a bulk follow.
#[derive(Debug, Default)]
pub struct FollowReport {
    pub followed: Vec<FollowSuccess>,
    pub failed: Vec<FollowFailure>,
    /// Duplicates and the actor's own account.
    pub skipped: Vec<Account>,
    /// Set when listing stopped early; follows made before it stand.
    pub listing_error: Option<Error>,
}

impl FollowReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.listing_error.is_none()
    }
}

impl fmt::Display for FollowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "followed {}, failed {}, skipped {}",
            self.followed.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {} ({}): {}", failure.account.handle, failure.account.did, failure.error)?;
        }
        if let Some(e) = &self.listing_error {
            write!(f, "\n  listing stopped early: {}", e)?;
        }
        Ok(())
    }
}

/// Progress notifications for the bulk follow.
pub enum Progress<'a> {
    Followed(&'a Account, &'a FollowSuccess),
    Failed(&'a Account, &'a Error),
    Skipped(&'a Account),
}

/// Resolve a follow target to a DID. Accepts a DID, an `at://` URI whose
/// authority is a DID, or a handle.
pub fn resolve_target<C: ContentService + ?Sized>(client: &C, target: &str) -> Result<String> {
    let target = target.trim();
    if target.starts_with("did:") {
        return Ok(target.to_string());
    }
    if let Some(rest) = target.strip_prefix("at://") {
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.starts_with("did:") {
            return Ok(authority.to_string());
        }
        return client.resolve_handle(authority);
    }
    client.resolve_handle(target.trim_start_matches('@'))
}

/// Follow one account. Failures name the target and keep the cause.
pub fn follow_one<C: ContentService + ?Sized>(client: &C, target: &str) -> Result<FollowSuccess> {
    let wrap = |e: Error| Error::Follow {
        target: target.to_string(),
        source: Box::new(e),
    };
    let did = resolve_target(client, target).map_err(wrap)?;
    let uri = client.create_follow(&did).map_err(wrap)?;
    tracing::info!(subject = %target, %uri, "followed");
    Ok(FollowSuccess {
        target: did,
        uri,
    })
}

/// Lazy walk over the accounts `actor` follows, one page per request.
/// Not restartable; create a new pager to list again.
pub struct FollowsPager<'a, C: ?Sized> {
    client: &'a C,
    actor: String,
    cursor: Option<String>,
    buffer: std::vec::IntoIter<Account>,
    done: bool,
}

impl<'a, C: ContentService + ?Sized> FollowsPager<'a, C> {
    pub fn new(client: &'a C, actor: &str) -> Self {
        FollowsPager {
            client,
            actor: actor.to_string(),
            cursor: None,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }
}

impl<C: ContentService + ?Sized> Iterator for FollowsPager<'_, C> {
    type Item = Result<Account>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(account) = self.buffer.next() {
                return Some(Ok(account));
            }
            if self.done {
                return None;
            }
            match self.client.list_follows(&self.actor, self.cursor.as_deref()) {
                Ok(page) => {
                    self.done = page.follows.is_empty() || page.cursor.is_none();
                    self.cursor = page.cursor;
                    self.buffer = page.follows.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Every account `handle` follows, in listing order.
pub fn list_follows<C: ContentService + ?Sized>(client: &C, handle: &str) -> Result<Vec<Account>> {
    FollowsPager::new(client, handle).collect()
}

pub fn follow_all_followed_by<C: ContentService + ?Sized>(
    client: &C,
    reference: &str,
) -> Result<FollowReport> {
    follow_all_followed_by_with(client, reference, |_| {})
}

/// Follow every account `reference` follows. Only a failure to fetch the
/// first page is returned as an error.
pub fn follow_all_followed_by_with<C, F>(
    client: &C,
    reference: &str,
    mut on_progress: F,
) -> Result<FollowReport>
where
    C: ContentService + ?Sized,
    F: FnMut(Progress<'_>),
{
    let mut report = FollowReport::default();
    let mut seen = HashSet::new();
    let actor = client.actor_did().to_string();

    for (i, item) in FollowsPager::new(client, reference).enumerate() {
        let account = match item {
            Ok(account) => account,
            Err(e) if i == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "follows listing stopped");
                report.listing_error = Some(e);
                break;
            }
        };

        if account.did == actor || !seen.insert(account.did.clone()) {
            on_progress(Progress::Skipped(&account));
            report.skipped.push(account);
            continue;
        }

        match client.create_follow(&account.did) {
            Ok(uri) => {
                let success = FollowSuccess {
                    target: account.did.clone(),
                    uri,
                };
                on_progress(Progress::Followed(&account, &success));
                report.followed.push(success);
            }
            Err(error) => {
                tracing::warn!(handle = %account.handle, error = %error, "follow failed");
                on_progress(Progress::Failed(&account, &error));
                report.failed.push(FollowFailure { account, error });
            }
        }
    }
    tracing::info!(reference = %reference, summary = %report, "bulk follow finished");
    Ok(report)
}
