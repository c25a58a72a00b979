use crate::prelude::*;
use thiserror::Error;

/// The semantic error kinds surfaced by this crate. Everything is propagated
/// as `anyhow::Error`; callers that need to react to a specific condition can
/// `downcast_ref::<HubError>()`.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("repository not found, or access denied: {url} (for a private or gated repository, pass a valid access token)")]
    RepoNotFound { url: String },
    #[error("repository is gated: {url} (request access on the hub, then retry with an authorized token)")]
    GatedRepo { url: String },
    #[error("entry not found: {url}")]
    EntryNotFound { url: String },
    #[error("revision not found: {url}")]
    RevisionNotFound { url: String },
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("offline mode is enabled and {url} is not in the local cache (disable offline mode, or populate the cache first)")]
    OfflineMiss { url: String },
    #[error("response for {url} has neither an x-linked-etag nor an etag header")]
    NoEtag { url: String },
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("malformed response: {0}")]
    BadConfig(String),
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Map a non-success hub response onto the error taxonomy. The hub names the
/// precise failure in `x-error-code`; a bare 401 means the repository either
/// doesn't exist or isn't visible to us, which we can't tell apart.
pub(crate) fn status_error(url: &Url, response: &ureq::Response) -> HubError {
    match response.header("x-error-code") {
        Some("RepoNotFound") => HubError::RepoNotFound {
            url: url.to_string(),
        },
        Some("GatedRepo") => HubError::GatedRepo {
            url: url.to_string(),
        },
        Some("EntryNotFound") => HubError::EntryNotFound {
            url: url.to_string(),
        },
        Some("RevisionNotFound") => HubError::RevisionNotFound {
            url: url.to_string(),
        },
        _ if response.status() == 401 => HubError::RepoNotFound {
            url: url.to_string(),
        },
        _ => HubError::HttpStatus {
            status: response.status(),
            url: url.to_string(),
        },
    }
}
