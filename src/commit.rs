use crate::error::status_error;
use crate::net::HttpClient;
use crate::prelude::*;
use crate::repo::{self, resolve_token, validate_repo_id};

use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};

/// One change in a commit. Small files travel inline (base64); files already
/// uploaded to LFS storage are referenced by their sha256 object id.
#[derive(Debug, Clone)]
pub enum CommitOperation {
    AddFile { path: String, content: Vec<u8> },
    DeleteFile { path: String },
    LfsFile { path: String, content: Vec<u8> },
}

impl CommitOperation {
    fn to_line(&self) -> Value {
        match self {
            CommitOperation::AddFile { path, content } => json!({
                "key": "file",
                "value": {
                    "content": base64::engine::general_purpose::STANDARD.encode(content),
                    "path": path,
                    "encoding": "base64",
                }
            }),
            CommitOperation::DeleteFile { path } => json!({
                "key": "deletedFile",
                "value": {"path": path}
            }),
            CommitOperation::LfsFile { path, content } => json!({
                "key": "lfsFile",
                "value": {
                    "path": path,
                    "algo": "sha256",
                    "oid": format!("{:x}", Sha256::digest(content)),
                    "size": content.len(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub revision: Option<String>,
    pub endpoint: Option<Url>,
    pub auth_token: Option<String>,
    pub description: Option<String>,
}

/// POST a commit to `repo_id` as newline-delimited JSON: a header line, then
/// one line per operation.
pub fn commit(
    repo_id: &str,
    summary: &str,
    operations: &[CommitOperation],
    options: &CommitOptions,
) -> Result<()> {
    validate_repo_id(repo_id)?;
    let token = resolve_token(options.auth_token.as_deref()).ok_or_else(|| {
        HubError::Argument("a hub access token (hf_...) is required to commit".into())
    })?;
    let endpoint = match &options.endpoint {
        Some(url) => url.clone(),
        None => repo::default_endpoint()?,
    };
    let revision = options.revision.as_deref().unwrap_or(repo::DEFAULT_REVISION);
    let url = repo::hub_url(
        &endpoint,
        &format!("api/datasets/{}/commit/{}", repo_id, revision),
    )?;

    let header = json!({
        "key": "header",
        "value": {
            "summary": summary,
            "description": options.description.clone().unwrap_or_default(),
        }
    });
    let mut body = header.to_string();
    body.push('\n');
    for operation in operations {
        body.push_str(&operation.to_line().to_string());
        body.push('\n');
    }

    let http = HttpClient::new();
    let headers = [("Authorization", format!("Bearer {}", token))];
    let response = http.post(&url, &headers, "application/x-ndjson", &body)?;
    if response.status() >= 300 {
        return Err(status_error(&url, &response).into());
    }
    info!("committed {} operation(s) to {}", operations.len(), repo_id);
    Ok(())
}
