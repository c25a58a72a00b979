use crate::cache::{Cache, DownloadMode, DownloadOptions, VerificationMode};
use crate::prelude::*;

use std::fs;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

/// Filename → etag, in a deterministic order. Local listings have no etags.
pub type FileListing = IndexMap<String, Option<String>>;

/// A handle naming where a dataset lives: a plain directory, or a repository
/// on the hub. Handles are immutable values; `normalize` validates them and
/// rejects malformed input up front.
#[derive(Debug, Clone, PartialEq)]
pub enum Repository {
    Local(PathBuf),
    Remote {
        repo_id: String,
        options: RepoOptions,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepoOptions {
    /// Git-style ref selecting the repository snapshot.
    pub revision: String,
    /// Hub base URL; `None` defers to `HF_ENDPOINT` or the public hub.
    pub endpoint: Option<Url>,
    pub cache_dir: Option<PathBuf>,
    pub offline: Option<bool>,
    pub auth_token: Option<String>,
    /// Path prefix within the repository; stripped from listing entries and
    /// re-added on download.
    pub subdir: Option<String>,
    pub download_mode: DownloadMode,
    pub verification_mode: VerificationMode,
    pub etag: Option<String>,
}

impl Default for RepoOptions {
    fn default() -> RepoOptions {
        RepoOptions {
            revision: DEFAULT_REVISION.to_string(),
            endpoint: None,
            cache_dir: None,
            offline: None,
            auth_token: None,
            subdir: None,
            download_mode: Default::default(),
            verification_mode: Default::default(),
            etag: None,
        }
    }
}

impl RepoOptions {
    pub(crate) fn endpoint_url(&self) -> Result<Url> {
        match &self.endpoint {
            Some(url) => Ok(url.clone()),
            None => default_endpoint(),
        }
    }

    pub(crate) fn download_options(&self, repo_id: &str) -> DownloadOptions {
        DownloadOptions {
            cache_dir: self.cache_dir.clone(),
            cache_scope: Some(cache_scope(repo_id)),
            auth_token: resolve_token(self.auth_token.as_deref()),
            etag: None,
            offline: self.offline,
            download_mode: self.download_mode,
            verification_mode: self.verification_mode,
        }
    }
}

pub(crate) fn default_endpoint() -> Result<Url> {
    match std::env::var("HF_ENDPOINT") {
        Ok(raw) if !raw.is_empty() => Url::parse(&raw)
            .map_err(|err| HubError::Argument(format!("bad HF_ENDPOINT {:?}: {}", raw, err)).into()),
        // unwrap rationale: the constant is a valid URL
        _ => Ok(Url::parse(DEFAULT_ENDPOINT).unwrap()),
    }
}

pub(crate) fn hub_url(endpoint: &Url, path: &str) -> Result<Url> {
    let base = endpoint.as_str().trim_end_matches('/');
    Url::parse(&format!("{}/{}", base, path))
        .with_context(|| format!("failed to build hub url for {:?}", path))
}

/// Per-repo namespace inside the cache directory: slashes become `--`, any
/// other non-word non-dash character is dropped.
pub fn cache_scope(repo_id: &str) -> String {
    let mut scope = String::with_capacity(repo_id.len() + 1);
    for c in repo_id.chars() {
        if c == '/' {
            scope.push_str("--");
        } else if c.is_alphanumeric() || c == '_' || c == '-' {
            scope.push(c);
        }
    }
    scope
}

pub(crate) fn validate_repo_id(repo_id: &str) -> Result<()> {
    let mut parts = repo_id.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(HubError::Argument(format!(
            "repository id must look like \"owner/name\", got {:?}",
            repo_id
        ))
        .into()),
    }
}

/// Explicit token, else `HF_TOKEN`. Anything that doesn't carry the `hf_`
/// prefix is not a hub token and counts as absent.
pub(crate) fn resolve_token(explicit: Option<&str>) -> Option<String> {
    let raw = match explicit {
        Some(token) => Some(token.to_string()),
        None => std::env::var("HF_TOKEN").ok(),
    };
    raw.filter(|token| token.starts_with("hf_"))
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    oid: Option<String>,
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    oid: String,
}

impl Repository {
    pub fn local(path: impl Into<PathBuf>) -> Repository {
        Repository::Local(path.into())
    }

    pub fn remote(repo_id: impl Into<String>) -> Repository {
        Repository::Remote {
            repo_id: repo_id.into(),
            options: Default::default(),
        }
    }

    pub fn remote_with(repo_id: impl Into<String>, options: RepoOptions) -> Repository {
        Repository::Remote {
            repo_id: repo_id.into(),
            options,
        }
    }

    /// An existing directory is a local repository; anything else must be a
    /// well-formed `owner/name` id.
    pub fn parse(path_or_id: &str) -> Result<Repository> {
        let path = Path::new(path_or_id);
        if path.is_dir() {
            Ok(Repository::local(path))
        } else {
            validate_repo_id(path_or_id)?;
            Ok(Repository::remote(path_or_id))
        }
    }

    /// Fail fast on malformed handles; every pipeline entry point calls this
    /// first.
    pub fn normalize(&self) -> Result<()> {
        match self {
            Repository::Local(dir) => {
                if !dir.is_dir() {
                    return Err(HubError::Argument(format!(
                        "{} is not a directory",
                        dir.display()
                    ))
                    .into());
                }
                Ok(())
            }
            Repository::Remote { repo_id, options } => {
                validate_repo_id(repo_id)?;
                if options.revision.is_empty() {
                    return Err(HubError::Argument("revision must not be empty".into()).into());
                }
                options.endpoint_url()?;
                Ok(())
            }
        }
    }

    /// List the files the repository holds, mapped to their etags.
    pub fn list(&self, cache: &Cache) -> Result<FileListing> {
        match self {
            Repository::Local(dir) => list_local(dir),
            Repository::Remote { repo_id, options } => list_remote(cache, repo_id, options),
        }
    }

    /// Fetch one file and return a local path to it. For remote repositories
    /// the listing etag is threaded through as the cache's fast-path hint.
    pub fn download(&self, cache: &Cache, filename: &str, etag: Option<&str>) -> Result<PathBuf> {
        match self {
            Repository::Local(dir) => {
                let path = dir.join(filename);
                if !path.is_file() {
                    return Err(HubError::EntryNotFound {
                        url: path.display().to_string(),
                    }
                    .into());
                }
                Ok(fs::canonicalize(&path)?)
            }
            Repository::Remote { repo_id, options } => {
                let url = resolve_url(repo_id, options, filename)?;
                let mut download_options = options.download_options(repo_id);
                download_options.etag = etag.map(String::from).or_else(|| options.etag.clone());
                cache.cached_download(&url, &download_options)
            }
        }
    }

    pub(crate) fn download_options(&self) -> DownloadOptions {
        match self {
            Repository::Local(_) => Default::default(),
            Repository::Remote { repo_id, options } => options.download_options(repo_id),
        }
    }
}

/// `<endpoint>/datasets/<repo_id>/resolve/<revision>/[<subdir>/]<filename>`
pub(crate) fn resolve_url(repo_id: &str, options: &RepoOptions, filename: &str) -> Result<Url> {
    let endpoint = options.endpoint_url()?;
    let mut path = format!("datasets/{}/resolve/{}", repo_id, options.revision);
    if let Some(subdir) = &options.subdir {
        path.push('/');
        path.push_str(subdir);
    }
    path.push('/');
    path.push_str(filename);
    hub_url(&endpoint, &path)
}

fn list_local(dir: &Path) -> Result<FileListing> {
    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    // read_dir order is platform-dependent; listings must be deterministic
    names.sort();
    Ok(names.into_iter().map(|name| (name, None)).collect())
}

fn list_remote(cache: &Cache, repo_id: &str, options: &RepoOptions) -> Result<FileListing> {
    let endpoint = options.endpoint_url()?;
    let mut tree_path = format!("api/datasets/{}/tree/{}", repo_id, options.revision);
    if let Some(subdir) = &options.subdir {
        tree_path.push('/');
        tree_path.push_str(subdir);
    }
    let url = hub_url(&endpoint, &tree_path)?;
    let listing_path = cache.cached_download(&url, &options.download_options(repo_id))?;
    let data = fs::read(&listing_path)?;
    let entries: Vec<TreeEntry> = serde_json::from_slice(&data).map_err(|err| {
        HubError::BadConfig(format!("malformed tree listing from {}: {}", url, err))
    })?;

    let mut listing = FileListing::new();
    for entry in entries {
        if entry.kind != "file" {
            continue;
        }
        let name = match &options.subdir {
            Some(subdir) => entry
                .path
                .strip_prefix(&format!("{}/", subdir))
                .unwrap_or(&entry.path)
                .to_string(),
            None => entry.path,
        };
        // LFS files resolve with their object id as the strong validator;
        // regular files use the git blob oid. Either way the quotes the hub
        // serves on HEAD are part of the stored etag.
        let oid = entry.lfs.map(|lfs| lfs.oid).or(entry.oid);
        listing.insert(name, oid.map(|oid| format!("\"{}\"", oid)));
    }
    Ok(listing)
}
