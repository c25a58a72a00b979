use crate::error::status_error;
use crate::net::HttpClient;
use crate::prelude::*;

use std::fs;

use md5::{Digest, Md5};

// All cache entries live under this subdirectory of the cache root, so the
// layout stays recognizable to other tools that read the same cache.
const CACHE_SUBDIR: &str = "huggingface";
const MAX_REDIRECTS: usize = 5;

/// What to do when a cache entry for the URL already exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DownloadMode {
    #[default]
    ReuseIfExists,
    ForceRedownload,
}

/// How much checking to do before trusting a cache entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum VerificationMode {
    #[default]
    BasicChecks,
    NoChecks,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub cache_dir: Option<PathBuf>,
    pub cache_scope: Option<String>,
    pub auth_token: Option<String>,
    /// A strong validator known up front (e.g. from a tree listing). When the
    /// cache already holds this exact version, no network traffic happens at
    /// all.
    pub etag: Option<String>,
    /// `None` defers to the `DATASETS_OFFLINE` environment variable.
    pub offline: Option<bool>,
    pub download_mode: DownloadMode,
    pub verification_mode: VerificationMode,
}

/// Result of the HEAD probe: the authoritative validator for a URL plus where
/// the redirect chain ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadProbe {
    /// Stored verbatim, surrounding quotes included.
    pub etag: String,
    pub final_url: Url,
    pub was_redirected: bool,
    /// False once the chain crossed origins and the Authorization header was
    /// dropped; the follow-up GET must not re-attach it.
    pub auth_ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    etag: String,
    url: String,
}

static BASE32_LOWER_NOPAD: Lazy<data_encoding::Encoding> = Lazy::new(|| {
    let mut spec = data_encoding::Specification::new();
    spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
    // unwrap rationale: 32 distinct symbols is a valid base-32 alphabet
    spec.encoding().unwrap()
});

/// Cache filenames are pure functions of (url, etag): the URL is hashed (it
/// can be arbitrarily long), the etag is encoded as-is. Both lowercase
/// unpadded base32, a spelling other tools sharing this cache rely on.
pub(crate) fn enc_url(url: &Url) -> String {
    BASE32_LOWER_NOPAD.encode(&Md5::digest(url.as_str().as_bytes()))
}

pub(crate) fn enc_etag(etag: &str) -> String {
    BASE32_LOWER_NOPAD.encode(etag.as_bytes())
}

pub(crate) fn default_cache_dir() -> PathBuf {
    match std::env::var_os("DATASETS_CACHE_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PROJECT_DIRS.cache_dir().to_path_buf(),
    }
}

fn offline_env(value: &str) -> bool {
    matches!(value, "1" | "true")
}

/// An explicit option always beats the environment.
pub(crate) fn offline_enabled(explicit: Option<bool>) -> bool {
    match explicit {
        Some(enabled) => enabled,
        None => std::env::var("DATASETS_OFFLINE")
            .map(|value| offline_env(&value))
            .unwrap_or(false),
    }
}

fn auth_headers(token: Option<&str>) -> Vec<(&'static str, String)> {
    match token {
        Some(token) => vec![("Authorization", format!("Bearer {}", token))],
        None => Vec::new(),
    }
}

fn read_meta(meta_path: &Path) -> Option<CacheMeta> {
    let data = fs::read(meta_path).ok()?;
    // a half-written or mangled metadata file reads as "absent"
    serde_json::from_slice(&data).ok()
}

fn write_meta(meta_path: &Path, etag: &str, url: &Url) -> Result<()> {
    // unwrap rationale: cache entry paths always have a parent
    let mut tmp = tempfile::NamedTempFile::new_in(meta_path.parent().unwrap())?;
    serde_json::to_writer(
        &mut tmp,
        &CacheMeta {
            etag: etag.to_string(),
            url: url.to_string(),
        },
    )?;
    tmp.persist(meta_path)
        .with_context(|| format!("failed to write cache metadata {}", meta_path.display()))?;
    Ok(())
}

/// Content-addressed cache over the hub's file-resolution protocol. A HEAD
/// probe turns a URL into a strong validator; the validator names the content
/// file on disk. Writes are atomic (temp + rename), so concurrent callers race
/// harmlessly: both sides produce identical bytes.
#[derive(Clone, Debug)]
pub struct Cache {
    http: HttpClient,
}

impl Cache {
    pub fn new(http: HttpClient) -> Cache {
        Cache { http }
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    fn entry_dir(&self, options: &DownloadOptions) -> PathBuf {
        let mut dir = options
            .cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir);
        dir.push(CACHE_SUBDIR);
        if let Some(scope) = &options.cache_scope {
            dir.push(scope);
        }
        dir
    }

    /// Return a local path holding a byte-identical copy of `url`.
    pub fn cached_download(&self, url: &Url, options: &DownloadOptions) -> Result<PathBuf> {
        let dir = self.entry_dir(options);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        let url_key = enc_url(url);
        let meta_path = dir.join(format!("{}.json", url_key));

        if options.download_mode == DownloadMode::ForceRedownload {
            match fs::remove_file(&meta_path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to drop stale cache metadata {}", meta_path.display())
                    })
                }
            }
        }

        if offline_enabled(options.offline) {
            return self.offline_lookup(url, &dir, &url_key, &meta_path, options);
        }

        // A caller-supplied etag lets us skip even the HEAD probe.
        if let Some(expected) = &options.etag {
            if let Some(path) = verified_entry(&dir, &url_key, &meta_path, expected) {
                debug!("cache hit (caller etag) for {}", url);
                return Ok(path);
            }
        }

        let probe = self.head_download(url, options.auth_token.as_deref())?;
        if let Some(path) = verified_entry(&dir, &url_key, &meta_path, &probe.etag) {
            debug!("cache hit (validated etag) for {}", url);
            return Ok(path);
        }

        let content_path = dir.join(format!("{}.{}", url_key, enc_etag(&probe.etag)));
        // Credentials must not travel to a host the probe chain left our
        // origin for.
        let headers = auth_headers(if probe.auth_ok {
            options.auth_token.as_deref()
        } else {
            None
        });
        debug!("fetching {} -> {}", url, content_path.display());
        let fetched = self
            .http
            .download(&probe.final_url, &headers, &content_path)
            .and_then(|()| write_meta(&meta_path, &probe.etag, url));
        if let Err(err) = fetched {
            // Roll the entry back to fully absent so a later call starts clean.
            let _ = fs::remove_file(&content_path);
            let _ = fs::remove_file(&meta_path);
            return Err(err);
        }
        Ok(content_path)
    }

    /// HEAD `url` (redirects disabled) and follow `Location` by hand, up to a
    /// small cap. Same-origin hops keep the original headers; the first
    /// cross-origin hop drops `Authorization` for the rest of the chain, so
    /// tokens never leak to third-party CDNs. The etag is taken from the final
    /// non-redirect response, preferring the hub's `x-linked-etag` (the LFS
    /// pointer) over plain `etag`.
    pub fn head_download(&self, url: &Url, auth_token: Option<&str>) -> Result<HeadProbe> {
        let mut current = url.clone();
        let mut auth_ok = true;
        let mut was_redirected = false;
        for _ in 0..=MAX_REDIRECTS {
            let headers = auth_headers(if auth_ok { auth_token } else { None });
            let response = self.http.request("HEAD", &current, &headers)?;
            let status = response.status();
            if (300..400).contains(&status) {
                let location = match response.header("Location") {
                    Some(location) => location,
                    None => bail!("redirect from {} carries no Location header", current),
                };
                let next = match Url::parse(location) {
                    Ok(absolute) => absolute,
                    Err(url::ParseError::RelativeUrlWithoutBase) => current.join(location)?,
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("bad redirect Location {:?}", location))
                    }
                };
                if next.origin() != current.origin() {
                    auth_ok = false;
                }
                was_redirected = true;
                current = next;
                continue;
            }
            if status < 400 {
                let etag = response
                    .header("x-linked-etag")
                    .or_else(|| response.header("etag"))
                    .ok_or_else(|| HubError::NoEtag {
                        url: current.to_string(),
                    })?
                    .to_string();
                return Ok(HeadProbe {
                    etag,
                    final_url: current,
                    was_redirected,
                    auth_ok,
                });
            }
            return Err(status_error(&current, &response).into());
        }
        bail!("hit redirection limit at {}", url);
    }

    fn offline_lookup(
        &self,
        url: &Url,
        dir: &Path,
        url_key: &str,
        meta_path: &Path,
        options: &DownloadOptions,
    ) -> Result<PathBuf> {
        if let Some(meta) = read_meta(meta_path) {
            let content = dir.join(format!("{}.{}", url_key, enc_etag(&meta.etag)));
            if content.is_file() || options.verification_mode == VerificationMode::NoChecks {
                debug!("cache hit (offline) for {}", url);
                return Ok(content);
            }
        }
        Err(HubError::OfflineMiss {
            url: url.to_string(),
        }
        .into())
    }
}

/// The entry counts only if the metadata parses, carries the expected etag,
/// and the content file it points at actually exists.
fn verified_entry(dir: &Path, url_key: &str, meta_path: &Path, etag: &str) -> Option<PathBuf> {
    let meta = read_meta(meta_path)?;
    if meta.etag != etag {
        return None;
    }
    let content = dir.join(format!("{}.{}", url_key, enc_etag(etag)));
    if content.is_file() {
        Some(content)
    } else {
        None
    }
}
