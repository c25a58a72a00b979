use crate::cache::{Cache, DownloadMode, VerificationMode};
use crate::filter::by_config_and_split;
use crate::net::HttpClient;
use crate::prelude::*;
use crate::repo::{self, FileListing, RepoOptions, Repository};
use crate::streaming::{SourceTarget, StreamSource, StreamingDataset};
use crate::table::{read_table, FileKind, Table};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Options for `load_dataset`. The repository-facing fields (`revision`,
/// `cache_dir`, and friends) are passed through to the cache untouched.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Keep only files matching this configuration name.
    pub name: Option<String>,
    /// Keep only files matching this split.
    pub split: Option<String>,
    /// Return a lazy row stream instead of in-memory tables.
    pub streaming: bool,
    /// Streaming batch size; must be positive.
    pub batch_size: usize,
    /// Fan-out width for fetch and decode; must be positive.
    pub num_proc: usize,
    pub revision: Option<String>,
    pub endpoint: Option<Url>,
    pub cache_dir: Option<PathBuf>,
    pub offline: Option<bool>,
    pub auth_token: Option<String>,
    pub subdir: Option<String>,
    pub download_mode: DownloadMode,
    pub verification_mode: VerificationMode,
    pub etag: Option<String>,
}

impl Default for LoadOptions {
    fn default() -> LoadOptions {
        LoadOptions {
            name: None,
            split: None,
            streaming: false,
            batch_size: DEFAULT_BATCH_SIZE,
            num_proc: 1,
            revision: None,
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

impl LoadOptions {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(HubError::Argument("batch_size must be positive".into()).into());
        }
        if self.num_proc == 0 {
            return Err(HubError::Argument("num_proc must be positive".into()).into());
        }
        Ok(())
    }

    fn repo_options(&self) -> RepoOptions {
        RepoOptions {
            revision: self
                .revision
                .clone()
                .unwrap_or_else(|| repo::DEFAULT_REVISION.to_string()),
            endpoint: self.endpoint.clone(),
            cache_dir: self.cache_dir.clone(),
            offline: self.offline,
            auth_token: self.auth_token.clone(),
            subdir: self.subdir.clone(),
            download_mode: self.download_mode,
            verification_mode: self.verification_mode,
            etag: self.etag.clone(),
        }
    }
}

/// What `load_dataset` hands back: every matching file decoded into memory,
/// or a lazy stream over the same files.
#[derive(Debug)]
pub enum Dataset {
    Tables(Vec<Table>),
    Streaming(StreamingDataset),
}

impl Dataset {
    pub fn into_tables(self) -> Option<Vec<Table>> {
        match self {
            Dataset::Tables(tables) => Some(tables),
            Dataset::Streaming(_) => None,
        }
    }

    pub fn into_streaming(self) -> Option<StreamingDataset> {
        match self {
            Dataset::Tables(_) => None,
            Dataset::Streaming(dataset) => Some(dataset),
        }
    }
}

/// Load a dataset from a local directory or an `owner/name` hub repository.
pub fn load_dataset(path_or_id: &str, options: LoadOptions) -> Result<Dataset> {
    let repository = match Repository::parse(path_or_id)? {
        Repository::Remote { repo_id, .. } => Repository::Remote {
            repo_id,
            options: options.repo_options(),
        },
        local => local,
    };
    load_dataset_from(&repository, options)
}

/// Like `load_dataset`, for an already-built repository handle. The handle's
/// own options win over the load options for everything repository-shaped.
pub fn load_dataset_from(repository: &Repository, options: LoadOptions) -> Result<Dataset> {
    options.validate()?;
    repository.normalize()?;
    let cache = Cache::new(HttpClient::new());

    let listing = repository.list(&cache)?;
    let filtered = by_config_and_split(
        &listing,
        options.name.as_deref(),
        options.split.as_deref(),
    );
    debug!(
        "{} of {} files selected (name={:?}, split={:?})",
        filtered.len(),
        listing.len(),
        options.name,
        options.split
    );

    if options.streaming {
        let sources = stream_sources(repository, &filtered)?;
        return Ok(Dataset::Streaming(StreamingDataset::new(
            sources,
            options.batch_size,
            cache,
            repository.download_options(),
        )));
    }

    // Only files in a format we can decode take part in the eager path.
    let files: Vec<(String, Option<String>, FileKind)> = filtered
        .into_iter()
        .filter_map(|(name, etag)| {
            FileKind::from_filename(&name).map(|kind| (name, etag, kind))
        })
        .collect();

    let paths = parallel_try_map(options.num_proc, &files, |(name, etag, _)| {
        repository.download(&cache, name, etag.as_deref())
    })?;

    let fetched: Vec<(PathBuf, FileKind)> = paths
        .into_iter()
        .zip(files.iter())
        .map(|(path, (_, _, kind))| (path, *kind))
        .collect();
    let tables = parallel_try_map(options.num_proc, &fetched, |(path, kind)| {
        read_table(path, *kind)
    })?;
    Ok(Dataset::Tables(tables))
}

fn stream_sources(
    repository: &Repository,
    filtered: &FileListing,
) -> Result<Vec<StreamSource>> {
    filtered
        .keys()
        .map(|name| {
            let target = match repository {
                Repository::Local(dir) => SourceTarget::Local(dir.join(name)),
                Repository::Remote { repo_id, options } => {
                    SourceTarget::Remote(repo::resolve_url(repo_id, options, name)?)
                }
            };
            Ok(StreamSource {
                filename: name.clone(),
                target,
            })
        })
        .collect()
}

/// Map `f` over `items` with at most `num_proc` workers, keeping input order
/// and bailing out on the first error. The single-worker case stays on the
/// calling thread.
fn parallel_try_map<T, R, F>(num_proc: usize, items: &[T], f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    if num_proc <= 1 || items.len() <= 1 {
        return items.iter().map(f).collect();
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_proc.min(items.len()))
        .build()
        .context("failed to build worker pool")?;
    pool.install(|| {
        use rayon::prelude::*;
        items.par_iter().map(|item| f(item)).collect()
    })
}
