use crate::cache::{Cache, DownloadOptions};
use crate::net::LazyRemoteFile;
use crate::prelude::*;
use crate::table::{FileKind, LazyTable, Row};

#[derive(Debug)]
pub(crate) enum SourceTarget {
    Local(PathBuf),
    Remote(Url),
}

#[derive(Debug)]
pub(crate) struct StreamSource {
    pub(crate) filename: String,
    pub(crate) target: SourceTarget,
}

/// The lazy half of a loaded dataset: a fixed sequence of files, consumed as
/// batches of rows without ever materializing a whole file larger than a
/// batch (parquet) or larger than one file (csv/jsonl over HTTP, which don't
/// support ranged reads in practice).
///
/// Iteration is pure: every `iter_batches()` call starts over from the first
/// file. Files that fail to open or decode are skipped with a warning, and
/// iteration continues with the next file.
#[derive(Debug)]
pub struct StreamingDataset {
    sources: Vec<StreamSource>,
    batch_size: usize,
    cache: Cache,
    options: DownloadOptions,
}

impl StreamingDataset {
    pub(crate) fn new(
        sources: Vec<StreamSource>,
        batch_size: usize,
        cache: Cache,
        options: DownloadOptions,
    ) -> StreamingDataset {
        StreamingDataset {
            sources,
            batch_size,
            cache,
            options,
        }
    }

    pub fn num_files(&self) -> usize {
        self.sources.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches of up to `batch_size` rows, in file order.
    pub fn iter_batches(&self) -> BatchIter<'_> {
        BatchIter {
            dataset: self,
            current_index: 0,
            current: None,
        }
    }

    /// The same rows, one at a time.
    pub fn iter_rows(&self) -> impl Iterator<Item = Row> + '_ {
        self.iter_batches().flatten()
    }

    fn open(&self, source: &StreamSource) -> Result<LazyTable> {
        let kind = FileKind::from_filename(&source.filename).ok_or_else(|| {
            HubError::Decode {
                path: source.filename.clone(),
                reason: "unsupported file extension".to_string(),
            }
        })?;
        match (&source.target, kind) {
            (SourceTarget::Local(path), kind) => LazyTable::open_local(path, kind),
            (SourceTarget::Remote(url), FileKind::Parquet) => {
                // Range-read the file in place; only the row groups actually
                // consumed ever cross the network.
                let probe = self
                    .cache
                    .head_download(url, self.options.auth_token.as_deref())?;
                let token = if probe.auth_ok {
                    self.options.auth_token.as_deref()
                } else {
                    None
                };
                let remote =
                    LazyRemoteFile::new(self.cache.http().agent(), &probe.final_url, token)?;
                LazyTable::open_remote_parquet(remote)
            }
            (SourceTarget::Remote(url), kind) => {
                // CSV/JSONL can't be ranged usefully; fetch this one file
                // through the cache and stream the local copy.
                let path = self.cache.cached_download(url, &self.options)?;
                LazyTable::open_local(&path, kind)
            }
        }
    }
}

pub struct BatchIter<'a> {
    dataset: &'a StreamingDataset,
    current_index: usize,
    current: Option<LazyTable>,
}

impl BatchIter<'_> {
    fn advance(&mut self) {
        self.current_index += 1;
        self.current = None;
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Vec<Row>;

    fn next(&mut self) -> Option<Vec<Row>> {
        loop {
            if self.current_index >= self.dataset.sources.len() {
                return None;
            }
            let source = &self.dataset.sources[self.current_index];
            if self.current.is_none() {
                match self.dataset.open(source) {
                    Ok(table) => self.current = Some(table),
                    Err(err) => {
                        warn!("skipping {}: {:#}", source.filename, err);
                        self.advance();
                        continue;
                    }
                }
            }
            // unwrap rationale: a table was just installed above
            let batch = self
                .current
                .as_mut()
                .unwrap()
                .next_batch(self.dataset.batch_size);
            match batch {
                Ok(batch) if batch.is_empty() => self.advance(),
                Ok(batch) => {
                    if batch.len() < self.dataset.batch_size {
                        // short batch: this file is exhausted
                        self.advance();
                    }
                    return Some(batch);
                }
                Err(err) => {
                    warn!("skipping rest of {}: {:#}", source.filename, err);
                    self.advance();
                }
            }
        }
    }
}
