//! Client library for tabular datasets hosted on a Hugging Face-style hub or
//! in plain local directories. Files are cached content-addressably on disk,
//! keyed by the hub's strong validators, and materialize either as in-memory
//! tables or as lazy, progressively-yielded row streams.

#![forbid(unsafe_code)]

mod cache;
mod commit;
mod error;
mod filter;
mod info;
mod loader;
mod net;
mod prelude;
mod repo;
mod streaming;
mod table;

#[cfg(test)]
mod test_util;

pub use cache::{Cache, DownloadMode, DownloadOptions, HeadProbe, VerificationMode};
pub use commit::{commit, CommitOperation, CommitOptions};
pub use error::HubError;
pub use filter::by_config_and_split;
pub use info::{
    get_dataset_config_names, get_dataset_info, get_dataset_infos, get_dataset_split_names,
    DatasetInfo, Feature, InfoOptions, SplitInfo,
};
pub use loader::{load_dataset, load_dataset_from, Dataset, LoadOptions, DEFAULT_BATCH_SIZE};
pub use net::{HttpClient, LazyRemoteFile};
pub use repo::{cache_scope, FileListing, RepoOptions, Repository, DEFAULT_ENDPOINT};
pub use streaming::{BatchIter, StreamingDataset};
pub use table::{read_table, FileKind, LazyTable, Row, Table};
