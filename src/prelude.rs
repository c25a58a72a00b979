pub use std::collections::HashMap;
pub use std::fmt::Display;
pub use std::path::{Path, PathBuf};

pub use anyhow::{anyhow, bail, Context, Result};
pub use indexmap::IndexMap;
pub use once_cell::sync::Lazy;
pub use serde::{Deserialize, Serialize};
pub use serde_json::Value;
pub use tracing::{debug, info, warn};
pub use url::Url;

pub use crate::error::HubError;

use directories::ProjectDirs;
pub static PROJECT_DIRS: Lazy<ProjectDirs> = Lazy::new(|| {
    // ...Can this actually return None?
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME")).unwrap()
});
