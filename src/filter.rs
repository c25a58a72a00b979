use crate::prelude::*;
use crate::repo::FileListing;

/// Keep the listing entries matching a configuration name and/or a split.
/// Both filters are substring matches, composing orthogonally; `None` is the
/// identity. The configuration name matches anywhere in the filename (so
/// `sst2/train.parquet` matches config `sst2`), while the split matches only
/// the basename with its extension removed (so `validation.jsonl` and
/// `train-00000.parquet` behave as expected).
pub fn by_config_and_split(
    listing: &FileListing,
    name: Option<&str>,
    split: Option<&str>,
) -> FileListing {
    listing
        .iter()
        .filter(|(filename, _)| matches_config(filename, name))
        .filter(|(filename, _)| matches_split(filename, split))
        .map(|(filename, etag)| (filename.clone(), etag.clone()))
        .collect()
}

fn matches_config(filename: &str, name: Option<&str>) -> bool {
    match name {
        None => true,
        Some(name) => filename.contains(name),
    }
}

fn matches_split(filename: &str, split: Option<&str>) -> bool {
    match split {
        None => true,
        Some(split) => Path::new(filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.contains(split))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(names: &[&str]) -> FileListing {
        names
            .iter()
            .map(|name| (name.to_string(), Some(format!("\"{}\"", name))))
            .collect()
    }

    #[test]
    fn test_split_matches_basename_only() {
        let files = listing(&[
            "train.csv",
            "train-00000.parquet",
            "test.csv",
            "validation.jsonl",
            "train/shard.csv",
        ]);
        let filtered = by_config_and_split(&files, None, Some("train"));
        // "train/shard.csv" has basename "shard", so the split filter drops it
        assert_eq!(
            filtered.keys().collect::<Vec<_>>(),
            vec!["train.csv", "train-00000.parquet"]
        );
    }

    #[test]
    fn test_config_matches_whole_filename() {
        let files = listing(&["sst2/train.parquet", "cola/train.parquet"]);
        let filtered = by_config_and_split(&files, Some("sst2"), None);
        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["sst2/train.parquet"]);
    }

    #[test]
    fn test_none_is_identity_and_etags_survive() {
        let files = listing(&["a.csv", "b.csv"]);
        let filtered = by_config_and_split(&files, None, None);
        assert_eq!(filtered, files);
    }

    #[test]
    fn test_filters_compose_orthogonally() {
        let files = listing(&[
            "sst2/train.parquet",
            "sst2/test.parquet",
            "cola/train.parquet",
            "cola/test.parquet",
        ]);
        let sequential = by_config_and_split(
            &by_config_and_split(&files, Some("sst2"), None),
            None,
            Some("train"),
        );
        let combined = by_config_and_split(&files, Some("sst2"), Some("train"));
        assert_eq!(sequential, combined);
        assert_eq!(
            combined.keys().collect::<Vec<_>>(),
            vec!["sst2/train.parquet"]
        );
    }
}
