use crate::net::LazyRemoteFile;
use crate::prelude::*;

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Lines, Read, Seek, SeekFrom};
use std::sync::Mutex;

use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, FileReader, Length, SerializedFileReader};
use parquet::record::reader::RowIter;
use parquet::record::Row as ParquetRow;

/// One decoded record: column name → JSON value.
pub type Row = serde_json::Map<String, Value>;

/// The tabular formats we know how to decode, dispatched on the lowercased
/// file extension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Jsonl,
    Parquet,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Option<FileKind> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(FileKind::Csv),
            "jsonl" => Some(FileKind::Jsonl),
            "parquet" => Some(FileKind::Parquet),
            _ => None,
        }
    }
}

/// A fully materialized table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Row>) -> Table {
        Table { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// A copy of `length` rows starting at `offset`, clamped to the table.
    pub fn slice(&self, offset: usize, length: usize) -> Table {
        let start = offset.min(self.rows.len());
        let end = offset.saturating_add(length).min(self.rows.len());
        Table {
            columns: self.columns.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    pub fn to_rows(self) -> Vec<Row> {
        self.rows
    }
}

fn decode_err(path: &Path, err: impl Display) -> anyhow::Error {
    HubError::Decode {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
    .into()
}

/// Decode a whole file into memory.
pub fn read_table(path: &Path, kind: FileKind) -> Result<Table> {
    match kind {
        FileKind::Csv => read_csv(path),
        FileKind::Jsonl => read_jsonl(path),
        FileKind::Parquet => read_parquet(path),
    }
}

fn read_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| decode_err(path, err))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| decode_err(path, err))?
        .iter()
        .map(String::from)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| decode_err(path, err))?;
        rows.push(csv_row(&columns, &record));
    }
    Ok(Table::new(columns, rows))
}

fn csv_row(columns: &[String], record: &csv::StringRecord) -> Row {
    columns
        .iter()
        .zip(record.iter())
        .map(|(name, raw)| (name.clone(), csv_value(raw)))
        .collect()
}

/// CSV carries no types, so scalars are inferred: empty → null, then bool,
/// integer, float, and finally plain text.
fn csv_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(flag) = raw.parse::<bool>() {
        return Value::Bool(flag);
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}

fn read_jsonl(path: &Path) -> Result<Table> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(jsonl_row(&line).map_err(|err| decode_err(path, err))?);
    }
    Ok(table_from_rows(rows))
}

fn jsonl_row(line: &str) -> std::result::Result<Row, serde_json::Error> {
    use serde::de::Error;
    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(map),
        _ => Err(serde_json::Error::custom("expected one JSON object per line")),
    }
}

fn table_from_rows(rows: Vec<Row>) -> Table {
    let columns = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();
    Table::new(columns, rows)
}

fn read_parquet(path: &Path) -> Result<Table> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).map_err(|err| decode_err(path, err))?;
    let columns = parquet_columns(&reader);
    let mut rows = Vec::new();
    for row in reader.get_row_iter(None).map_err(|err| decode_err(path, err))? {
        let row = row.map_err(|err| decode_err(path, err))?;
        rows.push(parquet_row(&row));
    }
    Ok(Table::new(columns, rows))
}

fn parquet_columns<R: ChunkReader + 'static>(reader: &SerializedFileReader<R>) -> Vec<String> {
    reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect()
}

fn parquet_row(row: &ParquetRow) -> Row {
    match row.to_json_value() {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// A cursor over one file that hands out rows in bounded batches. Local CSV
/// and JSONL stream straight off their readers; parquet decodes row group by
/// row group, including over HTTP via range requests.
pub enum LazyTable {
    Csv {
        columns: Vec<String>,
        records: csv::StringRecordsIntoIter<File>,
    },
    Jsonl { lines: Lines<BufReader<File>> },
    Parquet { rows: RowIter<'static> },
}

impl LazyTable {
    pub fn open_local(path: &Path, kind: FileKind) -> Result<LazyTable> {
        match kind {
            FileKind::Csv => {
                let mut reader =
                    csv::Reader::from_path(path).map_err(|err| decode_err(path, err))?;
                let columns: Vec<String> = reader
                    .headers()
                    .map_err(|err| decode_err(path, err))?
                    .iter()
                    .map(String::from)
                    .collect();
                Ok(LazyTable::Csv {
                    columns,
                    records: reader.into_records(),
                })
            }
            FileKind::Jsonl => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                Ok(LazyTable::Jsonl {
                    lines: BufReader::new(file).lines(),
                })
            }
            FileKind::Parquet => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                let reader =
                    SerializedFileReader::new(file).map_err(|err| decode_err(path, err))?;
                Ok(LazyTable::Parquet {
                    rows: RowIter::from_file_into(Box::new(reader)),
                })
            }
        }
    }

    /// Open a remote parquet file without downloading it: the reader pages in
    /// row groups through HTTP range requests.
    pub fn open_remote_parquet(remote: LazyRemoteFile) -> Result<LazyTable> {
        let length = remote.len();
        let chunks = RemoteChunkReader {
            inner: Mutex::new(remote),
            length,
        };
        let reader = SerializedFileReader::new(chunks)
            .context("failed to read remote parquet footer")?;
        Ok(LazyTable::Parquet {
            rows: RowIter::from_file_into(Box::new(reader)),
        })
    }

    /// Up to `batch_size` rows; fewer (possibly zero) means the file is done.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<Vec<Row>> {
        match self {
            LazyTable::Csv { columns, records } => {
                let mut out = Vec::new();
                while out.len() < batch_size {
                    match records.next() {
                        Some(record) => out.push(csv_row(columns, &record?)),
                        None => break,
                    }
                }
                Ok(out)
            }
            LazyTable::Jsonl { lines } => {
                let mut out = Vec::new();
                while out.len() < batch_size {
                    match lines.next() {
                        Some(line) => {
                            let line = line?;
                            if line.trim().is_empty() {
                                continue;
                            }
                            out.push(jsonl_row(&line)?);
                        }
                        None => break,
                    }
                }
                Ok(out)
            }
            LazyTable::Parquet { rows } => {
                let mut out = Vec::new();
                while out.len() < batch_size {
                    match rows.next() {
                        Some(row) => out.push(parquet_row(&row?)),
                        None => break,
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Adapts `LazyRemoteFile` to the parquet reader's chunk interface. The
/// parquet side hands out `&self`, so the seek position lives behind a mutex.
struct RemoteChunkReader {
    inner: Mutex<LazyRemoteFile>,
    length: u64,
}

impl Length for RemoteChunkReader {
    fn len(&self) -> u64 {
        self.length
    }
}

fn external(err: impl std::error::Error + Send + Sync + 'static) -> ParquetError {
    ParquetError::External(Box::new(err))
}

impl ChunkReader for RemoteChunkReader {
    type T = Cursor<bytes::Bytes>;

    fn get_read(&self, start: u64) -> parquet::errors::Result<Self::T> {
        let remaining = usize::try_from(self.length.saturating_sub(start)).map_err(external)?;
        Ok(Cursor::new(self.get_bytes(start, remaining)?))
    }

    fn get_bytes(&self, start: u64, length: usize) -> parquet::errors::Result<bytes::Bytes> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ParquetError::General("remote reader lock poisoned".to_string()))?;
        inner.seek(SeekFrom::Start(start)).map_err(external)?;
        let mut buf = vec![0u8; length];
        inner.read_exact(&mut buf).map_err(external)?;
        Ok(buf.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_parquet_i64;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_file_kind_dispatch() {
        assert_eq!(FileKind::from_filename("a/train.csv"), Some(FileKind::Csv));
        assert_eq!(FileKind::from_filename("x.JSONL"), Some(FileKind::Jsonl));
        assert_eq!(
            FileKind::from_filename("x.Parquet"),
            Some(FileKind::Parquet)
        );
        assert_eq!(FileKind::from_filename("readme.md"), None);
        assert_eq!(FileKind::from_filename("noext"), None);
    }

    #[test]
    fn test_read_csv_with_inference() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "t.csv",
            "id,score,label,note\n1,0.5,true,hello\n2,,false,\n",
        );
        let table = read_table(&path, FileKind::Csv).unwrap();
        assert_eq!(table.columns(), ["id", "score", "label", "note"]);
        assert_eq!(table.num_rows(), 2);
        let first = &table.rows()[0];
        assert_eq!(first["id"], Value::from(1));
        assert_eq!(first["score"], Value::from(0.5));
        assert_eq!(first["label"], Value::Bool(true));
        assert_eq!(first["note"], Value::from("hello"));
        let second = &table.rows()[1];
        assert_eq!(second["score"], Value::Null);
        assert_eq!(second["note"], Value::Null);
    }

    #[test]
    fn test_read_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "t.jsonl",
            "{\"a\": 1, \"b\": \"x\"}\n\n{\"a\": 2, \"b\": \"y\"}\n",
        );
        let table = read_table(&path, FileKind::Jsonl).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.rows()[1]["a"], Value::from(2));

        let bad = write(dir.path(), "bad.jsonl", "[1, 2, 3]\n");
        let err = read_table(&bad, FileKind::Jsonl).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HubError>(),
            Some(HubError::Decode { .. })
        ));
    }

    #[test]
    fn test_read_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_parquet_i64(&path, "id", &[10, 20, 30]);
        let table = read_table(&path, FileKind::Parquet).unwrap();
        assert_eq!(table.columns(), ["id"]);
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.rows()[2]["id"], Value::from(30));
    }

    #[test]
    fn test_slice_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "a\n1\n2\n3\n");
        let table = read_table(&path, FileKind::Csv).unwrap();
        assert_eq!(table.slice(1, 10).num_rows(), 2);
        assert_eq!(table.slice(5, 10).num_rows(), 0);
        assert_eq!(table.slice(0, 2).num_rows(), 2);
    }

    #[test]
    fn test_lazy_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "a\n1\n2\n3\n4\n5\n");
        let mut lazy = LazyTable::open_local(&path, FileKind::Csv).unwrap();
        assert_eq!(lazy.next_batch(2).unwrap().len(), 2);
        assert_eq!(lazy.next_batch(2).unwrap().len(), 2);
        assert_eq!(lazy.next_batch(2).unwrap().len(), 1);
        assert_eq!(lazy.next_batch(2).unwrap().len(), 0);
    }

    #[test]
    fn test_lazy_parquet_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_parquet_i64(&path, "id", &[1, 2, 3, 4, 5, 6, 7]);
        let mut lazy = LazyTable::open_local(&path, FileKind::Parquet).unwrap();
        let first = lazy.next_batch(5).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first[0]["id"], Value::from(1));
        assert_eq!(lazy.next_batch(5).unwrap().len(), 2);
        assert_eq!(lazy.next_batch(5).unwrap().len(), 0);
    }
}
