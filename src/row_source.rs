use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use csv::{StringRecord, StringRecordsIntoIter};

use crate::error::{ImportError, Result};

/// Forward-only reader over one header-bearing feed file.
///
/// Records are pulled from disk one at a time, so memory use does not grow
/// with the file size. A header is required; every later record must have
/// exactly as many fields as the header.
pub struct RowSource {
    path: PathBuf,
    file_name: Arc<str>,
    columns: Arc<HashMap<String, usize>>,
    records: StringRecordsIntoIter<BufReader<File>>,
}

/// One record of a feed file, addressable by column name.
#[derive(Debug, Clone)]
pub struct Row {
    file_name: Arc<str>,
    columns: Arc<HashMap<String, usize>>,
    record: StringRecord,
    line: u64,
}

impl RowSource {
    pub fn open(path: &Path) -> Result<RowSource> {
        let file = File::open(path).map_err(|source| ImportError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name: Arc<str> = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
            .into();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));
        let headers = reader
            .headers()
            .map_err(|err| from_csv_error(&file_name, path, err))?
            .clone();

        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect::<HashMap<_, _>>();

        log::debug!("Opened {} with columns {:?}", file_name, headers);
        Ok(RowSource {
            path: path.to_path_buf(),
            file_name,
            columns: Arc::new(columns),
            records: reader.into_records(),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }
}

impl Iterator for RowSource {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => return Some(Err(from_csv_error(&self.file_name, &self.path, err))),
        };
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        Some(Ok(Row {
            file_name: self.file_name.clone(),
            columns: self.columns.clone(),
            record,
            line,
        }))
    }
}

fn from_csv_error(file_name: &str, path: &Path, err: csv::Error) -> ImportError {
    let line = err.position().map(|pos| pos.line()).unwrap_or(0);
    match err.into_kind() {
        csv::ErrorKind::Io(source) => ImportError::SourceRead {
            path: path.to_path_buf(),
            source,
        },
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => ImportError::malformed(
            file_name,
            line,
            format!("expected {expected_len} fields as in the header, found {len}"),
        ),
        csv::ErrorKind::Utf8 { err, .. } => ImportError::malformed(file_name, line, err.to_string()),
        other => ImportError::malformed(file_name, line, format!("{other:?}")),
    }
}

impl Row {
    /// Value of `column`, or `None` when the column is absent or the field is empty.
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = *self.columns.get(column)?;
        self.record.get(index).filter(|value| !value.is_empty())
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).map(str::to_string)
    }

    /// Parses `column` into `T`; empty or missing fields yield `None`.
    pub fn parse<T: FromStr>(&self, column: &str) -> Result<Option<T>> {
        match self.get(column) {
            None => Ok(None),
            Some(value) => value.parse::<T>().map(Some).map_err(|_| {
                self.malformed(format!("{column} has unparseable value {value:?}"))
            }),
        }
    }

    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn malformed(&self, reason: impl Into<String>) -> ImportError {
        ImportError::malformed(&self.file_name, self.line, reason)
    }
}

/// Number of data lines (everything after the header) in `path`.
///
/// Only used to size progress displays: quoted fields spanning several lines
/// make this an estimate rather than a record count.
pub fn count_data_lines(path: &Path) -> Result<u64> {
    let io_err = |source| ImportError::SourceRead {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last_byte = None;
    loop {
        let read = file.read(&mut buffer).map_err(io_err)?;
        if read == 0 {
            break;
        }
        lines += buffer[..read].iter().filter(|byte| **byte == b'\n').count() as u64;
        last_byte = Some(buffer[read - 1]);
    }
    if matches!(last_byte, Some(byte) if byte != b'\n') {
        lines += 1;
    }
    Ok(lines.saturating_sub(1))
}
