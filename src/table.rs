use csv::{ReaderBuilder, StringRecord};
use glob_match::glob_match;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::query::{Columns, Query};

/// Rendered in place of a result set when no row matched.
pub const NO_DATA: &str = "No data\n";

const CSV_PATTERN: &str = "*.csv";

/// Table name to the union of the column names found across the table's CSV files.
pub type Schema = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, ThisError)]
pub enum TableError {
    #[error("table {0} not found")]
    NotFound(String),
    #[error("table {0} has no csv files")]
    Empty(String),
    #[error("storage error; {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl TableError {
    fn storage(path: &Path, source: impl Into<StorageError>) -> TableError {
        TableError::Storage {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }
}

/// Read-only view over a data directory. Every immediate subdirectory is a table and every
/// `*.csv` file directly inside it holds rows for that table.
///
/// Nothing is cached in memory: each call goes back to the filesystem, so changes made to the
/// files by other processes are visible on the next query.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: impl Into<PathBuf>) -> TableStore {
        TableStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs `query` against its table and renders the matching rows as CSV-like text: a header
    /// line followed by one line per row, each terminated by a newline. Fields are joined with
    /// commas as-is, without quoting.
    ///
    /// With `*`, the first non-empty header decides the output columns. Files are read in file
    /// name order.
    pub fn execute(&self, query: &Query) -> Result<String, TableError> {
        let dir = self.table_dir(&query.table)?;
        let files = csv_files(&dir).map_err(|e| TableError::storage(&dir, e))?;
        if files.is_empty() {
            return Err(TableError::Empty(query.table.clone()));
        }

        let mut output_columns = match &query.columns {
            Columns::Wildcard => None,
            Columns::Named(names) => Some(names.clone()),
        };
        let mut lines = Vec::new();

        for path in &files {
            debug!(path = %path.display(), "scanning");

            let mut reader = ReaderBuilder::new()
                .flexible(true)
                .from_path(path)
                .map_err(|e| TableError::storage(path, e))?;
            let header = Header::new(
                reader
                    .headers()
                    .map_err(|e| TableError::storage(path, e))?
                    .clone(),
            );
            // A file without a header has no rows either.
            if header.names.is_empty() {
                continue;
            }
            let columns = output_columns
                .get_or_insert_with(|| header.names.iter().map(String::from).collect());

            for record in reader.records() {
                let row = Row {
                    header: &header,
                    fields: record.map_err(|e| TableError::storage(path, e))?,
                };

                let selected = query
                    .filter
                    .as_ref()
                    .map_or(true, |condition| condition.matches(row.get(&condition.column)));

                if selected {
                    lines.push(row.project(columns));
                }
            }
        }

        if lines.is_empty() {
            return Ok(NO_DATA.to_string());
        }

        let mut output = output_columns.unwrap_or_default().join(",");
        output.push('\n');
        for line in lines {
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }

    /// Collects the columns of every table. Files that cannot be read are skipped; only a data
    /// directory that cannot be listed is an error.
    pub fn describe_schema(&self) -> Result<Schema, TableError> {
        let entries = fs::read_dir(&self.root).map_err(|e| TableError::storage(&self.root, e))?;
        let mut schema = Schema::new();

        for entry in entries {
            let entry = entry.map_err(|e| TableError::storage(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Ok(table) = entry.file_name().into_string() else {
                warn!(path = %path.display(), "skipping table with a non UTF-8 name");
                continue;
            };

            let columns = schema.entry(table).or_default();
            let files = match csv_files(&path) {
                Ok(files) => files,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable table");
                    continue;
                }
            };

            for file in files {
                match read_header(&file) {
                    Ok(header) => columns.extend(header.iter().map(String::from)),
                    Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable file"),
                }
            }
        }

        Ok(schema)
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, TableError> {
        let dir = self.root.join(table);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(TableError::NotFound(table.to_string()))
        }
    }
}

/// Column positions of one file's header. When a name repeats, the last occurrence wins.
struct Header {
    names: StringRecord,
    positions: HashMap<String, usize>,
}

impl Header {
    fn new(names: StringRecord) -> Header {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        Header { names, positions }
    }
}

struct Row<'h> {
    header: &'h Header,
    fields: StringRecord,
}

impl Row<'_> {
    fn get(&self, column: &str) -> Option<&str> {
        self.header
            .positions
            .get(column)
            .and_then(|&i| self.fields.get(i))
    }

    fn project(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|column| self.get(column).unwrap_or_default())
            .join(",")
    }
}

/// Regular files directly under `dir` whose name matches `*.csv`, sorted by name.
fn csv_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| glob_match(CSV_PATTERN, name));

        if is_csv && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn read_header(path: &Path) -> Result<StringRecord, csv::Error> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    Ok(reader.headers()?.clone())
}
