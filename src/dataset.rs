//! Datasets - One Row Per Output
//!
//! Cells keep their source type; coercion happens at the point of use.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reserved column naming each row's output file.
pub const FILE_NAME_COLUMN: &str = "File_name";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset unreadable: {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(b),
            Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            Value::String(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// Plain string form; integral numbers drop their fraction.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Why a cell could not be read as a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionIssue(pub String);

/// Visibility coercion against an explicit truthy set.
///
/// Only `TRUE`/`true`/`1`/`yes` (any case) are visible. `false`/`0`/`no`,
/// blank and null are hidden. Anything else is hidden and reported.
pub fn coerce_visibility(value: &CellValue) -> Result<bool, CoercionIssue> {
    match value {
        CellValue::Null => Ok(false),
        CellValue::Bool(b) => Ok(*b),
        CellValue::Number(n) if *n == 1.0 => Ok(true),
        CellValue::Number(n) if *n == 0.0 => Ok(false),
        CellValue::Number(n) => Err(CoercionIssue(format!(
            "number {} is not a visibility value (use 1 or 0)",
            format_number(*n)
        ))),
        CellValue::Text(s) => {
            let lowered = s.trim().to_lowercase();
            match lowered.as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" | "" => Ok(false),
                _ => Err(CoercionIssue(format!("'{}' is not a visibility value", s))),
            }
        }
    }
}

/// Normalise a cell before it is drawn as text.
pub fn preprocess_text(value: &CellValue) -> String {
    let mut text = value.as_text();
    for escape in ["_x000D_", "_x000A_", "_x0009_"] {
        text = text.replace(escape, "");
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = text[1..text.len() - 1].to_string();
    }
    text.trim()
        .replace('\u{201C}', "「")
        .replace('\u{201D}', "」")
        .replace('/', "&")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRow {
    cells: Map<String, Value>,
}

impl DataRow {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, CellValue)>,
        K: Into<String>,
    {
        let cells = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), cell_to_json(v)))
            .collect();
        Self { cells }
    }

    pub fn get(&self, column: &str) -> CellValue {
        self.cells
            .get(column)
            .cloned()
            .map(CellValue::from_json)
            .unwrap_or(CellValue::Null)
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.cells.keys()
    }

    /// The `File_name` cell, if it holds anything.
    pub fn file_name(&self) -> Option<String> {
        let cell = self.get(FILE_NAME_COLUMN);
        if cell.is_blank() {
            None
        } else {
            Some(cell.as_text().trim().to_string())
        }
    }
}

fn cell_to_json(value: CellValue) -> Value {
    match value {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Bool(b),
        CellValue::Number(n) => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CellValue::Text(s) => Value::String(s),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub path: PathBuf,
    /// Directory relative cell paths resolve against.
    pub base_dir: PathBuf,
    pub schema: BTreeSet<String>,
    pub rows: Vec<DataRow>,
}

impl Dataset {
    pub fn new(schema: impl IntoIterator<Item = impl Into<String>>, rows: Vec<DataRow>) -> Self {
        Self {
            path: PathBuf::new(),
            base_dir: PathBuf::new(),
            schema: schema.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.schema.contains(column)
    }

    pub fn resolve_path(&self, cell: &str) -> PathBuf {
        let path = Path::new(cell.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Reads a dataset for a template prefix.
pub trait DatasetReader {
    fn locate(&self, data_dir: &Path, prefix: &str) -> PathBuf;
    fn read_rows(&self, path: &Path) -> Result<Dataset, DatasetError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DatasetFile {
    Table {
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
    },
    Records(Vec<Map<String, Value>>),
}

/// `<prefix>.json` holding either an array of row objects or
/// `{"columns": [...], "rows": [...]}`.
#[derive(Debug, Clone, Default)]
pub struct JsonDatasetReader;

impl JsonDatasetReader {
    pub fn new() -> Self {
        Self
    }
}

impl DatasetReader for JsonDatasetReader {
    fn locate(&self, data_dir: &Path, prefix: &str) -> PathBuf {
        data_dir.join(format!("{}.json", prefix))
    }

    fn read_rows(&self, path: &Path) -> Result<Dataset, DatasetError> {
        let unreadable = |reason: String| DatasetError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let file: DatasetFile = serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;

        let (schema, raw_rows) = match file {
            DatasetFile::Table { columns, rows } => (columns.into_iter().collect(), rows),
            DatasetFile::Records(rows) => {
                let schema: BTreeSet<String> =
                    rows.iter().flat_map(|r| r.keys().cloned()).collect();
                (schema, rows)
            }
        };

        Ok(Dataset {
            path: path.to_path_buf(),
            base_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            schema,
            rows: raw_rows.into_iter().map(|cells| DataRow { cells }).collect(),
        })
    }
}
