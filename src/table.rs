//! Tabular snapshots and their codecs.
//!
//! Cells are kept as text; the empty string is the missing-value marker.
//! Typing only happens at the edges: record canonicalization on the way in
//! and schema inference on the way into the warehouse.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Classify, ErrorKind};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported payload: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for TableError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Storage,
            _ => ErrorKind::Validation,
        }
    }
}

/// Serialized form of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Json,
}

impl TableFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Format of a key or path, judged by its extension.
    pub fn from_key(key: &str) -> Option<Self> {
        key.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }
}

impl std::str::FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unsupported format '{}'", s))
    }
}

/// Storage type inferred for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// A rectangular snapshot: a header plus rows of equal width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A decoded table plus the number of rows dropped while decoding.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub table: Table,
    pub skipped: u64,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Decode a payload in the given format.
    pub fn decode(bytes: &[u8], format: TableFormat) -> Result<Decoded, TableError> {
        match format {
            TableFormat::Csv => Self::from_csv(bytes),
            TableFormat::Json => Self::from_json(bytes),
        }
    }

    /// Parse CSV with a header row. Rows whose width differs from the
    /// header, or that fail to decode, are skipped and counted.
    pub fn from_csv(bytes: &[u8]) -> Result<Decoded, TableError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes);

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut decoded = Decoded {
            table: Table::new(columns),
            skipped: 0,
        };
        let width = decoded.table.columns.len();

        for record in reader.records() {
            match record {
                Ok(record) if record.len() == width => {
                    decoded
                        .table
                        .rows
                        .push(record.iter().map(str::to_string).collect());
                }
                _ => decoded.skipped += 1,
            }
        }
        Ok(decoded)
    }

    /// Parse a JSON array of flat objects. Columns are the union of keys in
    /// first-seen order; non-object elements are skipped and counted.
    pub fn from_json(bytes: &[u8]) -> Result<Decoded, TableError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let value: Value = serde_json::from_slice(bytes)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            _ => {
                return Err(TableError::Unsupported(
                    "expected a JSON array of objects".to_string(),
                ))
            }
        };

        let mut columns: Vec<String> = Vec::new();
        let mut objects = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for item in items {
            match item {
                Value::Object(map) => {
                    for key in map.keys() {
                        if !columns.iter().any(|c| c == key) {
                            columns.push(key.clone());
                        }
                    }
                    objects.push(map);
                }
                _ => skipped += 1,
            }
        }

        let rows = objects
            .iter()
            .map(|map| {
                columns
                    .iter()
                    .map(|c| map.get(c).map(json_cell).unwrap_or_default())
                    .collect()
            })
            .collect();

        Ok(Decoded {
            table: Table { columns, rows },
            skipped,
        })
    }

    /// Encode as CSV with a header row.
    pub fn to_csv(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| TableError::Io(e.into_error()))
    }

    /// Infer a storage type per column over non-missing cells.
    pub fn infer_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|i| {
                let mut cells = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .peekable();
                if cells.peek().is_none() {
                    return ColumnType::Text;
                }
                let mut ty = ColumnType::Integer;
                for cell in cells {
                    if ty == ColumnType::Integer && cell.parse::<i64>().is_err() {
                        ty = ColumnType::Real;
                    }
                    if ty == ColumnType::Real
                        && !cell.parse::<f64>().map(f64::is_finite).unwrap_or(false)
                    {
                        return ColumnType::Text;
                    }
                }
                ty
            })
            .collect()
    }
}

fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_strips_bom_and_skips_ragged_rows() {
        let bytes = b"\xEF\xBB\xBFtitle,price\nA,1\nB\nC,3\n";
        let decoded = Table::from_csv(bytes).unwrap();
        assert_eq!(decoded.table.columns, vec!["title", "price"]);
        assert_eq!(decoded.table.row_count(), 2);
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_json_union_of_keys() {
        let bytes = br#"[{"a": 1, "b": "x"}, {"c": null, "a": 2.5}, 7]"#;
        let decoded = Table::from_json(bytes).unwrap();
        assert_eq!(decoded.table.columns.len(), 3);
        assert_eq!(decoded.skipped, 1);
        let a = decoded.table.column_index("a").unwrap();
        assert_eq!(decoded.table.rows[1][a], "2.5");
        let c = decoded.table.column_index("c").unwrap();
        assert_eq!(decoded.table.rows[0][c], "");
    }

    #[test]
    fn test_json_scalar_is_unsupported() {
        assert!(matches!(
            Table::from_json(b"42"),
            Err(TableError::Unsupported(_))
        ));
    }

    #[test]
    fn test_csv_round_trip_quotes_commas() {
        let table = Table {
            columns: vec!["text".to_string()],
            rows: vec![vec!["a, \"b\"".to_string()]],
        };
        let decoded = Table::from_csv(&table.to_csv().unwrap()).unwrap();
        assert_eq!(decoded.table, table);
    }

    #[test]
    fn test_infer_types() {
        let table = Table {
            columns: vec!["i".into(), "r".into(), "t".into(), "e".into()],
            rows: vec![
                vec!["1".into(), "1.5".into(), "x".into(), "".into()],
                vec!["".into(), "2".into(), "3".into(), "".into()],
            ],
        };
        assert_eq!(
            table.infer_types(),
            vec![
                ColumnType::Integer,
                ColumnType::Real,
                ColumnType::Text,
                ColumnType::Text
            ]
        );
    }

    #[test]
    fn test_format_from_key() {
        assert_eq!(TableFormat::from_key("books/a.CSV"), Some(TableFormat::Csv));
        assert_eq!(TableFormat::from_key("books/a.json"), Some(TableFormat::Json));
        assert_eq!(TableFormat::from_key("books/a.txt"), None);
    }
}
