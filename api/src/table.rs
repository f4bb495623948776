//! CSV-backed tables: raw house records and the zipcode demographics lookup.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Column linking a house record to its demographics row.
pub const JOIN_KEY: &str = "zipcode";

/// One row, field name to value. Field order follows the source.
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key column `{0}` not found")]
    MissingKeyColumn(&'static str),

    #[error("row {row}: `{value}` is not a valid {column}")]
    InvalidKey {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("duplicate {column} {key}")]
    DuplicateKey { column: &'static str, key: i64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(File::open(path)?)
    }

    /// Parses a headed CSV. Cells that parse as numbers become JSON numbers,
    /// empty cells become null and everything else stays a string.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = columns
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| (column.clone(), parse_cell(cell)))
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Sets `name` on every row, appending the column if it is new.
    pub fn set_column(&mut self, name: &str, values: impl IntoIterator<Item = Value>) {
        if !self.has_column(name) {
            self.columns.push(name.to_owned());
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_owned(), value);
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(self.columns.iter().map(|c| cell_text(row.get(c))))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Zipcode-keyed demographics, one row per region.
#[derive(Debug, Clone, Default)]
pub struct DemographicsTable {
    columns: Vec<String>,
    rows: HashMap<i64, Record>,
}

impl DemographicsTable {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        Self::from_table(Table::from_path(path)?)
    }

    pub fn from_table(table: Table) -> Result<Self, TableError> {
        if !table.has_column(JOIN_KEY) {
            return Err(TableError::MissingKeyColumn(JOIN_KEY));
        }

        let columns: Vec<String> = table
            .columns
            .into_iter()
            .filter(|c| c != JOIN_KEY)
            .collect();

        let mut rows = HashMap::with_capacity(table.rows.len());
        for (index, mut row) in table.rows.into_iter().enumerate() {
            let raw = row.remove(JOIN_KEY).unwrap_or(Value::Null);
            let key = region_code(&raw).ok_or_else(|| TableError::InvalidKey {
                row: index + 1,
                column: JOIN_KEY,
                value: cell_text(Some(&raw)),
            })?;
            if rows.insert(key, row).is_some() {
                return Err(TableError::DuplicateKey {
                    column: JOIN_KEY,
                    key,
                });
            }
        }

        Ok(Self { columns, rows })
    }

    /// Attribute columns, excluding the join key.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, zipcode: i64) -> Option<&Record> {
        self.rows.get(&zipcode)
    }

    pub fn contains(&self, zipcode: i64) -> bool {
        self.rows.contains_key(&zipcode)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads a region code: a positive integer given as a JSON integer, an
/// integral float or a numeric string.
pub fn region_code(value: &Value) -> Option<i64> {
    let code = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    (code >= 1).then_some(code)
}

fn parse_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_owned()))
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
