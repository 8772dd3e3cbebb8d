//! Core data models used throughout the pipeline.
//!
//! These types represent the tables, asset keys, and asset outputs that flow
//! between sources, transform assets, and storage adapters.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{PipelineError, Result};

/// One record of a [`Table`]; keys keep insertion order.
pub type Record = Map<String, Value>;

/// Free-form parameters forwarded to sources and endpoints.
pub type Params = Map<String, Value>;

/// An ordered set of named columns over uniform records.
///
/// Every row carries every column. Cells that a source did not provide are
/// stored as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with the given columns and no rows.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from records, taking the union of their keys in
    /// first-seen order.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| conform(record, &columns))
            .collect();

        Self { columns, rows }
    }

    /// Build a table from JSON values that must all be objects.
    pub fn from_values(values: Vec<Value>) -> Result<Self> {
        let mut records = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            match value {
                Value::Object(map) => records.push(map),
                other => {
                    return Err(PipelineError::shape(format!(
                        "row {} is {}, expected an object",
                        i,
                        json_kind(&other)
                    )))
                }
            }
        }
        Ok(Self::from_records(records))
    }

    /// Build a table from a header row and positional rows, the layout the
    /// stats API uses for its result sets.
    pub fn from_rowset(headers: Vec<String>, rowset: Vec<Vec<Value>>) -> Result<Self> {
        let mut rows = Vec::with_capacity(rowset.len());
        for (i, cells) in rowset.into_iter().enumerate() {
            if cells.len() != headers.len() {
                return Err(PipelineError::shape(format!(
                    "row {} has {} cells for {} headers",
                    i,
                    cells.len(),
                    headers.len()
                )));
            }
            rows.push(headers.iter().cloned().zip(cells).collect::<Record>());
        }
        Ok(Self {
            columns: headers,
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
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

    /// Iterate the cells of one column. Yields nothing for unknown columns.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        let present = self.has_column(name);
        self.rows
            .iter()
            .filter(move |_| present)
            .map(move |row| row.get(name).unwrap_or(&Value::Null))
    }

    /// Append a row, widening the column set if the row brings new keys.
    pub fn push_row(&mut self, record: Record) {
        let mut added = false;
        for key in record.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
                added = true;
            }
        }
        if added {
            let columns = self.columns.clone();
            for row in &mut self.rows {
                for c in &columns {
                    row.entry(c.clone()).or_insert(Value::Null);
                }
            }
        }
        let row = conform(record, &self.columns);
        self.rows.push(row);
    }

    /// Add or replace a column. `values` must have one entry per row.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(PipelineError::shape(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Project the named columns in the given order, skipping any that are
    /// not present.
    pub fn select(&self, names: &[&str]) -> Table {
        let columns: Vec<String> = names
            .iter()
            .filter(|n| self.has_column(n))
            .map(|n| n.to_string())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        Table { columns, rows }
    }
}

fn conform(mut record: Record, columns: &[String]) -> Record {
    let mut row = Record::new();
    for c in columns {
        row.insert(c.clone(), record.remove(c).unwrap_or(Value::Null));
    }
    row
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Hierarchical asset name, e.g. `["nba_api", "all_players"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-separated key (`"nba_api/all_players"`).
    pub fn parse(s: &str) -> Self {
        Self::new(s.split('/').filter(|p| !p.is_empty()))
    }

    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// The last path segment.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn with_prefix(mut self, prefix: &[String]) -> Self {
        let mut path = prefix.to_vec();
        path.append(&mut self.0);
        self.0 = path;
        self
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// What an asset produced in one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetOutput {
    /// The asset ran but had nothing to return.
    None,
    Table(Table),
    /// Several tables labelled `sheet_0`, `sheet_1`, ... in production order.
    Sheets(Vec<(String, Table)>),
}

impl AssetOutput {
    /// Label tables positionally; one table stays a plain table.
    pub fn from_tables(tables: Vec<Table>) -> Self {
        match tables.len() {
            0 => AssetOutput::None,
            1 => AssetOutput::Table(tables.into_iter().next().unwrap_or_default()),
            _ => AssetOutput::Sheets(
                tables
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| (format!("sheet_{}", i), t))
                    .collect(),
            ),
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            AssetOutput::None => 0,
            AssetOutput::Table(t) => t.len(),
            AssetOutput::Sheets(sheets) => sheets.iter().map(|(_, t)| t.len()).sum(),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            AssetOutput::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Table> for AssetOutput {
    fn from(t: Table) -> Self {
        AssetOutput::Table(t)
    }
}
