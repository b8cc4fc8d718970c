//! Time-indexed tables of numeric columns.
//!
//! A [`TimeSeriesTable`] has a strictly ascending UTC index and any number
//! of named `f64` columns of the same length. Missing samples are NaN.
//!
//! CSV layout: a `time` column (RFC 3339) followed by one column per series,
//! headed `name` or `name [unit]`. Empty cells and `NaN` read as NaN; NaN is
//! written as an empty cell.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{HelioError, Result};
use crate::query::{parse_time, TimeRange};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub unit: Option<String>,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, unit: Option<&str>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            unit: unit.map(str::to_string),
            values,
        }
    }

    fn header(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{} [{}]", self.name, unit),
            None => self.name.clone(),
        }
    }
}

/// Split a CSV header cell `name [unit]` into its parts.
pub(crate) fn split_header(cell: &str) -> (String, Option<String>) {
    let cell = cell.trim();
    match cell.split_once('[') {
        Some((name, rest)) => {
            let unit = rest.trim_end_matches(']').trim();
            (
                name.trim().to_string(),
                (!unit.is_empty()).then(|| unit.to_string()),
            )
        }
        None => (cell.to_string(), None),
    }
}

/// Parse one numeric cell; empty and `NaN` cells are missing data.
pub(crate) fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesTable {
    index: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl TimeSeriesTable {
    pub fn new(index: Vec<DateTime<Utc>>, columns: Vec<Column>) -> Result<Self> {
        if let Some(pair) = index.windows(2).find(|w| w[0] >= w[1]) {
            return Err(HelioError::Parse(format!(
                "time index must be strictly ascending: {} is followed by {}",
                pair[0], pair[1]
            )));
        }
        for (i, column) in columns.iter().enumerate() {
            if column.values.len() != index.len() {
                return Err(HelioError::Parse(format!(
                    "column '{}' has {} values for {} timestamps",
                    column.name,
                    column.values.len(),
                    index.len()
                )));
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(HelioError::Parse(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { index, columns })
    }

    /// Build from unordered rows. Rows are sorted by time and, for repeated
    /// timestamps, the first row wins.
    pub fn from_rows(
        names: &[(String, Option<String>)],
        mut rows: Vec<(DateTime<Utc>, Vec<f64>)>,
    ) -> Result<Self> {
        if let Some((t, values)) = rows.iter().find(|(_, v)| v.len() != names.len()) {
            return Err(HelioError::Parse(format!(
                "row at {} has {} values, expected {}",
                t,
                values.len(),
                names.len()
            )));
        }
        rows.sort_by_key(|(t, _)| *t);
        rows.dedup_by_key(|(t, _)| *t);

        let mut index = Vec::with_capacity(rows.len());
        let mut columns: Vec<Column> = names
            .iter()
            .map(|(name, unit)| {
                Column::new(name.clone(), unit.as_deref(), Vec::with_capacity(rows.len()))
            })
            .collect();
        for (t, values) in rows {
            index.push(t);
            for (column, v) in columns.iter_mut().zip(values) {
                column.values.push(v);
            }
        }
        TimeSeriesTable::new(index, columns)
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.index.first().copied()
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.index.last().copied()
    }

    /// Rows whose timestamps fall inside `range` (inclusive).
    pub fn truncate(&self, range: &TimeRange) -> TimeSeriesTable {
        let lo = self.index.partition_point(|t| *t < range.start());
        let hi = self.index.partition_point(|t| *t <= range.end());
        let hi = hi.max(lo);
        TimeSeriesTable {
            index: self.index[lo..hi].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    unit: c.unit.clone(),
                    values: c.values[lo..hi].to_vec(),
                })
                .collect(),
        }
    }

    /// Add `column`, replacing any existing column of the same name.
    pub fn with_column(mut self, column: Column) -> Result<TimeSeriesTable> {
        if column.values.len() != self.index.len() {
            return Err(HelioError::Parse(format!(
                "column '{}' has {} values for {} timestamps",
                column.name,
                column.values.len(),
                self.index.len()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(self)
    }

    /// Smallest and largest finite value of a column.
    pub fn finite_range(&self, name: &str) -> Option<(f64, f64)> {
        self.column(name)?
            .values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<TimeSeriesTable> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| HelioError::Parse(format!("CSV header: {}", e)))?
            .clone();

        let mut cells = headers.iter();
        match cells.next() {
            Some(first) if split_header(first).0.eq_ignore_ascii_case("time") => {}
            _ => return Err(HelioError::Parse("first CSV column must be 'time'".into())),
        }
        let names: Vec<(String, Option<String>)> = cells.map(split_header).collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| HelioError::Parse(format!("CSV row: {}", e)))?;
            let time = record.get(0).unwrap_or_default();
            let t = parse_time(time).map_err(|_| {
                HelioError::Parse(format!("row {}: bad timestamp '{}'", line + 1, time))
            })?;
            let values = record
                .iter()
                .skip(1)
                .map(|cell| {
                    parse_cell(cell).ok_or_else(|| {
                        HelioError::Parse(format!("row {}: bad number '{}'", line + 1, cell))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push((t, values));
        }
        TimeSeriesTable::from_rows(&names, rows)
    }

    pub fn read_csv(path: &Path) -> Result<TimeSeriesTable> {
        let file = std::fs::File::open(path).map_err(|e| HelioError::io(path, e))?;
        TimeSeriesTable::from_csv_reader(file)
    }

    pub fn write_csv_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        let csv_err = |e: csv::Error| HelioError::Parse(format!("CSV write: {}", e));

        let mut header = vec!["time".to_string()];
        header.extend(self.columns.iter().map(Column::header));
        writer.write_record(&header).map_err(csv_err)?;

        for (row, t) in self.index.iter().enumerate() {
            let mut record = vec![t.to_rfc3339_opts(SecondsFormat::AutoSi, true)];
            for column in &self.columns {
                let v = column.values[row];
                record.push(if v.is_nan() { String::new() } else { v.to_string() });
            }
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| HelioError::Parse(format!("CSV write: {}", e)))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| HelioError::io(path, e))?;
        self.write_csv_to(file).map_err(|e| match e {
            HelioError::Parse(msg) => HelioError::io(path, std::io::Error::other(msg)),
            other => other,
        })
    }

    /// One JSON object per row: `{"time": "...", "<column>": value, ...}`.
    /// NaN becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let rows = self
            .index
            .iter()
            .enumerate()
            .map(|(row, t)| {
                let mut obj = serde_json::Map::new();
                obj.insert(
                    "time".into(),
                    t.to_rfc3339_opts(SecondsFormat::AutoSi, true).into(),
                );
                for column in &self.columns {
                    let v = column.values[row];
                    obj.insert(
                        column.name.clone(),
                        serde_json::Number::from_f64(v)
                            .map(serde_json::Value::Number)
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}
