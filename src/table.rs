//! Typed column tables for design and contrast matrices.
//!
//! A table is an ordered list of named columns plus optional row labels.
//! Text tables come straight from tab-separated input; conversion to a typed
//! table is where cell validation happens.

use std::collections::HashSet;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column<T> {
    #[serde(rename = "columnName")]
    pub name: String,
    pub values: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_labels: Option<Vec<String>>,
    pub columns: Vec<Column<T>>,
}

pub type TextTable = Table<String>;
pub type DesignMatrix = Table<i64>;
pub type ContrastMatrix = Table<f64>;

impl<T: Clone> Table<T> {
    pub fn new(row_labels: Option<Vec<String>>, columns: Vec<Column<T>>) -> Result<Self, CatalogError> {
        let table = Self { row_labels, columns };
        table.check_shape()?;
        Ok(table)
    }

    pub fn row_count(&self) -> usize {
        match (&self.row_labels, self.columns.first()) {
            (Some(labels), _) => labels.len(),
            (None, Some(column)) => column.values.len(),
            (None, None) => 0,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column<T>> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn row(&self, index: usize) -> Vec<&T> {
        self.columns.iter().map(|column| &column.values[index]).collect()
    }

    fn check_shape(&self) -> Result<(), CatalogError> {
        let rows = self.row_count();
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(CatalogError::Validation("empty column name".to_string()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CatalogError::Validation(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
            if column.values.len() != rows {
                return Err(CatalogError::Validation(format!(
                    "column {} has {} values, expected {rows}",
                    column.name,
                    column.values.len()
                )));
            }
        }
        if let Some(labels) = &self.row_labels {
            let mut seen = HashSet::new();
            for label in labels {
                if !seen.insert(label.as_str()) {
                    return Err(CatalogError::Validation(format!("duplicate row label: {label}")));
                }
            }
        }
        Ok(())
    }

    /// Reorders rows so that the row labels follow `order` exactly.
    ///
    /// Unlabelled tables must already have `order.len()` rows; labelled tables
    /// must carry exactly the label set of `order`.
    pub fn align_rows(&self, order: &[String], what: &str) -> Result<Self, CatalogError> {
        if self.row_count() != order.len() {
            return Err(CatalogError::Validation(format!(
                "{what} has {} rows, expected {}",
                self.row_count(),
                order.len()
            )));
        }
        let Some(labels) = &self.row_labels else {
            return Ok(Self {
                row_labels: Some(order.to_vec()),
                columns: self.columns.clone(),
            });
        };

        let expected: HashSet<&str> = order.iter().map(String::as_str).collect();
        let actual: HashSet<&str> = labels.iter().map(String::as_str).collect();
        if expected != actual {
            let mut missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let mut unexpected: Vec<&str> = actual.difference(&expected).copied().collect();
            missing.sort_unstable();
            unexpected.sort_unstable();
            return Err(CatalogError::Validation(format!(
                "{what} row labels do not match; missing: [{}], unexpected: [{}]",
                missing.join(", "),
                unexpected.join(", ")
            )));
        }

        let positions: Vec<usize> = order
            .iter()
            .map(|label| labels.iter().position(|candidate| candidate == label).unwrap_or(0))
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|column| Column {
                name: column.name.clone(),
                values: positions.iter().map(|&pos| column.values[pos].clone()).collect(),
            })
            .collect();
        Ok(Self {
            row_labels: Some(order.to_vec()),
            columns,
        })
    }
}

impl TextTable {
    /// Reads a tab-separated table with a header row.
    ///
    /// With `row_labels` set, the first column holds row labels and its header
    /// cell is ignored.
    pub fn from_tsv<R: Read>(reader: R, row_labels: bool) -> Result<Self, CatalogError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        let skip = usize::from(row_labels);
        let names: Vec<String> = headers.iter().skip(skip).map(|h| h.trim().to_string()).collect();

        let mut labels = Vec::new();
        let mut values: Vec<Vec<String>> = vec![Vec::new(); names.len()];
        for record in rdr.records() {
            let record = record?;
            if row_labels {
                labels.push(record.get(0).unwrap_or_default().trim().to_string());
            }
            for (slot, cell) in values.iter_mut().zip(record.iter().skip(skip)) {
                slot.push(cell.trim().to_string());
            }
        }

        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column { name, values })
            .collect();
        Table::new(row_labels.then_some(labels), columns)
    }

    pub fn from_tsv_path(path: &camino::Utf8Path, row_labels: bool) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| CatalogError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_tsv(file, row_labels)
    }

    pub fn parse_cells<T: FromStr>(&self, what: &str) -> Result<Table<T>, CatalogError> {
        self.convert_cells(what, |cell| cell.parse::<T>().ok())
    }

    fn convert_cells<T, F>(&self, what: &str, convert: F) -> Result<Table<T>, CatalogError>
    where
        F: Fn(&str) -> Option<T>,
    {
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let mut values = Vec::with_capacity(column.values.len());
            for (row, cell) in column.values.iter().enumerate() {
                let value = convert(cell).ok_or_else(|| {
                    CatalogError::Validation(format!(
                        "{what} column {} row {} is not {}: {cell:?}",
                        column.name,
                        row + 1,
                        std::any::type_name::<T>()
                    ))
                })?;
                values.push(value);
            }
            columns.push(Column {
                name: column.name.clone(),
                values,
            });
        }
        Ok(Table {
            row_labels: self.row_labels.clone(),
            columns,
        })
    }

    /// Every cell must be integer-valued.
    pub fn into_design_matrix(&self) -> Result<DesignMatrix, CatalogError> {
        if self.columns.is_empty() {
            return Err(CatalogError::Validation("design matrix has no columns".to_string()));
        }
        self.convert_cells("design matrix", integer_cell)
    }

    pub fn into_contrast_matrix(&self) -> Result<ContrastMatrix, CatalogError> {
        if self.columns.is_empty() {
            return Err(CatalogError::Validation("contrast matrix has no columns".to_string()));
        }
        let matrix = self.parse_cells::<f64>("contrast matrix")?;
        for column in &matrix.columns {
            if column.values.iter().any(|value| !value.is_finite()) {
                return Err(CatalogError::Validation(format!(
                    "contrast column {} contains a non-finite value",
                    column.name
                )));
            }
        }
        Ok(matrix)
    }
}

/// Integers, or finite decimals without a fractional part such as `1.0`.
fn integer_cell(cell: &str) -> Option<i64> {
    cell.parse::<i64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && value.fract() == 0.0)
            .map(|value| value as i64)
    })
}

pub fn write_tsv<T: Clone + ToString>(table: &Table<T>, label_header: &str) -> Result<Vec<u8>, CatalogError> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
    let mut header = Vec::with_capacity(table.columns.len() + 1);
    if table.row_labels.is_some() {
        header.push(label_header.to_string());
    }
    header.extend(table.columns.iter().map(|column| column.name.clone()));
    wtr.write_record(&header)?;
    for row in 0..table.row_count() {
        let mut record = Vec::with_capacity(header.len());
        if let Some(labels) = &table.row_labels {
            record.push(labels[row].clone());
        }
        record.extend(table.columns.iter().map(|column| column.values[row].to_string()));
        wtr.write_record(&record)?;
    }
    wtr.into_inner()
        .map_err(|err| CatalogError::Filesystem(err.to_string()))
}
