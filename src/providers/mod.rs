//! Annotation providers: remote or local services answering bulk attribute
//! queries for a species data set.

pub mod biomart;
pub mod local_mart;

use std::collections::HashMap;

use serde::Serialize;

use crate::error::CatalogError;

pub use biomart::BioMartClient;
pub use local_mart::LocalMart;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeInfo {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDataset {
    pub name: String,
    pub display_name: String,
    pub attributes: Vec<AttributeInfo>,
    pub filters: Vec<String>,
}

impl ProviderDataset {
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attribute| attribute.name == name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|filter| filter == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equals { name: String, values: Vec<String> },
    Present { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkQuery {
    pub attributes: Vec<String>,
    pub filters: Vec<Filter>,
}

impl BulkQuery {
    pub fn attributes<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            filters: Vec::new(),
        }
    }

    pub fn present(mut self, name: impl Into<String>) -> Self {
        self.filters.push(Filter::Present { name: name.into() });
        self
    }

    pub fn equals(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.push(Filter::Equals {
            name: name.into(),
            values,
        });
        self
    }
}

/// Result of a bulk query: one column per requested attribute, in request
/// order. Empty cells mean "unknown".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl AttributeTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<(), CatalogError> {
        if row.len() != self.columns.len() {
            return Err(CatalogError::ProviderResponse(format!(
                "row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, CatalogError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| CatalogError::ProviderResponse(format!("missing attribute column {name}")))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pairs of non-empty `(key, value)` cells in provider order.
    pub fn pairs(&self, key: &str, value: &str) -> Result<Vec<(String, String)>, CatalogError> {
        let key = self.column_index(key)?;
        let value = self.column_index(value)?;
        Ok(self
            .rows
            .iter()
            .filter_map(|row| match (&row[key], &row[value]) {
                (Some(k), Some(v)) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect())
    }
}

pub trait AnnotationProvider: Send + Sync {
    fn dataset(&self, name: &str) -> Result<ProviderDataset, CatalogError>;
    fn bulk_query(&self, dataset: &str, query: &BulkQuery) -> Result<AttributeTable, CatalogError>;
}

impl<T: AnnotationProvider + ?Sized> AnnotationProvider for Box<T> {
    fn dataset(&self, name: &str) -> Result<ProviderDataset, CatalogError> {
        (**self).dataset(name)
    }

    fn bulk_query(&self, dataset: &str, query: &BulkQuery) -> Result<AttributeTable, CatalogError> {
        (**self).bulk_query(dataset, query)
    }
}

/// Keeps the first value seen per key.
pub fn first_by_key(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        map.entry(key).or_insert(value);
    }
    map
}

pub(crate) fn empty_to_none(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
