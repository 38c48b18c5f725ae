//! Contracts of the opaque statistical and enrichment engines.
//!
//! The catalog never interprets the numbers an engine returns; it only checks
//! that the response refers to features and contrast columns it handed over.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{DataSetKind, GeneIndex};
use crate::error::CatalogError;
use crate::table::{ContrastMatrix, DesignMatrix};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInput {
    pub feature_index: i64,
    pub name: String,
    pub gene_index: Option<GeneIndex>,
    pub gene_symbol: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DgeRequest<'a> {
    pub method: &'a str,
    pub exprs_path: &'a Utf8Path,
    pub kind: DataSetKind,
    pub features: &'a [FeatureInput],
    pub samples: &'a [String],
    pub sample_groups: &'a [String],
    pub design: &'a DesignMatrix,
    pub contrast: &'a ContrastMatrix,
    pub scratch_dir: &'a Utf8Path,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DgeRow {
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "Contrast")]
    pub contrast_column: String,
    #[serde(rename = "AveExpr")]
    pub ave_expr: f64,
    #[serde(rename = "Statistic")]
    pub statistic: f64,
    #[serde(rename = "LogFC")]
    pub log_fc: f64,
    #[serde(rename = "PValue")]
    pub p_value: f64,
    #[serde(rename = "FDR")]
    pub fdr: f64,
}

#[derive(Debug, Clone)]
pub struct DgeOutput {
    pub input_object: Utf8PathBuf,
    pub fitted_object: Utf8PathBuf,
    pub rows: Vec<DgeRow>,
    pub used_features: Vec<bool>,
    pub method_description: String,
}

impl DgeOutput {
    /// Rejects responses that do not line up with the request.
    pub fn check_against(&self, request: &DgeRequest<'_>) -> Result<(), CatalogError> {
        if self.used_features.len() != request.features.len() {
            return Err(CatalogError::EngineResponse(format!(
                "used-feature mask has {} entries, expected {}",
                self.used_features.len(),
                request.features.len()
            )));
        }
        for artifact in [&self.input_object, &self.fitted_object] {
            if !artifact.is_file() {
                return Err(CatalogError::EngineResponse(format!(
                    "model artifact missing: {artifact}"
                )));
            }
        }
        let features: HashSet<&str> = request.features.iter().map(|f| f.name.as_str()).collect();
        let columns: HashSet<&str> = request.contrast.column_names().into_iter().collect();
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if !features.contains(row.feature.as_str()) {
                return Err(CatalogError::EngineResponse(format!(
                    "unknown feature in result table: {}",
                    row.feature
                )));
            }
            if !columns.contains(row.contrast_column.as_str()) {
                return Err(CatalogError::EngineResponse(format!(
                    "unknown contrast column in result table: {}",
                    row.contrast_column
                )));
            }
            if !seen.insert((row.feature.as_str(), row.contrast_column.as_str())) {
                return Err(CatalogError::EngineResponse(format!(
                    "duplicate result row for {} / {}",
                    row.feature, row.contrast_column
                )));
            }
        }
        Ok(())
    }
}

pub trait StatisticalEngine: Send + Sync {
    fn execute(&self, request: &DgeRequest<'_>) -> Result<DgeOutput, CatalogError>;
}

impl<T: StatisticalEngine + ?Sized> StatisticalEngine for Box<T> {
    fn execute(&self, request: &DgeRequest<'_>) -> Result<DgeOutput, CatalogError> {
        (**self).execute(request)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSetCollection {
    pub category: String,
    pub gmt_path: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct GseRequest<'a> {
    pub method: &'a str,
    pub dge_method: &'a str,
    pub fitted_object: &'a Utf8Path,
    pub design: &'a DesignMatrix,
    pub contrast: &'a ContrastMatrix,
    pub collections: &'a [GeneSetCollection],
    pub scratch_dir: &'a Utf8Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GseRow {
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "GeneSet")]
    pub gene_set: String,
    #[serde(rename = "Contrast")]
    pub contrast_column: String,
    #[serde(rename = "Correlation", default)]
    pub correlation: Option<f64>,
    #[serde(rename = "Direction")]
    pub direction: Direction,
    #[serde(rename = "PValue")]
    pub p_value: f64,
    #[serde(rename = "FDR")]
    pub fdr: f64,
    #[serde(rename = "NGenes")]
    pub effective_gene_count: i64,
}

impl GseRow {
    pub fn enrichment_score(&self) -> f64 {
        self.direction.sign() as f64 * self.p_value.log10().abs()
    }
}

#[derive(Debug, Clone)]
pub struct GseOutput {
    pub table_path: Utf8PathBuf,
    pub rows: Vec<GseRow>,
}

impl GseOutput {
    pub fn check_against(&self, request: &GseRequest<'_>) -> Result<(), CatalogError> {
        if !self.table_path.is_file() {
            return Err(CatalogError::EngineResponse(format!(
                "enrichment table missing: {}",
                self.table_path
            )));
        }
        let columns: HashSet<&str> = request.contrast.column_names().into_iter().collect();
        for row in &self.rows {
            if !columns.contains(row.contrast_column.as_str()) {
                return Err(CatalogError::EngineResponse(format!(
                    "unknown contrast column in enrichment table: {}",
                    row.contrast_column
                )));
            }
            if !(0.0..=1.0).contains(&row.p_value) {
                return Err(CatalogError::EngineResponse(format!(
                    "p-value out of range for {}: {}",
                    row.gene_set, row.p_value
                )));
            }
        }
        Ok(())
    }
}

pub trait EnrichmentEngine: Send + Sync {
    fn execute(&self, request: &GseRequest<'_>) -> Result<GseOutput, CatalogError>;
}

impl<T: EnrichmentEngine + ?Sized> EnrichmentEngine for Box<T> {
    fn execute(&self, request: &GseRequest<'_>) -> Result<GseOutput, CatalogError> {
        (**self).execute(request)
    }
}

/// Placeholder for builds without a configured engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredEngine;

impl StatisticalEngine for UnconfiguredEngine {
    fn execute(&self, _request: &DgeRequest<'_>) -> Result<DgeOutput, CatalogError> {
        Err(CatalogError::Engine(
            "no statistical engine configured; set `engine` in expression-catalog.json".to_string(),
        ))
    }
}

impl EnrichmentEngine for UnconfiguredEngine {
    fn execute(&self, _request: &GseRequest<'_>) -> Result<GseOutput, CatalogError> {
        Err(CatalogError::Engine(
            "no enrichment engine configured; set `gse_engine` in expression-catalog.json"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_score_is_signed_log_p() {
        let row = GseRow {
            category: "hallmark".to_string(),
            gene_set: "A".to_string(),
            contrast_column: "TreatedVsCtrl".to_string(),
            correlation: None,
            direction: Direction::Down,
            p_value: 0.001,
            fdr: 0.01,
            effective_gene_count: 12,
        };
        assert!((row.enrichment_score() + 3.0).abs() < 1e-9);
    }
}
