//! Validation of design and contrast matrices against the entities they
//! describe, and derivation of per-sample group labels.

use std::collections::HashSet;

use crate::error::CatalogError;
use crate::table::{ContrastMatrix, DesignMatrix, TextTable};

/// Where the per-sample group labels of a design come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SampleGroups {
    /// One label per sample, in data set sample order.
    Explicit(Vec<String>),
    /// A column of the data set's phenotype table.
    PhenoColumn(String),
    /// `<column>.<value>` pairs of the design matrix row, joined by `_`.
    #[default]
    FromDesign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDesign {
    pub matrix: DesignMatrix,
    pub sample_groups: Vec<String>,
    pub sample_group_levels: Vec<String>,
}

/// Checks a design table against the data set samples and derives the
/// sample groups.
///
/// The returned matrix is labelled with the sample names in data set order.
pub fn validate_design(
    table: &TextTable,
    samples: &[String],
    groups: &SampleGroups,
    pheno: Option<&TextTable>,
    levels: Option<&[String]>,
) -> Result<ValidatedDesign, CatalogError> {
    let matrix = table
        .align_rows(samples, "design matrix")?
        .into_design_matrix()?;

    let sample_groups = match groups {
        SampleGroups::Explicit(values) => {
            if values.len() != samples.len() {
                return Err(CatalogError::Validation(format!(
                    "{} sample groups given for {} samples",
                    values.len(),
                    samples.len()
                )));
            }
            values.iter().map(|value| value.trim().to_string()).collect()
        }
        SampleGroups::PhenoColumn(name) => {
            let pheno = pheno.ok_or_else(|| {
                CatalogError::Validation("data set has no phenotype table".to_string())
            })?;
            let aligned = pheno.align_rows(samples, "phenotype table")?;
            let column = aligned.column(name).ok_or_else(|| {
                CatalogError::Validation(format!("phenotype table has no column {name:?}"))
            })?;
            column.values.clone()
        }
        SampleGroups::FromDesign => groups_from_design(&matrix),
    };
    if let Some(empty) = sample_groups.iter().position(String::is_empty) {
        return Err(CatalogError::Validation(format!(
            "sample {} has an empty group label",
            samples[empty]
        )));
    }

    let sample_group_levels = match levels {
        Some(levels) => {
            let mut seen = HashSet::new();
            for level in levels {
                if !seen.insert(level.as_str()) {
                    return Err(CatalogError::Validation(format!(
                        "duplicate sample group level: {level}"
                    )));
                }
            }
            if let Some(outside) = sample_groups.iter().find(|group| !seen.contains(group.as_str())) {
                return Err(CatalogError::Validation(format!(
                    "sample group {outside:?} is not one of the declared levels [{}]",
                    levels.join(", ")
                )));
            }
            levels.to_vec()
        }
        None => distinct_in_order(&sample_groups),
    };

    Ok(ValidatedDesign {
        matrix,
        sample_groups,
        sample_group_levels,
    })
}

fn groups_from_design(matrix: &DesignMatrix) -> Vec<String> {
    (0..matrix.row_count())
        .map(|row| {
            matrix
                .columns
                .iter()
                .map(|column| format!("{}.{}", column.name, column.values[row]))
                .collect::<Vec<_>>()
                .join("_")
        })
        .collect()
}

fn distinct_in_order(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|value| seen.insert(value.as_str()))
        .cloned()
        .collect()
}

/// Checks a contrast table against the design's columns; rows come back in
/// design column order.
pub fn validate_contrast(table: &TextTable, design: &DesignMatrix) -> Result<ContrastMatrix, CatalogError> {
    let coefficients: Vec<String> = design
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    table
        .align_rows(&coefficients, "contrast matrix")?
        .into_contrast_matrix()
}
