use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

pub const HUMAN_TAXON: TaxonId = TaxonId(9606);
pub const DEFAULT_HUMAN_DATASET: &str = "hsapiens_gene_ensembl";
pub const STABLE_GENE_ID_ATTRIBUTE: &str = "ensembl_gene_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonId(pub i64);

impl TaxonId {
    pub fn is_human(self) -> bool {
        self == HUMAN_TAXON
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let id = value
            .trim()
            .parse::<i64>()
            .map_err(|_| CatalogError::Validation(format!("invalid taxon id: {value}")))?;
        if id <= 0 {
            return Err(CatalogError::Validation(format!("invalid taxon id: {value}")));
        }
        Ok(Self(id))
    }
}

/// Process-wide gene identity. Never 0, never reused.
pub type GeneIndex = i64;

/// Non-empty identifier of a data set, design, contrast, method or gene-set category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(String);

impl EntityName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityName {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.chars().any(char::is_control)
        {
            return Err(CatalogError::InvalidName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MicroArrayNormalization {
    Rma,
    Mas5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RnaSeqNormalization {
    Rpkm,
    Counts,
}

/// Measurement platform of a data set together with its normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "normalization", rename_all = "lowercase")]
pub enum DataSetKind {
    MicroArray(MicroArrayNormalization),
    RnaSeq(RnaSeqNormalization),
}

impl DataSetKind {
    pub fn discriminant(&self) -> &'static str {
        match self {
            DataSetKind::MicroArray(_) => "microarray",
            DataSetKind::RnaSeq(_) => "rnaseq",
        }
    }

    pub fn normalization(&self) -> &'static str {
        match self {
            DataSetKind::MicroArray(MicroArrayNormalization::Rma) => "rma",
            DataSetKind::MicroArray(MicroArrayNormalization::Mas5) => "mas5",
            DataSetKind::RnaSeq(RnaSeqNormalization::Rpkm) => "rpkm",
            DataSetKind::RnaSeq(RnaSeqNormalization::Counts) => "counts",
        }
    }

    pub fn from_parts(kind: &str, normalization: &str) -> Result<Self, CatalogError> {
        match (kind, normalization) {
            ("microarray", "rma") => Ok(DataSetKind::MicroArray(MicroArrayNormalization::Rma)),
            ("microarray", "mas5") => Ok(DataSetKind::MicroArray(MicroArrayNormalization::Mas5)),
            ("rnaseq", "rpkm") => Ok(DataSetKind::RnaSeq(RnaSeqNormalization::Rpkm)),
            ("rnaseq", "counts") => Ok(DataSetKind::RnaSeq(RnaSeqNormalization::Counts)),
            _ => Err(CatalogError::Validation(format!(
                "unknown data set kind: {kind}/{normalization}"
            ))),
        }
    }
}

impl fmt::Display for DataSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.discriminant(), self.normalization())
    }
}

impl FromStr for DataSetKind {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().to_lowercase();
        let (kind, normalization) = match trimmed.split_once(':') {
            Some((kind, normalization)) => (kind.to_string(), normalization.to_string()),
            None => match trimmed.as_str() {
                "microarray" => ("microarray".to_string(), "rma".to_string()),
                "rnaseq" => ("rnaseq".to_string(), "counts".to_string()),
                _ => (trimmed.clone(), String::new()),
            },
        };
        Self::from_parts(&kind, &normalization)
    }
}

/// Provider attribute names derived from a `<prefix>_gene_ensembl` data set name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomologAttributes {
    pub attribute: String,
    pub filter: String,
}

impl HomologAttributes {
    pub fn for_dataset(dataset: &str) -> Self {
        let prefix = dataset.strip_suffix("_gene_ensembl").unwrap_or(dataset);
        Self {
            attribute: format!("{prefix}_homolog_ensembl_gene"),
            filter: format!("with_{prefix}_homolog"),
        }
    }
}

pub fn current_user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
