//! Feature-to-gene matching for expression matrix rows.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{GeneIndex, STABLE_GENE_ID_ATTRIBUTE, TaxonId};
use crate::error::CatalogError;
use crate::providers::{AnnotationProvider, BulkQuery, first_by_key};
use crate::registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureAnnotation {
    pub feature_index: i64,
    pub name: String,
    /// Canonical (human hub) gene index.
    pub gene_index: Option<GeneIndex>,
    pub origin_gene_index: Option<GeneIndex>,
    pub origin_taxon_id: Option<TaxonId>,
    pub description: Option<String>,
}

impl FeatureAnnotation {
    pub fn is_matched(&self) -> bool {
        self.gene_index.is_some() || self.origin_gene_index.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub features: Vec<FeatureAnnotation>,
    pub annotation_version: String,
    pub matched: usize,
    pub canonical: usize,
}

impl Annotation {
    pub fn match_rate(&self) -> f64 {
        if self.features.is_empty() {
            0.0
        } else {
            self.matched as f64 / self.features.len() as f64
        }
    }
}

pub struct FeatureAnnotator<'a, P: AnnotationProvider + ?Sized> {
    provider: &'a P,
}

impl<'a, P: AnnotationProvider + ?Sized> FeatureAnnotator<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Resolves every feature, in source order, to its gene identities.
    ///
    /// A raw identifier that maps to several stable gene ids keeps the first
    /// mapping. Fails when no feature matches any gene of the species.
    pub fn annotate(
        &self,
        conn: &Connection,
        features: &[String],
        taxon_id: TaxonId,
        symbol_type: &str,
    ) -> Result<Annotation, CatalogError> {
        let species = registry::species(conn, taxon_id)?;
        let mut distinct = HashSet::with_capacity(features.len());
        if let Some(repeated) = features.iter().find(|name| !distinct.insert(name.as_str())) {
            return Err(CatalogError::Validation(format!("duplicate feature name: {repeated}")));
        }

        let raw_to_stable = self.symbol_map(&species.dataset_name, symbol_type)?;
        let own_genes = registry::stable_id_index(conn, taxon_id)?;
        let hub = if taxon_id.is_human() {
            None
        } else {
            Some(human_links(conn, taxon_id)?)
        };

        let rows: Vec<FeatureAnnotation> = features
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let origin = raw_to_stable
                    .get(name)
                    .and_then(|stable| own_genes.get(stable))
                    .copied();
                let gene_index = match (&hub, origin) {
                    (_, None) => None,
                    (None, Some(index)) => Some(index),
                    (Some(links), Some(index)) => links.get(&index).copied(),
                };
                FeatureAnnotation {
                    feature_index: position as i64,
                    name: name.clone(),
                    gene_index,
                    origin_gene_index: origin,
                    origin_taxon_id: origin.map(|_| taxon_id),
                    description: None,
                }
            })
            .collect();

        let matched = rows.iter().filter(|row| row.is_matched()).count();
        let canonical = rows.iter().filter(|row| row.gene_index.is_some()).count();
        if matched == 0 {
            return Err(CatalogError::Validation(format!(
                "none of {} features could be matched to a {} gene using symbol type {symbol_type:?}",
                rows.len(),
                species.dataset_name
            )));
        }
        if matched < rows.len() {
            warn!(
                unmatched = rows.len() - matched,
                total = rows.len(),
                symbol_type,
                "features without gene match"
            );
        }
        info!(
            taxon = %taxon_id,
            features = rows.len(),
            matched,
            canonical,
            "features annotated"
        );
        Ok(Annotation {
            features: rows,
            annotation_version: species.annotation_version,
            matched,
            canonical,
        })
    }

    fn symbol_map(&self, dataset_name: &str, symbol_type: &str) -> Result<HashMap<String, String>, CatalogError> {
        if symbol_type == STABLE_GENE_ID_ATTRIBUTE {
            let table = self
                .provider
                .bulk_query(dataset_name, &BulkQuery::attributes([STABLE_GENE_ID_ATTRIBUTE]))?;
            let column = table.column_index(STABLE_GENE_ID_ATTRIBUTE)?;
            return Ok(table
                .rows
                .iter()
                .filter_map(|row| row[column].clone())
                .map(|id| (id.clone(), id))
                .collect());
        }

        let dataset = self.provider.dataset(dataset_name)?;
        if !dataset.has_attribute(symbol_type) {
            return Err(CatalogError::Validation(format!(
                "symbol type {symbol_type:?} is not an attribute of {dataset_name}"
            )));
        }
        let flag = format!("with_{symbol_type}");
        let mut query = BulkQuery::attributes([symbol_type, STABLE_GENE_ID_ATTRIBUTE]);
        if dataset.has_filter(&flag) {
            query = query.present(flag);
        }
        let table = self.provider.bulk_query(dataset_name, &query)?;
        Ok(first_by_key(table.pairs(symbol_type, STABLE_GENE_ID_ATTRIBUTE)?))
    }
}

fn human_links(conn: &Connection, taxon_id: TaxonId) -> Result<HashMap<GeneIndex, GeneIndex>, CatalogError> {
    Ok(crate::orthologs::links_for(conn, taxon_id)?
        .into_iter()
        .map(|link| (link.gene_index, link.human_gene_index))
        .collect())
}
