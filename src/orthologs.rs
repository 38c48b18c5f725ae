//! Hub-and-spoke ortholog map: every linked gene points at exactly one human
//! gene, human genes point at themselves.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::insert_chunked;
use crate::domain::{GeneIndex, HUMAN_TAXON, HomologAttributes, STABLE_GENE_ID_ATTRIBUTE, TaxonId};
use crate::error::CatalogError;
use crate::providers::{AnnotationProvider, BulkQuery};
use crate::registry::{Species, stable_id_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrthologLink {
    pub gene_index: GeneIndex,
    pub human_gene_index: GeneIndex,
}

pub struct OrthologResolver<'a, P: AnnotationProvider + ?Sized> {
    provider: &'a P,
    chunk_size: usize,
}

impl<'a, P: AnnotationProvider + ?Sized> OrthologResolver<'a, P> {
    pub fn new(provider: &'a P, chunk_size: usize) -> Self {
        Self {
            provider,
            chunk_size,
        }
    }

    /// One self-link per human gene.
    pub fn link_human(&self, conn: &Connection) -> Result<usize, CatalogError> {
        let inserted = conn.execute(
            "INSERT INTO ortholog (gene_index, human_gene_index)
             SELECT gene_index, gene_index FROM gene WHERE taxon_id = ?1",
            params![HUMAN_TAXON.0],
        )?;
        debug!(links = inserted, "human self-links");
        Ok(inserted)
    }

    /// Joins the provider's homolog pairs against the human and the new
    /// species' gene records on the stable gene id. Genes without a human
    /// homolog stay unlinked; a gene with several homologs keeps the first.
    pub fn link_species(
        &self,
        conn: &Connection,
        human: &Species,
        dataset_name: &str,
        taxon_id: TaxonId,
    ) -> Result<usize, CatalogError> {
        let names = HomologAttributes::for_dataset(dataset_name);
        let table = self.provider.bulk_query(
            &human.dataset_name,
            &BulkQuery::attributes([STABLE_GENE_ID_ATTRIBUTE, names.attribute.as_str()])
                .present(names.filter.as_str()),
        )?;
        let pairs = table.pairs(STABLE_GENE_ID_ATTRIBUTE, &names.attribute)?;

        let human_genes = stable_id_index(conn, HUMAN_TAXON)?;
        let species_genes = stable_id_index(conn, taxon_id)?;

        let mut linked = HashSet::new();
        let mut links = Vec::new();
        let mut unresolved = 0usize;
        for (human_id, species_id) in &pairs {
            match (human_genes.get(human_id), species_genes.get(species_id)) {
                (Some(&human_index), Some(&gene_index)) => {
                    if linked.insert(gene_index) {
                        links.push(OrthologLink {
                            gene_index,
                            human_gene_index: human_index,
                        });
                    }
                }
                _ => unresolved += 1,
            }
        }

        let inserted = insert_chunked(
            conn,
            "ortholog",
            &["gene_index", "human_gene_index"],
            &links,
            self.chunk_size,
            |link| {
                vec![
                    Value::Integer(link.gene_index),
                    Value::Integer(link.human_gene_index),
                ]
            },
        )?;
        info!(
            taxon = %taxon_id,
            pairs = pairs.len(),
            links = inserted,
            unresolved,
            "ortholog links"
        );
        Ok(inserted)
    }
}

pub fn links_for(conn: &Connection, taxon_id: TaxonId) -> Result<Vec<OrthologLink>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT o.gene_index, o.human_gene_index
         FROM ortholog o JOIN gene g ON g.gene_index = o.gene_index
         WHERE g.taxon_id = ?1 ORDER BY o.gene_index",
    )?;
    let rows = stmt.query_map(params![taxon_id.0], |row| {
        Ok(OrthologLink {
            gene_index: row.get(0)?,
            human_gene_index: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// The human coordinate of a gene, if it has one.
pub fn human_index_for(conn: &Connection, gene_index: GeneIndex) -> Result<Option<GeneIndex>, CatalogError> {
    let index = conn
        .query_row(
            "SELECT human_gene_index FROM ortholog WHERE gene_index = ?1",
            params![gene_index],
            |row| row.get(0),
        )
        .optional()?;
    Ok(index)
}
