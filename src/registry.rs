//! Canonical gene registry: per-species gene catalogs with process-wide
//! gene indices.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{insert_chunked, opt_int, opt_text};
use crate::domain::{GeneIndex, HUMAN_TAXON, STABLE_GENE_ID_ATTRIBUTE, TaxonId, iso_timestamp};
use crate::error::CatalogError;
use crate::orthologs::OrthologResolver;
use crate::providers::{AnnotationProvider, BulkQuery, ProviderDataset};

const XREF_ATTRIBUTES: [&str; 2] = ["entrezgene_id", "entrezgene"];
const GENE_TYPE_ATTRIBUTE: &str = "gene_biotype";
const GENE_SYMBOL_ATTRIBUTE: &str = "external_gene_name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Species {
    pub taxon_id: TaxonId,
    pub dataset_name: String,
    pub annotation_version: String,
    pub admitted_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesSummary {
    pub taxon_id: TaxonId,
    pub dataset_name: String,
    pub annotation_version: String,
    pub gene_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneRecord {
    pub gene_index: GeneIndex,
    pub annotation_version: String,
    pub taxon_id: TaxonId,
    pub external_gene_id: Option<String>,
    pub external_xref_id: Option<i64>,
    pub gene_type: Option<String>,
    pub gene_symbol: Option<String>,
    pub is_obsolete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesAdmission {
    pub taxon_id: TaxonId,
    pub dataset_name: String,
    pub annotation_version: String,
    pub gene_count: usize,
    pub ortholog_count: usize,
    pub first_gene_index: Option<GeneIndex>,
}

pub struct CanonicalGeneRegistry<'a, P: AnnotationProvider + ?Sized> {
    provider: &'a P,
    chunk_size: usize,
}

impl<'a, P: AnnotationProvider + ?Sized> CanonicalGeneRegistry<'a, P> {
    pub fn new(provider: &'a P, chunk_size: usize) -> Self {
        Self {
            provider,
            chunk_size,
        }
    }

    /// Imports the full gene table of one species and links it to the human
    /// hub. The caller owns the transaction.
    pub fn admit_species(
        &self,
        conn: &Connection,
        dataset_name: &str,
        taxon_id: TaxonId,
    ) -> Result<SpeciesAdmission, CatalogError> {
        if find_species(conn, taxon_id)?.is_some() {
            return Err(CatalogError::already_exists("species", taxon_id.to_string()));
        }
        let human = find_species(conn, HUMAN_TAXON)?;
        if human.is_none() && !taxon_id.is_human() {
            return Err(CatalogError::Precondition(
                "no human gene annotation present; admit the human species first".to_string(),
            ));
        }

        let dataset = self.provider.dataset(dataset_name)?;
        let version = annotation_version(dataset_name, &dataset.display_name);
        let genes = self.fetch_genes(&dataset)?;
        debug!(dataset = dataset_name, genes = genes.len(), "fetched gene table");

        conn.execute(
            "INSERT INTO species (taxon_id, dataset_name, annotation_version, admitted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![taxon_id.0, dataset_name, version, iso_timestamp()],
        )?;

        let first = next_gene_index(conn)?;
        let records: Vec<GeneRecord> = genes
            .into_iter()
            .enumerate()
            .map(|(offset, gene)| GeneRecord {
                gene_index: first + offset as i64,
                annotation_version: version.clone(),
                taxon_id,
                external_gene_id: Some(gene.stable_id),
                external_xref_id: gene.xref,
                gene_type: gene.gene_type,
                gene_symbol: gene.symbol,
                is_obsolete: false,
            })
            .collect();
        insert_genes(conn, &records, self.chunk_size)?;
        if let Some(last) = records.last() {
            conn.execute(
                "INSERT INTO gene_index_watermark (id, last_index) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET last_index = MAX(last_index, excluded.last_index)",
                params![last.gene_index],
            )?;
        }

        let resolver = OrthologResolver::new(self.provider, self.chunk_size);
        let ortholog_count = match human {
            _ if taxon_id.is_human() => resolver.link_human(conn)?,
            Some(human) => resolver.link_species(conn, &human, dataset_name, taxon_id)?,
            None => 0,
        };

        info!(
            taxon = %taxon_id,
            dataset = dataset_name,
            version = %version,
            genes = records.len(),
            orthologs = ortholog_count,
            "species admitted"
        );
        Ok(SpeciesAdmission {
            taxon_id,
            dataset_name: dataset_name.to_string(),
            annotation_version: version,
            gene_count: records.len(),
            ortholog_count,
            first_gene_index: records.first().map(|record| record.gene_index),
        })
    }

    fn fetch_genes(&self, dataset: &ProviderDataset) -> Result<Vec<ProviderGene>, CatalogError> {
        let xref = XREF_ATTRIBUTES
            .iter()
            .copied()
            .find(|name| dataset.has_attribute(name));
        let mut attributes = vec![STABLE_GENE_ID_ATTRIBUTE];
        attributes.extend(xref);
        for optional in [GENE_TYPE_ATTRIBUTE, GENE_SYMBOL_ATTRIBUTE] {
            if dataset.has_attribute(optional) {
                attributes.push(optional);
            }
        }
        let table = self
            .provider
            .bulk_query(&dataset.name, &BulkQuery::attributes(attributes.iter().copied()))?;

        let id_col = table.column_index(STABLE_GENE_ID_ATTRIBUTE)?;
        let xref_col = xref.map(|name| table.column_index(name)).transpose()?;
        let type_col = table.column_index(GENE_TYPE_ATTRIBUTE).ok();
        let symbol_col = table.column_index(GENE_SYMBOL_ATTRIBUTE).ok();

        let mut seen = HashSet::new();
        let mut genes = Vec::with_capacity(table.len());
        let mut repeated = 0usize;
        for row in &table.rows {
            let Some(stable_id) = row[id_col].clone() else {
                continue;
            };
            if !seen.insert(stable_id.clone()) {
                repeated += 1;
                continue;
            }
            let cell = |col: Option<usize>| col.and_then(|index| row[index].clone());
            genes.push(ProviderGene {
                stable_id,
                xref: cell(xref_col).and_then(|text| parse_xref(&text)),
                gene_type: cell(type_col),
                symbol: cell(symbol_col),
            });
        }
        if repeated > 0 {
            debug!(repeated, "collapsed repeated stable gene ids, keeping the first row");
        }
        Ok(genes)
    }
}

struct ProviderGene {
    stable_id: String,
    xref: Option<i64>,
    gene_type: Option<String>,
    symbol: Option<String>,
}

fn parse_xref(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^(]+\(([^)]+)\)").ok())
        .as_ref()
}

/// `"<dataset> <assembly>"` where the assembly is the parenthesised part of
/// the provider display name, e.g. `Mouse genes (GRCm39)`.
pub fn annotation_version(dataset_name: &str, display_name: &str) -> String {
    match version_pattern()
        .and_then(|pattern| pattern.captures(display_name))
        .and_then(|caps| caps.get(1))
    {
        Some(assembly) => format!("{dataset_name} {}", assembly.as_str()),
        None => format!("{dataset_name} {}", display_name.trim()).trim_end().to_string(),
    }
}

/// Next free gene index: above every index ever handed out, never 0.
pub fn next_gene_index(conn: &Connection) -> Result<GeneIndex, CatalogError> {
    let current: i64 = conn.query_row(
        "SELECT MAX(
             COALESCE((SELECT MAX(gene_index) FROM gene), 0),
             COALESCE((SELECT last_index FROM gene_index_watermark WHERE id = 1), 0)
         )",
        [],
        |row| row.get(0),
    )?;
    Ok(current.max(0) + 1)
}

fn insert_genes(conn: &Connection, records: &[GeneRecord], chunk_size: usize) -> Result<usize, CatalogError> {
    insert_chunked(
        conn,
        "gene",
        &[
            "gene_index",
            "annotation_version",
            "taxon_id",
            "external_gene_id",
            "external_xref_id",
            "gene_type",
            "gene_symbol",
            "is_obsolete",
        ],
        records,
        chunk_size,
        |record| {
            vec![
                Value::Integer(record.gene_index),
                Value::Text(record.annotation_version.clone()),
                Value::Integer(record.taxon_id.0),
                opt_text(record.external_gene_id.as_deref()),
                opt_int(record.external_xref_id),
                opt_text(record.gene_type.as_deref()),
                opt_text(record.gene_symbol.as_deref()),
                Value::Integer(i64::from(record.is_obsolete)),
            ]
        },
    )
}

/// Stable gene id to gene index for one species; the lowest index wins.
pub fn stable_id_index(conn: &Connection, taxon_id: TaxonId) -> Result<HashMap<String, GeneIndex>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT external_gene_id, gene_index FROM gene
         WHERE taxon_id = ?1 AND external_gene_id IS NOT NULL
         ORDER BY gene_index",
    )?;
    let rows = stmt.query_map(params![taxon_id.0], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, GeneIndex>(1)?))
    })?;
    let mut index = HashMap::new();
    for row in rows {
        let (stable_id, gene_index) = row?;
        index.entry(stable_id).or_insert(gene_index);
    }
    Ok(index)
}

pub fn find_species(conn: &Connection, taxon_id: TaxonId) -> Result<Option<Species>, CatalogError> {
    let species = conn
        .query_row(
            "SELECT taxon_id, dataset_name, annotation_version, admitted_at
             FROM species WHERE taxon_id = ?1",
            params![taxon_id.0],
            |row| {
                Ok(Species {
                    taxon_id: TaxonId(row.get(0)?),
                    dataset_name: row.get(1)?,
                    annotation_version: row.get(2)?,
                    admitted_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(species)
}

pub fn species(conn: &Connection, taxon_id: TaxonId) -> Result<Species, CatalogError> {
    find_species(conn, taxon_id)?.ok_or(CatalogError::UnknownTaxon(taxon_id.0))
}

pub fn list_species(conn: &Connection) -> Result<Vec<SpeciesSummary>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT s.taxon_id, s.dataset_name, s.annotation_version,
                (SELECT COUNT(*) FROM gene g WHERE g.taxon_id = s.taxon_id)
         FROM species s ORDER BY s.taxon_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SpeciesSummary {
            taxon_id: TaxonId(row.get(0)?),
            dataset_name: row.get(1)?,
            annotation_version: row.get(2)?,
            gene_count: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Removes a species with its genes and ortholog links.
pub fn remove_species(conn: &Connection, taxon_id: TaxonId) -> Result<Species, CatalogError> {
    if taxon_id.is_human() {
        return Err(CatalogError::Precondition(
            "the human species anchors every ortholog link and cannot be removed".to_string(),
        ));
    }
    let species = find_species(conn, taxon_id)?
        .ok_or_else(|| CatalogError::not_found("species", taxon_id.to_string()))?;

    let data_sets: i64 = conn.query_row(
        "SELECT COUNT(*) FROM data_set WHERE taxon_id = ?1",
        params![taxon_id.0],
        |row| row.get(0),
    )?;
    let categories: i64 = conn.query_row(
        "SELECT COUNT(*) FROM gene_set_category WHERE taxon_id = ?1",
        params![taxon_id.0],
        |row| row.get(0),
    )?;
    if data_sets > 0 || categories > 0 {
        return Err(CatalogError::Precondition(format!(
            "species {taxon_id} is still referenced by {data_sets} data set(s) and {categories} gene-set categories"
        )));
    }

    let removed = conn.execute("DELETE FROM gene WHERE taxon_id = ?1", params![taxon_id.0])?;
    conn.execute("DELETE FROM species WHERE taxon_id = ?1", params![taxon_id.0])?;
    if removed == 0 {
        warn!(taxon = %taxon_id, "species had no gene records");
    }
    info!(taxon = %taxon_id, genes = removed, "species removed");
    Ok(species)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_uses_parenthesised_assembly() {
        assert_eq!(
            annotation_version("mmusculus_gene_ensembl", "Mouse genes (GRCm39)"),
            "mmusculus_gene_ensembl GRCm39"
        );
        assert_eq!(
            annotation_version("local_genes", "Local genes"),
            "local_genes Local genes"
        );
    }

    #[test]
    fn xref_accepts_float_rendering() {
        assert_eq!(parse_xref("7157"), Some(7157));
        assert_eq!(parse_xref("7157.0"), Some(7157));
        assert_eq!(parse_xref("abc"), None);
    }

    #[test]
    fn next_index_respects_watermark() {
        let conn = crate::db::open_in_memory().unwrap();
        assert_eq!(next_gene_index(&conn).unwrap(), 1);
        conn.execute("INSERT INTO gene_index_watermark (id, last_index) VALUES (1, 41)", [])
            .unwrap();
        assert_eq!(next_gene_index(&conn).unwrap(), 42);
    }
}
