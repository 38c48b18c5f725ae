//! Gene-set categories loaded from GMT files and the enrichment results
//! computed against them.

use std::collections::{HashMap, HashSet};

use camino::Utf8PathBuf;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::insert_chunked;
use crate::domain::{GeneIndex, TaxonId};
use crate::error::CatalogError;
use crate::gmt::GmtEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneSetCategory {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub taxon_id: TaxonId,
    pub file_wc: Utf8PathBuf,
    pub file_src: String,
    pub created_by: String,
    pub created_at: String,
    pub gene_set_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewCategory<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub taxon_id: TaxonId,
    pub file_wc: &'a str,
    pub file_src: &'a str,
    pub created_by: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GmtImport {
    pub category: String,
    pub gene_sets: usize,
    pub memberships: usize,
    pub unmatched_symbols: usize,
    pub total_symbols: usize,
    pub unmatched_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GseResult {
    pub contrast_id: i64,
    pub dge_method_id: i64,
    pub gse_method_id: i64,
    pub output_file: Utf8PathBuf,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewGseRow {
    pub contrast_column_id: i64,
    pub gene_set_id: i64,
    pub correlation: Option<f64>,
    pub direction: i64,
    pub p_value: f64,
    pub fdr: f64,
    pub enrichment_score: f64,
    pub effective_gene_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GseResultRow {
    pub contrast_column: String,
    pub category: String,
    pub gene_set: String,
    pub correlation: Option<f64>,
    pub direction: i64,
    pub p_value: f64,
    pub fdr: f64,
    pub enrichment_score: f64,
    pub effective_gene_count: i64,
}

const CATEGORY_COLUMNS: &str = "c.id, c.name, c.description, c.taxon_id, c.file_wc, c.file_src,
    c.created_by, c.created_at, (SELECT COUNT(*) FROM gene_set s WHERE s.category_id = c.id)";

fn category_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeneSetCategory> {
    Ok(GeneSetCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        taxon_id: TaxonId(row.get(3)?),
        file_wc: Utf8PathBuf::from(row.get::<_, String>(4)?),
        file_src: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        gene_set_count: row.get(8)?,
    })
}

pub fn find_category(conn: &Connection, name: &str) -> Result<Option<GeneSetCategory>, CatalogError> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM gene_set_category c WHERE c.name = ?1");
    Ok(conn.query_row(&sql, params![name], category_from_row).optional()?)
}

pub fn category(conn: &Connection, name: &str) -> Result<GeneSetCategory, CatalogError> {
    find_category(conn, name)?.ok_or_else(|| CatalogError::not_found("gene-set category", name))
}

pub fn list_categories(conn: &Connection) -> Result<Vec<GeneSetCategory>, CatalogError> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM gene_set_category c ORDER BY c.name");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], category_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_category(conn: &Connection, id: i64) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM gene_set_category WHERE id = ?1", params![id])?;
    Ok(())
}

/// Gene symbol to gene index for one species; the lowest index wins when a
/// symbol is shared.
fn symbol_index(conn: &Connection, taxon_id: TaxonId) -> Result<HashMap<String, GeneIndex>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT gene_symbol, gene_index FROM gene
         WHERE taxon_id = ?1 AND gene_symbol IS NOT NULL
         ORDER BY gene_index",
    )?;
    let rows = stmt.query_map(params![taxon_id.0], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, GeneIndex>(1)?))
    })?;
    let mut index = HashMap::new();
    for row in rows {
        let (symbol, gene_index) = row?;
        index.entry(symbol).or_insert(gene_index);
    }
    Ok(index)
}

/// Inserts a category with its gene sets and memberships. Symbols are matched
/// against the species' gene records; a gene listed twice in one set is
/// stored once.
pub fn insert_category(
    conn: &Connection,
    new: &NewCategory<'_>,
    entries: &[GmtEntry],
    chunk_size: usize,
) -> Result<GmtImport, CatalogError> {
    conn.execute(
        "INSERT INTO gene_set_category (name, description, taxon_id, file_wc, file_src,
             created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.name,
            new.description,
            new.taxon_id.0,
            new.file_wc,
            new.file_src,
            new.created_by,
            new.created_at,
        ],
    )?;
    let category_id = conn.last_insert_rowid();
    let symbols = symbol_index(conn, new.taxon_id)?;

    let mut memberships = Vec::new();
    let mut unmatched_symbols = 0usize;
    let mut total_symbols = 0usize;
    let mut set_stmt = conn.prepare_cached(
        "INSERT INTO gene_set (category_id, name, taxon_id, description, gene_count)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for entry in entries {
        let mut genes = HashSet::new();
        let mut members = Vec::new();
        for symbol in &entry.genes {
            total_symbols += 1;
            match symbols.get(symbol) {
                Some(&gene_index) => {
                    if genes.insert(gene_index) {
                        members.push(gene_index);
                    }
                }
                None => unmatched_symbols += 1,
            }
        }
        set_stmt.execute(params![
            category_id,
            entry.name,
            new.taxon_id.0,
            entry.description.as_deref().or(new.description),
            members.len() as i64,
        ])?;
        let gene_set_id = conn.last_insert_rowid();
        memberships.extend(members.into_iter().map(|gene_index| (gene_set_id, gene_index)));
    }

    let inserted = insert_chunked(
        conn,
        "gene_set_gene",
        &["gene_set_id", "gene_index"],
        &memberships,
        chunk_size,
        |(gene_set_id, gene_index)| vec![Value::Integer(*gene_set_id), Value::Integer(*gene_index)],
    )?;
    let unmatched_fraction = if total_symbols == 0 {
        0.0
    } else {
        unmatched_symbols as f64 / total_symbols as f64
    };
    info!(
        category = new.name,
        gene_sets = entries.len(),
        memberships = inserted,
        unmatched_symbols,
        "gene sets imported"
    );
    Ok(GmtImport {
        category: new.name.to_string(),
        gene_sets: entries.len(),
        memberships: inserted,
        unmatched_symbols,
        total_symbols,
        unmatched_fraction,
    })
}

pub fn gene_set_members(conn: &Connection, category_id: i64, name: &str) -> Result<Vec<GeneIndex>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT m.gene_index FROM gene_set_gene m JOIN gene_set s ON s.id = m.gene_set_id
         WHERE s.category_id = ?1 AND s.name = ?2 ORDER BY m.gene_index",
    )?;
    let rows = stmt.query_map(params![category_id, name], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn has_gene_set(conn: &Connection, category_id: i64, name: &str) -> Result<bool, CatalogError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM gene_set WHERE category_id = ?1 AND name = ?2",
            params![category_id, name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Gene-set ids keyed by lowercase category name and exact set name.
pub fn gene_set_ids(conn: &Connection, category_ids: &[i64]) -> Result<HashMap<(String, String), i64>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT s.id, c.name, s.name FROM gene_set s
         JOIN gene_set_category c ON c.id = s.category_id
         WHERE c.id = ?1",
    )?;
    let mut ids = HashMap::new();
    for category_id in category_ids {
        let rows = stmt.query_map(params![category_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (id, category, name) = row?;
            ids.insert((category.to_lowercase(), name), id);
        }
    }
    debug!(gene_sets = ids.len(), "gene-set lookup built");
    Ok(ids)
}

// ---- enrichment results ----

pub fn find_gse_result(
    conn: &Connection,
    contrast_id: i64,
    gse_method_id: i64,
) -> Result<Option<GseResult>, CatalogError> {
    Ok(conn
        .query_row(
            "SELECT contrast_id, dge_method_id, gse_method_id, output_file, created_by, created_at
             FROM gse_result WHERE contrast_id = ?1 AND gse_method_id = ?2",
            params![contrast_id, gse_method_id],
            |row| {
                Ok(GseResult {
                    contrast_id: row.get(0)?,
                    dge_method_id: row.get(1)?,
                    gse_method_id: row.get(2)?,
                    output_file: Utf8PathBuf::from(row.get::<_, String>(3)?),
                    created_by: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_gse_result(conn: &Connection, result: &GseResult) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO gse_result (contrast_id, dge_method_id, gse_method_id, output_file,
             created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            result.contrast_id,
            result.dge_method_id,
            result.gse_method_id,
            result.output_file.as_str(),
            result.created_by,
            result.created_at,
        ],
    )?;
    Ok(())
}

pub fn insert_gse_rows(
    conn: &Connection,
    result: &GseResult,
    rows: &[NewGseRow],
    chunk_size: usize,
) -> Result<usize, CatalogError> {
    insert_chunked(
        conn,
        "gse_table",
        &[
            "contrast_column_id",
            "gse_method_id",
            "gene_set_id",
            "contrast_id",
            "correlation",
            "direction",
            "p_value",
            "fdr",
            "enrichment_score",
            "eff_gene_count",
        ],
        rows,
        chunk_size,
        |row| {
            vec![
                Value::Integer(row.contrast_column_id),
                Value::Integer(result.gse_method_id),
                Value::Integer(row.gene_set_id),
                Value::Integer(result.contrast_id),
                row.correlation.map_or(Value::Null, Value::Real),
                Value::Integer(row.direction),
                Value::Real(row.p_value),
                Value::Real(row.fdr),
                Value::Real(row.enrichment_score),
                Value::Integer(row.effective_gene_count),
            ]
        },
    )
}

pub fn gse_rows(conn: &Connection, contrast_id: i64, gse_method_id: i64) -> Result<Vec<GseResultRow>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT cc.name, c.name, s.name, t.correlation, t.direction, t.p_value, t.fdr,
                t.enrichment_score, t.eff_gene_count
         FROM gse_table t
         JOIN contrast_column cc ON cc.id = t.contrast_column_id
         JOIN gene_set s ON s.id = t.gene_set_id
         JOIN gene_set_category c ON c.id = s.category_id
         WHERE t.contrast_id = ?1 AND t.gse_method_id = ?2
         ORDER BY cc.id, t.p_value",
    )?;
    let rows = stmt.query_map(params![contrast_id, gse_method_id], |row| {
        Ok(GseResultRow {
            contrast_column: row.get(0)?,
            category: row.get(1)?,
            gene_set: row.get(2)?,
            correlation: row.get(3)?,
            direction: row.get(4)?,
            p_value: row.get(5)?,
            fdr: row.get(6)?,
            enrichment_score: row.get(7)?,
            effective_gene_count: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_gse_result(conn: &Connection, contrast_id: i64, gse_method_id: i64) -> Result<(), CatalogError> {
    conn.execute(
        "DELETE FROM gse_result WHERE contrast_id = ?1 AND gse_method_id = ?2",
        params![contrast_id, gse_method_id],
    )?;
    Ok(())
}

/// Enrichment results that hang off a provenance entity, as
/// `(contrast_id, dge_method_id, gse_method_id)` keys. `column` is one of
/// `d.data_set_id`, `c.design_id`, `r.contrast_id`.
pub fn gse_results_under(conn: &Connection, column: &str, id: i64) -> Result<Vec<(i64, i64, i64)>, CatalogError> {
    let sql = format!(
        "SELECT r.contrast_id, r.dge_method_id, r.gse_method_id
         FROM gse_result r
         JOIN contrast c ON c.id = r.contrast_id
         JOIN design d ON d.id = c.design_id
         WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
