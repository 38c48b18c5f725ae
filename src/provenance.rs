//! Entity structs and the query layer of the provenance graph
//! (data set, design, contrast, model, result rows).
//!
//! Functions here read and write single entities inside the caller's
//! transaction. Existence and uniqueness checks that produce user-facing
//! errors live next to the reads; cascades are left to the schema.

use camino::Utf8PathBuf;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::annotator::FeatureAnnotation;
use crate::db::{insert_chunked, opt_int, opt_text};
use crate::domain::{DataSetKind, GeneIndex, TaxonId};
use crate::error::CatalogError;
use crate::table::{Column, ContrastMatrix, DesignMatrix, Table};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSet {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub kind: DataSetKind,
    pub gene_annotation_version: String,
    pub description: Option<String>,
    pub feature_count: i64,
    pub sample_count: i64,
    pub taxon_id: TaxonId,
    pub exprs_wc: Utf8PathBuf,
    pub exprs_src: String,
    pub pheno_wc: Utf8PathBuf,
    pub pheno_src: Option<String>,
    pub xref: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewDataSet<'a> {
    pub name: &'a str,
    pub kind: DataSetKind,
    pub gene_annotation_version: &'a str,
    pub description: Option<&'a str>,
    pub feature_count: usize,
    pub sample_count: usize,
    pub taxon_id: TaxonId,
    pub exprs_wc: &'a str,
    pub exprs_src: &'a str,
    pub pheno_wc: &'a str,
    pub pheno_src: Option<&'a str>,
    pub xref: Option<&'a str>,
    pub created_by: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureMapping {
    pub feature_index: i64,
    pub data_set_id: i64,
    pub name: String,
    pub gene_index: Option<GeneIndex>,
    pub origin_gene_index: Option<GeneIndex>,
    pub origin_taxon_id: Option<TaxonId>,
    pub description: Option<String>,
    pub gene_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Design {
    pub id: i64,
    pub data_set_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub variable_count: i64,
    pub design_matrix: DesignMatrix,
    pub sample_groups: Vec<String>,
    pub sample_group_levels: Vec<String>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContrastColumn {
    pub id: i64,
    pub contrast_id: i64,
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contrast {
    pub id: i64,
    pub design_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub columns: Vec<ContrastColumn>,
}

impl Contrast {
    /// Contrast matrix with design column names as row labels.
    pub fn matrix(&self, design: &Design) -> Result<ContrastMatrix, CatalogError> {
        Table::new(
            Some(
                design
                    .design_matrix
                    .column_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ),
            self.columns
                .iter()
                .map(|column| Column {
                    name: column.name.clone(),
                    values: column.values.clone(),
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Method {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GseMethod {
    pub id: i64,
    pub dge_method_id: i64,
    pub dge_method: String,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DgeModel {
    pub contrast_id: i64,
    pub dge_method_id: i64,
    pub input_obj_file: Utf8PathBuf,
    pub fit_obj_file: Utf8PathBuf,
    pub method_description: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary {
    pub data_set: String,
    pub design: String,
    pub contrast: String,
    pub dge_method: String,
    pub contrast_id: i64,
    pub dge_method_id: i64,
    pub method_description: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DgeResultRow {
    pub contrast_column: String,
    pub feature_index: i64,
    pub feature_name: String,
    pub gene_index: Option<GeneIndex>,
    pub ave_expr: f64,
    pub statistic: f64,
    pub log_fc: f64,
    pub p_value: f64,
    pub fdr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewDgeRow {
    pub contrast_column_id: i64,
    pub feature_index: i64,
    pub ave_expr: f64,
    pub statistic: f64,
    pub log_fc: f64,
    pub p_value: f64,
    pub fdr: f64,
}

fn json_text<T: Serialize>(value: &T) -> Result<String, CatalogError> {
    serde_json::to_string(value).map_err(|err| CatalogError::Storage(err.to_string()))
}

fn from_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

// ---- data sets ----

const DATA_SET_COLUMNS: &str = "id, name, kind, normalization, gene_annotation_version, description,
    feature_count, sample_count, taxon_id, exprs_wc, exprs_src, pheno_wc, pheno_src, xref,
    created_by, created_at";

fn data_set_from_row(row: &Row<'_>) -> rusqlite::Result<DataSet> {
    let kind: String = row.get(2)?;
    let normalization: String = row.get(3)?;
    let kind = DataSetKind::from_parts(&kind, &normalization).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(DataSet {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        gene_annotation_version: row.get(4)?,
        description: row.get(5)?,
        feature_count: row.get(6)?,
        sample_count: row.get(7)?,
        taxon_id: TaxonId(row.get(8)?),
        exprs_wc: Utf8PathBuf::from(row.get::<_, String>(9)?),
        exprs_src: row.get(10)?,
        pheno_wc: Utf8PathBuf::from(row.get::<_, String>(11)?),
        pheno_src: row.get(12)?,
        xref: row.get(13)?,
        created_by: row.get(14)?,
        created_at: row.get(15)?,
    })
}

pub fn find_data_set(conn: &Connection, name: &str) -> Result<Option<DataSet>, CatalogError> {
    let sql = format!("SELECT {DATA_SET_COLUMNS} FROM data_set WHERE name = ?1");
    Ok(conn.query_row(&sql, params![name], data_set_from_row).optional()?)
}

pub fn data_set(conn: &Connection, name: &str) -> Result<DataSet, CatalogError> {
    find_data_set(conn, name)?.ok_or_else(|| CatalogError::not_found("data set", name))
}

pub fn list_data_sets(conn: &Connection) -> Result<Vec<DataSet>, CatalogError> {
    let sql = format!("SELECT {DATA_SET_COLUMNS} FROM data_set ORDER BY id");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], data_set_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_data_set(conn: &Connection, new: &NewDataSet<'_>) -> Result<i64, CatalogError> {
    conn.execute(
        "INSERT INTO data_set (name, kind, normalization, gene_annotation_version, description,
             feature_count, sample_count, taxon_id, exprs_wc, exprs_src, pheno_wc, pheno_src,
             xref, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            new.name,
            new.kind.discriminant(),
            new.kind.normalization(),
            new.gene_annotation_version,
            new.description,
            new.feature_count as i64,
            new.sample_count as i64,
            new.taxon_id.0,
            new.exprs_wc,
            new.exprs_src,
            new.pheno_wc,
            new.pheno_src,
            new.xref,
            new.created_by,
            new.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_samples(
    conn: &Connection,
    data_set_id: i64,
    samples: &[String],
    chunk_size: usize,
) -> Result<usize, CatalogError> {
    let rows: Vec<(usize, &String)> = samples.iter().enumerate().collect();
    insert_chunked(
        conn,
        "data_set_sample",
        &["data_set_id", "sample_index", "name"],
        &rows,
        chunk_size,
        |(index, name)| {
            vec![
                Value::Integer(data_set_id),
                Value::Integer(*index as i64),
                Value::Text((*name).clone()),
            ]
        },
    )
}

pub fn samples_of(conn: &Connection, data_set_id: i64) -> Result<Vec<String>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM data_set_sample WHERE data_set_id = ?1 ORDER BY sample_index",
    )?;
    let rows = stmt.query_map(params![data_set_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_feature_mappings(
    conn: &Connection,
    data_set_id: i64,
    features: &[FeatureAnnotation],
    chunk_size: usize,
) -> Result<usize, CatalogError> {
    insert_chunked(
        conn,
        "feature_mapping",
        &[
            "data_set_id",
            "feature_index",
            "name",
            "gene_index",
            "origin_gene_index",
            "origin_taxon_id",
            "description",
        ],
        features,
        chunk_size,
        |feature| {
            vec![
                Value::Integer(data_set_id),
                Value::Integer(feature.feature_index),
                Value::Text(feature.name.clone()),
                opt_int(feature.gene_index),
                opt_int(feature.origin_gene_index),
                opt_int(feature.origin_taxon_id.map(|taxon| taxon.0)),
                opt_text(feature.description.as_deref()),
            ]
        },
    )
}

/// Feature mappings in matrix row order, joined with the canonical gene symbol.
pub fn features_of(conn: &Connection, data_set_id: i64) -> Result<Vec<FeatureMapping>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT f.feature_index, f.data_set_id, f.name, f.gene_index, f.origin_gene_index,
                f.origin_taxon_id, f.description, g.gene_symbol
         FROM feature_mapping f LEFT JOIN gene g ON g.gene_index = f.gene_index
         WHERE f.data_set_id = ?1
         ORDER BY f.feature_index",
    )?;
    let rows = stmt.query_map(params![data_set_id], |row| {
        Ok(FeatureMapping {
            feature_index: row.get(0)?,
            data_set_id: row.get(1)?,
            name: row.get(2)?,
            gene_index: row.get(3)?,
            origin_gene_index: row.get(4)?,
            origin_taxon_id: row.get::<_, Option<i64>>(5)?.map(TaxonId),
            description: row.get(6)?,
            gene_symbol: row.get(7)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_data_set(conn: &Connection, id: i64) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM data_set WHERE id = ?1", params![id])?;
    Ok(())
}

// ---- designs ----

const DESIGN_COLUMNS: &str = "id, data_set_id, name, description, variable_count, design_matrix,
    sample_groups, sample_group_levels, created_by, created_at";

fn design_from_row(row: &Row<'_>) -> rusqlite::Result<Design> {
    Ok(Design {
        id: row.get(0)?,
        data_set_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        variable_count: row.get(4)?,
        design_matrix: from_json_column(row, 5)?,
        sample_groups: from_json_column(row, 6)?,
        sample_group_levels: from_json_column(row, 7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn find_design(conn: &Connection, data_set_id: i64, name: &str) -> Result<Option<Design>, CatalogError> {
    let sql = format!("SELECT {DESIGN_COLUMNS} FROM design WHERE data_set_id = ?1 AND name = ?2");
    Ok(conn
        .query_row(&sql, params![data_set_id, name], design_from_row)
        .optional()?)
}

pub fn design(conn: &Connection, data_set: &DataSet, name: &str) -> Result<Design, CatalogError> {
    find_design(conn, data_set.id, name)?
        .ok_or_else(|| CatalogError::not_found("design", format!("{}/{name}", data_set.name)))
}

pub fn list_designs(conn: &Connection, data_set_id: i64) -> Result<Vec<Design>, CatalogError> {
    let sql = format!("SELECT {DESIGN_COLUMNS} FROM design WHERE data_set_id = ?1 ORDER BY id");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![data_set_id], design_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[derive(Debug, Clone)]
pub struct NewDesign<'a> {
    pub data_set_id: i64,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub design_matrix: &'a DesignMatrix,
    pub sample_groups: &'a [String],
    pub sample_group_levels: &'a [String],
    pub created_by: &'a str,
    pub created_at: &'a str,
}

pub fn insert_design(conn: &Connection, new: &NewDesign<'_>) -> Result<i64, CatalogError> {
    conn.execute(
        "INSERT INTO design (data_set_id, name, description, variable_count, design_matrix,
             sample_groups, sample_group_levels, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new.data_set_id,
            new.name,
            new.description,
            new.design_matrix.column_count() as i64,
            json_text(new.design_matrix)?,
            json_text(&new.sample_groups)?,
            json_text(&new.sample_group_levels)?,
            new.created_by,
            new.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_design(conn: &Connection, id: i64) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM design WHERE id = ?1", params![id])?;
    Ok(())
}

// ---- contrasts ----

fn contrast_columns(conn: &Connection, contrast_id: i64) -> Result<Vec<ContrastColumn>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, contrast_id, name, column_data FROM contrast_column
         WHERE contrast_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![contrast_id], |row| {
        Ok(ContrastColumn {
            id: row.get(0)?,
            contrast_id: row.get(1)?,
            name: row.get(2)?,
            values: from_json_column(row, 3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn contrasts_where(conn: &Connection, clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Contrast>, CatalogError> {
    let sql = format!(
        "SELECT id, design_id, name, description, created_by, created_at FROM contrast
         WHERE {clause} ORDER BY id"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let heads = stmt
        .query_map(args, |row| {
            Ok(Contrast {
                id: row.get(0)?,
                design_id: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                created_by: row.get(4)?,
                created_at: row.get(5)?,
                columns: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    heads
        .into_iter()
        .map(|mut contrast| {
            contrast.columns = contrast_columns(conn, contrast.id)?;
            Ok(contrast)
        })
        .collect()
}

pub fn find_contrast(conn: &Connection, design_id: i64, name: &str) -> Result<Option<Contrast>, CatalogError> {
    Ok(contrasts_where(conn, "design_id = ?1 AND name = ?2", &[&design_id, &name])?
        .into_iter()
        .next())
}

pub fn contrast(conn: &Connection, design: &Design, name: &str) -> Result<Contrast, CatalogError> {
    find_contrast(conn, design.id, name)?
        .ok_or_else(|| CatalogError::not_found("contrast", format!("{}/{name}", design.name)))
}

pub fn contrast_by_id(conn: &Connection, id: i64) -> Result<Contrast, CatalogError> {
    contrasts_where(conn, "id = ?1", &[&id])?
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::not_found("contrast", id.to_string()))
}

pub fn list_contrasts(conn: &Connection, design_id: i64) -> Result<Vec<Contrast>, CatalogError> {
    contrasts_where(conn, "design_id = ?1", &[&design_id])
}

pub fn insert_contrast(
    conn: &Connection,
    design_id: i64,
    name: &str,
    description: Option<&str>,
    matrix: &ContrastMatrix,
    created_by: &str,
    created_at: &str,
) -> Result<i64, CatalogError> {
    conn.execute(
        "INSERT INTO contrast (design_id, name, description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![design_id, name, description, created_by, created_at],
    )?;
    let contrast_id = conn.last_insert_rowid();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO contrast_column (contrast_id, name, column_data) VALUES (?1, ?2, ?3)",
    )?;
    for column in &matrix.columns {
        stmt.execute(params![contrast_id, column.name, json_text(&column.values)?])?;
    }
    Ok(contrast_id)
}

pub fn delete_contrast(conn: &Connection, id: i64) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM contrast WHERE id = ?1", params![id])?;
    Ok(())
}

// ---- methods ----

pub fn find_dge_method(conn: &Connection, name: &str) -> Result<Option<Method>, CatalogError> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, version FROM dge_method WHERE name = ?1",
            params![name],
            |row| {
                Ok(Method {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    version: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn dge_method(conn: &Connection, name: &str) -> Result<Method, CatalogError> {
    find_dge_method(conn, name)?.ok_or_else(|| CatalogError::not_found("DGE method", name))
}

pub fn list_dge_methods(conn: &Connection) -> Result<Vec<Method>, CatalogError> {
    let mut stmt =
        conn.prepare_cached("SELECT id, name, description, version FROM dge_method ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Method {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_dge_method(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    version: Option<&str>,
) -> Result<i64, CatalogError> {
    conn.execute(
        "INSERT INTO dge_method (name, description, version) VALUES (?1, ?2, ?3)",
        params![name, description, version],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_dge_method(conn: &Connection, method: &Method) -> Result<(), CatalogError> {
    let models: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dge_model WHERE dge_method_id = ?1",
        params![method.id],
        |row| row.get(0),
    )?;
    if models > 0 {
        return Err(CatalogError::Precondition(format!(
            "DGE method {} is used by {models} model(s); remove them first",
            method.name
        )));
    }
    conn.execute("DELETE FROM dge_method WHERE id = ?1", params![method.id])?;
    Ok(())
}

fn gse_method_from_row(row: &Row<'_>) -> rusqlite::Result<GseMethod> {
    Ok(GseMethod {
        id: row.get(0)?,
        dge_method_id: row.get(1)?,
        dge_method: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        version: row.get(5)?,
    })
}

pub fn find_gse_method(conn: &Connection, dge_method: &Method, name: &str) -> Result<Option<GseMethod>, CatalogError> {
    Ok(conn
        .query_row(
            "SELECT g.id, g.dge_method_id, d.name, g.name, g.description, g.version
             FROM gse_method g JOIN dge_method d ON d.id = g.dge_method_id
             WHERE g.dge_method_id = ?1 AND g.name = ?2",
            params![dge_method.id, name],
            gse_method_from_row,
        )
        .optional()?)
}

pub fn gse_method(conn: &Connection, dge_method: &Method, name: &str) -> Result<GseMethod, CatalogError> {
    find_gse_method(conn, dge_method, name)?
        .ok_or_else(|| CatalogError::not_found("GSE method", format!("{}/{name}", dge_method.name)))
}

pub fn list_gse_methods(conn: &Connection) -> Result<Vec<GseMethod>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT g.id, g.dge_method_id, d.name, g.name, g.description, g.version
         FROM gse_method g JOIN dge_method d ON d.id = g.dge_method_id
         ORDER BY g.id",
    )?;
    let rows = stmt.query_map([], gse_method_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_gse_method(
    conn: &Connection,
    dge_method: &Method,
    name: &str,
    description: Option<&str>,
    version: Option<&str>,
) -> Result<i64, CatalogError> {
    conn.execute(
        "INSERT INTO gse_method (dge_method_id, name, description, version) VALUES (?1, ?2, ?3, ?4)",
        params![dge_method.id, name, description, version],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_gse_method(conn: &Connection, method: &GseMethod) -> Result<(), CatalogError> {
    let results: i64 = conn.query_row(
        "SELECT COUNT(*) FROM gse_result WHERE gse_method_id = ?1",
        params![method.id],
        |row| row.get(0),
    )?;
    if results > 0 {
        return Err(CatalogError::Precondition(format!(
            "GSE method {} is used by {results} enrichment result(s); remove them first",
            method.name
        )));
    }
    conn.execute("DELETE FROM gse_method WHERE id = ?1", params![method.id])?;
    Ok(())
}

// ---- models and result rows ----

pub fn find_model(conn: &Connection, contrast_id: i64, dge_method_id: i64) -> Result<Option<DgeModel>, CatalogError> {
    Ok(conn
        .query_row(
            "SELECT contrast_id, dge_method_id, input_obj_file, fit_obj_file, method_description,
                    created_by, created_at
             FROM dge_model WHERE contrast_id = ?1 AND dge_method_id = ?2",
            params![contrast_id, dge_method_id],
            |row| {
                Ok(DgeModel {
                    contrast_id: row.get(0)?,
                    dge_method_id: row.get(1)?,
                    input_obj_file: Utf8PathBuf::from(row.get::<_, String>(2)?),
                    fit_obj_file: Utf8PathBuf::from(row.get::<_, String>(3)?),
                    method_description: row.get(4)?,
                    created_by: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?)
}

pub fn insert_model(conn: &Connection, model: &DgeModel) -> Result<(), CatalogError> {
    conn.execute(
        "INSERT INTO dge_model (contrast_id, dge_method_id, input_obj_file, fit_obj_file,
             method_description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            model.contrast_id,
            model.dge_method_id,
            model.input_obj_file.as_str(),
            model.fit_obj_file.as_str(),
            model.method_description,
            model.created_by,
            model.created_at,
        ],
    )?;
    Ok(())
}

pub fn delete_model(conn: &Connection, contrast_id: i64, dge_method_id: i64) -> Result<(), CatalogError> {
    conn.execute(
        "DELETE FROM dge_model WHERE contrast_id = ?1 AND dge_method_id = ?2",
        params![contrast_id, dge_method_id],
    )?;
    Ok(())
}

/// Model artifact files that hang off a data set, for best-effort cleanup.
pub fn model_files_under(conn: &Connection, clause: &str, id: i64) -> Result<Vec<(i64, i64)>, CatalogError> {
    let sql = format!(
        "SELECT m.contrast_id, m.dge_method_id
         FROM dge_model m
         JOIN contrast c ON c.id = m.contrast_id
         JOIN design d ON d.id = c.design_id
         WHERE {clause} = ?1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_models(conn: &Connection) -> Result<Vec<ModelSummary>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT ds.name, d.name, c.name, me.name, m.contrast_id, m.dge_method_id,
                m.method_description, m.created_by, m.created_at
         FROM dge_model m
         JOIN contrast c ON c.id = m.contrast_id
         JOIN design d ON d.id = c.design_id
         JOIN data_set ds ON ds.id = d.data_set_id
         JOIN dge_method me ON me.id = m.dge_method_id
         ORDER BY ds.name, d.name, c.name, me.name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(ModelSummary {
            data_set: row.get(0)?,
            design: row.get(1)?,
            contrast: row.get(2)?,
            dge_method: row.get(3)?,
            contrast_id: row.get(4)?,
            dge_method_id: row.get(5)?,
            method_description: row.get(6)?,
            created_by: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_feature_subset(
    conn: &Connection,
    model: &DgeModel,
    data_set_id: i64,
    used: &[bool],
    chunk_size: usize,
) -> Result<usize, CatalogError> {
    let rows: Vec<(i64, bool)> = used
        .iter()
        .enumerate()
        .map(|(index, flag)| (index as i64, *flag))
        .collect();
    insert_chunked(
        conn,
        "feature_subset",
        &["contrast_id", "dge_method_id", "data_set_id", "feature_index", "is_used"],
        &rows,
        chunk_size,
        |(feature_index, is_used)| {
            vec![
                Value::Integer(model.contrast_id),
                Value::Integer(model.dge_method_id),
                Value::Integer(data_set_id),
                Value::Integer(*feature_index),
                Value::Integer(i64::from(*is_used)),
            ]
        },
    )
}

pub fn used_features(conn: &Connection, contrast_id: i64, dge_method_id: i64) -> Result<Vec<bool>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT is_used FROM feature_subset
         WHERE contrast_id = ?1 AND dge_method_id = ?2 ORDER BY feature_index",
    )?;
    let rows = stmt.query_map(params![contrast_id, dge_method_id], |row| {
        Ok(row.get::<_, i64>(0)? != 0)
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_dge_rows(
    conn: &Connection,
    model: &DgeModel,
    data_set_id: i64,
    rows: &[NewDgeRow],
    chunk_size: usize,
) -> Result<usize, CatalogError> {
    insert_chunked(
        conn,
        "dge_table",
        &[
            "contrast_column_id",
            "dge_method_id",
            "contrast_id",
            "data_set_id",
            "feature_index",
            "ave_expr",
            "statistic",
            "log_fc",
            "p_value",
            "fdr",
        ],
        rows,
        chunk_size,
        |row| {
            vec![
                Value::Integer(row.contrast_column_id),
                Value::Integer(model.dge_method_id),
                Value::Integer(model.contrast_id),
                Value::Integer(data_set_id),
                Value::Integer(row.feature_index),
                Value::Real(row.ave_expr),
                Value::Real(row.statistic),
                Value::Real(row.log_fc),
                Value::Real(row.p_value),
                Value::Real(row.fdr),
            ]
        },
    )
}

pub fn dge_rows(conn: &Connection, contrast_id: i64, dge_method_id: i64) -> Result<Vec<DgeResultRow>, CatalogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT cc.name, t.feature_index, f.name, f.gene_index,
                t.ave_expr, t.statistic, t.log_fc, t.p_value, t.fdr
         FROM dge_table t
         JOIN contrast_column cc ON cc.id = t.contrast_column_id
         JOIN feature_mapping f ON f.data_set_id = t.data_set_id AND f.feature_index = t.feature_index
         WHERE t.contrast_id = ?1 AND t.dge_method_id = ?2
         ORDER BY cc.id, t.feature_index",
    )?;
    let rows = stmt.query_map(params![contrast_id, dge_method_id], |row| {
        Ok(DgeResultRow {
            contrast_column: row.get(0)?,
            feature_index: row.get(1)?,
            feature_name: row.get(2)?,
            gene_index: row.get(3)?,
            ave_expr: row.get(4)?,
            statistic: row.get(5)?,
            log_fc: row.get(6)?,
            p_value: row.get(7)?,
            fdr: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
