//! Relational schema and bulk-insert plumbing.
//!
//! Every table that hangs off a data set cascades on delete, so removing a
//! parent row inside one transaction never leaves orphans behind.

use std::time::Duration;

use camino::Utf8Path;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::error::CatalogError;

const MAX_BOUND_PARAMETERS: usize = 32_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS species (
    taxon_id            INTEGER PRIMARY KEY,
    dataset_name        TEXT NOT NULL,
    annotation_version  TEXT NOT NULL,
    admitted_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gene_index_watermark (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    last_index  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS gene (
    gene_index          INTEGER PRIMARY KEY,
    annotation_version  TEXT NOT NULL,
    taxon_id            INTEGER NOT NULL REFERENCES species(taxon_id) ON DELETE CASCADE,
    external_gene_id    TEXT,
    external_xref_id    INTEGER,
    gene_type           TEXT,
    gene_symbol         TEXT,
    is_obsolete         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS gene_by_taxon ON gene(taxon_id);
CREATE INDEX IF NOT EXISTS gene_by_symbol ON gene(gene_symbol);

CREATE TABLE IF NOT EXISTS ortholog (
    gene_index        INTEGER PRIMARY KEY REFERENCES gene(gene_index) ON DELETE CASCADE,
    human_gene_index  INTEGER NOT NULL REFERENCES gene(gene_index)
);
CREATE INDEX IF NOT EXISTS ortholog_by_human ON ortholog(human_gene_index);

CREATE TABLE IF NOT EXISTS data_set (
    id                       INTEGER PRIMARY KEY,
    name                     TEXT NOT NULL UNIQUE,
    kind                     TEXT NOT NULL,
    normalization            TEXT NOT NULL,
    gene_annotation_version  TEXT NOT NULL,
    description              TEXT,
    feature_count            INTEGER NOT NULL,
    sample_count             INTEGER NOT NULL,
    taxon_id                 INTEGER NOT NULL REFERENCES species(taxon_id),
    exprs_wc                 TEXT NOT NULL,
    exprs_src                TEXT NOT NULL,
    pheno_wc                 TEXT NOT NULL,
    pheno_src                TEXT,
    xref                     TEXT,
    created_by               TEXT NOT NULL,
    created_at               TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS data_set_sample (
    data_set_id   INTEGER NOT NULL REFERENCES data_set(id) ON DELETE CASCADE,
    sample_index  INTEGER NOT NULL,
    name          TEXT NOT NULL,
    PRIMARY KEY (data_set_id, sample_index),
    UNIQUE (data_set_id, name)
);

CREATE TABLE IF NOT EXISTS feature_mapping (
    data_set_id        INTEGER NOT NULL REFERENCES data_set(id) ON DELETE CASCADE,
    feature_index      INTEGER NOT NULL,
    name               TEXT NOT NULL,
    gene_index         INTEGER REFERENCES gene(gene_index),
    origin_gene_index  INTEGER REFERENCES gene(gene_index),
    origin_taxon_id    INTEGER,
    description        TEXT,
    PRIMARY KEY (data_set_id, feature_index),
    UNIQUE (data_set_id, name)
);
CREATE INDEX IF NOT EXISTS feature_mapping_by_gene ON feature_mapping(gene_index);

CREATE TABLE IF NOT EXISTS design (
    id                   INTEGER PRIMARY KEY,
    data_set_id          INTEGER NOT NULL REFERENCES data_set(id) ON DELETE CASCADE,
    name                 TEXT NOT NULL,
    description          TEXT,
    variable_count       INTEGER NOT NULL,
    design_matrix        TEXT NOT NULL,
    sample_groups        TEXT NOT NULL,
    sample_group_levels  TEXT NOT NULL,
    created_by           TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    UNIQUE (data_set_id, name)
);

CREATE TABLE IF NOT EXISTS contrast (
    id           INTEGER PRIMARY KEY,
    design_id    INTEGER NOT NULL REFERENCES design(id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    description  TEXT,
    created_by   TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (design_id, name)
);

CREATE TABLE IF NOT EXISTS contrast_column (
    id           INTEGER PRIMARY KEY,
    contrast_id  INTEGER NOT NULL REFERENCES contrast(id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    column_data  TEXT NOT NULL,
    UNIQUE (contrast_id, name)
);

CREATE TABLE IF NOT EXISTS dge_method (
    id           INTEGER PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    description  TEXT,
    version      TEXT
);

CREATE TABLE IF NOT EXISTS dge_model (
    contrast_id         INTEGER NOT NULL REFERENCES contrast(id) ON DELETE CASCADE,
    dge_method_id       INTEGER NOT NULL REFERENCES dge_method(id),
    input_obj_file      TEXT NOT NULL,
    fit_obj_file        TEXT NOT NULL,
    method_description  TEXT NOT NULL,
    created_by          TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    PRIMARY KEY (contrast_id, dge_method_id)
);

CREATE TABLE IF NOT EXISTS feature_subset (
    contrast_id    INTEGER NOT NULL,
    dge_method_id  INTEGER NOT NULL,
    data_set_id    INTEGER NOT NULL,
    feature_index  INTEGER NOT NULL,
    is_used        INTEGER NOT NULL,
    PRIMARY KEY (contrast_id, dge_method_id, feature_index),
    FOREIGN KEY (contrast_id, dge_method_id)
        REFERENCES dge_model(contrast_id, dge_method_id) ON DELETE CASCADE,
    FOREIGN KEY (data_set_id, feature_index)
        REFERENCES feature_mapping(data_set_id, feature_index) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS dge_table (
    contrast_column_id  INTEGER NOT NULL REFERENCES contrast_column(id) ON DELETE CASCADE,
    dge_method_id       INTEGER NOT NULL,
    contrast_id         INTEGER NOT NULL,
    data_set_id         INTEGER NOT NULL,
    feature_index       INTEGER NOT NULL,
    ave_expr            REAL NOT NULL,
    statistic           REAL NOT NULL,
    log_fc              REAL NOT NULL,
    p_value             REAL NOT NULL,
    fdr                 REAL NOT NULL,
    PRIMARY KEY (contrast_column_id, dge_method_id, feature_index),
    FOREIGN KEY (contrast_id, dge_method_id)
        REFERENCES dge_model(contrast_id, dge_method_id) ON DELETE CASCADE,
    FOREIGN KEY (data_set_id, feature_index)
        REFERENCES feature_mapping(data_set_id, feature_index) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS gene_set_category (
    id           INTEGER PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    description  TEXT,
    taxon_id     INTEGER NOT NULL REFERENCES species(taxon_id),
    file_wc      TEXT NOT NULL,
    file_src     TEXT NOT NULL,
    created_by   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gene_set (
    id           INTEGER PRIMARY KEY,
    category_id  INTEGER NOT NULL REFERENCES gene_set_category(id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    taxon_id     INTEGER NOT NULL REFERENCES species(taxon_id),
    description  TEXT,
    gene_count   INTEGER NOT NULL,
    is_private   INTEGER NOT NULL DEFAULT 0,
    url          TEXT,
    UNIQUE (category_id, name)
);

CREATE TABLE IF NOT EXISTS gene_set_gene (
    gene_set_id  INTEGER NOT NULL REFERENCES gene_set(id) ON DELETE CASCADE,
    gene_index   INTEGER NOT NULL REFERENCES gene(gene_index),
    PRIMARY KEY (gene_set_id, gene_index)
);

CREATE TABLE IF NOT EXISTS gse_method (
    id             INTEGER PRIMARY KEY,
    dge_method_id  INTEGER NOT NULL REFERENCES dge_method(id) ON DELETE CASCADE,
    name           TEXT NOT NULL,
    description    TEXT,
    version        TEXT,
    UNIQUE (dge_method_id, name)
);

CREATE TABLE IF NOT EXISTS gse_result (
    contrast_id    INTEGER NOT NULL,
    dge_method_id  INTEGER NOT NULL,
    gse_method_id  INTEGER NOT NULL REFERENCES gse_method(id),
    output_file    TEXT NOT NULL,
    created_by     TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    PRIMARY KEY (contrast_id, gse_method_id),
    FOREIGN KEY (contrast_id, dge_method_id)
        REFERENCES dge_model(contrast_id, dge_method_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS gse_table (
    contrast_column_id  INTEGER NOT NULL REFERENCES contrast_column(id) ON DELETE CASCADE,
    gse_method_id       INTEGER NOT NULL,
    gene_set_id         INTEGER NOT NULL REFERENCES gene_set(id) ON DELETE CASCADE,
    contrast_id         INTEGER NOT NULL,
    correlation         REAL,
    direction           INTEGER NOT NULL,
    p_value             REAL NOT NULL,
    fdr                 REAL NOT NULL,
    enrichment_score    REAL NOT NULL,
    eff_gene_count      INTEGER NOT NULL,
    PRIMARY KEY (contrast_column_id, gse_method_id, gene_set_id),
    FOREIGN KEY (contrast_id, gse_method_id)
        REFERENCES gse_result(contrast_id, gse_method_id) ON DELETE CASCADE
);
"#;

/// Concurrent writers wait this long for the write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_database(path: &Utf8Path) -> Result<Connection, CatalogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        }
    }
    let conn = Connection::open(path.as_std_path())?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    initialize(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, CatalogError> {
    let conn = Connection::open_in_memory()?;
    initialize(&conn)?;
    Ok(conn)
}

fn initialize(conn: &Connection) -> Result<(), CatalogError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Inserts `rows` with multi-row `INSERT` statements of at most `chunk_size`
/// rows each. Visibility is governed by the caller's transaction.
pub fn insert_chunked<R, F>(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    rows: &[R],
    chunk_size: usize,
    mut bind: F,
) -> Result<usize, CatalogError>
where
    F: FnMut(&R) -> Vec<Value>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let per_row = columns.len().max(1);
    let chunk_size = chunk_size.clamp(1, (MAX_BOUND_PARAMETERS / per_row).max(1));
    let placeholder = format!("({})", vec!["?"; columns.len()].join(", "));
    let head = format!("INSERT INTO {table} ({}) VALUES ", columns.join(", "));

    let mut inserted = 0;
    for chunk in rows.chunks(chunk_size) {
        let sql = format!("{head}{}", vec![placeholder.as_str(); chunk.len()].join(", "));
        let mut values = Vec::with_capacity(chunk.len() * per_row);
        for row in chunk {
            let bound = bind(row);
            if bound.len() != columns.len() {
                return Err(CatalogError::Storage(format!(
                    "row for {table} binds {} values, expected {}",
                    bound.len(),
                    columns.len()
                )));
            }
            values.extend(bound);
        }
        let mut stmt = conn.prepare_cached(&sql)?;
        inserted += stmt.execute(params_from_iter(values))?;
    }
    Ok(inserted)
}

pub fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}

pub fn opt_int(value: Option<i64>) -> Value {
    match value {
        Some(number) => Value::Integer(number),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_insert_spans_several_statements() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO species (taxon_id, dataset_name, annotation_version, admitted_at)
             VALUES (9606, 'hsapiens_gene_ensembl', 'v1', 'now')",
            [],
        )
        .unwrap();
        let rows: Vec<i64> = (1..=7).collect();
        let inserted = insert_chunked(
            &conn,
            "gene",
            &["gene_index", "annotation_version", "taxon_id"],
            &rows,
            3,
            |index| {
                vec![
                    Value::Integer(*index),
                    Value::Text("v1".to_string()),
                    Value::Integer(9606),
                ]
            },
        )
        .unwrap();
        assert_eq!(inserted, 7);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM gene", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let conn = open_in_memory().unwrap();
        let result = conn.execute(
            "INSERT INTO gene (gene_index, annotation_version, taxon_id) VALUES (1, 'v', 10090)",
            [],
        );
        assert!(result.is_err());
    }
}
