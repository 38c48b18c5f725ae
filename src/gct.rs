//! Reader for GCT 1.2 / 1.3 expression matrices.
//!
//! Only the row and column identities are retained; the numeric payload is
//! checked for shape and left on disk for the statistical engine.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;

use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq)]
pub struct GctMatrix {
    pub version: GctVersion,
    pub features: Vec<String>,
    pub descriptions: Vec<Option<String>>,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GctVersion {
    V1_2,
    V1_3,
}

impl GctMatrix {
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

pub fn is_gzip(path: &Utf8Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

pub fn read_gct_path(path: &Utf8Path) -> Result<GctMatrix, CatalogError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("open {path}: {err}")))?;
    if is_gzip(path) {
        read_gct(MultiGzDecoder::new(file))
    } else {
        read_gct(file)
    }
}

pub fn read_gct<R: Read>(reader: R) -> Result<GctMatrix, CatalogError> {
    let mut lines = BufReader::new(reader).lines().enumerate();
    let mut next_line = |what: &str| -> Result<(usize, String), CatalogError> {
        match lines.next() {
            Some((number, Ok(line))) => Ok((number + 1, line.trim_end_matches('\r').to_string())),
            Some((_, Err(err))) => Err(CatalogError::Filesystem(err.to_string())),
            None => Err(CatalogError::Validation(format!("GCT file ends before {what}"))),
        }
    };

    let (_, magic) = next_line("version line")?;
    let version = match magic.trim() {
        "#1.2" => GctVersion::V1_2,
        "#1.3" => GctVersion::V1_3,
        other => {
            return Err(CatalogError::Validation(format!(
                "unsupported GCT version line: {other:?}"
            )));
        }
    };

    let (_, dims) = next_line("dimension line")?;
    let dims: Vec<usize> = dims
        .split('\t')
        .filter(|cell| !cell.trim().is_empty())
        .map(|cell| cell.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| CatalogError::Validation(format!("invalid GCT dimension line: {dims:?}")))?;
    let (rows, cols, row_meta, col_meta) = match (version, dims.as_slice()) {
        (GctVersion::V1_2, [rows, cols]) => (*rows, *cols, 1, 0),
        (GctVersion::V1_3, [rows, cols, row_meta, col_meta]) => (*rows, *cols, *row_meta, *col_meta),
        _ => {
            return Err(CatalogError::Validation(
                "GCT dimension line does not match its version".to_string(),
            ));
        }
    };

    let (_, header) = next_line("header line")?;
    let header: Vec<&str> = header.split('\t').collect();
    let leading = 1 + row_meta;
    if header.len() != leading + cols {
        return Err(CatalogError::Validation(format!(
            "GCT header has {} sample columns, expected {cols}",
            header.len().saturating_sub(leading)
        )));
    }
    let samples: Vec<String> = header[leading..].iter().map(|s| s.trim().to_string()).collect();
    check_unique(&samples, "sample")?;
    let description_column = match version {
        GctVersion::V1_2 => Some(1),
        GctVersion::V1_3 => header
            .iter()
            .position(|name| name.eq_ignore_ascii_case("description"))
            .filter(|&pos| pos > 0 && pos < leading),
    };

    for _ in 0..col_meta {
        next_line("column metadata")?;
    }

    let mut features = Vec::with_capacity(rows);
    let mut descriptions = Vec::with_capacity(rows);
    for _ in 0..rows {
        let (number, line) = next_line("all data rows are read")?;
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() != leading + cols {
            return Err(CatalogError::Validation(format!(
                "GCT line {number} has {} cells, expected {}",
                cells.len(),
                leading + cols
            )));
        }
        for cell in &cells[leading..] {
            if !is_numeric_cell(cell) {
                return Err(CatalogError::Validation(format!(
                    "GCT line {number} has a non-numeric value: {cell:?}"
                )));
            }
        }
        features.push(cells[0].trim().to_string());
        descriptions.push(
            description_column
                .map(|pos| cells[pos].trim())
                .filter(|text| !text.is_empty() && *text != "NA")
                .map(str::to_string),
        );
    }

    check_unique(&features, "feature")?;
    Ok(GctMatrix {
        version,
        features,
        descriptions,
        samples,
    })
}

fn is_numeric_cell(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty()
        || cell.eq_ignore_ascii_case("na")
        || cell.eq_ignore_ascii_case("nan")
        || cell.parse::<f64>().is_ok()
}

fn check_unique(names: &[String], what: &str) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(CatalogError::Validation(format!("empty {what} name in GCT file")));
        }
        if !seen.insert(name.as_str()) {
            return Err(CatalogError::Validation(format!(
                "duplicate {what} name in GCT file: {name}"
            )));
        }
    }
    Ok(())
}
