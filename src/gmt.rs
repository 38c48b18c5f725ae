use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;

use crate::error::CatalogError;

/// One line of a GMT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmtEntry {
    pub name: String,
    pub description: Option<String>,
    pub genes: Vec<String>,
}

pub fn read_gmt_path(path: &Utf8Path) -> Result<Vec<GmtEntry>, CatalogError> {
    let file = std::fs::File::open(path.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("open {path}: {err}")))?;
    read_gmt(file)
}

pub fn read_gmt<R: Read>(reader: R) -> Result<Vec<GmtEntry>, CatalogError> {
    let mut entries: Vec<GmtEntry> = Vec::new();
    let mut seen = HashSet::new();
    for (number, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cells = line.split('\t');
        let name = cells.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(CatalogError::Validation(format!(
                "GMT line {} has no gene-set name",
                number + 1
            )));
        }
        let description = cells
            .next()
            .map(str::trim)
            .filter(|text| !text.is_empty() && *text != "NA")
            .map(str::to_string);
        let genes = cells
            .map(str::trim)
            .filter(|gene| !gene.is_empty())
            .map(str::to_string)
            .collect();
        if !seen.insert(name.to_string()) {
            return Err(CatalogError::Validation(format!("duplicate gene set in GMT file: {name}")));
        }
        entries.push(GmtEntry {
            name: name.to_string(),
            description,
            genes,
        });
    }
    Ok(entries)
}
