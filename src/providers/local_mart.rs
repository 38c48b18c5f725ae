use std::collections::BTreeMap;
use std::fs::File;

use camino::Utf8Path;

use crate::error::CatalogError;
use crate::providers::{
    AnnotationProvider, AttributeInfo, AttributeTable, BulkQuery, Filter, ProviderDataset,
    empty_to_none,
};

const REGISTRY_FILE: &str = "datasets.tsv";

#[derive(Debug, Clone)]
struct LocalDataset {
    display_name: String,
    table: AttributeTable,
}

/// Annotation provider backed by tab-separated mart dumps.
///
/// On disk the layout is a directory with `datasets.tsv` (`name`,
/// `display_name`) and one `<name>.tsv` per data set whose header row names
/// the attributes.
#[derive(Debug, Clone, Default)]
pub struct LocalMart {
    datasets: BTreeMap<String, LocalDataset>,
}

impl LocalMart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset<I, R>(mut self, name: &str, display_name: &str, columns: &[&str], rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut table = AttributeTable::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            let mut cells: Vec<Option<String>> =
                row.into_iter().map(|cell| empty_to_none(cell.as_ref())).collect();
            cells.resize(columns.len(), None);
            table.rows.push(cells);
        }
        self.datasets.insert(
            name.to_string(),
            LocalDataset {
                display_name: display_name.to_string(),
                table,
            },
        );
        self
    }

    pub fn from_dir(dir: &Utf8Path) -> Result<Self, CatalogError> {
        let registry = dir.join(REGISTRY_FILE);
        let mut reader = tsv_reader(&registry)?;
        let mut mart = Self::new();
        for record in reader.records() {
            let record = record?;
            let name = record.get(0).unwrap_or_default().trim();
            if name.is_empty() {
                continue;
            }
            let display_name = record.get(1).unwrap_or(name).trim();
            let table = read_dump(&dir.join(format!("{name}.tsv")))?;
            mart.datasets.insert(
                name.to_string(),
                LocalDataset {
                    display_name: display_name.to_string(),
                    table,
                },
            );
        }
        Ok(mart)
    }

    fn get(&self, name: &str) -> Result<&LocalDataset, CatalogError> {
        self.datasets
            .get(name)
            .ok_or_else(|| CatalogError::not_found("annotation data set", name))
    }
}

impl AnnotationProvider for LocalMart {
    fn dataset(&self, name: &str) -> Result<ProviderDataset, CatalogError> {
        let dataset = self.get(name)?;
        let attributes = dataset
            .table
            .columns
            .iter()
            .map(|column| AttributeInfo {
                name: column.clone(),
                display_name: column.clone(),
            })
            .collect();
        let mut filters: Vec<String> = Vec::new();
        for column in &dataset.table.columns {
            filters.push(column.clone());
            filters.push(format!("with_{column}"));
            if let Some(prefix) = column.strip_suffix("_ensembl_gene") {
                filters.push(format!("with_{prefix}"));
            }
        }
        Ok(ProviderDataset {
            name: name.to_string(),
            display_name: dataset.display_name.clone(),
            attributes,
            filters,
        })
    }

    fn bulk_query(&self, dataset: &str, query: &BulkQuery) -> Result<AttributeTable, CatalogError> {
        let source = &self.get(dataset)?.table;
        let projection = query
            .attributes
            .iter()
            .map(|name| source.column_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        let predicates = query
            .filters
            .iter()
            .map(|filter| compile_filter(source, filter))
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = AttributeTable::new(query.attributes.clone());
        for row in &source.rows {
            if predicates.iter().all(|predicate| predicate.matches(row)) {
                result
                    .rows
                    .push(projection.iter().map(|&index| row[index].clone()).collect());
            }
        }
        Ok(result)
    }
}

enum Predicate<'a> {
    Present(usize),
    Equals(usize, &'a [String]),
}

impl Predicate<'_> {
    fn matches(&self, row: &[Option<String>]) -> bool {
        match self {
            Predicate::Present(index) => row[*index].is_some(),
            Predicate::Equals(index, values) => row[*index]
                .as_deref()
                .is_some_and(|cell| values.iter().any(|value| value == cell)),
        }
    }
}

fn compile_filter<'a>(source: &AttributeTable, filter: &'a Filter) -> Result<Predicate<'a>, CatalogError> {
    match filter {
        Filter::Equals { name, values } => Ok(Predicate::Equals(source.column_index(name)?, values)),
        Filter::Present { name } => {
            let column = name.strip_prefix("with_").unwrap_or(name.as_str());
            source
                .column_index(column)
                .or_else(|_| source.column_index(&format!("{column}_ensembl_gene")))
                .map(Predicate::Present)
                .map_err(|_| CatalogError::ProviderResponse(format!("unknown filter {name}")))
        }
    }
}

fn tsv_reader(path: &Utf8Path) -> Result<csv::Reader<File>, CatalogError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("open {path}: {err}")))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .quoting(false)
        .flexible(true)
        .from_reader(file))
}

fn read_dump(path: &Utf8Path) -> Result<AttributeTable, CatalogError> {
    let mut reader = tsv_reader(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut table = AttributeTable::new(columns);
    let width = table.columns.len();
    for record in reader.records() {
        let record = record?;
        let mut cells: Vec<Option<String>> = record.iter().map(empty_to_none).collect();
        cells.resize(width, None);
        table
            .push_row(cells)
            .map_err(|err| CatalogError::Validation(format!("{path}: {err}")))?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn mart() -> LocalMart {
        LocalMart::new().with_dataset(
            "hsapiens_gene_ensembl",
            "Human genes (GRCh38.p14)",
            &["ensembl_gene_id", "external_gene_name", "mmusculus_homolog_ensembl_gene"],
            vec![
                vec!["ENSG1", "TP53", "ENSMUSG1"],
                vec!["ENSG2", "EGFR", ""],
                vec!["ENSG3", "", "ENSMUSG3"],
            ],
        )
    }

    #[test]
    fn homolog_presence_filter_selects_linked_rows() {
        let table = mart()
            .bulk_query(
                "hsapiens_gene_ensembl",
                &BulkQuery::attributes(["ensembl_gene_id", "mmusculus_homolog_ensembl_gene"])
                    .present("with_mmusculus_homolog"),
            )
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1][0].as_deref(), Some("ENSG3"));
    }

    #[test]
    fn dataset_advertises_flag_filters() {
        let dataset = mart().dataset("hsapiens_gene_ensembl").unwrap();
        assert!(dataset.has_filter("with_external_gene_name"));
        assert!(dataset.has_filter("with_mmusculus_homolog"));
        assert!(dataset.has_attribute("ensembl_gene_id"));
    }

    #[test]
    fn unknown_dataset_is_not_found() {
        let err = mart().dataset("drerio_gene_ensembl").unwrap_err();
        assert_matches!(err, CatalogError::NotFound { .. });
    }

    #[test]
    fn loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            root.join("datasets.tsv"),
            "name\tdisplay_name\nmmusculus_gene_ensembl\tMouse genes (GRCm39)\n",
        )
        .unwrap();
        std::fs::write(
            root.join("mmusculus_gene_ensembl.tsv"),
            "ensembl_gene_id\texternal_gene_name\nENSMUSG1\tTrp53\nENSMUSG2\t\n",
        )
        .unwrap();
        let mart = LocalMart::from_dir(&root).unwrap();
        let dataset = mart.dataset("mmusculus_gene_ensembl").unwrap();
        assert_eq!(dataset.display_name, "Mouse genes (GRCm39)");
        let table = mart
            .bulk_query(
                "mmusculus_gene_ensembl",
                &BulkQuery::attributes(["external_gene_name", "ensembl_gene_id"])
                    .present("with_external_gene_name"),
            )
            .unwrap();
        assert_eq!(table.len(), 1);
    }
}
