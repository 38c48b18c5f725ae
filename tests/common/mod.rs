#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

use expression_catalog::app::{
    App, AppOptions, ContrastPath, DataSetCreated, DataSetInput, DesignInput,
};
use expression_catalog::db;
use expression_catalog::design::SampleGroups;
use expression_catalog::domain::{DataSetKind, MicroArrayNormalization, TaxonId};
use expression_catalog::engine::{
    DgeOutput, DgeRequest, DgeRow, Direction, EnrichmentEngine, GseOutput, GseRequest, GseRow,
    StatisticalEngine,
};
use expression_catalog::error::CatalogError;
use expression_catalog::output::JsonOutput;
use expression_catalog::providers::{
    AnnotationProvider, AttributeTable, BulkQuery, LocalMart, ProviderDataset,
};
use expression_catalog::store::Store;
use expression_catalog::table::TextTable;

pub const HUMAN_DATASET: &str = "hsapiens_gene_ensembl";
pub const MOUSE_DATASET: &str = "mmusculus_gene_ensembl";
pub const MOUSE: TaxonId = TaxonId(10090);

pub const DS1_GCT: &str = "#1.2\n3\t3\nName\tDescription\ts1\ts2\ts3\n\
1427_at\tTrp53 probe\t1.0\t2.0\t3.0\n\
1430_at\tNA\t4.0\t5.0\t6.0\n\
1429_at\tOlfr1 probe\t7.0\t8.0\t9.0\n";

pub const DESIGN_TSV: &str = "Sample\tIntercept\tTreated\ns1\t1\t0\ns2\t1\t1\ns3\t1\t1\n";
pub const CONTRAST_TSV: &str = "Coefficient\tTreatedVsCtrl\nIntercept\t0\nTreated\t1\n";

pub const ANALYSIS: ContrastPath<'static> = ContrastPath {
    data_set: "ds1",
    design: "d1",
    contrast: "c1",
};

/// Human hub plus mouse, with one mouse gene homologous to two human genes
/// and one mouse gene without any human homolog.
pub fn mart() -> LocalMart {
    LocalMart::new()
        .with_dataset(
            HUMAN_DATASET,
            "Human genes (GRCh38.p14)",
            &[
                "ensembl_gene_id",
                "entrezgene_id",
                "gene_biotype",
                "external_gene_name",
                "mmusculus_homolog_ensembl_gene",
            ],
            vec![
                vec!["ENSG1", "7157", "protein_coding", "TP53", "ENSMUSG1"],
                vec!["ENSG2", "672", "protein_coding", "BRCA1", "ENSMUSG2"],
                vec!["ENSG3", "3001", "lncRNA", "MALAT1", "ENSMUSG1"],
                vec!["ENSG4", "1956", "protein_coding", "EGFR", ""],
            ],
        )
        .with_dataset(
            MOUSE_DATASET,
            "Mouse genes (GRCm39)",
            &[
                "ensembl_gene_id",
                "entrezgene_id",
                "gene_biotype",
                "external_gene_name",
                "affy_probe",
            ],
            vec![
                vec!["ENSMUSG1", "22059", "protein_coding", "Trp53", "1427_at"],
                vec!["ENSMUSG2", "12189", "protein_coding", "Brca1", "1428_at"],
                vec!["ENSMUSG3", "18300", "protein_coding", "Olfr1", "1429_at"],
                vec!["ENSMUSG2", "12189", "protein_coding", "Brca1", "1430_at"],
                vec!["ENSMUSG1", "22059", "protein_coding", "Trp53", "1431_at"],
                vec!["ENSMUSG3", "18300", "protein_coding", "Olfr1", "1431_at"],
                vec!["ENSMUSG4", "", "protein_coding", "Gm1", ""],
            ],
        )
}

/// One-shot callback, used to run a second writer in the middle of an
/// operation.
pub type Hook = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

fn fire(hook: &Hook) {
    let callback = hook.lock().unwrap().take();
    if let Some(callback) = callback {
        callback();
    }
}

/// Local mart that fires its hook on the next bulk query.
pub struct HookedMart {
    pub inner: LocalMart,
    pub hook: Hook,
}

impl AnnotationProvider for HookedMart {
    fn dataset(&self, name: &str) -> Result<ProviderDataset, CatalogError> {
        self.inner.dataset(name)
    }

    fn bulk_query(&self, dataset: &str, query: &BulkQuery) -> Result<AttributeTable, CatalogError> {
        fire(&self.hook);
        self.inner.bulk_query(dataset, query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DgeMode {
    #[default]
    Fit,
    Fail,
    ShortMask,
}

/// Fits nothing; writes placeholder model objects and one row per feature
/// and contrast column. The last feature is reported as filtered out.
#[derive(Default)]
pub struct MockDge {
    pub mode: DgeMode,
    pub calls: Mutex<usize>,
    pub before_fit: Hook,
}

impl StatisticalEngine for MockDge {
    fn execute(&self, request: &DgeRequest<'_>) -> Result<DgeOutput, CatalogError> {
        *self.calls.lock().unwrap() += 1;
        fire(&self.before_fit);
        if self.mode == DgeMode::Fail {
            return Err(CatalogError::Engine("model did not converge".to_string()));
        }
        let input_object = request.scratch_dir.join("input.rds");
        let fitted_object = request.scratch_dir.join("fit.rds");
        std::fs::write(&input_object, b"input").unwrap();
        std::fs::write(&fitted_object, b"fit").unwrap();

        let mut rows = Vec::new();
        for (position, feature) in request.features.iter().enumerate() {
            for column in request.contrast.column_names() {
                rows.push(DgeRow {
                    feature: feature.name.clone(),
                    contrast_column: column.to_string(),
                    ave_expr: position as f64,
                    statistic: 1.5,
                    log_fc: 0.5 * position as f64,
                    p_value: 0.01,
                    fdr: 0.05,
                });
            }
        }
        let mut used_features = vec![true; request.features.len()];
        if let Some(last) = used_features.last_mut() {
            *last = false;
        }
        if self.mode == DgeMode::ShortMask {
            used_features.pop();
        }
        Ok(DgeOutput {
            input_object,
            fitted_object,
            rows,
            used_features,
            method_description: format!("mock {} fit", request.method),
        })
    }
}

/// Reports one enriched set per selected category, plus one row naming a set
/// the catalog does not know.
#[derive(Default)]
pub struct MockGse;

impl EnrichmentEngine for MockGse {
    fn execute(&self, request: &GseRequest<'_>) -> Result<GseOutput, CatalogError> {
        let table_path = request.scratch_dir.join("gse_table.tsv");
        std::fs::write(&table_path, b"Category\tGeneSet\n").unwrap();
        let column = request.contrast.column_names()[0].to_string();
        let mut rows: Vec<GseRow> = request
            .collections
            .iter()
            .map(|collection| GseRow {
                category: collection.category.to_uppercase(),
                gene_set: "P53_PATHWAY".to_string(),
                contrast_column: column.clone(),
                correlation: Some(0.1),
                direction: Direction::Up,
                p_value: 0.001,
                fdr: 0.01,
                effective_gene_count: 2,
            })
            .collect();
        rows.push(GseRow {
            category: "hallmark".to_string(),
            gene_set: "RETIRED_SET".to_string(),
            contrast_column: column,
            correlation: None,
            direction: Direction::Down,
            p_value: 0.5,
            fdr: 0.9,
            effective_gene_count: 1,
        });
        Ok(GseOutput { table_path, rows })
    }
}

pub type TestApp = App<LocalMart, MockDge, MockGse>;
pub type MockApp<P> = App<P, MockDge, MockGse>;

fn options() -> AppOptions {
    AppOptions {
        user: "tester".to_string(),
        insert_chunk_size: 2,
        ..AppOptions::default()
    }
}

/// App on the on-disk catalog below `root`; every call opens its own
/// connection, as separate processes would.
pub fn shared_app_at<P: AnnotationProvider>(root: &Utf8Path, provider: P, engine: MockDge) -> MockApp<P> {
    let store = Store::new(root.join("catalog"));
    store.ensure_root().unwrap();
    let conn = db::open_database(&root.join("catalog.sqlite")).unwrap();
    App::new(conn, store, provider, engine, MockGse, options())
}

pub struct Workspace {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn write(&self, name: &str, content: &str) -> Utf8PathBuf {
        let path = self.root.join("inputs").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn catalog_root(&self) -> Utf8PathBuf {
        self.root.join("catalog")
    }

    pub fn app(&self) -> TestApp {
        self.app_with(MockDge::default())
    }

    pub fn app_with(&self, engine: MockDge) -> TestApp {
        let store = Store::new(self.catalog_root());
        store.ensure_root().unwrap();
        let conn = db::open_in_memory().unwrap();
        App::new(conn, store, mart(), engine, MockGse, options())
    }

    pub fn shared_app<P: AnnotationProvider>(&self, provider: P, engine: MockDge) -> MockApp<P> {
        shared_app_at(&self.root, provider, engine)
    }
}

pub fn admit_human_and_mouse<P: AnnotationProvider>(app: &MockApp<P>) {
    app.admit_species(None, TaxonId(9606), &JsonOutput).unwrap();
    app.admit_species(Some(MOUSE_DATASET), MOUSE, &JsonOutput).unwrap();
}

pub fn ds1_input(exprs: &Utf8Path) -> DataSetInput {
    DataSetInput {
        exprs: exprs.to_path_buf(),
        pheno: None,
        name: Some("ds1".parse().unwrap()),
        taxon_id: MOUSE,
        symbol_type: "affy_probe".to_string(),
        kind: DataSetKind::MicroArray(MicroArrayNormalization::Rma),
        description: Some("mouse array".to_string()),
        xref: None,
    }
}

pub fn create_ds1<P: AnnotationProvider>(app: &MockApp<P>, workspace: &Workspace) -> DataSetCreated {
    let exprs = workspace.write("ds1.gct", DS1_GCT);
    app.create_dataset(ds1_input(&exprs), &JsonOutput).unwrap()
}

pub fn table(content: &str) -> TextTable {
    TextTable::from_tsv(content.as_bytes(), true).unwrap()
}

/// ds1 with design d1, contrast c1 and DGE method `limma`.
pub fn analysis_ready<P: AnnotationProvider>(app: &MockApp<P>, workspace: &Workspace) {
    admit_human_and_mouse(app);
    create_ds1(app, workspace);
    app.create_design(
        "ds1",
        &"d1".parse().unwrap(),
        DesignInput {
            table: table(DESIGN_TSV),
            sample_groups: SampleGroups::FromDesign,
            levels: None,
            description: None,
        },
    )
    .unwrap();
    app.create_contrast("ds1", "d1", &"c1".parse().unwrap(), &table(CONTRAST_TSV), None)
        .unwrap();
    app.add_method(&"limma".parse().unwrap(), Some("linear models"), Some("3.58"))
        .unwrap();
}

pub fn count<P: AnnotationProvider>(app: &MockApp<P>, table: &str) -> i64 {
    app.connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
