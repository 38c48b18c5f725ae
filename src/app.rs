use std::collections::HashMap;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::annotator::FeatureAnnotator;
use crate::config::{DEFAULT_INSERT_CHUNK_SIZE, ResolvedConfig};
use crate::design::{self, SampleGroups};
use crate::domain::{
    DEFAULT_HUMAN_DATASET, DataSetKind, EntityName, GeneIndex, TaxonId, current_user_name,
    iso_timestamp,
};
use crate::engine::{
    DgeRequest, EnrichmentEngine, FeatureInput, GeneSetCollection, GseRequest, StatisticalEngine,
};
use crate::error::CatalogError;
use crate::geneset::{self, GeneSetCategory, GmtImport, GseResult, GseResultRow, NewCategory, NewGseRow};
use crate::gct;
use crate::gmt;
use crate::provenance::{
    self, Contrast, DataSet, Design, DgeModel, DgeResultRow, FeatureMapping, GseMethod, Method,
    ModelSummary, NewDataSet, NewDesign, NewDgeRow,
};
use crate::providers::AnnotationProvider;
use crate::registry::{self, CanonicalGeneRegistry, Species, SpeciesAdmission, SpeciesSummary};
use crate::store::{Store, utf8_path};
use crate::table::{Column, Table, TextTable, write_tsv};

const SAMPLE_COLUMN: &str = "Sample";
const SAMPLE_INDEX_COLUMN: &str = "_DatasetSampleIndex";
const PHENO_FILE: &str = "pheno.tsv";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn report(sink: &dyn ProgressSink, message: String, started: Option<Instant>) {
    sink.event(ProgressEvent {
        message,
        elapsed: started.map(|at| at.elapsed()),
    });
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub human_dataset: String,
    pub insert_chunk_size: usize,
    pub user: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            human_dataset: DEFAULT_HUMAN_DATASET.to_string(),
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            user: current_user_name(),
        }
    }
}

impl AppOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            human_dataset: config.human_dataset.clone(),
            insert_chunk_size: config.insert_chunk_size,
            user: current_user_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSetInput {
    pub exprs: Utf8PathBuf,
    pub pheno: Option<Utf8PathBuf>,
    /// Defaults to the expression file name without its extensions.
    pub name: Option<EntityName>,
    pub taxon_id: TaxonId,
    pub symbol_type: String,
    pub kind: DataSetKind,
    pub description: Option<String>,
    pub xref: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DesignInput {
    pub table: TextTable,
    pub sample_groups: SampleGroups,
    pub levels: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Path to one contrast in the provenance graph.
#[derive(Debug, Clone, Copy)]
pub struct ContrastPath<'a> {
    pub data_set: &'a str,
    pub design: &'a str,
    pub contrast: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSetCreated {
    pub data_set: DataSet,
    pub matched_features: usize,
    pub canonical_features: usize,
    pub match_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Removed {
    pub entity: &'static str,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub model: DgeModel,
    pub result_rows: usize,
    pub used_features: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultTable {
    pub model: DgeModel,
    /// Per-feature flag in feature order: whether the engine used it.
    pub used_features: Vec<bool>,
    pub rows: Vec<DgeResultRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRun {
    pub result: GseResult,
    pub rows: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentTable {
    pub result: GseResult,
    pub rows: Vec<GseResultRow>,
}

/// Orchestrates every catalog operation. Each mutating call validates first,
/// then writes inside a single transaction.
pub struct App<P: AnnotationProvider, E: StatisticalEngine, G: EnrichmentEngine> {
    conn: Connection,
    store: Store,
    provider: P,
    engine: E,
    gse_engine: G,
    options: AppOptions,
}

impl<P: AnnotationProvider, E: StatisticalEngine, G: EnrichmentEngine> App<P, E, G> {
    pub fn new(
        conn: Connection,
        store: Store,
        provider: P,
        engine: E,
        gse_engine: G,
        options: AppOptions,
    ) -> Self {
        Self {
            conn,
            store,
            provider,
            engine,
            gse_engine,
            options,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- species ----

    pub fn admit_species(
        &self,
        dataset_name: Option<&str>,
        taxon_id: TaxonId,
        sink: &dyn ProgressSink,
    ) -> Result<SpeciesAdmission, CatalogError> {
        let dataset_name = match dataset_name {
            Some(name) => name,
            None if taxon_id.is_human() => self.options.human_dataset.as_str(),
            None => {
                return Err(CatalogError::Validation(format!(
                    "an annotation data set name is required for taxon {taxon_id}"
                )));
            }
        };
        let started = Instant::now();
        report(sink, format!("phase=Resolve; admitting taxon {taxon_id} from {dataset_name}"), None);

        let tx = self.conn.unchecked_transaction()?;
        let admission = CanonicalGeneRegistry::new(&self.provider, self.options.insert_chunk_size)
            .admit_species(&tx, dataset_name, taxon_id)?;
        tx.commit()?;

        report(
            sink,
            format!(
                "phase=Done; {} genes, {} ortholog links",
                admission.gene_count, admission.ortholog_count
            ),
            Some(started),
        );
        Ok(admission)
    }

    pub fn remove_species(&self, taxon_id: TaxonId) -> Result<Species, CatalogError> {
        let tx = self.conn.unchecked_transaction()?;
        let species = registry::remove_species(&tx, taxon_id)?;
        tx.commit()?;
        Ok(species)
    }

    pub fn list_species(&self) -> Result<Vec<SpeciesSummary>, CatalogError> {
        registry::list_species(&self.conn)
    }

    // ---- data sets ----

    pub fn create_dataset(
        &self,
        input: DataSetInput,
        sink: &dyn ProgressSink,
    ) -> Result<DataSetCreated, CatalogError> {
        let started = Instant::now();
        let name = match input.name.clone() {
            Some(name) => name,
            None => default_data_set_name(&input.exprs)?,
        };
        registry::species(&self.conn, input.taxon_id)?;
        if provenance::find_data_set(&self.conn, name.as_str())?.is_some() {
            return Err(CatalogError::already_exists("data set", name.as_str()));
        }

        report(sink, format!("phase=Read; {}", input.exprs), None);
        let matrix = gct::read_gct_path(&input.exprs)?;
        let pheno = match &input.pheno {
            Some(path) => Some(
                TextTable::from_tsv_path(path, true)?.align_rows(&matrix.samples, "phenotype table")?,
            ),
            None => None,
        };

        report(
            sink,
            format!("phase=Annotate; {} features as {}", matrix.feature_count(), input.symbol_type),
            Some(started),
        );
        let mut annotation = FeatureAnnotator::new(&self.provider).annotate(
            &self.conn,
            &matrix.features,
            input.taxon_id,
            &input.symbol_type,
        )?;
        for (feature, description) in annotation.features.iter_mut().zip(&matrix.descriptions) {
            feature.description = description.clone();
        }

        let dir = self.store.dataset_dir(&name);
        let exprs_wc = dir.join(if gct::is_gzip(&input.exprs) {
            "exprs.gct.gz"
        } else {
            "exprs.gct"
        });
        let pheno_wc = dir.join(PHENO_FILE);

        let pheno_bytes = phenotype_table(&matrix.samples, pheno.as_ref())?;

        // Reserve the name before touching the working directory.
        let created_at = iso_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        let id = provenance::insert_data_set(
            &tx,
            &NewDataSet {
                name: name.as_str(),
                kind: input.kind,
                gene_annotation_version: &annotation.annotation_version,
                description: input.description.as_deref(),
                feature_count: matrix.feature_count(),
                sample_count: matrix.sample_count(),
                taxon_id: input.taxon_id,
                exprs_wc: exprs_wc.as_str(),
                exprs_src: input.exprs.as_str(),
                pheno_wc: pheno_wc.as_str(),
                pheno_src: input.pheno.as_ref().map(|path| path.as_str()),
                xref: input.xref.as_deref(),
                created_by: &self.options.user,
                created_at: &created_at,
            },
        )?;
        let chunk = self.options.insert_chunk_size;
        provenance::insert_samples(&tx, id, &matrix.samples, chunk)?;
        provenance::insert_feature_mappings(&tx, id, &annotation.features, chunk)?;
        let data_set = provenance::data_set(&tx, name.as_str())?;

        let written = (|| -> Result<(), CatalogError> {
            Store::remove_dir_if_exists(&dir)?;
            Store::copy_file_atomic(&input.exprs, &exprs_wc)?;
            Store::write_bytes_atomic(&pheno_wc, &pheno_bytes)?;
            tx.commit()?;
            Ok(())
        })();
        discard_on_error(&dir, written)?;

        info!(
            data_set = %name,
            features = data_set.feature_count,
            samples = data_set.sample_count,
            match_rate = annotation.match_rate(),
            "data set created"
        );
        report(sink, format!("phase=Done; data set {name}"), Some(started));
        Ok(DataSetCreated {
            match_rate: annotation.match_rate(),
            matched_features: annotation.matched,
            canonical_features: annotation.canonical,
            data_set,
        })
    }

    pub fn list_datasets(&self) -> Result<Vec<DataSet>, CatalogError> {
        provenance::list_data_sets(&self.conn)
    }

    pub fn get_features(&self, data_set: &str) -> Result<Vec<FeatureMapping>, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        provenance::features_of(&self.conn, data_set.id)
    }

    pub fn remove_dataset(&self, name: &str) -> Result<Removed, CatalogError> {
        let data_set = provenance::data_set(&self.conn, name)?;
        let mut artifacts = vec![self.store.dataset_dir(&data_set.name.parse()?)];
        artifacts.extend(self.artifacts_under("d.data_set_id", data_set.id)?);

        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_data_set(&tx, data_set.id)?;
        tx.commit()?;
        remove_artifacts(&artifacts)?;
        info!(data_set = name, "data set removed");
        Ok(Removed {
            entity: "data set",
            name: data_set.name,
        })
    }

    // ---- designs ----

    pub fn create_design(
        &self,
        data_set: &str,
        name: &EntityName,
        input: DesignInput,
    ) -> Result<Design, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        if provenance::find_design(&self.conn, data_set.id, name.as_str())?.is_some() {
            return Err(CatalogError::already_exists(
                "design",
                format!("{}/{name}", data_set.name),
            ));
        }
        let samples = provenance::samples_of(&self.conn, data_set.id)?;
        let pheno = match &input.sample_groups {
            SampleGroups::PhenoColumn(_) => Some(TextTable::from_tsv_path(&data_set.pheno_wc, true)?),
            _ => None,
        };
        let validated = design::validate_design(
            &input.table,
            &samples,
            &input.sample_groups,
            pheno.as_ref(),
            input.levels.as_deref(),
        )?;

        let created_at = iso_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        provenance::insert_design(
            &tx,
            &NewDesign {
                data_set_id: data_set.id,
                name: name.as_str(),
                description: input.description.as_deref(),
                design_matrix: &validated.matrix,
                sample_groups: &validated.sample_groups,
                sample_group_levels: &validated.sample_group_levels,
                created_by: &self.options.user,
                created_at: &created_at,
            },
        )?;
        let design = provenance::design(&tx, &data_set, name.as_str())?;
        tx.commit()?;
        info!(data_set = %data_set.name, design = %name, "design created");
        Ok(design)
    }

    pub fn list_designs(&self, data_set: &str) -> Result<Vec<Design>, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        provenance::list_designs(&self.conn, data_set.id)
    }

    pub fn remove_design(&self, data_set: &str, name: &str) -> Result<Removed, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        let design = provenance::design(&self.conn, &data_set, name)?;
        let artifacts = self.artifacts_under("c.design_id", design.id)?;

        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_design(&tx, design.id)?;
        tx.commit()?;
        remove_artifacts(&artifacts)?;
        Ok(Removed {
            entity: "design",
            name: format!("{}/{}", data_set.name, design.name),
        })
    }

    // ---- contrasts ----

    pub fn create_contrast(
        &self,
        data_set: &str,
        design: &str,
        name: &EntityName,
        table: &TextTable,
        description: Option<&str>,
    ) -> Result<Contrast, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        let design = provenance::design(&self.conn, &data_set, design)?;
        if provenance::find_contrast(&self.conn, design.id, name.as_str())?.is_some() {
            return Err(CatalogError::already_exists(
                "contrast",
                format!("{}/{}/{name}", data_set.name, design.name),
            ));
        }
        let matrix = design::validate_contrast(table, &design.design_matrix)?;

        let tx = self.conn.unchecked_transaction()?;
        let id = provenance::insert_contrast(
            &tx,
            design.id,
            name.as_str(),
            description,
            &matrix,
            &self.options.user,
            &iso_timestamp(),
        )?;
        let contrast = provenance::contrast_by_id(&tx, id)?;
        tx.commit()?;
        info!(design = %design.name, contrast = %name, columns = matrix.column_count(), "contrast created");
        Ok(contrast)
    }

    pub fn list_contrasts(&self, data_set: &str, design: &str) -> Result<Vec<Contrast>, CatalogError> {
        let data_set = provenance::data_set(&self.conn, data_set)?;
        let design = provenance::design(&self.conn, &data_set, design)?;
        provenance::list_contrasts(&self.conn, design.id)
    }

    pub fn remove_contrast(&self, path: ContrastPath<'_>) -> Result<Removed, CatalogError> {
        let (_, _, contrast) = self.resolve_contrast(path)?;
        let artifacts = self.artifacts_under("r.contrast_id", contrast.id)?;

        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_contrast(&tx, contrast.id)?;
        tx.commit()?;
        remove_artifacts(&artifacts)?;
        Ok(Removed {
            entity: "contrast",
            name: format!("{}/{}/{}", path.data_set, path.design, contrast.name),
        })
    }

    // ---- methods ----

    pub fn add_method(
        &self,
        name: &EntityName,
        description: Option<&str>,
        version: Option<&str>,
    ) -> Result<Method, CatalogError> {
        if provenance::find_dge_method(&self.conn, name.as_str())?.is_some() {
            return Err(CatalogError::already_exists("DGE method", name.as_str()));
        }
        let tx = self.conn.unchecked_transaction()?;
        provenance::insert_dge_method(&tx, name.as_str(), description, version)?;
        let method = provenance::dge_method(&tx, name.as_str())?;
        tx.commit()?;
        Ok(method)
    }

    pub fn list_methods(&self) -> Result<Vec<Method>, CatalogError> {
        provenance::list_dge_methods(&self.conn)
    }

    pub fn remove_method(&self, name: &str) -> Result<Removed, CatalogError> {
        let method = provenance::dge_method(&self.conn, name)?;
        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_dge_method(&tx, &method)?;
        tx.commit()?;
        Ok(Removed {
            entity: "DGE method",
            name: method.name,
        })
    }

    pub fn add_gse_method(
        &self,
        dge_method: &str,
        name: &EntityName,
        description: Option<&str>,
        version: Option<&str>,
    ) -> Result<GseMethod, CatalogError> {
        let dge_method = provenance::dge_method(&self.conn, dge_method)?;
        if provenance::find_gse_method(&self.conn, &dge_method, name.as_str())?.is_some() {
            return Err(CatalogError::already_exists(
                "GSE method",
                format!("{}/{name}", dge_method.name),
            ));
        }
        let tx = self.conn.unchecked_transaction()?;
        provenance::insert_gse_method(&tx, &dge_method, name.as_str(), description, version)?;
        let method = provenance::gse_method(&tx, &dge_method, name.as_str())?;
        tx.commit()?;
        Ok(method)
    }

    pub fn list_gse_methods(&self) -> Result<Vec<GseMethod>, CatalogError> {
        provenance::list_gse_methods(&self.conn)
    }

    pub fn remove_gse_method(&self, dge_method: &str, name: &str) -> Result<Removed, CatalogError> {
        let dge_method = provenance::dge_method(&self.conn, dge_method)?;
        let method = provenance::gse_method(&self.conn, &dge_method, name)?;
        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_gse_method(&tx, &method)?;
        tx.commit()?;
        Ok(Removed {
            entity: "GSE method",
            name: format!("{}/{}", dge_method.name, method.name),
        })
    }

    // ---- models ----

    /// Fits one contrast with one method. A model is never overwritten;
    /// remove it first to rerun.
    pub fn run_analysis(
        &self,
        path: ContrastPath<'_>,
        method: &str,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisResult, CatalogError> {
        let started = Instant::now();
        let (data_set, design, contrast) = self.resolve_contrast(path)?;
        let method = provenance::dge_method(&self.conn, method)?;
        if provenance::find_model(&self.conn, contrast.id, method.id)?.is_some() {
            return Err(CatalogError::already_exists(
                "model",
                format!("{}/{}/{} with {}", data_set.name, design.name, contrast.name, method.name),
            ));
        }

        let features: Vec<FeatureInput> = provenance::features_of(&self.conn, data_set.id)?
            .into_iter()
            .map(|feature| FeatureInput {
                feature_index: feature.feature_index,
                name: feature.name,
                gene_index: feature.gene_index,
                gene_symbol: feature.gene_symbol,
            })
            .collect();
        let samples = provenance::samples_of(&self.conn, data_set.id)?;
        let contrast_matrix = contrast.matrix(&design)?;
        let scratch = self.store.scratch_dir("dge-")?;
        let scratch_dir = utf8_path(scratch.path())?;
        let request = DgeRequest {
            method: &method.name,
            exprs_path: &data_set.exprs_wc,
            kind: data_set.kind,
            features: &features,
            samples: &samples,
            sample_groups: &design.sample_groups,
            design: &design.design_matrix,
            contrast: &contrast_matrix,
            scratch_dir: &scratch_dir,
        };

        report(
            sink,
            format!("phase=Analyze; {} features with {}", features.len(), method.name),
            Some(started),
        );
        let output = self.engine.execute(&request)?;
        output.check_against(&request)?;

        let feature_ids: HashMap<&str, i64> = features
            .iter()
            .map(|feature| (feature.name.as_str(), feature.feature_index))
            .collect();
        let column_ids: HashMap<&str, i64> = contrast
            .columns
            .iter()
            .map(|column| (column.name.as_str(), column.id))
            .collect();
        let rows = output
            .rows
            .iter()
            .map(|row| {
                let missing = || {
                    CatalogError::EngineResponse(format!(
                        "result row {} / {} does not match the request",
                        row.feature, row.contrast_column
                    ))
                };
                Ok(NewDgeRow {
                    contrast_column_id: *column_ids.get(row.contrast_column.as_str()).ok_or_else(missing)?,
                    feature_index: *feature_ids.get(row.feature.as_str()).ok_or_else(missing)?,
                    ave_expr: row.ave_expr,
                    statistic: row.statistic,
                    log_fc: row.log_fc,
                    p_value: row.p_value,
                    fdr: row.fdr,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        let model_dir = self.store.model_dir(contrast.id, method.id);
        let model = DgeModel {
            contrast_id: contrast.id,
            dge_method_id: method.id,
            input_obj_file: artifact_path(&output.input_object, &model_dir, "input_obj"),
            fit_obj_file: artifact_path(&output.fitted_object, &model_dir, "fit_obj"),
            method_description: output.method_description.clone(),
            created_by: self.options.user.clone(),
            created_at: iso_timestamp(),
        };
        let chunk = self.options.insert_chunk_size;
        let tx = self.conn.unchecked_transaction()?;
        provenance::insert_model(&tx, &model)?;
        provenance::insert_feature_subset(&tx, &model, data_set.id, &output.used_features, chunk)?;
        let result_rows = provenance::insert_dge_rows(&tx, &model, data_set.id, &rows, chunk)?;

        let written = (|| -> Result<(), CatalogError> {
            Store::remove_dir_if_exists(&model_dir)?;
            Store::copy_file_atomic(&output.input_object, &model.input_obj_file)?;
            Store::copy_file_atomic(&output.fitted_object, &model.fit_obj_file)?;
            tx.commit()?;
            Ok(())
        })();
        discard_on_error(&model_dir, written)?;
        let analysis = AnalysisResult {
            model,
            result_rows,
            used_features: output.used_features.iter().filter(|used| **used).count(),
        };

        info!(
            contrast = %contrast.name,
            method = %method.name,
            rows = analysis.result_rows,
            used_features = analysis.used_features,
            "model stored"
        );
        report(sink, "phase=Done; model stored".to_string(), Some(started));
        Ok(analysis)
    }

    pub fn list_models(&self) -> Result<Vec<ModelSummary>, CatalogError> {
        provenance::list_models(&self.conn)
    }

    pub fn remove_model(&self, path: ContrastPath<'_>, method: &str) -> Result<Removed, CatalogError> {
        let (_, _, contrast) = self.resolve_contrast(path)?;
        let method = provenance::dge_method(&self.conn, method)?;
        let model = self.model(&contrast, &method)?;
        let mut artifacts = vec![self.store.model_dir(model.contrast_id, model.dge_method_id)];
        artifacts.extend(
            geneset::gse_results_under(&self.conn, "r.contrast_id", contrast.id)?
                .into_iter()
                .filter(|(_, dge_method_id, _)| *dge_method_id == method.id)
                .map(|(contrast_id, dge_method_id, gse_method_id)| {
                    self.store.gse_result_dir(contrast_id, dge_method_id, gse_method_id)
                }),
        );

        let tx = self.conn.unchecked_transaction()?;
        provenance::delete_model(&tx, contrast.id, method.id)?;
        tx.commit()?;
        remove_artifacts(&artifacts)?;
        Ok(Removed {
            entity: "model",
            name: format!("{}/{}/{} with {}", path.data_set, path.design, contrast.name, method.name),
        })
    }

    pub fn get_results(&self, path: ContrastPath<'_>, method: &str) -> Result<ResultTable, CatalogError> {
        let (_, _, contrast) = self.resolve_contrast(path)?;
        let method = provenance::dge_method(&self.conn, method)?;
        let model = self.model(&contrast, &method)?;
        let used_features = provenance::used_features(&self.conn, contrast.id, method.id)?;
        let rows = provenance::dge_rows(&self.conn, contrast.id, method.id)?;
        Ok(ResultTable {
            model,
            used_features,
            rows,
        })
    }

    // ---- gene sets ----

    pub fn add_gmt(
        &self,
        category: &EntityName,
        file: &Utf8Path,
        taxon_id: TaxonId,
        description: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<GmtImport, CatalogError> {
        let started = Instant::now();
        registry::species(&self.conn, taxon_id)?;
        if geneset::find_category(&self.conn, category.as_str())?.is_some() {
            return Err(CatalogError::already_exists("gene-set category", category.as_str()));
        }
        let entries = gmt::read_gmt_path(file)?;
        report(sink, format!("phase=Import; {} gene sets from {file}", entries.len()), None);

        let gmt_wc = self.store.gmt_path(category);
        let tx = self.conn.unchecked_transaction()?;
        let import = geneset::insert_category(
            &tx,
            &NewCategory {
                name: category.as_str(),
                description,
                taxon_id,
                file_wc: gmt_wc.as_str(),
                file_src: file.as_str(),
                created_by: &self.options.user,
                created_at: &iso_timestamp(),
            },
            &entries,
            self.options.insert_chunk_size,
        )?;
        let written = (|| -> Result<(), CatalogError> {
            Store::copy_file_atomic(file, &gmt_wc)?;
            tx.commit()?;
            Ok(())
        })();
        if written.is_err() {
            if let Err(err) = Store::remove_file_if_exists(&gmt_wc) {
                warn!(path = %gmt_wc, %err, "failed to discard gene-set file");
            }
        }
        written?;
        report(
            sink,
            format!("phase=Done; {:.1}% of symbols unmatched", import.unmatched_fraction * 100.0),
            Some(started),
        );
        Ok(import)
    }

    pub fn list_gmt(&self) -> Result<Vec<GeneSetCategory>, CatalogError> {
        geneset::list_categories(&self.conn)
    }

    /// Gene indices of one gene set, ascending.
    pub fn gene_set_members(&self, category: &str, gene_set: &str) -> Result<Vec<GeneIndex>, CatalogError> {
        let category = geneset::category(&self.conn, category)?;
        let members = geneset::gene_set_members(&self.conn, category.id, gene_set)?;
        if members.is_empty() && !geneset::has_gene_set(&self.conn, category.id, gene_set)? {
            return Err(CatalogError::not_found(
                "gene set",
                format!("{}/{gene_set}", category.name),
            ));
        }
        Ok(members)
    }

    pub fn remove_gmt(&self, category: &str) -> Result<Removed, CatalogError> {
        let category = geneset::category(&self.conn, category)?;
        let tx = self.conn.unchecked_transaction()?;
        geneset::delete_category(&tx, category.id)?;
        tx.commit()?;
        Store::remove_file_if_exists(&category.file_wc)?;
        Ok(Removed {
            entity: "gene-set category",
            name: category.name,
        })
    }

    // ---- enrichment ----

    pub fn run_gse(
        &self,
        path: ContrastPath<'_>,
        dge_method: &str,
        gse_method: &str,
        categories: Option<&[String]>,
        sink: &dyn ProgressSink,
    ) -> Result<EnrichmentRun, CatalogError> {
        let started = Instant::now();
        let (_, design, contrast) = self.resolve_contrast(path)?;
        let dge_method = provenance::dge_method(&self.conn, dge_method)?;
        let model = self.model(&contrast, &dge_method)?;
        let gse_method = provenance::gse_method(&self.conn, &dge_method, gse_method)?;
        if geneset::find_gse_result(&self.conn, contrast.id, gse_method.id)?.is_some() {
            return Err(CatalogError::already_exists(
                "GSE result",
                format!("{} with {}/{}", contrast.name, dge_method.name, gse_method.name),
            ));
        }

        let selected = match categories {
            Some(names) => names
                .iter()
                .map(|name| geneset::category(&self.conn, name))
                .collect::<Result<Vec<_>, _>>()?,
            None => geneset::list_categories(&self.conn)?,
        };
        if selected.is_empty() {
            return Err(CatalogError::Precondition(
                "no gene-set categories loaded; add a GMT file first".to_string(),
            ));
        }
        let collections: Vec<GeneSetCollection> = selected
            .iter()
            .map(|category| GeneSetCollection {
                category: category.name.clone(),
                gmt_path: category.file_wc.clone(),
            })
            .collect();

        let contrast_matrix = contrast.matrix(&design)?;
        let scratch = self.store.scratch_dir("gse-")?;
        let scratch_dir = utf8_path(scratch.path())?;
        let request = GseRequest {
            method: &gse_method.name,
            dge_method: &dge_method.name,
            fitted_object: &model.fit_obj_file,
            design: &design.design_matrix,
            contrast: &contrast_matrix,
            collections: &collections,
            scratch_dir: &scratch_dir,
        };
        report(
            sink,
            format!("phase=Enrich; {} categories with {}", collections.len(), gse_method.name),
            Some(started),
        );
        let output = self.gse_engine.execute(&request)?;
        output.check_against(&request)?;

        let category_ids: Vec<i64> = selected.iter().map(|category| category.id).collect();
        let gene_sets = geneset::gene_set_ids(&self.conn, &category_ids)?;
        let column_ids: HashMap<&str, i64> = contrast
            .columns
            .iter()
            .map(|column| (column.name.as_str(), column.id))
            .collect();
        let mut skipped_rows = 0usize;
        let rows: Vec<NewGseRow> = output
            .rows
            .iter()
            .filter_map(|row| {
                let key = (row.category.to_lowercase(), row.gene_set.clone());
                match (column_ids.get(row.contrast_column.as_str()), gene_sets.get(&key)) {
                    (Some(&contrast_column_id), Some(&gene_set_id)) => Some(NewGseRow {
                        contrast_column_id,
                        gene_set_id,
                        correlation: row.correlation,
                        direction: row.direction.sign(),
                        p_value: row.p_value,
                        fdr: row.fdr,
                        enrichment_score: row.enrichment_score(),
                        effective_gene_count: row.effective_gene_count,
                    }),
                    _ => {
                        skipped_rows += 1;
                        None
                    }
                }
            })
            .collect();
        if skipped_rows > 0 {
            warn!(skipped_rows, "enrichment rows without a matching gene set");
        }

        let result_dir = self.store.gse_result_dir(contrast.id, dge_method.id, gse_method.id);
        let output_file = result_dir.join(
            output
                .table_path
                .file_name()
                .unwrap_or("gse_table.tsv"),
        );
        let result = GseResult {
            contrast_id: contrast.id,
            dge_method_id: dge_method.id,
            gse_method_id: gse_method.id,
            output_file,
            created_by: self.options.user.clone(),
            created_at: iso_timestamp(),
        };
        let tx = self.conn.unchecked_transaction()?;
        geneset::insert_gse_result(&tx, &result)?;
        let inserted = geneset::insert_gse_rows(&tx, &result, &rows, self.options.insert_chunk_size)?;

        let written = (|| -> Result<(), CatalogError> {
            Store::remove_dir_if_exists(&result_dir)?;
            Store::copy_file_atomic(&output.table_path, &result.output_file)?;
            tx.commit()?;
            Ok(())
        })();
        discard_on_error(&result_dir, written)?;
        let run = EnrichmentRun {
            result,
            rows: inserted,
            skipped_rows,
        };
        report(sink, format!("phase=Done; {} enrichment rows", run.rows), Some(started));
        Ok(run)
    }

    pub fn get_gse_results(
        &self,
        path: ContrastPath<'_>,
        dge_method: &str,
        gse_method: &str,
    ) -> Result<EnrichmentTable, CatalogError> {
        let result = self.gse_result(path, dge_method, gse_method)?;
        let rows = geneset::gse_rows(&self.conn, result.contrast_id, result.gse_method_id)?;
        Ok(EnrichmentTable { result, rows })
    }

    pub fn remove_gse(&self, path: ContrastPath<'_>, dge_method: &str, gse_method: &str) -> Result<Removed, CatalogError> {
        let result = self.gse_result(path, dge_method, gse_method)?;
        let tx = self.conn.unchecked_transaction()?;
        geneset::delete_gse_result(&tx, result.contrast_id, result.gse_method_id)?;
        tx.commit()?;
        Store::remove_dir_if_exists(&self.store.gse_result_dir(
            result.contrast_id,
            result.dge_method_id,
            result.gse_method_id,
        ))?;
        Ok(Removed {
            entity: "GSE result",
            name: format!("{} with {dge_method}/{gse_method}", path.contrast),
        })
    }

    // ---- lookups ----

    fn resolve_contrast(&self, path: ContrastPath<'_>) -> Result<(DataSet, Design, Contrast), CatalogError> {
        let data_set = provenance::data_set(&self.conn, path.data_set)?;
        let design = provenance::design(&self.conn, &data_set, path.design)?;
        let contrast = provenance::contrast(&self.conn, &design, path.contrast)?;
        Ok((data_set, design, contrast))
    }

    fn model(&self, contrast: &Contrast, method: &Method) -> Result<DgeModel, CatalogError> {
        provenance::find_model(&self.conn, contrast.id, method.id)?.ok_or_else(|| {
            CatalogError::not_found("model", format!("{} with {}", contrast.name, method.name))
        })
    }

    fn gse_result(&self, path: ContrastPath<'_>, dge_method: &str, gse_method: &str) -> Result<GseResult, CatalogError> {
        let (_, _, contrast) = self.resolve_contrast(path)?;
        let dge_method = provenance::dge_method(&self.conn, dge_method)?;
        let gse_method = provenance::gse_method(&self.conn, &dge_method, gse_method)?;
        geneset::find_gse_result(&self.conn, contrast.id, gse_method.id)?.ok_or_else(|| {
            CatalogError::not_found(
                "GSE result",
                format!("{} with {}/{}", contrast.name, dge_method.name, gse_method.name),
            )
        })
    }

    /// Model and enrichment directories below a data set, design or contrast.
    fn artifacts_under(&self, column: &str, id: i64) -> Result<Vec<Utf8PathBuf>, CatalogError> {
        let model_column = column.replace("r.", "m.");
        let mut dirs: Vec<Utf8PathBuf> = provenance::model_files_under(&self.conn, &model_column, id)?
            .into_iter()
            .map(|(contrast_id, dge_method_id)| self.store.model_dir(contrast_id, dge_method_id))
            .collect();
        dirs.extend(
            geneset::gse_results_under(&self.conn, column, id)?
                .into_iter()
                .map(|(contrast_id, dge_method_id, gse_method_id)| {
                    self.store.gse_result_dir(contrast_id, dge_method_id, gse_method_id)
                }),
        );
        Ok(dirs)
    }
}

fn default_data_set_name(exprs: &Utf8Path) -> Result<EntityName, CatalogError> {
    let file_name = exprs
        .file_name()
        .ok_or_else(|| CatalogError::InvalidName(exprs.to_string()))?;
    let file_name = file_name.strip_suffix(".gz").unwrap_or(file_name);
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    stem.parse()
}

/// Stored phenotype table: sample name and position first, then the
/// supplied columns.
fn phenotype_table(samples: &[String], pheno: Option<&TextTable>) -> Result<Vec<u8>, CatalogError> {
    let mut columns = vec![
        Column {
            name: SAMPLE_COLUMN.to_string(),
            values: samples.to_vec(),
        },
        Column {
            name: SAMPLE_INDEX_COLUMN.to_string(),
            values: (0..samples.len()).map(|index| index.to_string()).collect(),
        },
    ];
    if let Some(pheno) = pheno {
        columns.extend(
            pheno
                .columns
                .iter()
                .filter(|column| column.name != SAMPLE_COLUMN && column.name != SAMPLE_INDEX_COLUMN)
                .cloned(),
        );
    }
    write_tsv(&Table::new(None, columns)?, SAMPLE_COLUMN)
}

/// Where an engine artifact is kept: `dir/<stem>.<original extension>`.
fn artifact_path(source: &Utf8Path, dir: &Utf8Path, stem: &str) -> Utf8PathBuf {
    match source.extension() {
        Some(ext) => dir.join(format!("{stem}.{ext}")),
        None => dir.join(stem),
    }
}

/// Removes a directory this call populated after its write failed.
fn discard_on_error<T>(dir: &Utf8Path, result: Result<T, CatalogError>) -> Result<T, CatalogError> {
    if result.is_err() {
        Store::discard_dir(dir);
    }
    result
}

/// Removes directories after their rows are gone. Every path is attempted;
/// the first failure is returned.
fn remove_artifacts(paths: &[Utf8PathBuf]) -> Result<(), CatalogError> {
    let mut first_error = None;
    for path in paths {
        if let Err(err) = Store::remove_dir_if_exists(path) {
            warn!(%path, %err, "failed to remove artifacts");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
