//! Engine adapter that runs an external program.
//!
//! The request is written into the scratch directory, the program is invoked
//! as `<program> <args..> dge|gse <scratch_dir>` with the scratch directory as
//! working directory, and the documented output files are read back:
//!
//! * `dge`: `response.json` (`input_object`, `fitted_object`,
//!   `method_description`, `used_features`) and `dge_table.tsv`
//!   (`Feature`, `Contrast`, `AveExpr`, `Statistic`, `LogFC`, `PValue`, `FDR`).
//! * `gse`: `gse_table.tsv` (`Category`, `GeneSet`, `Contrast`, `Correlation`,
//!   `Direction`, `PValue`, `FDR`, `NGenes`).

use std::fs::File;
use std::path::PathBuf;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::CommandEntry;
use crate::domain::DataSetKind;
use crate::engine::{
    DgeOutput, DgeRequest, EnrichmentEngine, GeneSetCollection, GseOutput, GseRequest,
    StatisticalEngine,
};
use crate::error::CatalogError;
use crate::store::Store;
use crate::table::write_tsv;

const REQUEST_FILE: &str = "request.json";
const RESPONSE_FILE: &str = "response.json";
const FEATURES_FILE: &str = "features.tsv";
const DESIGN_FILE: &str = "design.tsv";
const CONTRAST_FILE: &str = "contrast.tsv";
const DGE_TABLE_FILE: &str = "dge_table.tsv";
const GSE_TABLE_FILE: &str = "gse_table.tsv";

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

#[derive(Serialize)]
struct DgeRequestFile<'a> {
    method: &'a str,
    exprs: &'a Utf8Path,
    kind: DataSetKind,
    samples: &'a [String],
    sample_groups: &'a [String],
}

#[derive(Deserialize)]
struct DgeResponseFile {
    input_object: String,
    fitted_object: String,
    method_description: String,
    used_features: Vec<bool>,
}

#[derive(Serialize)]
struct GseRequestFile<'a> {
    method: &'a str,
    dge_method: &'a str,
    fitted_object: &'a Utf8Path,
    collections: &'a [GeneSetCollection],
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_entry(entry: &CommandEntry) -> Self {
        Self::new(&entry.program, entry.args.clone())
    }

    fn run(&self, mode: &str, scratch_dir: &Utf8Path) -> Result<(), CatalogError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(mode).arg(scratch_dir.as_str());
        cmd.current_dir(scratch_dir.as_std_path());
        debug!(program = %self.program.display(), mode, %scratch_dir, "running engine");
        let output = cmd
            .output()
            .map_err(|err| CatalogError::Engine(format!("{}: {err}", self.program.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({})", self.program.display(), output.status)
        } else {
            stderr
        };
        Err(CatalogError::Engine(message))
    }
}

impl StatisticalEngine for CommandEngine {
    fn execute(&self, request: &DgeRequest<'_>) -> Result<DgeOutput, CatalogError> {
        let dir = request.scratch_dir;
        write_json(
            &dir.join(REQUEST_FILE),
            &DgeRequestFile {
                method: request.method,
                exprs: request.exprs_path,
                kind: request.kind,
                samples: request.samples,
                sample_groups: request.sample_groups,
            },
        )?;
        write_features(&dir.join(FEATURES_FILE), request)?;
        Store::write_bytes_atomic(&dir.join(DESIGN_FILE), &write_tsv(request.design, "Sample")?)?;
        Store::write_bytes_atomic(&dir.join(CONTRAST_FILE), &write_tsv(request.contrast, "Coefficient")?)?;

        self.run("dge", dir)?;

        let response: DgeResponseFile = read_json(&dir.join(RESPONSE_FILE))?;
        let rows = read_rows(&dir.join(DGE_TABLE_FILE))?;
        Ok(DgeOutput {
            input_object: resolve(dir, &response.input_object),
            fitted_object: resolve(dir, &response.fitted_object),
            rows,
            used_features: response.used_features,
            method_description: response.method_description,
        })
    }
}

impl EnrichmentEngine for CommandEngine {
    fn execute(&self, request: &GseRequest<'_>) -> Result<GseOutput, CatalogError> {
        let dir = request.scratch_dir;
        write_json(
            &dir.join(REQUEST_FILE),
            &GseRequestFile {
                method: request.method,
                dge_method: request.dge_method,
                fitted_object: request.fitted_object,
                collections: request.collections,
            },
        )?;
        Store::write_bytes_atomic(&dir.join(DESIGN_FILE), &write_tsv(request.design, "Sample")?)?;
        Store::write_bytes_atomic(&dir.join(CONTRAST_FILE), &write_tsv(request.contrast, "Coefficient")?)?;

        self.run("gse", dir)?;

        let table_path = dir.join(GSE_TABLE_FILE);
        let rows = read_rows(&table_path)?;
        Ok(GseOutput { table_path, rows })
    }
}

fn resolve(dir: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from(path);
    if path.is_absolute() { path } else { dir.join(path) }
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CatalogError> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| CatalogError::Engine(err.to_string()))?;
    Store::write_bytes_atomic(path, &content)
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CatalogError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CatalogError::EngineResponse(format!("open {path}: {err}")))?;
    serde_json::from_reader(file)
        .map_err(|err| CatalogError::EngineResponse(format!("{path}: {err}")))
}

fn write_features(path: &Utf8Path, request: &DgeRequest<'_>) -> Result<(), CatalogError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
    for feature in request.features {
        writer.serialize(feature)?;
    }
    let content = writer
        .into_inner()
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    Store::write_bytes_atomic(path, &content)
}

fn read_rows<T: DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, CatalogError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CatalogError::EngineResponse(format!("open {path}: {err}")))?;
    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(file);
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|err| CatalogError::EngineResponse(format!("{path}: {err}")))
}
