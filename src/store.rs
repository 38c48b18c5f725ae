use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use tracing::warn;

use crate::domain::EntityName;
use crate::error::CatalogError;

const DATASET_SUB_FOLDER: &str = "dataset";
const DGE_MODEL_SUB_FOLDER: &str = "dge_model";
const GSE_RESULT_SUB_FOLDER: &str = "gse_result";
const GMT_SUB_FOLDER: &str = "gmt";

/// Working-directory layout holding copies of every externally supplied input
/// and every engine artifact.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), CatalogError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))
    }

    pub fn dataset_dir(&self, name: &EntityName) -> Utf8PathBuf {
        self.root.join(DATASET_SUB_FOLDER).join(name.as_str())
    }

    pub fn model_dir(&self, contrast_id: i64, dge_method_id: i64) -> Utf8PathBuf {
        self.root
            .join(DGE_MODEL_SUB_FOLDER)
            .join(format!("{contrast_id}_{dge_method_id}"))
    }

    pub fn gse_result_dir(&self, contrast_id: i64, dge_method_id: i64, gse_method_id: i64) -> Utf8PathBuf {
        self.root
            .join(GSE_RESULT_SUB_FOLDER)
            .join(format!("{contrast_id}_{dge_method_id}_{gse_method_id}"))
    }

    pub fn gmt_path(&self, category: &EntityName) -> Utf8PathBuf {
        self.root
            .join(GMT_SUB_FOLDER)
            .join(format!("{}.gmt", category.as_str()))
    }

    pub fn scratch_dir(&self, prefix: &str) -> Result<tempfile::TempDir, CatalogError> {
        self.ensure_root()?;
        Builder::new()
            .prefix(prefix)
            .tempdir_in(self.root.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), CatalogError> {
        let parent = dest
            .parent()
            .ok_or_else(|| CatalogError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("exprcat-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| CatalogError::Filesystem(format!("copy {source}: {err}")))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CatalogError> {
        let parent = path
            .parent()
            .ok_or_else(|| CatalogError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("exprcat-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Removes a file; a missing file is not an error.
    pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), CatalogError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CatalogError::Filesystem(format!("remove {path}: {err}"))),
        }
    }

    /// Removes a directory tree; a missing directory is not an error.
    pub fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), CatalogError> {
        match fs::remove_dir_all(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CatalogError::Filesystem(format!("remove {path}: {err}"))),
        }
    }

    /// Cleanup after a failed write; the original error wins over cleanup errors.
    pub fn discard_dir(path: &Utf8Path) {
        if let Err(err) = Self::remove_dir_if_exists(path) {
            warn!(%path, %err, "failed to discard working directory");
        }
    }
}

pub fn utf8_path(path: &std::path::Path) -> Result<Utf8PathBuf, CatalogError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|_| CatalogError::Filesystem(format!("non-utf8 path: {}", path.display())))
}
