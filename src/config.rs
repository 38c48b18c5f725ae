use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_HUMAN_DATASET;
use crate::error::CatalogError;

pub const CONFIG_FILE_NAME: &str = "expression-catalog.json";
pub const DEFAULT_BIOMART_URL: &str = "https://www.ensembl.org/biomart/martservice";
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub annotation: Option<AnnotationEntry>,
    #[serde(default)]
    pub human_dataset: Option<String>,
    #[serde(default)]
    pub engine: Option<CommandEntry>,
    #[serde(default)]
    pub gse_engine: Option<CommandEntry>,
    #[serde(default)]
    pub insert_chunk_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnotationEntry {
    Biomart {
        #[serde(default)]
        url: Option<String>,
    },
    Local {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandEntry {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationSource {
    BioMart { url: String },
    Local { path: Utf8PathBuf },
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub database: Utf8PathBuf,
    pub working_dir: Utf8PathBuf,
    pub annotation: AnnotationSource,
    pub human_dataset: String,
    pub engine: Option<CommandEntry>,
    pub gse_engine: Option<CommandEntry>,
    pub insert_chunk_size: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file; a missing default file resolves to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CatalogError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CatalogError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CatalogError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let data_dir = match (&config.database, &config.working_dir) {
            (Some(_), Some(_)) => None,
            _ => Some(default_data_dir()?),
        };

        let working_dir = match config.working_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => data_dir.clone().unwrap_or_default(),
        };
        let database = match config.database {
            Some(db) => Utf8PathBuf::from(db),
            None => data_dir.unwrap_or_default().join("catalog.db"),
        };

        let annotation = match config.annotation {
            None | Some(AnnotationEntry::Biomart { url: None }) => AnnotationSource::BioMart {
                url: DEFAULT_BIOMART_URL.to_string(),
            },
            Some(AnnotationEntry::Biomart { url: Some(url) }) => AnnotationSource::BioMart { url },
            Some(AnnotationEntry::Local { path }) => AnnotationSource::Local {
                path: Utf8PathBuf::from(path),
            },
        };

        let insert_chunk_size = config.insert_chunk_size.unwrap_or(DEFAULT_INSERT_CHUNK_SIZE);
        if insert_chunk_size == 0 {
            return Err(CatalogError::ConfigParse(
                "insert_chunk_size must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            database,
            working_dir,
            annotation,
            human_dataset: config
                .human_dataset
                .unwrap_or_else(|| DEFAULT_HUMAN_DATASET.to_string()),
            engine: config.engine,
            gse_engine: config.gse_engine,
            insert_chunk_size,
        })
    }
}

fn default_data_dir() -> Result<Utf8PathBuf, CatalogError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("expression-catalog")).ok()
        })
        .ok_or_else(|| CatalogError::Filesystem("unable to resolve data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_local_annotation() {
        let config: Config = serde_json::from_str(
            r#"{
                "database": "/tmp/catalog.db",
                "working_dir": "/tmp/wd",
                "annotation": { "type": "local", "path": "/data/mart" },
                "insert_chunk_size": 100
            }"#,
        )
        .unwrap();

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.database, Utf8PathBuf::from("/tmp/catalog.db"));
        assert_eq!(
            resolved.annotation,
            AnnotationSource::Local {
                path: Utf8PathBuf::from("/data/mart")
            }
        );
        assert_eq!(resolved.insert_chunk_size, 100);
        assert_eq!(resolved.human_dataset, DEFAULT_HUMAN_DATASET);
    }
}
