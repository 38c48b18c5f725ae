use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("unknown taxon id: {0}")]
    UnknownTaxon(i64),

    #[error("{entity} not found: {name}")]
    NotFound { entity: &'static str, name: String },

    #[error("{entity} already exists: {name}")]
    AlreadyExists { entity: &'static str, name: String },

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Validation(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("annotation provider request failed: {0}")]
    ProviderHttp(String),

    #[error("annotation provider returned status {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    #[error("malformed annotation provider response: {0}")]
    ProviderResponse(String),

    #[error("statistical engine failed: {0}")]
    Engine(String),

    #[error("malformed statistical engine response: {0}")]
    EngineResponse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("database error: {0}")]
    Storage(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Condition class of a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Precondition,
    Validation,
    External,
    Storage,
}

impl CatalogError {
    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        CatalogError::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub fn already_exists(entity: &'static str, name: impl Into<String>) -> Self {
        CatalogError::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::UnknownTaxon(_) | CatalogError::NotFound { .. } => ErrorKind::NotFound,
            CatalogError::AlreadyExists { .. } | CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::Precondition(_) => ErrorKind::Precondition,
            CatalogError::Validation(_)
            | CatalogError::InvalidName(_)
            | CatalogError::ConfigRead(_)
            | CatalogError::ConfigParse(_) => ErrorKind::Validation,
            CatalogError::ProviderHttp(_)
            | CatalogError::ProviderStatus { .. }
            | CatalogError::ProviderResponse(_)
            | CatalogError::Engine(_)
            | CatalogError::EngineResponse(_) => ErrorKind::External,
            CatalogError::Storage(_) | CatalogError::Filesystem(_) => ErrorKind::Storage,
        }
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let code = failure.extended_code;
            if code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return CatalogError::Conflict(
                    message.clone().unwrap_or_else(|| err.to_string()),
                );
            }
        }
        CatalogError::Storage(err.to_string())
    }
}

impl From<csv::Error> for CatalogError {
    fn from(err: csv::Error) -> Self {
        CatalogError::Validation(format!("malformed table: {err}"))
    }
}
