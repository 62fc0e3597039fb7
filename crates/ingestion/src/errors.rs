//! Ingestion service error types

use tenderwatch_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Batch file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid batch file {path}: {message}")]
    InvalidBatch { path: String, message: String },

    #[error("Invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<config::ConfigError> for IngestionError {
    fn from(e: config::ConfigError) -> Self {
        IngestionError::ConfigError(e.to_string())
    }
}
