//! Enrichment worker error types

use tenderwatch_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("Document is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("PDF parse error: {0}")]
    PdfParse(String),

    #[error("No text content extracted")]
    NoText,

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("Content changed upstream (expected {expected}, got {actual}); re-download required")]
    ContentChanged { expected: String, actual: String },

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::App(inner) => inner,
            // Worth another attempt
            PipelineError::Download { .. } => AppError::external("download", e.to_string()),
            // Retrying the same bytes cannot help
            PipelineError::TooLarge { .. }
            | PipelineError::PdfParse(_)
            | PipelineError::NoText
            | PipelineError::UnsupportedContent(_)
            | PipelineError::ContentChanged { .. } => AppError::validation(e.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let download: AppError = PipelineError::Download {
            url: "https://example.org/a.pdf".into(),
            message: "503".into(),
        }
        .into();
        assert!(download.is_retryable());

        let parse: AppError = PipelineError::PdfParse("bad xref".into()).into();
        assert!(!parse.is_retryable());
    }
}
