//! Batch files handed over by connectors
//!
//! Either a JSON array of payloads or one payload per line (JSON Lines).

use std::path::Path;

use crate::errors::IngestionError;
use crate::processor::BatchItem;

pub fn read_batch_file(path: &Path) -> Result<Vec<BatchItem>, IngestionError> {
    if !path.exists() {
        return Err(IngestionError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_batch(&content).map_err(|message| IngestionError::InvalidBatch {
        path: path.display().to_string(),
        message,
    })
}

pub fn parse_batch(content: &str) -> Result<Vec<BatchItem>, String> {
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        return Ok(values.into_iter().map(BatchItem::from_json).collect());
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<serde_json::Value>(line)
                .map(BatchItem::from_json)
                .map_err(|e| format!("line {}: {}", n + 1, e))
        })
        .collect()
}

pub fn parse_criteria(criteria: Option<&str>) -> Result<serde_json::Value, IngestionError> {
    match criteria {
        None => Ok(serde_json::Value::Null),
        Some(raw) => serde_json::from_str(raw).map_err(|e| IngestionError::InvalidCriteria(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let items = parse_batch(r#"[{"source":"TED","source_id":"1"},{"source":"TED","source_id":"2"}]"#).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_parse_json_lines() {
        let content = "{\"source\":\"TED\",\"source_id\":\"1\"}\n\n{\"source\":\"TED\",\"source_id\":\"2\"}\n";
        assert_eq!(parse_batch(content).unwrap().len(), 2);
    }

    #[test]
    fn test_broken_line_reported() {
        let err = parse_batch("{\"source\":\"TED\"}\n{oops").err().unwrap();
        assert!(err.starts_with("line 2"));
    }

    #[test]
    fn test_criteria() {
        assert!(parse_criteria(None).unwrap().is_null());
        assert_eq!(parse_criteria(Some(r#"{"cpv":"45"}"#)).unwrap()["cpv"], "45");
        assert!(parse_criteria(Some("{")).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_batch_file(Path::new("/nonexistent/batch.json")),
            Err(IngestionError::FileNotFound(_))
        ));
    }
}
