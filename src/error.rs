// ⚠️ Errors - configuration and I/O failures surfaced before a run starts
//
// Bad cell values never end up here: the normalizer and scorer degrade them
// to empty strings and zero scores instead.

use crate::dataset::Side;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkageError {
    #[error("no match fields configured")]
    NoMatchFields,

    #[error("match field lists differ in length: {base} base field(s) vs {target} target field(s)")]
    FieldCountMismatch { base: usize, target: usize },

    #[error("{weights} weight(s) given for {fields} match field(s)")]
    WeightCountMismatch { fields: usize, weights: usize },

    #[error("column '{column}' not found in {side} dataset")]
    UnknownColumn { side: Side, column: String },

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("minimum score for field '{field}' must be within 0-100 (got {min_score})")]
    InvalidMinScore { field: String, min_score: f64 },

    #[error("weight for field '{field}' must be a finite, non-negative number (got {weight})")]
    InvalidWeight { field: String, weight: f64 },

    #[error("match field weights sum to zero")]
    ZeroTotalWeight,

    #[error("threshold must be within 0-100 (got {0})")]
    InvalidThreshold(f64),

    #[error("invalid prefix-run rules: {0}")]
    InvalidPrefixRules(String),

    #[error("invalid phone rules: {0}")]
    InvalidPhoneRules(String),

    #[error("failed to read or write delimited data: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("spreadsheet '{0}' has no worksheets")]
    EmptyWorkbook(String),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_message_names_side() {
        let err = LinkageError::UnknownColumn {
            side: Side::Target,
            column: "ContactPhone".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "column 'ContactPhone' not found in target dataset"
        );
    }

    #[test]
    fn test_missing_column_message_has_no_side() {
        let err = LinkageError::MissingColumn("Phone".to_string());
        assert_eq!(err.to_string(), "column 'Phone' not found");
    }

    #[test]
    fn test_field_count_mismatch_message() {
        let err = LinkageError::FieldCountMismatch { base: 2, target: 3 };
        assert!(err.to_string().contains("2 base field(s) vs 3 target field(s)"));
    }
}
