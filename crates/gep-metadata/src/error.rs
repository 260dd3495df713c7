//! Metadata error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("table \"{0}\" was not found")]
    TableNotFound(String),

    #[error("Column name \"{column}\" was not found in table \"{table}\"")]
    ColumnNotFound { table: String, column: String },

    #[error("invalid signal reference: {0}")]
    InvalidSignalReference(String),

    #[error("filter error: {0}")]
    Filter(#[from] FilterError),
}

/// Failures raised while parsing or evaluating filter expressions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("FilterExpressionParser exception: {message} (at position {position})")]
    Parse { message: String, position: usize },

    #[error("ExpressionTree exception: {0}")]
    Evaluation(String),
}

impl FilterError {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        FilterError::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        FilterError::Evaluation(message.into())
    }
}
