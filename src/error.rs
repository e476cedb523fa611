use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("document store error: {0}")]
    Store(#[from] mongodb::error::Error),
    #[error("collection {database}.{collection} does not exist")]
    MissingCollection {
        database: String,
        collection: String,
    },
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to obtain access token: {0}")]
    Auth(String),
    #[error("failed to sign token assertion: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
    #[error("analytics API returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Raised when a wire row does not have the shape its report expects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("row {row} has no dimension value")]
    MissingDimension { row: usize },
    #[error("row {row} has no metric value")]
    MissingMetric { row: usize },
    #[error("row {row} has non-integer metric value {value:?}")]
    InvalidMetric { row: usize, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}
