use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store corruption in {path}: {detail}")]
    StoreCorruption { path: String, detail: String },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn store_corruption(path: impl AsRef<std::path::Path>, detail: impl ToString) -> Self {
        Error::StoreCorruption {
            path: path.as_ref().display().to_string(),
            detail: detail.to_string(),
        }
    }

    /// Stable key used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingFields(_) => "missing_fields",
            Error::NotFound(_) => "not_found",
            Error::Upstream(_) => "upstream",
            Error::Validation(_) => "validation",
            Error::StoreCorruption { .. } => "store_corruption",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
