use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeederError {
    /// A feature is missing a field the engine needs to place it. Only that
    /// row is excluded; the batch keeps going.
    #[error("feature #{feature_index} has no value for required field '{field}'")]
    MissingKey { field: String, feature_index: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("network '{network_id}' has {vertices} vertices, over the per-network limit of {limit}")]
    GroupTooLarge {
        network_id: String,
        vertices: usize,
        limit: usize,
    },
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

macro_rules! io_err {
    ($path:expr, $err:expr) => {
        $crate::error::FeederError::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;
