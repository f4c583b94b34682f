use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid coordinate: {0}")]
    Validation(String),
    #[error("geocode cache at {} is unavailable: {reason}", .path.display())]
    StoreUnavailable { path: PathBuf, reason: String },
    #[error("reverse geocoding service returned {status}: {reason}")]
    RemoteService { status: u16, reason: String },
    #[error("reverse geocoding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
}

impl AppError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable { .. })
    }
}
