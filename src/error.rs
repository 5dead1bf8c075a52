use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("attachment already exists for key")]
    AlreadyExists,

    #[error("no stored attachment found for key")]
    NotFound,

    #[error("download failed: {0}")]
    Download(String),

    #[error("record type {found} must occur before {current}")]
    RecordOrder { found: String, current: String },

    #[error("invalid cookie: {0:?}")]
    InvalidCookie(String),
}

pub type Result<T> = std::result::Result<T, MigrateError>;
