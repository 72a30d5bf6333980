use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiverbedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Storage error for {key}: {message}")]
    Storage { key: String, message: String },

    #[error("Hub renewal error: {0}")]
    HubRenewal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl RiverbedError {
    pub fn storage(key: &str, message: impl ToString) -> Self {
        Self::Storage {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RiverbedError>;
