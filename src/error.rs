use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Unknown venue: {0}")]
    UnknownVenue(String),

    #[error("Order not found: {0}")]
    OrderNotFound(uuid::Uuid),

    #[error("Venue rejected request: HTTP {status}: {body}")]
    VenueRejected { status: u16, body: String },

    #[error("Venue unavailable: {0}")]
    VenueUnavailable(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Shutting down")]
    Shutdown,
}

impl Error {
    /// Transient venue faults are retried by the execution engine up to the
    /// retry budget; everything else aborts the cycle on first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::VenueRejected { status, .. } => *status == 429 || *status >= 500,
            Error::VenueUnavailable(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
