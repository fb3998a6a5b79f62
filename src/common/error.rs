use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source {source_id} unavailable after {attempts} attempt(s): {cause}")]
    SourceUnavailable {
        source_id: String,
        attempts: u32,
        #[source]
        cause: Box<PipelineError>,
    },

    #[error("schema drift in source {source_id}: {detail}")]
    SchemaDrift { source_id: String, detail: String },

    #[error("registry error: {message}")]
    Registry { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
