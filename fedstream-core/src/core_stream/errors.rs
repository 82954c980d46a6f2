//! Stream log and notifier errors

use crate::core_model::OrderingKey;
use crate::core_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Invalid stream request: {0}")]
    InvalidStream(String),

    #[error("Stream log failure: {0}")]
    Log(String),

    #[error("Live channel failure: {0}")]
    Notify(String),

    /// The subscriber fell behind the live channel; resume from backlog
    /// after `resume_after`
    #[error("Subscriber on {stream} lagged, {skipped} events skipped")]
    Lagged {
        stream: String,
        skipped: u64,
        resume_after: Option<OrderingKey>,
    },

    #[error("Live channel for {0} closed")]
    Closed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for StreamError {
    fn from(err: StoreError) -> Self {
        StreamError::Log(err.to_string())
    }
}

impl From<rusqlite::Error> for StreamError {
    fn from(err: rusqlite::Error) -> Self {
        StreamError::Log(err.to_string())
    }
}

impl From<r2d2::Error> for StreamError {
    fn from(err: r2d2::Error) -> Self {
        StreamError::Log(format!("connection pool: {}", err))
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
