use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BurnoffError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Warmup failed: {0}")]
    WarmupFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Timed out after {}", format_secs(*.0))]
    Timeout(Duration),

    #[error("{0}: run_inference called before a successful warmup")]
    NotWarmedUp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BurnoffError {
    /// Errors that abort the whole invocation instead of a single backend or iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BurnoffError::InvalidConfig(_) | BurnoffError::NotWarmedUp(_))
    }
}

pub type Result<T> = std::result::Result<T, BurnoffError>;

/// Whole seconds print as `30s`, anything finer as `0.2s`.
pub fn format_secs(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
