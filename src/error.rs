use thiserror::Error;

/// Error kinds callers branch on. Most plumbing stays on `anyhow::Result`;
/// this enum marks the failures that change control flow: transient fetches
/// are retried, shape errors abort the current operation, modeling errors
/// downgrade to a skip-and-log.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("transient fetch failed after retries: {0}")]
    TransientFetch(String),

    #[error("unexpected data shape: {0}")]
    DataShape(String),

    #[error("modeling degenerate for {subject}: {reason}")]
    Modeling { subject: String, reason: String },

    #[error("simulation produced an invalid value: {0}")]
    Simulation(String),
}

impl ForecastError {
    pub fn modeling(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Modeling {
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}
