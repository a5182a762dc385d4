use thiserror::Error;

#[derive(Debug, Error)]
pub enum BtsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task not found: {id}")]
    TaskNotFound { id: i32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BtsError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            BtsError::Config(_) => "CONFIG_ERROR",
            BtsError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            BtsError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BtsError>;
