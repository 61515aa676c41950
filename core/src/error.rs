use thiserror::Error;

#[derive(Error, Debug)]
pub enum AegisError {
    #[error("Malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("Insufficient data for {what}: need {required}, have {available}")]
    InsufficientData {
        what: String,
        required: usize,
        available: usize,
    },

    #[error("Constraint '{constraint}' cannot be satisfied: {detail}")]
    ConstraintInfeasible { constraint: String, detail: String },

    #[error("Unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("No institution batch loaded")]
    BatchNotLoaded,

    #[error("Model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AegisError {
    pub fn infeasible(constraint: &str, detail: impl Into<String>) -> Self {
        Self::ConstraintInfeasible {
            constraint: constraint.to_string(),
            detail: detail.into(),
        }
    }
}

pub type AegisResult<T> = Result<T, AegisError>;
