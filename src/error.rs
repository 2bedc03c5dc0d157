use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
