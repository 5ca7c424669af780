use thiserror::Error;

/// Reasons an agent cannot be constructed or run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("role not found: {0}")]
    MissingRole(String),

    #[error("no employee holds role {0}")]
    MissingStaff(String),

    #[error("collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}
