use shardgate_common::Stage;
use shardgate_engine::MergeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Failed to load configuration")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Common(#[from] shardgate_common::Error),

    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The statement cannot be routed; the message is shown to the client.
    #[error("{0}")]
    Unparsable(String),

    #[error("shard group {group} failed: {reason}")]
    Shard { group: String, reason: String },

    #[error("An internal error occurred: {0}")]
    Internal(String),
}

impl CoordinatorError {
    pub fn stage(&self) -> Stage {
        match self {
            CoordinatorError::Config(_) => Stage::Config,
            CoordinatorError::Common(e) => e.stage(),
            CoordinatorError::Merge(_) => Stage::Merge,
            CoordinatorError::Unparsable(_) => Stage::Routing,
            CoordinatorError::Shard { .. }
            | CoordinatorError::Internal(_) => Stage::Upstream,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
