use meridian_id::Id;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("node {0} already exists")]
    DuplicateNode(Id),

    #[error("no live node {0}")]
    UnknownNode(Id),

    #[error("network did not settle within {0} steps")]
    StepLimit(usize),

    #[error(transparent)]
    Routing(#[from] meridian_routing::Error),

    #[error("failed to write timeline: {0}")]
    Timeline(#[from] serde_json::Error),
}
