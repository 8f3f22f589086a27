use thiserror::Error;

/// Errors raised while preparing a waveguide mode problem.
///
/// None of these are recoverable inside the pipeline; every stage
/// propagates them unchanged to the caller.
#[derive(Debug, Error)]
pub enum GuidemeshError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Mesh generation error: {0}")]
    MeshGeneration(String),

    #[error("Region '{region}' not found in mesh (available: {available:?})")]
    RegionNotFound {
        region: String,
        available: Vec<String>,
    },

    #[error("{count} mesh elements were not claimed by any region")]
    UnclaimedElements { count: usize },

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Post processor error: {0}")]
    PostProcessor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GuidemeshError>;
