use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictError {
    #[error("no historical record for team {team:?}")]
    NotFound { team: String },

    #[error("models are not loaded yet")]
    ModelsNotLoaded,

    #[error("model artifacts unavailable: {0}")]
    ArtifactsUnavailable(String),

    #[error("feature list references columns with no computation path: {}", missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },
}

impl PredictError {
    pub fn not_found(team: &str) -> Self {
        Self::NotFound {
            team: team.to_string(),
        }
    }

    pub fn unavailable(err: anyhow::Error) -> Self {
        Self::ArtifactsUnavailable(format!("{err:#}"))
    }
}
