use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlyoverError {
    #[error("event payload has no pull request number: only pull_request-triggered runs are supported")]
    MissingPrNumber,

    #[error("app name '{name}' does not contain PR number {number}: refusing to touch what may be another PR's app")]
    NameSafetyCheck { name: String, number: u64 },

    #[error("an image reference is required to deploy: pass --image or set INPUT_IMAGE")]
    MissingImage,

    #[error("flyctl not found on PATH")]
    FlyctlNotFound,

    #[error("`{command}` failed with {status}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from `{command}`: {reason}")]
    BadOutput { command: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlyoverError>;
