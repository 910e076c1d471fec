use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no usable input: {0}")]
    EmptyInput(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no image/audio pairs could be synchronized ({images} images, {audios} audio clips)")]
    NoUsablePairs { images: usize, audios: usize },

    #[error("encoder exited with {status}: {diagnostics}")]
    Encoder { status: String, diagnostics: String },

    #[error("encoder reported success but {0:?} was not written")]
    MissingOutput(PathBuf),

    #[error("duration probe failed for {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("speech synthesis failed: {0}")]
    Speech(String),

    #[error("LLM request failed: {0}")]
    Prompt(#[from] rig::completion::PromptError),

    #[error("embedding request failed: {0}")]
    Embedding(#[from] rig::embeddings::EmbeddingError),

    #[error("LLM client setup failed: {0}")]
    ClientBuilder(#[from] rig::client::ClientBuilderError),

    #[error("QA chain has not been built")]
    ChainNotBuilt,

    #[error("answer unavailable: {0}")]
    AnswerUnavailable(String),

    #[error("run aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Other(String),
}

impl PipelineError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True when the failure came from an external tool or service rather
    /// than from the absence of usable input.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::Encoder { .. }
                | Self::MissingOutput(_)
                | Self::Probe { .. }
                | Self::Speech(_)
                | Self::Prompt(_)
                | Self::Embedding(_)
                | Self::Reqwest(_)
                | Self::AnswerUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
