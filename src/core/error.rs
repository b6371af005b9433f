use thiserror::Error;

use crate::services::manga::MangaState;

/// Failures of the content-to-artifact pipeline.
///
/// Everything here terminates the request it came from. Panel-level image
/// failures are not errors; they are recorded on the panel itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported media type: {mime_type}")]
    UnsupportedMediaType { mime_type: String },

    #[error("invalid source content: {0}")]
    InvalidSource(String),

    #[error("chapter {chapter_id} has no source content")]
    MissingSource { chapter_id: String },

    #[error("generation failed: {0}")]
    GenerationFailed(#[from] BackendError),

    #[error("could not parse model response: {0}")]
    Parse(#[from] ParseError),

    #[error("model returned an unusable artifact: {0}")]
    InvalidArtifact(String),

    #[error("manga script generation failed: {0}")]
    ScriptGenerationFailed(String),

    #[error("source of chapter {chapter_id} changed during generation; result discarded")]
    SourceChanged { chapter_id: String },

    #[error("manga run cannot start from state {from:?}")]
    InvalidTransition { from: MangaState },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Structured-output extraction failures.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response was empty")]
    EmptyResponse,

    #[error("no JSON object or array found in response")]
    NoStructuralToken,

    #[error("malformed JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),
}

/// Failures reported by a generative backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("response blocked by the backend ({reason})")]
    Blocked { reason: String },

    #[error("backend returned no content")]
    Empty,

    #[error("unexpected response envelope: {0}")]
    MalformedEnvelope(String),
}

impl PipelineError {
    /// Message suitable for showing to the learner.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedMediaType { .. } => {
                "Unsupported file type. Please upload a PDF, DOC(X), PPT(X), .txt, .jpg, or .png file."
            }
            PipelineError::MissingSource { .. } => "Upload a source file for this chapter first.",
            PipelineError::SourceChanged { .. } => {
                "The source changed while generating, so the result was discarded. Please generate again."
            }
            PipelineError::ScriptGenerationFailed(_) => {
                "Could not generate a manga script from the provided content. Please try again."
            }
            _ => "Generation failed. Please try again.",
        }
    }
}
