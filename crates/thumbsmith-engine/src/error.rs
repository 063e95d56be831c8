use thiserror::Error;

/// Failure of one submission to a tool. Display strings are user-facing.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Please enter a prompt or upload at least one image.")]
    EmptySubmission,

    #[error("Failed to generate prompt. Please try again.")]
    PromptFailed(#[source] anyhow::Error),

    /// The backend stopped with a non-normal finish reason.
    #[error("Image generation failed due to: {reason}. Please modify your prompt.")]
    Refused { reason: String },

    #[error("No image was generated by the model. The prompt may have been blocked. Please try a different prompt.")]
    NoImage,

    #[error("An unexpected error occurred while generating the image.")]
    Unexpected(#[source] anyhow::Error),

    /// A newer submission to the same tool started before this one finished.
    #[error("A newer request replaced this one before it finished.")]
    Superseded,

    #[error("Failed to save history.")]
    History(#[source] anyhow::Error),
}

impl GenerationError {
    /// Stable short name used in the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptySubmission => "empty_submission",
            Self::PromptFailed(_) => "prompt_failed",
            Self::Refused { .. } => "refused",
            Self::NoImage => "no_image",
            Self::Unexpected(_) => "unexpected",
            Self::Superseded => "superseded",
            Self::History(_) => "history",
        }
    }
}
