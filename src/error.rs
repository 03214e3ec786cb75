use thiserror::Error;

/// Everything that can go wrong while answering a predict request.
///
/// Each variant maps to exactly one HTTP status so the handler never has to
/// guess which failures are the client's fault.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("no image provided")]
    MissingImage,

    #[error("no image selected")]
    EmptyFilename,

    #[error("malformed multipart body: {0}")]
    Malformed(std::io::Error),

    #[error("invalid image shape: ({rows}, {cols})")]
    ShapeMismatch { rows: usize, cols: usize },

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),
}

impl PredictError {
    /// HTTP status for this error. Missing or unusable input is the
    /// client's problem; decode and inference failures are ours.
    pub fn status_code(&self) -> u16 {
        match self {
            PredictError::MissingImage
            | PredictError::EmptyFilename
            | PredictError::Malformed(_)
            | PredictError::ShapeMismatch { .. } => 400,
            PredictError::Decode(_) | PredictError::Inference(_) => 500,
        }
    }
}
