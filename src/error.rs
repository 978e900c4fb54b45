use thiserror::Error;

/// Raw model output that does not fit the body schema.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("pose has {got} keypoints, schema allows at most {max}")]
    TooManyKeypoints { got: usize, max: usize },
    #[error("keypoint {index} has a non-finite coordinate or visibility")]
    NonFinite { index: usize },
}

/// Failures reported by a pose source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Acquisition failed; retried up to the configured attempt count.
    #[error("pose source unavailable: {0}")]
    Unavailable(String),
    /// A single frame could not be read; the loop sleeps and retries.
    #[error("frame read failed: {0}")]
    Read(String),
    /// Pose estimation failed for one frame; that cycle has no candidates.
    #[error("inference failed: {0}")]
    Inference(String),
    /// The source has no more frames (end of a replay).
    #[error("pose source exhausted")]
    Exhausted,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A previous producer never handed the source back.
    #[error("pose source is still held by a producer that did not stop")]
    SourceBusy,
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),
}
