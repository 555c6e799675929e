//! Adapter contract toward the external face detector/embedder.
//!
//! The neural model is a black box owned by another component; this crate
//! only defines the seam. Implementations return detection outcomes as data
//! (see [`DetectionOutcome`]) — a detector that cannot run reports
//! `Unavailable`, it does not panic or throw through the core.

use thiserror::Error;

use crate::frame::DecodedImage;
use crate::types::{DetectedFace, DetectionOutcome, Embedding};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector unavailable: {0}")]
    Unavailable(String),
}

/// External face detector/embedder.
///
/// `&mut self` because real backends hold inference sessions; the service
/// engine gives each detector a dedicated thread.
pub trait FaceDetector: Send {
    /// Locate faces in the image.
    fn detect(&mut self, image: &DecodedImage) -> DetectionOutcome;

    /// Extract a fixed-dimension embedding for one detected face.
    fn embed(
        &mut self,
        image: &DecodedImage,
        face: &DetectedFace,
    ) -> Result<Embedding, DetectorError>;
}
