//! veriface-core — Face authentication decision core.
//!
//! Two tightly coupled pieces: embedding-distance identity matching with
//! duplicate-registration guarding, and a multi-signal liveness scorer that
//! fuses independent anti-spoofing detectors into one accept/reject verdict.
//!
//! Everything here is pure with respect to shared state: decisions depend
//! only on the request's image, the candidate set passed in, and the policy
//! configured at startup. The neural detector/embedder and the identity
//! database are external collaborators behind the [`detector::FaceDetector`]
//! seam and plain in-memory candidate slices.

pub mod analysis;
pub mod detector;
pub mod frame;
pub mod liveness;
pub mod matcher;
pub mod policy;
pub mod signals;
pub mod types;

pub use detector::{DetectorError, FaceDetector};
pub use frame::{DecodedImage, ExifSummary, ImageError};
pub use liveness::{Diagnostics, LivenessEngine, LivenessReport};
pub use matcher::{MatcherError, NormalizedEmbedding};
pub use policy::{LivenessPolicy, PolicyError};
pub use signals::{SignalKind, SpoofFinding};
pub use types::{
    DetectedFace, DetectionOutcome, Embedding, FaceBox, IdentifyResult, MatchCandidate,
    MatchResult,
};
