//! Engine thread and async handles.
//!
//! The detector owns an inference session and is not shareable, so it lives
//! on a dedicated OS thread; handlers talk to it over an mpsc channel with
//! oneshot replies. One request runs at a time per engine — concurrent
//! requests for *different* users may use separate engines, and the calling
//! layer is responsible for serializing writes to the *same* identity.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use serde::{Deserialize, Serialize};
use veriface_core::{
    matcher, DecodedImage, DetectedFace, DetectionOutcome, ExifSummary, FaceDetector,
    IdentifyResult, LivenessEngine, LivenessReport,
};

use crate::config::ServiceConfig;
use crate::store::{AuditEntry, AuditEvent, EnrollmentRecord, FaceStore, StoreError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] veriface_core::ImageError),
    #[error("no face detected in image")]
    NoFace,
    #[error("multiple faces detected ({0}); exactly one is required")]
    MultipleFaces(usize),
    #[error("face detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("face already registered to {username} ({email}), similarity {similarity_percentage}%")]
    DuplicateIdentity {
        username: String,
        email: String,
        similarity_percentage: f32,
    },
    #[error("no enrolled face for user {0}")]
    UnknownUser(String),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("matcher: {0}")]
    Matcher(#[from] veriface_core::MatcherError),
    #[error("policy: {0}")]
    Policy(#[from] veriface_core::PolicyError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of verifying a probe image against one enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub verified: bool,
    /// `max(0, 1 - distance/threshold)` when verified, else 0.
    pub confidence: f32,
    pub distance: f32,
    pub threshold: f32,
    pub user_id: String,
}

/// Messages sent from async handlers to the engine thread.
enum EngineRequest {
    Register {
        user_id: String,
        username: String,
        email: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollmentRecord, ServiceError>>,
    },
    Verify {
        user_id: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<VerifyResult, ServiceError>>,
    },
    Identify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<IdentifyResult, ServiceError>>,
    },
    Liveness {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<LivenessReport, ServiceError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll a new face with duplicate-registration guarding.
    pub async fn register(
        &self,
        user_id: &str,
        username: &str,
        email: &str,
        image: Vec<u8>,
    ) -> Result<EnrollmentRecord, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                user_id: user_id.to_string(),
                username: username.to_string(),
                email: email.to_string(),
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    /// Verify a probe image against one enrolled identity.
    pub async fn verify(&self, user_id: &str, image: Vec<u8>) -> Result<VerifyResult, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                user_id: user_id.to_string(),
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    /// Identify the closest enrolled identity for a probe image.
    pub async fn identify(&self, image: Vec<u8>) -> Result<IdentifyResult, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }

    /// Run the anti-spoofing battery and produce a liveness report.
    pub async fn check_liveness(&self, image: Vec<u8>) -> Result<LivenessReport, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Liveness {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Validates the policy up front (fail-fast: configuration errors are fatal
/// at startup, never per-request), then enters the request loop.
pub fn spawn_engine(
    mut detector: Box<dyn FaceDetector>,
    store: Arc<dyn FaceStore>,
    config: ServiceConfig,
) -> Result<EngineHandle, ServiceError> {
    let liveness = LivenessEngine::new(config.policy.clone())?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("veriface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register {
                        user_id,
                        username,
                        email,
                        image,
                        reply,
                    } => {
                        let result = run_register(
                            detector.as_mut(),
                            store.as_ref(),
                            &config,
                            &user_id,
                            &username,
                            &email,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        user_id,
                        image,
                        reply,
                    } => {
                        let result = run_verify(
                            detector.as_mut(),
                            store.as_ref(),
                            &config,
                            &user_id,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify { image, reply } => {
                        let result =
                            run_identify(detector.as_mut(), store.as_ref(), &config, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Liveness { image, reply } => {
                        let result =
                            run_liveness(detector.as_mut(), store.as_ref(), &liveness, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Map a detection outcome to the single face required by registration,
/// verification, and identification.
fn require_single_face(outcome: DetectionOutcome) -> Result<DetectedFace, ServiceError> {
    match outcome {
        DetectionOutcome::Single(face) => Ok(face),
        DetectionOutcome::NoFace => Err(ServiceError::NoFace),
        DetectionOutcome::Multiple(faces) => Err(ServiceError::MultipleFaces(faces.len())),
        DetectionOutcome::Unavailable { reason } => Err(ServiceError::DetectorUnavailable(reason)),
    }
}

/// Append an audit entry; failures are logged, never surfaced — the
/// authentication decision has already been made.
fn audit(store: &dyn FaceStore, event: AuditEvent, user_id: Option<&str>, detail: String) {
    let entry = AuditEntry::new(event, user_id, detail);
    if let Err(e) = store.append_audit(&entry) {
        tracing::warn!(error = %e, ?event, "audit append failed");
    }
}

/// Decode, detect, embed, guard against duplicates, persist.
fn run_register(
    detector: &mut dyn FaceDetector,
    store: &dyn FaceStore,
    config: &ServiceConfig,
    user_id: &str,
    username: &str,
    email: &str,
    image_bytes: &[u8],
) -> Result<EnrollmentRecord, ServiceError> {
    let image = DecodedImage::from_bytes(image_bytes)?;
    let face = require_single_face(detector.detect(&image))?;
    let embedding = detector
        .embed(&image, &face)
        .map_err(|e| ServiceError::DetectorUnavailable(e.to_string()))?;

    let candidates = store.all_candidates()?;
    if let Some(existing) = matcher::find_duplicate(
        &embedding,
        &candidates,
        config.duplicate_threshold,
        config.policy.max_distance,
    )? {
        tracing::warn!(
            user_id,
            existing_user = %existing.user_id,
            similarity = existing.similarity_percentage,
            "duplicate registration blocked"
        );
        audit(
            store,
            AuditEvent::RegistrationRejected,
            Some(user_id),
            format!("duplicate of user {}", existing.user_id),
        );
        return Err(ServiceError::DuplicateIdentity {
            username: existing.username,
            email: existing.email,
            similarity_percentage: existing.similarity_percentage,
        });
    }

    let record = EnrollmentRecord::new(user_id, username, email, embedding, face.confidence);
    store.save_enrollment(&record)?;
    audit(
        store,
        AuditEvent::Registration,
        Some(user_id),
        format!("enrolled {}", record.face_id),
    );
    tracing::info!(user_id, face_id = %record.face_id, "face registered");

    Ok(record)
}

/// Compare a probe image against one enrolled identity.
fn run_verify(
    detector: &mut dyn FaceDetector,
    store: &dyn FaceStore,
    config: &ServiceConfig,
    user_id: &str,
    image_bytes: &[u8],
) -> Result<VerifyResult, ServiceError> {
    let image = DecodedImage::from_bytes(image_bytes)?;
    let face = require_single_face(detector.detect(&image))?;
    let probe = detector
        .embed(&image, &face)
        .map_err(|e| ServiceError::DetectorUnavailable(e.to_string()))?;

    let candidate = store
        .find_candidate(user_id)?
        .ok_or_else(|| ServiceError::UnknownUser(user_id.to_string()))?;

    let probe_n = matcher::normalize(&probe)?;
    let stored_n = matcher::normalize(&candidate.embedding)?;
    let distance = matcher::distance(&probe_n, &stored_n);

    let threshold = config.match_threshold;
    let verified = distance < threshold;
    let confidence = if verified {
        (1.0 - distance / threshold).max(0.0)
    } else {
        0.0
    };

    audit(
        store,
        AuditEvent::Verification,
        Some(user_id),
        format!("verified={verified} distance={distance:.4}"),
    );
    tracing::info!(user_id, verified, distance, "face verification");

    Ok(VerifyResult {
        verified,
        confidence,
        distance,
        threshold,
        user_id: user_id.to_string(),
    })
}

/// Find the closest enrolled identity for a probe image.
fn run_identify(
    detector: &mut dyn FaceDetector,
    store: &dyn FaceStore,
    config: &ServiceConfig,
    image_bytes: &[u8],
) -> Result<IdentifyResult, ServiceError> {
    let image = DecodedImage::from_bytes(image_bytes)?;
    let face = require_single_face(detector.detect(&image))?;
    let probe = detector
        .embed(&image, &face)
        .map_err(|e| ServiceError::DetectorUnavailable(e.to_string()))?;

    let candidates = store.all_candidates()?;
    let best = matcher::find_best_match(&probe, &candidates, config.match_threshold)?;

    match best {
        Some(m) => {
            let confidence = (1.0 - m.distance / config.match_threshold).max(0.0);
            audit(
                store,
                AuditEvent::Identification,
                Some(&m.candidate.user_id),
                format!("distance={:.4}", m.distance),
            );
            tracing::info!(
                user_id = %m.candidate.user_id,
                distance = m.distance,
                confidence,
                "face identified"
            );
            Ok(IdentifyResult {
                identified: true,
                user_id: Some(m.candidate.user_id.clone()),
                confidence,
                distance: m.distance,
            })
        }
        None => {
            audit(store, AuditEvent::Identification, None, "no match".into());
            tracing::info!("no matching face found");
            Ok(IdentifyResult::none())
        }
    }
}

/// Run the anti-spoofing battery. A detector failure is recorded inside the
/// report; only an undecodable image is an error (precondition failure).
fn run_liveness(
    detector: &mut dyn FaceDetector,
    store: &dyn FaceStore,
    liveness: &LivenessEngine,
    image_bytes: &[u8],
) -> Result<LivenessReport, ServiceError> {
    let exif = ExifSummary::from_bytes(image_bytes);
    let image = DecodedImage::from_bytes(image_bytes)?;
    let detection = detector.detect(&image);

    let report = liveness.evaluate(&image, &exif, &detection);

    audit(
        store,
        AuditEvent::LivenessCheck,
        None,
        format!(
            "is_live={} confidence={:.1}",
            report.is_live, report.confidence
        ),
    );

    Ok(report)
}
