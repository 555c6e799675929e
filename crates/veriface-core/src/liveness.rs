//! Liveness decision engine.
//!
//! Aggregates the signal battery into a single confidence score and a
//! live/not-live verdict. Scoring is a single pass: start from 100, subtract
//! each triggered finding's penalty, clamp to [0, 100]. The verdict
//! additionally requires exactly one detected face and no triggered critical
//! signal — critical signals are disqualifying, not merely penalizing.
//!
//! The engine always produces a report for a decodable image: a detector
//! failure becomes the `detector_failed` finding with maximal penalty
//! instead of a propagated error.

use serde::{Deserialize, Serialize};

use crate::analysis::ImageMetrics;
use crate::frame::{DecodedImage, ExifSummary};
use crate::policy::{LivenessPolicy, PolicyError};
use crate::signals::{run_battery, SignalContext, SpoofFinding};
use crate::types::DetectionOutcome;

const MESSAGE_LIVE: &str = "Liveness verified successfully";
const MESSAGE_NOT_LIVE: &str = "Liveness check failed - please use live camera capture";

/// Raw measurement values included in every report, regardless of verdict,
/// for audit and threshold tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub faces_detected: usize,
    pub blur_score: f64,
    pub brightness: f64,
    pub brightness_variance: f64,
    pub lbp_variance: f64,
    /// "WxH"
    pub resolution: String,
}

/// The liveness verdict with full supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessReport {
    pub is_live: bool,
    pub confidence: f64,
    pub message: String,
    /// User-facing messages of the triggered findings.
    pub issues: Vec<String>,
    /// Every evaluated finding, in battery order.
    pub findings: Vec<SpoofFinding>,
    pub details: Diagnostics,
}

/// Single-pass score aggregation and decision rule.
pub fn score(findings: &[SpoofFinding], face_count: usize, live_threshold: f64) -> (f64, bool) {
    let mut confidence = 100.0f64;
    for finding in findings.iter().filter(|f| f.triggered) {
        confidence -= finding.penalty;
    }
    let confidence = confidence.clamp(0.0, 100.0);

    let critical_triggered = findings.iter().any(|f| f.triggered && f.critical);
    let is_live = confidence >= live_threshold && face_count == 1 && !critical_triggered;

    (confidence, is_live)
}

/// The liveness decision engine. Stateless per request; safe to share.
pub struct LivenessEngine {
    policy: LivenessPolicy,
}

impl LivenessEngine {
    /// Build an engine over a validated policy. Invalid policies are a
    /// startup failure of the owning service.
    pub fn new(policy: LivenessPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Run the battery and produce the verdict report.
    pub fn evaluate(
        &self,
        image: &DecodedImage,
        exif: &ExifSummary,
        detection: &DetectionOutcome,
    ) -> LivenessReport {
        let metrics = ImageMetrics::measure(image);
        let ctx = SignalContext {
            image,
            metrics: &metrics,
            exif,
            detection,
        };
        let findings = run_battery(&ctx, &self.policy);

        let face_count = detection.face_count();
        let (confidence, is_live) = score(&findings, face_count, self.policy.live_threshold);

        let issues: Vec<String> = findings
            .iter()
            .filter(|f| f.triggered)
            .map(|f| f.message.clone())
            .collect();

        if is_live {
            tracing::info!(confidence, "liveness verified");
        } else {
            tracing::warn!(confidence, issues = ?issues, "liveness check failed");
        }

        LivenessReport {
            is_live,
            confidence,
            message: if is_live { MESSAGE_LIVE } else { MESSAGE_NOT_LIVE }.to_string(),
            issues,
            findings,
            details: Diagnostics {
                faces_detected: face_count,
                blur_score: metrics.blur_score,
                brightness: metrics.brightness,
                brightness_variance: metrics.brightness_variance,
                lbp_variance: metrics.lbp_variance,
                resolution: metrics.resolution(),
            },
        }
    }
}
