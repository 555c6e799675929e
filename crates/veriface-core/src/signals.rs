//! The anti-spoofing signal battery.
//!
//! A fixed, ordered set of independent detectors. Each consumes the shared
//! read-only [`SignalContext`] and produces one [`SpoofFinding`]; none of
//! them mutates anything, so they can run in any order. The battery always
//! emits every signal's finding — clear findings carry `triggered: false`
//! and a zero penalty — so reports stay structurally identical across
//! requests.

use serde::{Deserialize, Serialize};

use crate::analysis::{self, ImageMetrics};
use crate::frame::{DecodedImage, ExifSummary};
use crate::policy::LivenessPolicy;
use crate::types::DetectionOutcome;

/// Identity of one spoof signal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ExifTooling,
    FrameBorder,
    MoirePattern,
    FlatHistogram,
    LowTexture,
    DetectorFailed,
    NoFace,
    MultipleFaces,
    LowConfidence,
    FaceTooSmall,
    FaceTooClose,
    Blur,
    Brightness,
    Resolution,
    FlatLighting,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExifTooling => "exif_tooling",
            Self::FrameBorder => "frame_border",
            Self::MoirePattern => "moire_pattern",
            Self::FlatHistogram => "flat_histogram",
            Self::LowTexture => "low_texture",
            Self::DetectorFailed => "detector_failed",
            Self::NoFace => "no_face",
            Self::MultipleFaces => "multiple_faces",
            Self::LowConfidence => "low_confidence",
            Self::FaceTooSmall => "face_too_small",
            Self::FaceTooClose => "face_too_close",
            Self::Blur => "blur",
            Self::Brightness => "brightness",
            Self::Resolution => "resolution",
            Self::FlatLighting => "flat_lighting",
        }
    }
}

/// Outcome of one signal evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoofFinding {
    pub signal: SignalKind,
    pub triggered: bool,
    /// Confidence penalty; zero unless triggered.
    pub penalty: f64,
    /// Whether this signal vetoes acceptance when triggered.
    pub critical: bool,
    /// User-facing explanation; empty unless triggered.
    pub message: String,
}

impl SpoofFinding {
    fn clear(signal: SignalKind, policy: &LivenessPolicy) -> Self {
        Self {
            signal,
            triggered: false,
            penalty: 0.0,
            critical: policy.is_critical(signal),
            message: String::new(),
        }
    }

    fn hit(signal: SignalKind, penalty: f64, policy: &LivenessPolicy, message: &str) -> Self {
        Self {
            signal,
            triggered: true,
            penalty,
            critical: policy.is_critical(signal),
            message: message.to_string(),
        }
    }
}

/// Everything a signal may read. Built once per request.
pub struct SignalContext<'a> {
    pub image: &'a DecodedImage,
    pub metrics: &'a ImageMetrics,
    pub exif: &'a ExifSummary,
    pub detection: &'a DetectionOutcome,
}

/// Run the full battery in its fixed order.
pub fn run_battery(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> Vec<SpoofFinding> {
    let mut findings = vec![
        exif_tooling(ctx, policy),
        frame_border(ctx, policy),
        moire_pattern(ctx, policy),
        flat_histogram(ctx, policy),
        low_texture(ctx, policy),
    ];
    findings.extend(face_findings(ctx, policy));
    findings.extend([
        blur(ctx, policy),
        brightness(ctx, policy),
        resolution(ctx, policy),
        flat_lighting(ctx, policy),
    ]);
    findings
}

/// EXIF Software or Make field names a known screenshot tool.
fn exif_tooling(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let software = ctx
        .exif
        .software
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let make = ctx.exif.make.as_deref().unwrap_or_default().to_lowercase();
    let matched = policy.thresholds.screenshot_keywords.iter().any(|keyword| {
        (!software.is_empty() && software.contains(keyword.as_str()))
            || (!make.is_empty() && make.contains(keyword.as_str()))
    });

    if matched {
        tracing::warn!(%software, %make, "screenshot tool detected via EXIF");
        SpoofFinding::hit(
            SignalKind::ExifTooling,
            policy.penalties.exif_tooling,
            policy,
            "Screenshot detected - use live camera",
        )
    } else {
        SpoofFinding::clear(SignalKind::ExifTooling, policy)
    }
}

/// A large rectangular edge contour anchored at the top-left corner —
/// the border of a photographed photo.
fn frame_border(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let t = &policy.thresholds;
    match analysis::find_frame_border(
        ctx.image.gray(),
        t.border_area_ratio,
        t.border_aspect_min,
        t.border_aspect_max,
        t.border_corner_margin,
    ) {
        Some(border) => {
            tracing::warn!(
                area_ratio = border.area_ratio,
                aspect_ratio = border.aspect_ratio,
                "photo frame border detected"
            );
            SpoofFinding::hit(
                SignalKind::FrameBorder,
                policy.penalties.frame_border,
                policy,
                "Photo frame borders detected - use live camera",
            )
        }
        None => SpoofFinding::clear(SignalKind::FrameBorder, policy),
    }
}

/// Periodic interference typical of photographed screens.
fn moire_pattern(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let mean = ctx.metrics.frequency_mean;
    if mean > policy.thresholds.moire_spectrum_mean {
        tracing::warn!(spectrum_mean = mean, "moiré pattern detected");
        SpoofFinding::hit(
            SignalKind::MoirePattern,
            policy.penalties.moire_pattern,
            policy,
            "Screen moiré pattern detected",
        )
    } else {
        SpoofFinding::clear(SignalKind::MoirePattern, policy)
    }
}

/// Flattened color histograms suggest a processed or re-encoded image.
fn flat_histogram(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let flatness = ctx.metrics.histogram_flatness;
    if flatness < policy.thresholds.histogram_flatness {
        tracing::warn!(histogram_stddev = flatness, "suspicious color distribution");
        SpoofFinding::hit(
            SignalKind::FlatHistogram,
            policy.penalties.flat_histogram,
            policy,
            "Unnatural color distribution detected",
        )
    } else {
        SpoofFinding::clear(SignalKind::FlatHistogram, policy)
    }
}

/// Low texture variance reads as a printed or displayed reproduction.
fn low_texture(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let variance = ctx.metrics.lbp_variance;
    if variance < policy.thresholds.lbp_variance {
        tracing::warn!(lbp_variance = variance, "low texture variance");
        SpoofFinding::hit(
            SignalKind::LowTexture,
            policy.penalties.low_texture,
            policy,
            "Suspicious texture pattern - may be printed photo",
        )
    } else {
        SpoofFinding::clear(SignalKind::LowTexture, policy)
    }
}

/// Findings derived from the detector outcome: availability, face count,
/// detector confidence, and face size/position.
fn face_findings(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> Vec<SpoofFinding> {
    let mut findings = vec![
        SpoofFinding::clear(SignalKind::DetectorFailed, policy),
        SpoofFinding::clear(SignalKind::NoFace, policy),
        SpoofFinding::clear(SignalKind::MultipleFaces, policy),
        SpoofFinding::clear(SignalKind::LowConfidence, policy),
        SpoofFinding::clear(SignalKind::FaceTooSmall, policy),
        SpoofFinding::clear(SignalKind::FaceTooClose, policy),
    ];

    match ctx.detection {
        DetectionOutcome::Unavailable { reason } => {
            tracing::error!(%reason, "face detection failed");
            findings[0] = SpoofFinding::hit(
                SignalKind::DetectorFailed,
                policy.penalties.detector_failed,
                policy,
                "Face detection failed",
            );
        }
        DetectionOutcome::NoFace => {
            findings[1] = SpoofFinding::hit(
                SignalKind::NoFace,
                policy.penalties.no_face,
                policy,
                "No face detected",
            );
        }
        DetectionOutcome::Multiple(faces) => {
            tracing::warn!(count = faces.len(), "multiple faces in frame");
            findings[2] = SpoofFinding::hit(
                SignalKind::MultipleFaces,
                policy.penalties.multiple_faces,
                policy,
                "Multiple faces detected - only one person allowed",
            );
        }
        DetectionOutcome::Single(face) => {
            let t = &policy.thresholds;
            if (face.confidence as f64) < t.min_detector_confidence {
                findings[3] = SpoofFinding::hit(
                    SignalKind::LowConfidence,
                    policy.penalties.low_confidence,
                    policy,
                    "Face detection confidence too low",
                );
            }

            let face_ratio = face.bbox.area() as f64 / ctx.image.area() as f64;
            if face_ratio < t.min_face_ratio {
                findings[4] = SpoofFinding::hit(
                    SignalKind::FaceTooSmall,
                    policy.penalties.face_too_small,
                    policy,
                    "Face too small - move closer to camera",
                );
            } else if face_ratio > t.max_face_ratio {
                findings[5] = SpoofFinding::hit(
                    SignalKind::FaceTooClose,
                    policy.penalties.face_too_close,
                    policy,
                    "Face too close - move back slightly",
                );
            }
        }
    }

    findings
}

/// Laplacian sharpness below the acceptable floor.
fn blur(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    if ctx.metrics.blur_score < policy.thresholds.blur_variance {
        SpoofFinding::hit(
            SignalKind::Blur,
            policy.penalties.blur,
            policy,
            "Image too blurry - hold camera steady",
        )
    } else {
        SpoofFinding::clear(SignalKind::Blur, policy)
    }
}

/// Mean brightness outside the acceptable band.
fn brightness(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let value = ctx.metrics.brightness;
    let t = &policy.thresholds;
    if value < t.min_brightness {
        SpoofFinding::hit(
            SignalKind::Brightness,
            policy.penalties.brightness,
            policy,
            "Image too dark - improve lighting",
        )
    } else if value > t.max_brightness {
        SpoofFinding::hit(
            SignalKind::Brightness,
            policy.penalties.brightness,
            policy,
            "Image too bright - reduce lighting",
        )
    } else {
        SpoofFinding::clear(SignalKind::Brightness, policy)
    }
}

/// Image dimensions below the minimum capture resolution.
fn resolution(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let t = &policy.thresholds;
    if ctx.metrics.width < t.min_width || ctx.metrics.height < t.min_height {
        SpoofFinding::hit(
            SignalKind::Resolution,
            policy.penalties.resolution,
            policy,
            "Image resolution too low - use better camera",
        )
    } else {
        SpoofFinding::clear(SignalKind::Resolution, policy)
    }
}

/// Flat value-channel variance — printed photos lack the uneven specular
/// reflection of live skin.
fn flat_lighting(ctx: &SignalContext<'_>, policy: &LivenessPolicy) -> SpoofFinding {
    let variance = ctx.metrics.brightness_variance;
    if variance < policy.thresholds.lighting_variance {
        tracing::warn!(brightness_variance = variance, "flat lighting");
        SpoofFinding::hit(
            SignalKind::FlatLighting,
            policy.penalties.flat_lighting,
            policy,
            "Unnatural lighting detected - use live camera",
        )
    } else {
        SpoofFinding::clear(SignalKind::FlatLighting, policy)
    }
}
