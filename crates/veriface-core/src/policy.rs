//! Liveness policy — the named set of thresholds, penalties, and critical
//! signals driving the decision engine.
//!
//! Defaults mirror the reference policy the production thresholds were tuned
//! against (webcam captures, Facenet512 embeddings). Every number here is a
//! per-deployment calibration constant: differing cameras, resolutions, or
//! embedding models require retuning via a TOML policy file, not code
//! changes. Validation failures are fatal at the owning service's startup,
//! never per-request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use crate::signals::SignalKind;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy file: {0}")]
    Io(#[from] std::io::Error),
    #[error("policy parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Complete liveness/matching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LivenessPolicy {
    /// Minimum aggregate confidence for a live verdict.
    pub live_threshold: f64,
    /// Empirical maximum distance between unrelated normalized embeddings;
    /// scales the similarity percentage. Model-specific.
    pub max_distance: f32,
    /// Signals that veto a live verdict regardless of aggregate confidence.
    pub critical: BTreeSet<SignalKind>,
    pub thresholds: SignalThresholds,
    pub penalties: SignalPenalties,
}

/// Trigger thresholds, one per signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalThresholds {
    /// Substrings of the EXIF Software field marking screenshot tools.
    pub screenshot_keywords: Vec<String>,
    /// Frame-border contour: minimum fraction of image area.
    pub border_area_ratio: f64,
    /// Frame-border contour: acceptable aspect-ratio band (exclusive).
    pub border_aspect_min: f64,
    pub border_aspect_max: f64,
    /// Frame-border contour: maximum distance from the top-left corner (px).
    pub border_corner_margin: u32,
    /// Centered-spectrum mean above which moiré is assumed.
    pub moire_spectrum_mean: f64,
    /// Histogram stddev mean below which the color distribution is flat.
    pub histogram_flatness: f64,
    /// LBP variance below which the surface reads as reproduced.
    pub lbp_variance: f64,
    /// Minimum acceptable detector confidence for the single face.
    pub min_detector_confidence: f64,
    /// Face area as a fraction of image area: acceptable band.
    pub min_face_ratio: f64,
    pub max_face_ratio: f64,
    /// Laplacian variance below which the image is blurry.
    pub blur_variance: f64,
    /// Acceptable mean-brightness band.
    pub min_brightness: f64,
    pub max_brightness: f64,
    /// Minimum acceptable image dimensions.
    pub min_width: u32,
    pub min_height: u32,
    /// Value-channel variance below which lighting is suspiciously flat.
    pub lighting_variance: f64,
}

/// Confidence penalties, one per signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalPenalties {
    pub exif_tooling: f64,
    pub frame_border: f64,
    pub moire_pattern: f64,
    pub flat_histogram: f64,
    pub low_texture: f64,
    pub no_face: f64,
    pub multiple_faces: f64,
    pub low_confidence: f64,
    pub face_too_small: f64,
    pub face_too_close: f64,
    pub blur: f64,
    pub brightness: f64,
    pub resolution: f64,
    pub flat_lighting: f64,
    pub detector_failed: f64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            live_threshold: 40.0,
            max_distance: crate::matcher::DEFAULT_MAX_DISTANCE,
            critical: BTreeSet::from([SignalKind::ExifTooling, SignalKind::FrameBorder]),
            thresholds: SignalThresholds::default(),
            penalties: SignalPenalties::default(),
        }
    }
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            screenshot_keywords: ["snipping", "snagit", "greenshot", "lightshot", "screenshot"]
                .into_iter()
                .map(String::from)
                .collect(),
            border_area_ratio: 0.7,
            border_aspect_min: 0.8,
            border_aspect_max: 1.3,
            border_corner_margin: 10,
            moire_spectrum_mean: 280.0,
            histogram_flatness: 20.0,
            lbp_variance: 200.0,
            min_detector_confidence: 0.85,
            min_face_ratio: 0.08,
            max_face_ratio: 0.85,
            blur_variance: 30.0,
            min_brightness: 30.0,
            max_brightness: 230.0,
            min_width: 480,
            min_height: 360,
            lighting_variance: 100.0,
        }
    }
}

impl Default for SignalPenalties {
    fn default() -> Self {
        Self {
            exif_tooling: 80.0,
            frame_border: 50.0,
            moire_pattern: 30.0,
            flat_histogram: 15.0,
            low_texture: 15.0,
            no_face: 100.0,
            multiple_faces: 15.0,
            low_confidence: 15.0,
            face_too_small: 15.0,
            face_too_close: 10.0,
            blur: 15.0,
            brightness: 15.0,
            resolution: 15.0,
            flat_lighting: 15.0,
            detector_failed: 100.0,
        }
    }
}

impl LivenessPolicy {
    /// Load and validate a policy from a TOML file. Unrecognized option
    /// names are parse errors, not silently ignored.
    pub fn from_toml_file(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path)?;
        let policy: Self = toml::from_str(&text)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn is_critical(&self, signal: SignalKind) -> bool {
        self.critical.contains(&signal)
    }

    /// Check internal consistency. Called once by the owning service at
    /// startup; a failure here is fatal, never handled per-request.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |msg: String| Err(PolicyError::Invalid(msg));

        if !self.live_threshold.is_finite() || !(0.0..=100.0).contains(&self.live_threshold) {
            return invalid(format!(
                "live_threshold must be within [0, 100], got {}",
                self.live_threshold
            ));
        }
        if !self.max_distance.is_finite() || self.max_distance <= 0.0 {
            return invalid(format!(
                "max_distance must be positive, got {}",
                self.max_distance
            ));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("border_area_ratio", t.border_area_ratio),
            ("border_aspect_min", t.border_aspect_min),
            ("border_aspect_max", t.border_aspect_max),
            ("moire_spectrum_mean", t.moire_spectrum_mean),
            ("histogram_flatness", t.histogram_flatness),
            ("lbp_variance", t.lbp_variance),
            ("min_detector_confidence", t.min_detector_confidence),
            ("min_face_ratio", t.min_face_ratio),
            ("max_face_ratio", t.max_face_ratio),
            ("blur_variance", t.blur_variance),
            ("min_brightness", t.min_brightness),
            ("max_brightness", t.max_brightness),
            ("lighting_variance", t.lighting_variance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("threshold {name} must be non-negative, got {value}"));
            }
        }
        if t.border_aspect_min >= t.border_aspect_max {
            return invalid("border aspect band is empty".into());
        }
        if t.min_face_ratio >= t.max_face_ratio {
            return invalid("face ratio band is empty".into());
        }
        if t.min_brightness >= t.max_brightness {
            return invalid("brightness band is empty".into());
        }

        let p = &self.penalties;
        for (name, value) in [
            ("exif_tooling", p.exif_tooling),
            ("frame_border", p.frame_border),
            ("moire_pattern", p.moire_pattern),
            ("flat_histogram", p.flat_histogram),
            ("low_texture", p.low_texture),
            ("no_face", p.no_face),
            ("multiple_faces", p.multiple_faces),
            ("low_confidence", p.low_confidence),
            ("face_too_small", p.face_too_small),
            ("face_too_close", p.face_too_close),
            ("blur", p.blur),
            ("brightness", p.brightness),
            ("resolution", p.resolution),
            ("flat_lighting", p.flat_lighting),
            ("detector_failed", p.detector_failed),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("penalty {name} must be non-negative, got {value}"));
            }
        }

        Ok(())
    }
}
