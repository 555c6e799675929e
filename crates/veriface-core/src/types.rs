use serde::{Deserialize, Serialize};

/// Face embedding vector produced by the external embedder
/// (512-dimensional for the reference model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet512").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// An enrolled identity as read from the database collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub embedding: Embedding,
}

/// Bounding box for a detected face, in pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One face reported by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub confidence: f32,
}

/// Outcome of a face-detection call.
///
/// Detector outcomes are decision inputs, not control flow: the liveness
/// engine consumes every variant and still produces a report. Only the
/// single-face service operations (registration, identification) translate
/// `NoFace`/`Multiple` into caller-facing validation errors.
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    /// Exactly one face found.
    Single(DetectedFace),
    /// No face found.
    NoFace,
    /// More than one face found.
    Multiple(Vec<DetectedFace>),
    /// The detector itself failed to run.
    Unavailable { reason: String },
}

impl DetectionOutcome {
    /// Build an outcome from a raw face list.
    pub fn from_faces(mut faces: Vec<DetectedFace>) -> Self {
        match faces.len() {
            0 => Self::NoFace,
            1 => Self::Single(faces.remove(0)),
            _ => Self::Multiple(faces),
        }
    }

    pub fn face_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::NoFace | Self::Unavailable { .. } => 0,
            Self::Multiple(faces) => faces.len(),
        }
    }
}

/// Result of a duplicate-registration scan. Carries the colliding identity's
/// display info; whether the owning service exposes it is a policy decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub distance: f32,
    /// Linear similarity in [0, 100], rounded to two decimals.
    pub similarity_percentage: f32,
}

/// Result of an identification (login) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub identified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub confidence: f32,
    pub distance: f32,
}

impl IdentifyResult {
    /// The "no matching face" result.
    pub fn none() -> Self {
        Self {
            identified: false,
            user_id: None,
            confidence: 0.0,
            distance: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(conf: f32) -> DetectedFace {
        DetectedFace {
            bbox: FaceBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
            confidence: conf,
        }
    }

    #[test]
    fn outcome_from_empty_list_is_no_face() {
        let outcome = DetectionOutcome::from_faces(vec![]);
        assert!(matches!(outcome, DetectionOutcome::NoFace));
        assert_eq!(outcome.face_count(), 0);
    }

    #[test]
    fn outcome_from_single_face() {
        let outcome = DetectionOutcome::from_faces(vec![face(0.9)]);
        assert!(matches!(outcome, DetectionOutcome::Single(_)));
        assert_eq!(outcome.face_count(), 1);
    }

    #[test]
    fn outcome_from_many_faces() {
        let outcome = DetectionOutcome::from_faces(vec![face(0.9), face(0.8), face(0.7)]);
        assert_eq!(outcome.face_count(), 3);
    }

    #[test]
    fn unavailable_counts_as_zero_faces() {
        let outcome = DetectionOutcome::Unavailable {
            reason: "backend down".into(),
        };
        assert_eq!(outcome.face_count(), 0);
    }

    #[test]
    fn face_box_area() {
        let b = FaceBox {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 40.0,
        };
        assert!((b.area() - 2000.0).abs() < f32::EPSILON);
    }
}
