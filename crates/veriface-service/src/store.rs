//! Storage collaborator contract.
//!
//! The core never opens a storage connection itself: enrolled candidates,
//! saved enrollments, and audit entries all go through [`FaceStore`], which
//! the owning service implements over its database. The trait is synchronous
//! — it is only called from the dedicated engine thread, which may block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use veriface_core::{Embedding, MatchCandidate};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(String),
}

/// A completed enrollment, as handed to the store and returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Stable face reference: `face_<user_id>_<uuid>`.
    pub face_id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub embedding: Embedding,
    pub detector_confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    pub fn new(
        user_id: &str,
        username: &str,
        email: &str,
        embedding: Embedding,
        detector_confidence: f32,
    ) -> Self {
        Self {
            face_id: format!("face_{}_{}", user_id, Uuid::new_v4()),
            user_id: user_id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            embedding,
            detector_confidence,
            created_at: Utc::now(),
        }
    }

    pub fn as_candidate(&self) -> MatchCandidate {
        MatchCandidate {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            embedding: self.embedding.clone(),
        }
    }
}

/// What happened, for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Registration,
    RegistrationRejected,
    Verification,
    Identification,
    LivenessCheck,
}

/// One authentication audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event: AuditEvent,
    pub user_id: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, user_id: Option<&str>, detail: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            user_id: user_id.map(String::from),
            detail,
            created_at: Utc::now(),
        }
    }
}

/// Identity database collaborator.
pub trait FaceStore: Send + Sync {
    /// All enrolled candidates, in stored order. Order matters: the
    /// duplicate guard returns the first hit.
    fn all_candidates(&self) -> Result<Vec<MatchCandidate>, StoreError>;

    /// One user's enrolled candidate, if any.
    fn find_candidate(&self, user_id: &str) -> Result<Option<MatchCandidate>, StoreError>;

    fn save_enrollment(&self, record: &EnrollmentRecord) -> Result<(), StoreError>;

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_record_face_id_format() {
        let record = EnrollmentRecord::new(
            "u42",
            "alice",
            "alice@example.com",
            Embedding::new(vec![1.0, 0.0]),
            0.93,
        );
        assert!(record.face_id.starts_with("face_u42_"));
        // face_id must embed a parseable UUID.
        let suffix = record.face_id.strip_prefix("face_u42_").unwrap();
        assert!(Uuid::parse_str(suffix).is_ok());
    }

    #[test]
    fn enrollment_records_get_distinct_ids() {
        let a = EnrollmentRecord::new("u", "n", "e", Embedding::new(vec![1.0]), 0.9);
        let b = EnrollmentRecord::new("u", "n", "e", Embedding::new(vec![1.0]), 0.9);
        assert_ne!(a.face_id, b.face_id);
    }

    #[test]
    fn candidate_projection_keeps_identity_fields() {
        let record = EnrollmentRecord::new(
            "u1",
            "bob",
            "bob@example.com",
            Embedding::new(vec![0.5, 0.5]),
            0.9,
        );
        let candidate = record.as_candidate();
        assert_eq!(candidate.user_id, "u1");
        assert_eq!(candidate.username, "bob");
        assert_eq!(candidate.embedding.values, vec![0.5, 0.5]);
    }

    #[test]
    fn audit_event_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEvent::RegistrationRejected).unwrap();
        assert_eq!(json, "\"registration_rejected\"");
    }
}
