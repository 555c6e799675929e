//! veriface-service — Service facade over the decision core.
//!
//! Wires the matcher and liveness engine to the external collaborators
//! (face detector, identity database) and exposes the four authentication
//! flows — register, verify, identify, liveness — as async operations on an
//! [`engine::EngineHandle`]. The HTTP layer, token issuance, and storage
//! backends live elsewhere and consume this crate.

pub mod config;
pub mod engine;
pub mod store;

pub use config::ServiceConfig;
pub use engine::{spawn_engine, EngineHandle, ServiceError, VerifyResult};
pub use store::{AuditEntry, AuditEvent, EnrollmentRecord, FaceStore, StoreError};
