use std::path::Path;

use veriface_core::{LivenessPolicy, PolicyError};

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Distance threshold for verification and identification matches.
    pub match_threshold: f32,
    /// Distance threshold for the duplicate-registration guard.
    pub duplicate_threshold: f32,
    /// Liveness policy (reference defaults, or a TOML file).
    pub policy: LivenessPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.4,
            duplicate_threshold: 0.4,
            policy: LivenessPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `VERIFACE_*` environment variables.
    ///
    /// `VERIFACE_POLICY_PATH` points to a TOML policy file; without it the
    /// reference policy applies. An unreadable or invalid policy file is a
    /// startup failure.
    pub fn from_env() -> Result<Self, PolicyError> {
        let policy = match std::env::var("VERIFACE_POLICY_PATH") {
            Ok(path) => LivenessPolicy::from_toml_file(Path::new(&path))?,
            Err(_) => LivenessPolicy::default(),
        };

        Ok(Self {
            match_threshold: env_f32("VERIFACE_MATCH_THRESHOLD", 0.4),
            duplicate_threshold: env_f32("VERIFACE_DUPLICATE_THRESHOLD", 0.4),
            policy,
        })
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
