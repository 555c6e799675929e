//! Embedding-distance identity matching.
//!
//! Embeddings are L2-normalized before comparison, so Euclidean distance is
//! bounded by unit-vector geometry ([0, 2]) and a single linear map converts
//! distance to a similarity percentage.
//!
//! Two scan strategies are provided on purpose:
//! - [`find_duplicate`] returns the *first* candidate below threshold
//!   (registration guard — any sufficiently close match is disqualifying,
//!   so cheap early rejection wins).
//! - [`find_best_match`] scans *all* candidates and returns the closest one
//!   below threshold (identification — precision matters more than latency).

use thiserror::Error;

use crate::types::{Embedding, MatchCandidate, MatchResult};

/// Empirical maximum distance between unrelated normalized embeddings for
/// the reference embedding model. Configurable per model via
/// [`crate::policy::LivenessPolicy::max_distance`].
pub const DEFAULT_MAX_DISTANCE: f32 = 1.4;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("degenerate embedding: zero or non-finite norm")]
    DegenerateEmbedding,
}

/// An embedding with unit L2 norm. Only constructed via [`normalize`];
/// derived per comparison, never persisted.
#[derive(Debug, Clone)]
pub struct NormalizedEmbedding(Vec<f32>);

impl NormalizedEmbedding {
    pub fn values(&self) -> &[f32] {
        &self.0
    }
}

/// Divide every component by the vector's L2 norm.
///
/// Fails on empty, zero-norm, or non-finite input — a degenerate embedding
/// must reject the request, never silently behave like a match.
pub fn normalize(embedding: &Embedding) -> Result<NormalizedEmbedding, MatcherError> {
    if embedding.values.is_empty() {
        return Err(MatcherError::DegenerateEmbedding);
    }

    let norm: f32 = embedding.values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(MatcherError::DegenerateEmbedding);
    }

    Ok(NormalizedEmbedding(
        embedding.values.iter().map(|x| x / norm).collect(),
    ))
}

/// Euclidean distance between two normalized embeddings.
///
/// Symmetric; zero for identical inputs. Dimensions beyond the shorter
/// vector are ignored — callers are expected to compare embeddings from the
/// same model.
pub fn distance(a: &NormalizedEmbedding, b: &NormalizedEmbedding) -> f32 {
    a.values()
        .iter()
        .zip(b.values().iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Map a distance to a similarity percentage: `100 * (1 - d/max_distance)`,
/// clamped to [0, 100]. Distance 0 → 100%, distance ≥ max_distance → 0%.
pub fn similarity_percent(distance: f32, max_distance: f32) -> f32 {
    100.0 * (1.0 - distance / max_distance).clamp(0.0, 1.0)
}

/// Round to two decimals for report output.
fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// The closest enrolled identity found by [`find_best_match`].
#[derive(Debug, Clone)]
pub struct BestMatch<'a> {
    pub candidate: &'a MatchCandidate,
    pub distance: f32,
}

/// Scan candidates in stored order and return the **first** one whose
/// distance to `probe` is below `threshold`.
///
/// Used to block duplicate registrations: any hit is disqualifying, so the
/// scan exits early rather than hunting for the globally closest match.
/// Candidates with degenerate stored embeddings are skipped with a warning —
/// they can never match anything.
pub fn find_duplicate(
    probe: &Embedding,
    candidates: &[MatchCandidate],
    threshold: f32,
    max_distance: f32,
) -> Result<Option<MatchResult>, MatcherError> {
    let probe = normalize(probe)?;

    for candidate in candidates {
        let stored = match normalize(&candidate.embedding) {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    user_id = %candidate.user_id,
                    "skipping candidate with degenerate stored embedding"
                );
                continue;
            }
        };

        let d = distance(&probe, &stored);
        if d < threshold {
            return Ok(Some(MatchResult {
                matched: true,
                user_id: candidate.user_id.clone(),
                username: candidate.username.clone(),
                email: candidate.email.clone(),
                distance: d,
                similarity_percentage: round2(similarity_percent(d, max_distance)),
            }));
        }
    }

    Ok(None)
}

/// Scan **all** candidates and return the one with the smallest distance to
/// `probe`, provided that distance is below `threshold`.
///
/// Used for identification, where returning the closest identity matters
/// more than scan latency.
pub fn find_best_match<'a>(
    probe: &Embedding,
    candidates: &'a [MatchCandidate],
    threshold: f32,
) -> Result<Option<BestMatch<'a>>, MatcherError> {
    let probe = normalize(probe)?;

    let mut best: Option<BestMatch<'a>> = None;

    for candidate in candidates {
        let stored = match normalize(&candidate.embedding) {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    user_id = %candidate.user_id,
                    "skipping candidate with degenerate stored embedding"
                );
                continue;
            }
        };

        let d = distance(&probe, &stored);
        let is_better = match &best {
            None => true,
            Some(prev) => d < prev.distance,
        };
        if is_better {
            best = Some(BestMatch {
                candidate,
                distance: d,
            });
        }
    }

    Ok(best.filter(|m| m.distance < threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn candidate(user_id: &str, values: &[f32]) -> MatchCandidate {
        MatchCandidate {
            user_id: user_id.into(),
            username: format!("user-{user_id}"),
            email: format!("{user_id}@example.com"),
            embedding: embedding(values),
        }
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let cases = [
            vec![3.0, 4.0],
            vec![1.0, 1.0, 1.0, 1.0],
            vec![-2.5, 0.0, 7.1],
            vec![0.001, 0.002],
        ];
        for values in cases {
            let n = normalize(&embedding(&values)).unwrap();
            let norm: f32 = n.values().iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm {norm} for {values:?}");
        }
    }

    #[test]
    fn normalize_rejects_zero_vector() {
        assert!(matches!(
            normalize(&embedding(&[0.0, 0.0, 0.0])),
            Err(MatcherError::DegenerateEmbedding)
        ));
    }

    #[test]
    fn normalize_rejects_empty_vector() {
        assert!(matches!(
            normalize(&embedding(&[])),
            Err(MatcherError::DegenerateEmbedding)
        ));
    }

    #[test]
    fn normalize_rejects_non_finite() {
        assert!(normalize(&embedding(&[f32::NAN, 1.0])).is_err());
        assert!(normalize(&embedding(&[f32::INFINITY, 1.0])).is_err());
    }

    #[test]
    fn distance_is_zero_on_self() {
        let n = normalize(&embedding(&[0.3, -0.2, 0.9])).unwrap();
        assert!(distance(&n, &n).abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = normalize(&embedding(&[1.0, 2.0, 3.0])).unwrap();
        let b = normalize(&embedding(&[-1.0, 0.5, 2.0])).unwrap();
        assert!((distance(&a, &b) - distance(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn distance_of_opposite_unit_vectors_is_two() {
        let a = normalize(&embedding(&[1.0, 0.0])).unwrap();
        let b = normalize(&embedding(&[-1.0, 0.0])).unwrap();
        assert!((distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_endpoints() {
        assert!((similarity_percent(0.0, DEFAULT_MAX_DISTANCE) - 100.0).abs() < 1e-6);
        assert_eq!(similarity_percent(1.4, DEFAULT_MAX_DISTANCE), 0.0);
        assert_eq!(similarity_percent(2.0, DEFAULT_MAX_DISTANCE), 0.0);
    }

    #[test]
    fn similarity_is_monotonically_non_increasing() {
        let mut prev = f32::INFINITY;
        for i in 0..30 {
            let d = i as f32 * 0.05;
            let s = similarity_percent(d, DEFAULT_MAX_DISTANCE);
            assert!(s <= prev, "similarity increased at d={d}");
            assert!((0.0..=100.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn find_duplicate_returns_first_below_threshold() {
        // Both candidates are within threshold of the probe; the one stored
        // first must win, even though the second is closer.
        let probe = embedding(&[1.0, 0.05, 0.0]);
        let candidates = vec![
            candidate("further", &[1.0, 0.3, 0.0]),
            candidate("closer", &[1.0, 0.05, 0.0]),
        ];

        let result = find_duplicate(&probe, &candidates, 0.4, DEFAULT_MAX_DISTANCE)
            .unwrap()
            .unwrap();
        assert!(result.matched);
        assert_eq!(result.user_id, "further");
    }

    #[test]
    fn find_duplicate_none_when_all_beyond_threshold() {
        let probe = embedding(&[1.0, 0.0, 0.0]);
        let candidates = vec![
            candidate("a", &[0.0, 1.0, 0.0]),
            candidate("b", &[0.0, 0.0, 1.0]),
        ];
        let result = find_duplicate(&probe, &candidates, 0.4, DEFAULT_MAX_DISTANCE).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn find_duplicate_rejects_degenerate_probe() {
        let candidates = vec![candidate("a", &[1.0, 0.0])];
        assert!(find_duplicate(&embedding(&[0.0, 0.0]), &candidates, 0.4, 1.4).is_err());
    }

    #[test]
    fn find_duplicate_skips_degenerate_candidate() {
        let probe = embedding(&[1.0, 0.0]);
        let candidates = vec![candidate("zero", &[0.0, 0.0]), candidate("ok", &[1.0, 0.0])];
        let result = find_duplicate(&probe, &candidates, 0.4, DEFAULT_MAX_DISTANCE)
            .unwrap()
            .unwrap();
        assert_eq!(result.user_id, "ok");
    }

    #[test]
    fn find_best_match_returns_global_minimum() {
        // Stored order puts the worse candidate first; best-match must scan
        // past it and return the closer one.
        let probe = embedding(&[1.0, 0.05, 0.0]);
        let candidates = vec![
            candidate("further", &[1.0, 0.3, 0.0]),
            candidate("closer", &[1.0, 0.05, 0.0]),
        ];

        let best = find_best_match(&probe, &candidates, 0.4)
            .unwrap()
            .expect("should match");
        assert_eq!(best.candidate.user_id, "closer");
        assert!(best.distance < 1e-6);
    }

    #[test]
    fn find_best_match_none_when_best_is_beyond_threshold() {
        let probe = embedding(&[1.0, 0.0, 0.0]);
        let candidates = vec![candidate("a", &[0.0, 1.0, 0.0])];
        assert!(find_best_match(&probe, &candidates, 0.4).unwrap().is_none());
    }

    #[test]
    fn find_best_match_empty_gallery() {
        let probe = embedding(&[1.0, 0.0]);
        assert!(find_best_match(&probe, &[], 0.4).unwrap().is_none());
    }

    #[test]
    fn scan_strategies_diverge_on_ordering() {
        // Distances ≈ 0.2 and ≈ 0.5 against threshold 0.4: best-match picks
        // the 0.2 candidate; duplicate-scan returns the first stored one
        // below threshold (here the 0.2 candidate is the only one below).
        //
        // Construct unit vectors at known distances: for unit vectors,
        // d = sqrt(2 - 2cosθ) → cosθ = 1 - d²/2.
        let probe = embedding(&[1.0, 0.0]);
        let make_at = |d: f32| {
            let cos = 1.0 - d * d / 2.0;
            let sin = (1.0 - cos * cos).sqrt();
            vec![cos, sin]
        };
        let candidates = vec![
            candidate("far", &make_at(0.5)),
            candidate("near", &make_at(0.2)),
        ];

        let best = find_best_match(&probe, &candidates, 0.4).unwrap().unwrap();
        assert_eq!(best.candidate.user_id, "near");
        assert!((best.distance - 0.2).abs() < 1e-3);

        let dup = find_duplicate(&probe, &candidates, 0.4, DEFAULT_MAX_DISTANCE)
            .unwrap()
            .unwrap();
        assert_eq!(dup.user_id, "near");

        // With both below threshold, stored order wins for the duplicate scan.
        let candidates_both = vec![
            candidate("first", &make_at(0.3)),
            candidate("second", &make_at(0.2)),
        ];
        let dup = find_duplicate(&probe, &candidates_both, 0.4, DEFAULT_MAX_DISTANCE)
            .unwrap()
            .unwrap();
        assert_eq!(dup.user_id, "first");
    }

    #[test]
    fn duplicate_result_carries_similarity() {
        let probe = embedding(&[1.0, 0.0]);
        let candidates = vec![candidate("a", &[1.0, 0.0])];
        let result = find_duplicate(&probe, &candidates, 0.4, DEFAULT_MAX_DISTANCE)
            .unwrap()
            .unwrap();
        assert!((result.similarity_percentage - 100.0).abs() < 1e-3);
        assert_eq!(result.username, "user-a");
        assert_eq!(result.email, "a@example.com");
    }
}
