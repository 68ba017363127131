//! Nearest-gallery matching over all enrolled persons.
//!
//! A gallery's score is the minimum cosine distance from the probe to any of
//! its vectors: a person matches if any single enrolled photo is close
//! enough. The winner is the candidate with the globally smallest minimum
//! distance at or under the threshold.

use crate::types::{DimensionMismatch, Embedding};

/// One person's enrolled embeddings, loaded from the gallery store.
#[derive(Debug, Clone)]
pub struct EnrolledGallery {
    pub person_id: i64,
    pub embeddings: Vec<Embedding>,
}

/// Outcome of identifying a probe against the full enrolled population.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Identified { person_id: i64, distance: f32 },
    NoMatch,
}

/// Strategy for identifying a probe embedding among enrolled galleries.
pub trait Matcher {
    fn identify(
        &self,
        probe: &Embedding,
        galleries: &[EnrolledGallery],
        threshold: f32,
    ) -> Result<MatchDecision, DimensionMismatch>;
}

/// Brute-force linear scan over every vector of every gallery.
///
/// Exact ties on the minimum distance keep the gallery that appears first in
/// `galleries`; callers enumerate in ascending person-id order, so ties
/// resolve deterministically to the lowest id.
pub struct NearestGalleryMatcher;

impl Matcher for NearestGalleryMatcher {
    fn identify(
        &self,
        probe: &Embedding,
        galleries: &[EnrolledGallery],
        threshold: f32,
    ) -> Result<MatchDecision, DimensionMismatch> {
        let mut best: Option<(i64, f32)> = None;

        for gallery in galleries {
            // An empty gallery contributes no candidate.
            let mut min_dist: Option<f32> = None;
            for embedding in &gallery.embeddings {
                let d = probe.cosine_distance(embedding)?;
                min_dist = Some(match min_dist {
                    Some(m) if m <= d => m,
                    _ => d,
                });
            }
            let Some(score) = min_dist else { continue };

            tracing::debug!(
                person_id = gallery.person_id,
                distance = score,
                "gallery scored"
            );

            if score <= threshold {
                // Strict `<` keeps the earlier gallery on an exact tie.
                let better = match best {
                    None => true,
                    Some((_, b)) => score < b,
                };
                if better {
                    best = Some((gallery.person_id, score));
                }
            }
        }

        Ok(match best {
            Some((person_id, distance)) => MatchDecision::Identified {
                person_id,
                distance,
            },
            None => MatchDecision::NoMatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(person_id: i64, vectors: &[&[f32]]) -> EnrolledGallery {
        EnrolledGallery {
            person_id,
            embeddings: vectors.iter().map(|v| Embedding::new(v.to_vec())).collect(),
        }
    }

    #[test]
    fn test_closest_candidate_wins() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        // Alice is about 0.02 away, Bob about 0.29; both under 0.35.
        let galleries = vec![
            gallery(1, &[&[0.98, 0.2]]),
            gallery(2, &[&[0.5, 0.5]]),
        ];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 0.35)
            .unwrap();
        match decision {
            MatchDecision::Identified { person_id, distance } => {
                assert_eq!(person_id, 1);
                assert!(distance < 0.05, "distance = {distance}");
            }
            MatchDecision::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_tight_threshold_rejects_all() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let galleries = vec![
            gallery(1, &[&[0.98, 0.2]]),
            gallery(2, &[&[0.5, 0.5]]),
        ];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 0.01)
            .unwrap();
        assert_eq!(decision, MatchDecision::NoMatch);
    }

    #[test]
    fn test_gallery_scored_by_its_best_vector() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        // Far vector first, near-identical vector last: the minimum must win,
        // so the whole gallery still matches.
        let galleries = vec![gallery(7, &[&[0.0, 1.0], &[-1.0, 0.0], &[1.0, 0.01]])];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 0.35)
            .unwrap();
        match decision {
            MatchDecision::Identified { person_id, distance } => {
                assert_eq!(person_id, 7);
                assert!(distance < 0.01, "distance = {distance}");
            }
            MatchDecision::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_empty_gallery_is_never_identified() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let galleries = vec![gallery(1, &[]), gallery(2, &[&[1.0, 0.0]])];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 0.35)
            .unwrap();
        match decision {
            MatchDecision::Identified { person_id, .. } => assert_eq!(person_id, 2),
            MatchDecision::NoMatch => panic!("expected person 2 to match"),
        }
    }

    #[test]
    fn test_only_empty_galleries_yield_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let galleries = vec![gallery(1, &[]), gallery(2, &[])];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 2.0)
            .unwrap();
        assert_eq!(decision, MatchDecision::NoMatch);
    }

    #[test]
    fn test_exact_tie_keeps_first_enumerated() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        // Identical vectors in both galleries: identical minimum distances.
        let galleries = vec![
            gallery(3, &[&[1.0, 0.5]]),
            gallery(9, &[&[1.0, 0.5]]),
        ];

        let decision = NearestGalleryMatcher
            .identify(&probe, &galleries, 0.35)
            .unwrap();
        match decision {
            MatchDecision::Identified { person_id, .. } => assert_eq!(person_id, 3),
            MatchDecision::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_probe_dimension_mismatch_is_an_error() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let galleries = vec![gallery(1, &[&[1.0, 0.0]])];

        let result = NearestGalleryMatcher.identify(&probe, &galleries, 0.35);
        assert_eq!(
            result,
            Err(DimensionMismatch {
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn test_no_galleries_yields_no_match() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let decision = NearestGalleryMatcher.identify(&probe, &[], 2.0).unwrap();
        assert_eq!(decision, MatchDecision::NoMatch);
    }
}
