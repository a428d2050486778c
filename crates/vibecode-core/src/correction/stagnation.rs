//! Stagnation detection over the trailing diagnoses of a session.
//!
//! The score is the length of the trailing run of failures that are pairwise
//! near-identical: same kind, and for text-bearing kinds a detail similarity
//! at or above the configured ratio between every two members of the run.

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::config::StagnationSettings;
use crate::domain::Diagnosis;

/// Longer details are compared on their prefix only.
const MAX_COMPARED_CHARS: usize = 2_000;

/// Snapshot of the detector's view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagnationScore {
    /// Trailing pairwise near-identical failures, the latest included.
    pub run_length: usize,
    /// `run_length` reached the window.
    pub stagnant: bool,
    /// `run_length` reached the exhaustion threshold.
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagnationDetector {
    window: usize,
    threshold: usize,
    similarity: f64,
}

impl Default for StagnationDetector {
    fn default() -> Self {
        Self::new(&StagnationSettings::default())
    }
}

impl StagnationDetector {
    pub fn new(settings: &StagnationSettings) -> Self {
        Self {
            window: settings.window,
            threshold: settings.threshold,
            similarity: settings.similarity,
        }
    }

    /// Score the diagnoses of a session, oldest first.
    pub fn score<'a, I>(&self, diagnoses: I) -> StagnationScore
    where
        I: IntoIterator<Item = &'a Diagnosis>,
        I::IntoIter: DoubleEndedIterator,
    {
        let run_length = self.run_length(diagnoses);
        StagnationScore {
            run_length,
            stagnant: run_length >= self.window,
            exhausted: run_length >= self.threshold,
        }
    }

    pub fn is_stagnant<'a, I>(&self, diagnoses: I) -> bool
    where
        I: IntoIterator<Item = &'a Diagnosis>,
        I::IntoIter: DoubleEndedIterator,
    {
        self.score(diagnoses).stagnant
    }

    fn run_length<'a, I>(&self, diagnoses: I) -> usize
    where
        I: IntoIterator<Item = &'a Diagnosis>,
        I::IntoIter: DoubleEndedIterator,
    {
        let mut run: Vec<&Diagnosis> = Vec::new();
        for diagnosis in diagnoses.into_iter().rev() {
            if diagnosis.is_success()
                || !run.iter().all(|member| self.near_duplicate(member, diagnosis))
            {
                break;
            }
            run.push(diagnosis);
        }
        run.len()
    }

    /// Same kind, and near-identical detail where the kind carries text.
    pub fn near_duplicate(&self, a: &Diagnosis, b: &Diagnosis) -> bool {
        if a.kind() != b.kind() {
            return false;
        }
        match (a.detail(), b.detail()) {
            (None, None) => true,
            (Some(x), Some(y)) => x == y || self.ratio(&x, &y) >= self.similarity,
            _ => false,
        }
    }

    fn ratio(&self, a: &str, b: &str) -> f64 {
        let a: String = a.chars().take(MAX_COMPARED_CHARS).collect();
        let b: String = b.chars().take(MAX_COMPARED_CHARS).collect();
        f64::from(TextDiff::from_chars(a.as_str(), b.as_str()).ratio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(detail: &str) -> Diagnosis {
        Diagnosis::RuntimeError {
            detail: detail.into(),
            stack: vec![],
        }
    }

    #[test]
    fn test_empty_and_success_score_zero() {
        let d = StagnationDetector::default();
        assert_eq!(d.score(&[]).run_length, 0);
        assert_eq!(d.score(&[Diagnosis::Timeout, Diagnosis::Success]).run_length, 0);
    }

    #[test]
    fn test_identical_timeouts_build_a_run() {
        let d = StagnationDetector::default();
        let history = vec![Diagnosis::Timeout; 3];
        let score = d.score(&history);
        assert_eq!(score.run_length, 3);
        assert!(score.stagnant);
        assert!(score.exhausted);
        assert!(!d.is_stagnant(&history[..2]));
    }

    #[test]
    fn test_kind_change_breaks_the_run() {
        let d = StagnationDetector::default();
        let history = vec![
            Diagnosis::Timeout,
            Diagnosis::Timeout,
            runtime("ValueError: bad"),
        ];
        assert_eq!(d.score(&history).run_length, 1);
    }

    #[test]
    fn test_near_duplicate_details_count() {
        let d = StagnationDetector::default();
        let a = runtime("NameError: name 'foo' is not defined");
        let b = runtime("NameError: name 'fooo' is not defined");
        let c = runtime("ZeroDivisionError: division by zero");
        assert!(d.near_duplicate(&a, &b));
        assert!(!d.near_duplicate(&a, &c));
        assert_eq!(d.score(&[c, a, b]).run_length, 2);
    }

    #[test]
    fn test_drifting_details_do_not_chain() {
        let d = StagnationDetector::new(&StagnationSettings {
            window: 3,
            threshold: 3,
            similarity: 0.8,
        });
        let a = runtime("aaaaaaaaaa");
        let b = runtime("aaaaaaaabb");
        let c = runtime("aaaaaabbbb");
        assert!(d.near_duplicate(&a, &b));
        assert!(d.near_duplicate(&b, &c));
        assert!(!d.near_duplicate(&a, &c));
        let score = d.score(&[a, b, c]);
        assert_eq!(score.run_length, 2);
        assert!(!score.stagnant);
    }

    #[test]
    fn test_strict_similarity_requires_equality() {
        let d = StagnationDetector::new(&StagnationSettings {
            window: 2,
            threshold: 3,
            similarity: 1.0,
        });
        let a = runtime("KeyError: 'a'");
        let b = runtime("KeyError: 'b'");
        assert!(!d.near_duplicate(&a, &b));
        assert!(d.is_stagnant(&[a.clone(), a]));
    }
}
