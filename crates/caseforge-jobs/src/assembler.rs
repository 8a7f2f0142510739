//! Turns parsed candidates into validated, deduplicated test cases.

use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use caseforge_core::defaults;
use caseforge_core::{
    new_v7, ExecutionStatus, Priority, Severity, TestCase, TestCaseSource, TestCategory,
};

use crate::schema::CandidateTestCase;

/// Why a candidate was not accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    EmptyTitle,
    InvalidCategory(String),
    WrongCategory {
        expected: TestCategory,
        got: TestCategory,
    },
    InvalidPriority(String),
    InvalidSeverity(String),
    /// Title already accepted for this document.
    DuplicateTitle(String),
    /// Same title and category appeared earlier in the batch.
    DuplicateInBatch(String),
    /// Valid, but the category quota was already full.
    Surplus(String),
}

/// Outcome of assembling one model response.
#[derive(Debug, Default)]
pub struct AssembledBatch {
    pub accepted: Vec<TestCase>,
    pub rejected: Vec<Rejection>,
}

/// Lowercase and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Confidence clamped to [0, 1]; absent or non-finite values use the default.
pub fn clamp_confidence(raw: Option<f64>) -> f32 {
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0) as f32,
        _ => defaults::CONFIDENCE_SCORE,
    }
}

/// Validates candidates for one document and tracks accepted titles.
#[derive(Debug)]
pub struct TestCaseAssembler {
    document_id: Uuid,
    seen_titles: HashSet<String>,
    accepted_titles: Vec<String>,
}

impl TestCaseAssembler {
    pub fn new(document_id: Uuid) -> Self {
        Self {
            document_id,
            seen_titles: HashSet::new(),
            accepted_titles: Vec::new(),
        }
    }

    /// Titles accepted so far, in acceptance order.
    pub fn accepted_titles(&self) -> &[String] {
        &self.accepted_titles
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_titles.len()
    }

    /// Validate `candidates` for `category`, accepting at most `limit`.
    ///
    /// A candidate without a category is taken to be of the requested one.
    /// `context_used` is recorded on every accepted case.
    pub fn assemble(
        &mut self,
        candidates: Vec<CandidateTestCase>,
        category: TestCategory,
        context_used: &[Uuid],
        limit: usize,
    ) -> AssembledBatch {
        let mut batch = AssembledBatch::default();
        let mut batch_keys: HashSet<(String, TestCategory)> = HashSet::new();

        for candidate in candidates {
            match self.validate(candidate, category, context_used) {
                Err(rejection) => batch.rejected.push(rejection),
                Ok(case) => {
                    let key = normalize_title(&case.title);
                    if !batch_keys.insert((key.clone(), case.category)) {
                        batch.rejected.push(Rejection::DuplicateInBatch(case.title));
                    } else if self.seen_titles.contains(&key) {
                        batch.rejected.push(Rejection::DuplicateTitle(case.title));
                    } else if batch.accepted.len() >= limit {
                        batch.rejected.push(Rejection::Surplus(case.title));
                    } else {
                        self.seen_titles.insert(key);
                        self.accepted_titles.push(case.title.clone());
                        batch.accepted.push(case);
                    }
                }
            }
        }

        debug!(
            document_id = %self.document_id,
            category = %category,
            accepted = batch.accepted.len(),
            rejected = batch.rejected.len(),
            "Assembled candidate batch"
        );
        batch
    }

    fn validate(
        &self,
        candidate: CandidateTestCase,
        expected: TestCategory,
        context_used: &[Uuid],
    ) -> Result<TestCase, Rejection> {
        if candidate.title.trim().is_empty() {
            return Err(Rejection::EmptyTitle);
        }

        let category = match candidate.category.as_deref() {
            None => expected,
            Some(raw) => raw
                .parse::<TestCategory>()
                .map_err(|_| Rejection::InvalidCategory(raw.to_string()))?,
        };
        if category != expected {
            return Err(Rejection::WrongCategory {
                expected,
                got: category,
            });
        }

        let priority = match candidate.priority.as_deref() {
            None => category.default_priority(),
            Some(raw) => raw
                .parse::<Priority>()
                .map_err(|_| Rejection::InvalidPriority(raw.to_string()))?,
        };
        let severity = match candidate.severity.as_deref() {
            None => category.default_severity(),
            Some(raw) => raw
                .parse::<Severity>()
                .map_err(|_| Rejection::InvalidSeverity(raw.to_string()))?,
        };

        Ok(TestCase {
            id: new_v7(),
            document_id: self.document_id,
            title: candidate.title.trim().to_string(),
            description: candidate.description,
            steps: candidate.steps,
            expected_result: candidate.expected_result,
            tags: candidate.tags,
            category,
            priority,
            severity,
            persona: candidate
                .persona
                .unwrap_or_else(|| category.default_persona().to_string()),
            source: TestCaseSource::Generated,
            confidence_score: Some(clamp_confidence(candidate.confidence)),
            context_used: context_used.to_vec(),
            execution_status: ExecutionStatus::NotRun,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str) -> CandidateTestCase {
        CandidateTestCase {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Refund   Request\tFlow "), "refund request flow");
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(Some(1.7)), 1.0);
        assert_eq!(clamp_confidence(Some(-0.2)), 0.0);
        assert_eq!(clamp_confidence(Some(0.42)), 0.42);
        assert_eq!(clamp_confidence(None), 0.8);
        assert_eq!(clamp_confidence(Some(f64::NAN)), 0.8);
    }

    #[test]
    fn test_defaults_applied_from_category() {
        let doc = Uuid::new_v4();
        let context = vec![Uuid::new_v4()];
        let mut assembler = TestCaseAssembler::new(doc);
        let batch = assembler.assemble(
            vec![candidate("Audit trail retained")],
            TestCategory::Compliance,
            &context,
            3,
        );

        let case = &batch.accepted[0];
        assert_eq!(case.document_id, doc);
        assert_eq!(case.category, TestCategory::Compliance);
        assert_eq!(case.priority, Priority::High);
        assert_eq!(case.severity, Severity::High);
        assert_eq!(case.persona, "Compliance Officer");
        assert_eq!(case.source, TestCaseSource::Generated);
        assert_eq!(case.confidence_score, Some(0.8));
        assert_eq!(case.context_used, context);
        assert_eq!(case.execution_status, ExecutionStatus::NotRun);
    }

    #[test]
    fn test_case_insensitive_enum_spelling() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let batch = assembler.assemble(
            vec![CandidateTestCase {
                title: "Empty cart checkout".into(),
                category: Some("Edge Case".into()),
                priority: Some("HIGH".into()),
                severity: Some("low".into()),
                persona: Some("Shopper".into()),
                ..Default::default()
            }],
            TestCategory::EdgeCase,
            &[],
            5,
        );
        let case = &batch.accepted[0];
        assert_eq!(case.priority, Priority::High);
        assert_eq!(case.severity, Severity::Low);
        assert_eq!(case.persona, "Shopper");
    }

    #[test]
    fn test_invalid_enums_rejected_not_coerced() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let batch = assembler.assemble(
            vec![
                CandidateTestCase {
                    title: "A".into(),
                    priority: Some("urgent".into()),
                    ..Default::default()
                },
                CandidateTestCase {
                    title: "B".into(),
                    severity: Some("critical".into()),
                    ..Default::default()
                },
                CandidateTestCase {
                    title: "C".into(),
                    category: Some("performance".into()),
                    ..Default::default()
                },
            ],
            TestCategory::Functional,
            &[],
            6,
        );
        assert!(batch.accepted.is_empty());
        assert_eq!(
            batch.rejected,
            vec![
                Rejection::InvalidPriority("urgent".into()),
                Rejection::InvalidSeverity("critical".into()),
                Rejection::InvalidCategory("performance".into()),
            ]
        );
    }

    #[test]
    fn test_wrong_category_rejected() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let batch = assembler.assemble(
            vec![CandidateTestCase {
                title: "A".into(),
                category: Some("integration".into()),
                ..Default::default()
            }],
            TestCategory::Functional,
            &[],
            6,
        );
        assert_eq!(
            batch.rejected,
            vec![Rejection::WrongCategory {
                expected: TestCategory::Functional,
                got: TestCategory::Integration,
            }]
        );
    }

    #[test]
    fn test_duplicates_across_batches_and_within_batch() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let first = assembler.assemble(
            vec![candidate("Reset password"), candidate("reset  PASSWORD")],
            TestCategory::Functional,
            &[],
            6,
        );
        assert_eq!(first.accepted.len(), 1);
        assert!(matches!(first.rejected[0], Rejection::DuplicateInBatch(_)));

        let second = assembler.assemble(
            vec![candidate("Reset Password"), candidate("Lock account")],
            TestCategory::EdgeCase,
            &[],
            5,
        );
        assert_eq!(second.accepted.len(), 1);
        assert_eq!(second.accepted[0].title, "Lock account");
        assert!(matches!(second.rejected[0], Rejection::DuplicateTitle(_)));
        assert_eq!(
            assembler.accepted_titles(),
            &["Reset password".to_string(), "Lock account".to_string()]
        );
    }

    #[test]
    fn test_limit_turns_extra_into_surplus() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let batch = assembler.assemble(
            vec![candidate("A"), candidate("B"), candidate("C")],
            TestCategory::Integration,
            &[],
            1,
        );
        assert_eq!(batch.accepted.len(), 1);
        assert_eq!(batch.rejected.len(), 2);
        // surplus titles stay available for later requests
        assert_eq!(assembler.accepted_count(), 1);
    }

    #[test]
    fn test_empty_title_rejected() {
        let mut assembler = TestCaseAssembler::new(Uuid::new_v4());
        let batch = assembler.assemble(vec![candidate("   ")], TestCategory::Functional, &[], 6);
        assert_eq!(batch.rejected, vec![Rejection::EmptyTitle]);
    }
}
