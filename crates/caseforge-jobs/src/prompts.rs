//! Prompt construction for rule validation and test case generation.
//!
//! Retrieved chunks are presented to the model under short labels
//! (`C1`, `C2`, ...). The model cites labels; [`ContextLabels`] maps them
//! back to chunk ids.

use std::collections::HashMap;
use std::fmt::Write;

use uuid::Uuid;

use caseforge_core::{BusinessRule, ScoredChunk, TestCategory};

use crate::schema::RuleCandidate;

pub const VALIDATION_SYSTEM_PROMPT: &str = "You are a business analyst. You extract \
testable business rules from document excerpts. Every rule must cite the labels of the \
excerpts that state it. Never invent rules that the excerpts do not support. Respond with \
JSON only.";

pub const GENERATION_SYSTEM_PROMPT: &str = "You are a senior QA engineer. You write \
precise, executable test cases grounded in the supplied document excerpts and business \
rules. Respond with JSON only.";

/// Label -> chunk id mapping for one prompt.
#[derive(Debug, Clone, Default)]
pub struct ContextLabels {
    ids: Vec<Uuid>,
    by_label: HashMap<String, Uuid>,
}

impl ContextLabels {
    pub fn new(chunks: &[ScoredChunk]) -> Self {
        let ids: Vec<Uuid> = chunks.iter().map(|c| c.chunk.id).collect();
        let by_label = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (label(i), *id))
            .collect();
        Self { ids, by_label }
    }

    /// Chunk ids in label order.
    pub fn chunk_ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolve a citation such as `C2`, `[c2]` or `2`.
    pub fn resolve(&self, citation: &str) -> Option<Uuid> {
        let key = citation
            .trim()
            .trim_matches(|c| c == '[' || c == ']')
            .trim()
            .to_uppercase();
        let key = if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            format!("C{}", key)
        } else {
            key
        };
        self.by_label.get(&key).copied()
    }

    /// Keep rules citing at least one supplied chunk; drop the rest.
    pub fn ground_rules(&self, candidates: Vec<RuleCandidate>) -> Vec<BusinessRule> {
        candidates
            .into_iter()
            .filter_map(|candidate| {
                let mut supporting: Vec<Uuid> = Vec::new();
                for id in candidate.citations.iter().filter_map(|c| self.resolve(c)) {
                    if !supporting.contains(&id) {
                        supporting.push(id);
                    }
                }
                (!supporting.is_empty()).then(|| BusinessRule {
                    rule: candidate.rule,
                    supporting_chunk_ids: supporting,
                })
            })
            .collect()
    }
}

fn label(index: usize) -> String {
    format!("C{}", index + 1)
}

/// Render retrieved chunks as labelled excerpts.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (i, hit) in chunks.iter().enumerate() {
        let _ = writeln!(out, "[{}]\n{}\n", label(i), hit.chunk.text.trim());
    }
    out
}

pub fn validation_prompt(chunks: &[ScoredChunk]) -> String {
    format!(
        "Document excerpts:\n\n{}\
Extract the business rules stated in these excerpts.\n\
Return a JSON object of the form:\n\
{{\"rules\": [{{\"rule\": \"<one testable rule>\", \"sources\": [\"C1\"]}}]}}\n\
Each rule must list in \"sources\" the labels of the excerpts that state it.",
        format_context(chunks)
    )
}

fn category_guidance(category: TestCategory) -> &'static str {
    match category {
        TestCategory::Functional => {
            "Functional tests verify the main workflows and features behave as the rules describe."
        }
        TestCategory::EdgeCase => {
            "Edge case tests probe boundaries, limits, invalid input, empty states and error handling."
        }
        TestCategory::Compliance => {
            "Compliance tests verify regulatory, legal, policy, audit and security obligations."
        }
        TestCategory::Integration => {
            "Integration tests verify data exchange with external systems and dependent components."
        }
    }
}

/// Prompt asking for `count` cases of one category.
pub fn generation_prompt(
    category: TestCategory,
    count: usize,
    rules: &[BusinessRule],
    chunks: &[ScoredChunk],
    accepted_titles: &[String],
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "Document excerpts:\n");
    if chunks.is_empty() {
        let _ = writeln!(prompt, "(none)\n");
    } else {
        prompt.push_str(&format_context(chunks));
    }

    let _ = writeln!(prompt, "Business rules:");
    if rules.is_empty() {
        let _ = writeln!(prompt, "(none extracted; rely on the excerpts)");
    }
    for rule in rules {
        let _ = writeln!(prompt, "- {}", rule.rule);
    }

    if !accepted_titles.is_empty() {
        let _ = writeln!(prompt, "\nExisting test cases (do not repeat these titles):");
        for title in accepted_titles {
            let _ = writeln!(prompt, "- {}", title);
        }
    }

    let _ = write!(
        prompt,
        "\nWrite exactly {count} new {category} test cases. {guidance}\n\
Return a JSON object of the form:\n\
{{\"test_cases\": [{{\"title\": \"...\", \"description\": \"...\", \
\"steps\": [\"...\"], \"expected_result\": \"...\", \"tags\": [\"...\"], \
\"category\": \"{category}\", \"priority\": \"high|medium|low\", \
\"severity\": \"High|Medium|Low\", \"persona\": \"...\", \"confidence\": 0.0}}]}}\n\
Every test case must use category \"{category}\".",
        count = count,
        category = category.as_str(),
        guidance = category_guidance(category),
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_core::Chunk;

    fn hits(texts: &[&str]) -> Vec<ScoredChunk> {
        let doc = Uuid::new_v4();
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ScoredChunk {
                chunk: Chunk::new(doc, i as i32, *t, 0, t.chars().count() as i32),
                distance: 0.1 * i as f32,
            })
            .collect()
    }

    #[test]
    fn test_format_context_labels() {
        let text = format_context(&hits(&["first", "second"]));
        assert!(text.starts_with("[C1]\nfirst\n"));
        assert!(text.contains("[C2]\nsecond\n"));
    }

    #[test]
    fn test_resolve_citation_spellings() {
        let chunks = hits(&["a", "b"]);
        let labels = ContextLabels::new(&chunks);
        let second = chunks[1].chunk.id;
        assert_eq!(labels.resolve("C2"), Some(second));
        assert_eq!(labels.resolve(" [c2] "), Some(second));
        assert_eq!(labels.resolve("2"), Some(second));
        assert_eq!(labels.resolve("C3"), None);
        assert_eq!(labels.resolve(""), None);
    }

    #[test]
    fn test_ground_rules_drops_uncited_and_hallucinated() {
        let chunks = hits(&["a", "b"]);
        let labels = ContextLabels::new(&chunks);
        let rules = labels.ground_rules(vec![
            RuleCandidate {
                rule: "cited".into(),
                citations: vec!["C1".into(), "C9".into(), "c1".into()],
            },
            RuleCandidate {
                rule: "uncited".into(),
                citations: vec![],
            },
            RuleCandidate {
                rule: "hallucinated".into(),
                citations: vec!["C7".into()],
            },
        ]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule, "cited");
        assert_eq!(rules[0].supporting_chunk_ids, vec![chunks[0].chunk.id]);
    }

    #[test]
    fn test_generation_prompt_contents() {
        let rules = vec![BusinessRule {
            rule: "Refunds within 30 days".into(),
            supporting_chunk_ids: vec![],
        }];
        let prompt = generation_prompt(
            TestCategory::EdgeCase,
            5,
            &rules,
            &hits(&["Refund policy text"]),
            &["Existing title".to_string()],
        );
        assert!(prompt.contains("Write exactly 5 new edge_case test cases"));
        assert!(prompt.contains("- Refunds within 30 days"));
        assert!(prompt.contains("- Existing title"));
        assert!(prompt.contains("[C1]\nRefund policy text"));
        assert!(prompt.contains("\"category\": \"edge_case\""));
    }

    #[test]
    fn test_generation_prompt_without_rules() {
        let prompt = generation_prompt(TestCategory::Functional, 6, &[], &[], &[]);
        assert!(prompt.contains("(none extracted; rely on the excerpts)"));
        assert!(!prompt.contains("Existing test cases"));
    }

    #[test]
    fn test_validation_prompt_asks_for_sources() {
        let prompt = validation_prompt(&hits(&["Employees must complete onboarding"]));
        assert!(prompt.contains("[C1]"));
        assert!(prompt.contains("\"sources\""));
    }
}
