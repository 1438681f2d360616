//! Request characteristic analysis.
//!
//! Analyses raw request text and produces an immutable
//! [`RequestCharacteristics`] record that drives plan synthesis:
//!
//! | Score       | Class      |
//! |-------------|------------|
//! | `< 0.3`     | Simple     |
//! | `0.3 – 0.6` | Moderate   |
//! | `≥ 0.6`     | Complex    |
//!
//! Media keywords override the score-derived class with `MultiModal`.
//!
//! ## Indicator signals
//!
//! 1. **Length** — more than 20 whitespace-delimited words
//! 2. **Questions** — more than one `?`
//! 3. **Keywords** — comparison or explanation vocabulary
//! 4. **Conjunctions** — complex connectives (`although`, `whereas`, …)
//! 5. **Punctuation** — more than two of `. , ; :`
//!
//! `score = fired / 5.0`. The cut points and uniform weights are rough
//! triage tunables, not business logic.

use crate::OrchestratorError;
use serde::{Deserialize, Serialize};

/// Score below which a request is classified [`ComplexityClass::Simple`].
const SIMPLE_CEILING: f64 = 0.3;
/// Score below which a request is classified [`ComplexityClass::Moderate`].
const MODERATE_CEILING: f64 = 0.6;
/// Number of indicator signals contributing to the score.
const SIGNAL_COUNT: f64 = 5.0;
/// Estimated tokens per whitespace-delimited word.
const TOKENS_PER_WORD: f64 = 1.3;

const COMPARISON_KEYWORDS: &[&str] = &[
    "compare",
    "comparison",
    "versus",
    " vs ",
    "difference between",
    "better than",
    "contrast",
];

const EXPLANATION_KEYWORDS: &[&str] = &["explain", "why", "how does", "how do", "describe"];

const COMPLEX_CONJUNCTIONS: &[&str] = &[
    "although",
    "whereas",
    "however",
    "moreover",
    "nevertheless",
    "furthermore",
    "meanwhile",
    "consequently",
];

const MEDIA_KEYWORDS: &[&str] = &[
    "image", "picture", "photo", "diagram", "audio", "video", "chart", "graph", "screenshot",
];

const QUESTION_OPENERS: &[&str] = &[
    "what", "who", "when", "where", "which", "is ", "are ", "do ", "does ", "can ",
];

/// Coarse complexity classification of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexityClass {
    /// Short, single-clause request.
    Simple,
    /// Some structure or multiple clauses.
    Moderate,
    /// Long, multi-part, or heavily qualified request.
    Complex,
    /// References media; routed through the cross-modal pipeline.
    MultiModal,
}

impl ComplexityClass {
    /// Cost multiplier applied on top of the base request cost.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Self::Simple => 1.0,
            Self::Moderate => 1.5,
            Self::Complex => 2.5,
            Self::MultiModal => 3.0,
        }
    }
}

/// Rough intent of a request, used for logging and plan annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Asks for a fact or definition.
    Informational,
    /// Asks for an explanation or mechanism.
    Explanatory,
    /// Asks to compare alternatives.
    Comparative,
    /// Anything else.
    General,
}

/// Immutable per-request analysis record.
///
/// Created once by [`RequestAnalyzer::analyze`] and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCharacteristics {
    /// The analysed text.
    pub text: String,
    /// Coarse complexity classification.
    pub class: ComplexityClass,
    /// Indicator score in `[0.0, 1.0]`.
    pub score: f64,
    /// Estimated token count (`words × 1.3`, rounded up).
    pub estimated_tokens: u64,
    /// Whether the request should be decomposed into sub-queries.
    pub requires_decomposition: bool,
    /// Whether the text references media.
    pub has_media_reference: bool,
    /// Estimated processing cost in USD, rounded to 6 decimals.
    pub estimated_cost: f64,
    /// Rough intent classification.
    pub intent: Intent,
}

/// Per-signal contribution breakdown, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalBreakdown {
    /// Word count exceeded 20.
    pub long_text: bool,
    /// More than one question mark.
    pub multi_question: bool,
    /// Comparison or explanation keywords present.
    pub keywords: bool,
    /// Complex conjunctions present.
    pub conjunctions: bool,
    /// More than two of `. , ; :`.
    pub punctuation: bool,
}

impl SignalBreakdown {
    /// Number of signals that fired.
    pub fn fired(&self) -> u32 {
        [
            self.long_text,
            self.multi_question,
            self.keywords,
            self.conjunctions,
            self.punctuation,
        ]
        .iter()
        .filter(|&&s| s)
        .count() as u32
    }
}

/// Converts raw request text into a [`RequestCharacteristics`] record.
///
/// Stateless apart from configured cost constants; cheap to construct and
/// free of side effects.
#[derive(Debug, Clone)]
pub struct RequestAnalyzer {
    decomposition_threshold: f64,
    base_cost: f64,
    per_token_rate: f64,
}

impl RequestAnalyzer {
    /// Create an analyzer.
    ///
    /// # Arguments
    ///
    /// * `decomposition_threshold` — score above which decomposition is
    ///   required regardless of class.
    /// * `base_cost` — base request cost in USD before multipliers.
    /// * `per_token_rate` — marginal USD cost per 1 000 estimated tokens.
    pub fn new(decomposition_threshold: f64, base_cost: f64, per_token_rate: f64) -> Self {
        Self {
            decomposition_threshold,
            base_cost,
            per_token_rate,
        }
    }

    /// Analyse request text.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidInput`] if `text` is empty or
    /// whitespace-only. No backend is ever consulted.
    pub fn analyze(&self, text: &str) -> Result<RequestCharacteristics, OrchestratorError> {
        if text.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "request text is empty".to_string(),
            ));
        }

        let breakdown = Self::signals(text);
        let score = f64::from(breakdown.fired()) / SIGNAL_COUNT;
        let has_media_reference = Self::mentions_media(text);

        let class = if has_media_reference {
            ComplexityClass::MultiModal
        } else if score < SIMPLE_CEILING {
            ComplexityClass::Simple
        } else if score < MODERATE_CEILING {
            ComplexityClass::Moderate
        } else {
            ComplexityClass::Complex
        };

        let word_count = text.split_whitespace().count();
        let estimated_tokens = (word_count as f64 * TOKENS_PER_WORD).ceil() as u64;
        let requires_decomposition =
            score > self.decomposition_threshold || class == ComplexityClass::Complex;

        let raw_cost = self.base_cost * class.cost_multiplier()
            + (estimated_tokens as f64 / 1000.0) * self.per_token_rate;
        let estimated_cost = round_6(raw_cost);

        let intent = Self::classify_intent(text);

        tracing::debug!(
            class = ?class,
            score = score,
            tokens = estimated_tokens,
            cost = estimated_cost,
            intent = ?intent,
            "request analysed"
        );

        Ok(RequestCharacteristics {
            text: text.to_string(),
            class,
            score,
            estimated_tokens,
            requires_decomposition,
            has_media_reference,
            estimated_cost,
            intent,
        })
    }

    /// Evaluate all five indicator signals for `text`.
    pub fn signals(text: &str) -> SignalBreakdown {
        let lower = text.to_lowercase();
        SignalBreakdown {
            long_text: text.split_whitespace().count() > 20,
            multi_question: text.matches('?').count() > 1,
            keywords: COMPARISON_KEYWORDS.iter().any(|k| lower.contains(k))
                || EXPLANATION_KEYWORDS.iter().any(|k| lower.contains(k)),
            conjunctions: COMPLEX_CONJUNCTIONS.iter().any(|k| lower.contains(k)),
            punctuation: text.chars().filter(|c| ".,;:".contains(*c)).count() > 2,
        }
    }

    fn mentions_media(text: &str) -> bool {
        let lower = text.to_lowercase();
        MEDIA_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    /// Most specific matching intent wins: comparative, then explanatory,
    /// then informational.
    fn classify_intent(text: &str) -> Intent {
        let lower = text.to_lowercase();
        if COMPARISON_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Intent::Comparative
        } else if EXPLANATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Intent::Explanatory
        } else if lower.trim_end().ends_with('?')
            || QUESTION_OPENERS.iter().any(|k| lower.starts_with(k))
        {
            Intent::Informational
        } else {
            Intent::General
        }
    }
}

/// Round to 6 decimal places.
fn round_6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn default_analyzer() -> RequestAnalyzer {
        RequestAnalyzer::new(0.7, 0.01, 0.002)
    }

    // -- rejection --------------------------------------------------------

    #[test]
    fn test_empty_text_is_rejected() {
        let result = default_analyzer().analyze("");
        assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
    }

    #[test]
    fn test_whitespace_only_text_is_rejected() {
        let result = default_analyzer().analyze("   \t\n  ");
        assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
    }

    // -- classification ---------------------------------------------------

    #[test]
    fn test_short_question_is_simple() {
        let chars = default_analyzer().analyze("What is AI?").unwrap();
        assert_eq!(chars.class, ComplexityClass::Simple);
        assert!(chars.score < 0.3, "score was {}", chars.score);
        assert!(!chars.requires_decomposition);
    }

    #[test]
    fn test_short_texts_without_signals_are_simple() {
        let analyzer = default_analyzer();
        for text in ["Say hello", "What is 2 + 2?", "Define entropy", "List planets"] {
            let chars = analyzer.analyze(text).unwrap();
            assert_eq!(
                chars.class,
                ComplexityClass::Simple,
                "expected Simple for {text:?}, got {:?}",
                chars.class
            );
        }
    }

    #[test]
    fn test_keyword_and_conjunction_text_is_moderate() {
        // keywords + conjunctions fire → 2/5 = 0.4
        let chars = default_analyzer()
            .analyze("Explain the result, although briefly")
            .unwrap();
        assert_eq!(chars.class, ComplexityClass::Moderate);
        assert!((chars.score - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_heavily_structured_text_is_complex() {
        let text = "Compare relational and document databases, explaining why \
                    indexing differs; although both persist data, how does each \
                    handle joins, transactions, replication? What trade-offs \
                    matter most? Consider consistency, latency, cost, and \
                    operational burden across more than twenty words in total.";
        let chars = default_analyzer().analyze(text).unwrap();
        assert_eq!(chars.class, ComplexityClass::Complex);
        assert!(chars.requires_decomposition);
    }

    #[test]
    fn test_media_keyword_forces_multi_modal() {
        let chars = default_analyzer()
            .analyze("Describe this image of a sunset")
            .unwrap();
        assert_eq!(chars.class, ComplexityClass::MultiModal);
        assert!(chars.has_media_reference);
    }

    #[test]
    fn test_multi_modal_without_high_score_does_not_require_decomposition() {
        let chars = default_analyzer().analyze("Show the chart").unwrap();
        assert_eq!(chars.class, ComplexityClass::MultiModal);
        assert!(!chars.requires_decomposition);
    }

    // -- signals ----------------------------------------------------------

    #[test]
    fn test_long_text_signal_fires_above_20_words() {
        let text = (0..21).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        assert!(RequestAnalyzer::signals(&text).long_text);
    }

    #[test]
    fn test_long_text_signal_quiet_at_exactly_20_words() {
        let text = (0..20).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        assert!(!RequestAnalyzer::signals(&text).long_text);
    }

    #[test]
    fn test_multi_question_signal_needs_two_marks() {
        assert!(!RequestAnalyzer::signals("Is it true?").multi_question);
        assert!(RequestAnalyzer::signals("Is it true? Or false?").multi_question);
    }

    #[test]
    fn test_punctuation_signal_counts_only_listed_marks() {
        assert!(!RequestAnalyzer::signals("one, two.").punctuation);
        assert!(RequestAnalyzer::signals("a, b; c: d.").punctuation);
        // Question marks and exclamations don't count
        assert!(!RequestAnalyzer::signals("a? b? c? d!").punctuation);
    }

    #[test]
    fn test_breakdown_fired_counts_set_signals() {
        let bd = SignalBreakdown {
            long_text: true,
            multi_question: false,
            keywords: true,
            conjunctions: false,
            punctuation: true,
        };
        assert_eq!(bd.fired(), 3);
    }

    // -- estimates --------------------------------------------------------

    #[test]
    fn test_token_estimate_scales_with_words() {
        let chars = default_analyzer().analyze("one two three four").unwrap();
        // 4 words × 1.3 = 5.2, rounded up
        assert_eq!(chars.estimated_tokens, 6);
    }

    #[test]
    fn test_cost_uses_class_multiplier() {
        let analyzer = default_analyzer();
        let simple = analyzer.analyze("Define gravity now").unwrap();
        let multi = analyzer.analyze("Describe this photo").unwrap();
        // Identical word counts, so the difference is purely the multiplier.
        assert!(multi.estimated_cost > simple.estimated_cost);
        let expected = 0.01 * 3.0 + (multi.estimated_tokens as f64 / 1000.0) * 0.002;
        assert!((multi.estimated_cost - round_6(expected)).abs() < 1e-9);
    }

    #[test]
    fn test_cost_rounded_to_six_decimals() {
        let chars = default_analyzer().analyze("What is AI?").unwrap();
        let scaled = chars.estimated_cost * 1_000_000.0;
        assert!((scaled - scaled.round()).abs() < 1e-6);
    }

    #[test]
    fn test_cost_multipliers_are_ordered() {
        assert!(ComplexityClass::Simple.cost_multiplier() < ComplexityClass::Moderate.cost_multiplier());
        assert!(ComplexityClass::Moderate.cost_multiplier() < ComplexityClass::Complex.cost_multiplier());
        assert!(ComplexityClass::Complex.cost_multiplier() < ComplexityClass::MultiModal.cost_multiplier());
    }

    // -- decomposition ----------------------------------------------------

    #[test]
    fn test_complex_class_requires_decomposition() {
        let text = "Compare A with B, explaining why each matters; however, \
                    also describe how C differs? And what about D? Then list \
                    trade-offs, risks, costs, benefits across all options here.";
        let chars = default_analyzer().analyze(text).unwrap();
        assert_eq!(chars.class, ComplexityClass::Complex);
        assert!(chars.requires_decomposition);
    }

    #[test]
    fn test_custom_threshold_drives_decomposition() {
        // Threshold 0.3: a 0.4-score Moderate request now requires decomposition.
        let analyzer = RequestAnalyzer::new(0.3, 0.01, 0.002);
        let chars = analyzer
            .analyze("Explain the result, although briefly")
            .unwrap();
        assert_eq!(chars.class, ComplexityClass::Moderate);
        assert!(chars.requires_decomposition);
    }

    // -- intent -----------------------------------------------------------

    #[test]
    fn test_intent_comparative_wins_over_explanatory() {
        let chars = default_analyzer()
            .analyze("Explain the difference between TCP and UDP")
            .unwrap();
        assert_eq!(chars.intent, Intent::Comparative);
    }

    #[test]
    fn test_intent_explanatory() {
        let chars = default_analyzer().analyze("Why is the sky blue").unwrap();
        assert_eq!(chars.intent, Intent::Explanatory);
    }

    #[test]
    fn test_intent_informational() {
        let chars = default_analyzer().analyze("What is AI?").unwrap();
        assert_eq!(chars.intent, Intent::Informational);
    }

    #[test]
    fn test_intent_general() {
        let chars = default_analyzer().analyze("Write a poem about autumn").unwrap();
        assert_eq!(chars.intent, Intent::General);
    }

    // -- determinism ------------------------------------------------------

    #[test]
    fn test_analysis_is_deterministic() {
        let analyzer = default_analyzer();
        let a = analyzer.analyze("Compare X and Y; why does it matter?").unwrap();
        let b = analyzer.analyze("Compare X and Y; why does it matter?").unwrap();
        assert_eq!(a.class, b.class);
        assert!((a.score - b.score).abs() < f64::EPSILON);
        assert_eq!(a.estimated_tokens, b.estimated_tokens);
        assert!((a.estimated_cost - b.estimated_cost).abs() < f64::EPSILON);
    }
}
