//! Backend pipeline abstractions and demo implementations.
//!
//! The orchestrator consumes four narrow capability contracts. Real
//! implementations (LLM services, retrieval stacks, verifiers) live outside
//! this crate; the `Echo*` implementations here exist for pipeline smoke
//! tests and demos without real model dependencies.
//!
//! Implementations must be thread-safe (`Send + Sync`) for use across
//! tasks. All traits are object-safe to allow dynamic dispatch via
//! `Arc<dyn ...>`.

use crate::planner::VerificationSettings;
use crate::{OrchestratorError, Verdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An opaque response blob produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Answer text.
    pub text: String,
    /// Backend-reported confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

impl Payload {
    /// Create a payload.
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Single-shot answer generation.
#[async_trait]
pub trait PrimaryPipeline: Send + Sync {
    /// Generate an answer for `text`.
    async fn generate(&self, text: &str) -> Result<Payload, OrchestratorError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Decomposes complex requests into sub-queries and aggregates their
/// answers.
#[async_trait]
pub trait DecompositionPipeline: Send + Sync {
    /// Split `text` into independent sub-queries.
    async fn decompose(&self, text: &str) -> Result<Vec<String>, OrchestratorError>;

    /// Combine sub-answers into one payload.
    async fn aggregate(&self, parts: Vec<Payload>) -> Result<Payload, OrchestratorError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Cross-modal processing for requests referencing media.
#[async_trait]
pub trait MultimodalPipeline: Send + Sync {
    /// Produce an answer for `text` together with its media references.
    async fn process(&self, text: &str, media_refs: &[String])
        -> Result<Payload, OrchestratorError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Consistency verification of candidate answers.
#[async_trait]
pub trait VerificationPipeline: Send + Sync {
    /// Judge `payload` as an answer to `text`.
    async fn verify(
        &self,
        text: &str,
        payload: &Payload,
        settings: &VerificationSettings,
    ) -> Result<(Verdict, f64), OrchestratorError>;

    /// Lightweight liveness probe.
    async fn ping(&self) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

// ============================================================================
// Echo implementations (testing / demo)
// ============================================================================

/// Echoes the request back as the answer after a simulated delay.
pub struct EchoPrimary {
    /// Simulated generation latency, ms.
    pub delay_ms: u64,
}

impl EchoPrimary {
    /// Echo backend with a 10ms simulated delay.
    pub fn new() -> Self {
        Self { delay_ms: 10 }
    }

    /// Echo backend with a custom simulated delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Default for EchoPrimary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryPipeline for EchoPrimary {
    async fn generate(&self, text: &str) -> Result<Payload, OrchestratorError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(Payload::new(format!("echo: {text}"), 0.9))
    }
}

/// Splits on sentence boundaries for decomposition; joins sub-answers with
/// newlines for aggregation.
#[derive(Default)]
pub struct SplitDecomposition;

#[async_trait]
impl DecompositionPipeline for SplitDecomposition {
    async fn decompose(&self, text: &str) -> Result<Vec<String>, OrchestratorError> {
        let parts: Vec<String> = text
            .split(['.', '?', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if parts.is_empty() {
            return Err(OrchestratorError::Backend(
                "nothing to decompose".to_string(),
            ));
        }
        Ok(parts)
    }

    async fn aggregate(&self, parts: Vec<Payload>) -> Result<Payload, OrchestratorError> {
        if parts.is_empty() {
            return Err(OrchestratorError::Backend(
                "no sub-answers to aggregate".to_string(),
            ));
        }
        let confidence =
            parts.iter().map(|p| p.confidence).sum::<f64>() / parts.len() as f64;
        let text = parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Payload { text, confidence })
    }
}

/// Accepts every answer as consistent. Useful as a stand-in verifier.
#[derive(Default)]
pub struct LenientVerification;

#[async_trait]
impl VerificationPipeline for LenientVerification {
    async fn verify(
        &self,
        _text: &str,
        payload: &Payload,
        _settings: &VerificationSettings,
    ) -> Result<(Verdict, f64), OrchestratorError> {
        Ok((Verdict::Consistent, payload.confidence))
    }
}
