//! Processing plan synthesis.
//!
//! The [`PlanSynthesizer`] combines request characteristics, the configured
//! processing profile, and live feature health into a [`ProcessingPlan`]:
//! which backends to invoke, with which thresholds, under which budget.
//! When the plan's estimated cost exceeds the ceiling, a fixed-order
//! degradation ladder strips expensive options — multimodal first, then
//! verification strictness, then (only if cost is still more than 1.5× the
//! ceiling) decomposition. Verification itself is never disabled: it is the
//! last line of defense against bad cached or fallback answers.
//!
//! Synthesis is deterministic: same inputs always yield the same plan.

use crate::analyzer::RequestCharacteristics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cost added by an unsimplified verification pass, USD.
const VERIFICATION_COST: f64 = 0.005;
/// Cost added by a simplified verification pass, USD.
const VERIFICATION_COST_SIMPLIFIED: f64 = 0.002;
/// Cost added by the cross-modal pipeline, USD.
const MULTIMODAL_COST: f64 = 0.01;
/// Latency added by the cross-modal pipeline, ms.
const MULTIMODAL_LATENCY_MS: u64 = 300;
/// Latency added by a verification pass, ms.
const VERIFICATION_LATENCY_MS: u64 = 200;

/// Accuracy/cost/latency trade-off profile.
///
/// Selects baseline confidence thresholds and verification settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingProfile {
    /// Maximise answer quality; decompose aggressively, verify strictly.
    HighAccuracy,
    /// Reasonable quality at reasonable cost.
    #[default]
    Balanced,
    /// Minimise spend; verification stays but is lenient about latency.
    CostOptimized,
    /// Minimise latency.
    Speed,
}

impl ProcessingProfile {
    /// Baseline confidence threshold for this profile.
    pub fn confidence_threshold(&self) -> f64 {
        match self {
            Self::HighAccuracy => 0.9,
            Self::Balanced => 0.8,
            Self::CostOptimized => 0.75,
            Self::Speed => 0.7,
        }
    }
}

/// Health of an optional feature, consulted during plan synthesis.
///
/// Explicit sum type — "feature disabled" is an expected branch, not an
/// exception path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureStatus {
    /// Feature is configured and its dependency is healthy.
    Enabled,
    /// Feature is not configured.
    Disabled,
    /// Feature is configured but currently unusable.
    Degraded {
        /// Why the feature is unusable (e.g. "circuit open").
        reason: String,
    },
}

impl FeatureStatus {
    /// `true` only for [`FeatureStatus::Enabled`] — a degraded feature is
    /// never planned in.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Live health of the optional backend features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureHealth {
    /// Decomposition/aggregation pipeline health.
    pub decomposition: FeatureStatus,
    /// Cross-modal pipeline health.
    pub multimodal: FeatureStatus,
    /// Consistency-verification pipeline health.
    pub verification: FeatureStatus,
}

impl FeatureHealth {
    /// Health record with every feature enabled (for tests and demos).
    pub fn all_enabled() -> Self {
        Self {
            decomposition: FeatureStatus::Enabled,
            multimodal: FeatureStatus::Enabled,
            verification: FeatureStatus::Enabled,
        }
    }

    /// Health record with every feature disabled.
    pub fn all_disabled() -> Self {
        Self {
            decomposition: FeatureStatus::Disabled,
            multimodal: FeatureStatus::Disabled,
            verification: FeatureStatus::Disabled,
        }
    }
}

/// How strictly the verification backend should judge answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strictness {
    /// Reject on any doubt.
    Strict,
    /// Balanced judgement.
    Standard,
    /// Flag only clear inconsistencies.
    Lenient,
}

impl Strictness {
    /// One rung more permissive; saturates at [`Strictness::Lenient`].
    pub fn relaxed(&self) -> Self {
        match self {
            Self::Strict => Self::Standard,
            Self::Standard | Self::Lenient => Self::Lenient,
        }
    }
}

/// Settings handed to the verification backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSettings {
    /// Judgement strictness.
    pub strictness: Strictness,
    /// Verification call budget, ms.
    pub timeout_ms: u64,
    /// Whether the degradation ladder has already simplified these settings.
    pub simplified: bool,
    /// Free-form backend-specific knobs.
    pub knobs: HashMap<String, serde_json::Value>,
}

impl VerificationSettings {
    /// Baseline settings for a profile.
    pub fn for_profile(profile: ProcessingProfile) -> Self {
        let (strictness, timeout_ms) = match profile {
            ProcessingProfile::HighAccuracy => (Strictness::Strict, 5000),
            ProcessingProfile::Balanced => (Strictness::Standard, 3000),
            ProcessingProfile::CostOptimized => (Strictness::Standard, 2000),
            ProcessingProfile::Speed => (Strictness::Lenient, 1000),
        };
        Self {
            strictness,
            timeout_ms,
            simplified: false,
            knobs: HashMap::new(),
        }
    }

    /// Cheaper variant: one strictness rung down, half the timeout.
    ///
    /// Used by the degradation ladder and for re-checking cache hits.
    pub fn relaxed(&self) -> Self {
        Self {
            strictness: self.strictness.relaxed(),
            timeout_ms: (self.timeout_ms / 2).max(250),
            simplified: true,
            knobs: self.knobs.clone(),
        }
    }
}

/// The concrete set of backend components and thresholds selected for one
/// request.
///
/// Mutated only by the degradation ladder during synthesis, then frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingPlan {
    /// Decompose the request and aggregate sub-answers.
    pub use_decomposition: bool,
    /// Probe and populate the response cache.
    pub use_cache: bool,
    /// Run the consistency-verification pass.
    pub use_verification: bool,
    /// Route through the cross-modal pipeline.
    pub use_multimodal: bool,
    /// Minimum confidence expected of the answer.
    pub confidence_threshold: f64,
    /// Estimated total cost of executing this plan, USD.
    pub estimated_cost: f64,
    /// Estimated wall-clock latency of executing this plan, ms.
    pub estimated_latency_ms: u64,
    /// Settings for the verification pass.
    pub verification: VerificationSettings,
}

/// Synthesizes a [`ProcessingPlan`] from characteristics, profile, and
/// feature health, then fits it under the cost ceiling.
#[derive(Debug, Clone)]
pub struct PlanSynthesizer {
    cost_ceiling: f64,
}

impl PlanSynthesizer {
    /// Create a synthesizer with the given per-request cost ceiling (USD).
    pub fn new(cost_ceiling: f64) -> Self {
        Self { cost_ceiling }
    }

    /// Synthesize the plan for one request.
    ///
    /// # Arguments
    ///
    /// * `chars` — Immutable request analysis record.
    /// * `profile` — Configured trade-off profile.
    /// * `health` — Live health of the optional features.
    ///
    /// # Returns
    ///
    /// A frozen [`ProcessingPlan`]; estimated cost is non-increasing across
    /// each ladder step.
    pub fn synthesize(
        &self,
        chars: &RequestCharacteristics,
        profile: ProcessingProfile,
        health: &FeatureHealth,
    ) -> ProcessingPlan {
        let mut plan = ProcessingPlan {
            use_decomposition: health.decomposition.is_enabled()
                && (chars.requires_decomposition || profile == ProcessingProfile::HighAccuracy),
            use_cache: true,
            use_verification: health.verification.is_enabled(),
            use_multimodal: chars.has_media_reference && health.multimodal.is_enabled(),
            confidence_threshold: profile.confidence_threshold(),
            estimated_cost: 0.0,
            estimated_latency_ms: 0,
            verification: VerificationSettings::for_profile(profile),
        };
        self.reestimate(chars, &mut plan);

        // Degradation ladder: fixed order, recompute after each rung.
        if plan.estimated_cost > self.cost_ceiling && plan.use_multimodal {
            plan.use_multimodal = false;
            self.reestimate(chars, &mut plan);
            tracing::debug!(cost = plan.estimated_cost, "plan degraded: multimodal dropped");
        }
        if plan.estimated_cost > self.cost_ceiling && plan.use_verification
            && !plan.verification.simplified
        {
            plan.verification = plan.verification.relaxed();
            self.reestimate(chars, &mut plan);
            tracing::debug!(cost = plan.estimated_cost, "plan degraded: verification simplified");
        }
        if plan.estimated_cost > self.cost_ceiling * 1.5 && plan.use_decomposition {
            plan.use_decomposition = false;
            self.reestimate(chars, &mut plan);
            tracing::debug!(cost = plan.estimated_cost, "plan degraded: decomposition dropped");
        }

        tracing::debug!(
            decomposition = plan.use_decomposition,
            multimodal = plan.use_multimodal,
            verification = plan.use_verification,
            cost = plan.estimated_cost,
            latency_ms = plan.estimated_latency_ms,
            "plan synthesized"
        );
        plan
    }

    /// Recompute the plan's cost and latency estimates in place.
    fn reestimate(&self, chars: &RequestCharacteristics, plan: &mut ProcessingPlan) {
        let mut cost = chars.estimated_cost * if plan.use_decomposition { 2.0 } else { 1.0 };
        if plan.use_verification {
            cost += if plan.verification.simplified {
                VERIFICATION_COST_SIMPLIFIED
            } else {
                VERIFICATION_COST
            };
        }
        if plan.use_multimodal {
            cost += MULTIMODAL_COST;
        }
        plan.estimated_cost = cost;

        let mut latency = base_latency_ms(chars);
        if plan.use_decomposition {
            latency *= 2;
        }
        if plan.use_multimodal {
            latency += MULTIMODAL_LATENCY_MS;
        }
        if plan.use_verification {
            latency += VERIFICATION_LATENCY_MS;
        }
        plan.estimated_latency_ms = latency;
    }
}

/// Deterministic latency baseline by complexity class, ms. Ranks plans —
/// it does not predict reality.
fn base_latency_ms(chars: &RequestCharacteristics) -> u64 {
    match chars.class {
        crate::analyzer::ComplexityClass::Simple => 400,
        crate::analyzer::ComplexityClass::Moderate => 800,
        crate::analyzer::ComplexityClass::Complex => 1500,
        crate::analyzer::ComplexityClass::MultiModal => 1800,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
