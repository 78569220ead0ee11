//! Scope variance detection and the amendment sub-workflow
//!
//! A [`ScopeComparison`] records the element counts a proposal was priced on
//! and the counts observed after the site visit. [`ScopeComparisonEngine`]
//! evaluates the variance under the tenant's [`TenantScopeChangeSettings`]
//! and, when an amendment is needed, drives the study into and out of
//! `AmendmentPending`.

pub mod engine;
pub mod policy;
pub mod types;
pub mod variance;

pub use engine::{AmendmentStep, ScopeComparisonEngine, VarianceEvaluation};
pub use policy::{CachedPolicyProvider, StaticPolicyProvider, TenantPolicyProvider};
pub use types::{
    ComparisonNote, ElementCounts, ScopeChangeMode, ScopeComparison, ScopeComparisonStatus,
    ScopeSource, TenantScopeChangeSettings,
};
pub use variance::{compute_variance, evaluate, exceeds_threshold, VarianceOutcome};
