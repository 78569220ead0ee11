// Scope comparison records and tenant scope-change policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::workflows::TenantId;

/// Element counts for a study, split the way assessments are priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementCounts {
    pub building: u32,
    pub common: u32,
    pub additional: u32,
}

impl ElementCounts {
    pub fn new(building: u32, common: u32, additional: u32) -> Self {
        Self {
            building,
            common,
            additional,
        }
    }

    /// Sum of all three counts, widened so it cannot overflow.
    pub fn total(&self) -> u64 {
        u64::from(self.building) + u64::from(self.common) + u64::from(self.additional)
    }
}

/// Where the original scope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ScopeSource {
    /// Self-reported estimate on the originating request.
    ClientEstimate,
    /// Elements attached to the study when the original was captured.
    AttachedElements,
}

/// Lifecycle of a scope comparison, independent of the study's own status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
pub enum ScopeComparisonStatus {
    Pending,
    WithinThreshold,
    ExceedsThreshold,
    AmendmentPending,
    AmendmentAccepted,
    AmendmentRejected,
    Overridden,
}

impl ScopeComparisonStatus {
    /// Edges of the amendment sub-workflow. Everything moves forward except
    /// the revision edge from a rejected amendment back to `ExceedsThreshold`.
    pub fn can_transition_to(&self, next: ScopeComparisonStatus) -> bool {
        use ScopeComparisonStatus::*;
        matches!(
            (self, next),
            (Pending, WithinThreshold)
                | (Pending, ExceedsThreshold)
                | (ExceedsThreshold, Overridden)
                | (ExceedsThreshold, AmendmentPending)
                | (AmendmentPending, AmendmentAccepted)
                | (AmendmentPending, AmendmentRejected)
                | (AmendmentRejected, ExceedsThreshold)
        )
    }

    /// Actual counts may be (re)compared while no amendment decision exists.
    pub fn accepts_comparison(&self) -> bool {
        use ScopeComparisonStatus::*;
        matches!(self, Pending | WithinThreshold | ExceedsThreshold)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScopeComparisonStatus::AmendmentAccepted | ScopeComparisonStatus::Overridden
        )
    }
}

/// One entry of the append-only comparison audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonNote {
    pub at: DateTime<Utc>,
    pub author: String,
    pub text: String,
}

/// Original vs. observed scope for one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeComparison {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub study_id: Uuid,

    pub original: ElementCounts,
    pub original_source: ScopeSource,
    pub original_captured_at: DateTime<Utc>,

    pub actual: Option<ElementCounts>,
    pub compared_at: Option<DateTime<Utc>>,
    pub compared_by_user_id: Option<String>,
    pub variance_count: i64,
    pub variance_percent: f64,

    pub status: ScopeComparisonStatus,

    pub amendment_proposal_id: Option<Uuid>,
    pub amendment_sent_at: Option<DateTime<Utc>>,
    pub amendment_sent_by: Option<String>,
    pub amendment_accepted_at: Option<DateTime<Utc>>,
    pub amendment_accepted_by: Option<String>,
    pub amendment_rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub revision_count: u32,

    pub overridden_by_user_id: Option<String>,
    pub overridden_at: Option<DateTime<Utc>>,
    pub override_reason: Option<String>,

    pub notes: Vec<ComparisonNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token owned by the store; 0 until first stored.
    #[serde(default)]
    pub version: u64,
}

impl ScopeComparison {
    pub fn new(
        tenant_id: TenantId,
        study_id: Uuid,
        original: ElementCounts,
        original_source: ScopeSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            study_id,
            original,
            original_source,
            original_captured_at: now,
            actual: None,
            compared_at: None,
            compared_by_user_id: None,
            variance_count: 0,
            variance_percent: 0.0,
            status: ScopeComparisonStatus::Pending,
            amendment_proposal_id: None,
            amendment_sent_at: None,
            amendment_sent_by: None,
            amendment_accepted_at: None,
            amendment_accepted_by: None,
            amendment_rejected_at: None,
            rejection_reason: None,
            revision_count: 0,
            overridden_by_user_id: None,
            overridden_at: None,
            override_reason: None,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn add_note(&mut self, author: impl Into<String>, text: impl Into<String>) {
        self.notes.push(ComparisonNote {
            at: Utc::now(),
            author: author.into(),
            text: text.into(),
        });
    }

    /// Notes joined into a single block, oldest first.
    pub fn notes_text(&self) -> String {
        self.notes
            .iter()
            .map(|n| format!("[{}] {}: {}", n.at.format("%Y-%m-%d %H:%M"), n.author, n.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// How a tenant reacts to scope variance after the site visit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter,
    EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ScopeChangeMode {
    /// Record the variance, never act on it.
    #[default]
    NoAction,
    /// Report variance to staff; the workflow continues.
    VarianceReportOnly,
    /// Require an amendment when variance exceeds the thresholds.
    VarianceWithAmendment,
    /// Require an amendment for any variance at all.
    AlwaysAmendment,
    /// Proposal pricing is preliminary; final pricing follows the site visit.
    TwoPhase,
}

impl ScopeChangeMode {
    pub fn blocks_workflow(&self) -> bool {
        !matches!(
            self,
            ScopeChangeMode::NoAction | ScopeChangeMode::VarianceReportOnly
        )
    }
}

/// Per-tenant scope-change policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantScopeChangeSettings {
    pub mode: ScopeChangeMode,
    /// Absolute variance percent above which the scope change is significant.
    pub variance_percent_threshold: Option<f64>,
    /// Absolute element-count variance above which the scope change is significant.
    pub variance_count_threshold: Option<u32>,
    pub allow_staff_override: bool,
    pub require_hoa_approval: bool,
    pub allow_amendments_after_completion: bool,
    pub notify_client_on_variance: bool,
    pub notify_staff_on_variance: bool,
}

impl Default for TenantScopeChangeSettings {
    fn default() -> Self {
        Self {
            mode: ScopeChangeMode::NoAction,
            variance_percent_threshold: Some(10.0),
            variance_count_threshold: None,
            allow_staff_override: true,
            require_hoa_approval: true,
            allow_amendments_after_completion: false,
            notify_client_on_variance: false,
            notify_staff_on_variance: true,
        }
    }
}
