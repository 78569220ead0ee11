// Variance arithmetic and threshold evaluation
//
// Pure functions only. The comparison engine feeds them the captured and
// observed counts plus the tenant policy and persists whatever comes back.

use serde::{Deserialize, Serialize};

use super::types::{ElementCounts, ScopeChangeMode, ScopeComparisonStatus, TenantScopeChangeSettings};

/// Outcome of comparing the original scope against the observed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceOutcome {
    pub variance_count: i64,
    pub variance_percent: f64,
    pub exceeds_threshold: bool,
    pub should_block_workflow: bool,
    pub status: ScopeComparisonStatus,
    pub message: String,
}

/// Signed element difference and percent of the original total, rounded to
/// two decimals.
///
/// A zero original total has no meaningful ratio: any observed elements
/// count as 100% variance, none as 0%.
pub fn compute_variance(original: &ElementCounts, actual: &ElementCounts) -> (i64, f64) {
    // Three u32 counts sum to well below i64::MAX.
    let original_total = original.total() as i64;
    let actual_total = actual.total() as i64;
    let count = actual_total - original_total;

    let percent = if original_total == 0 {
        if actual_total > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        round2(count as f64 / original_total as f64 * 100.0)
    };

    (count, percent)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether the variance is significant under `settings`.
///
/// Either configured threshold is enough (logical OR). Under
/// `AlwaysAmendment` any change at all is significant.
pub fn exceeds_threshold(count: i64, percent: f64, settings: &TenantScopeChangeSettings) -> bool {
    if settings.mode == ScopeChangeMode::AlwaysAmendment {
        return count != 0;
    }

    let over_percent = settings
        .variance_percent_threshold
        .is_some_and(|threshold| percent.abs() > threshold);
    let over_count = settings
        .variance_count_threshold
        .is_some_and(|threshold| count.unsigned_abs() > u64::from(threshold));

    over_percent || over_count
}

pub fn evaluate(
    original: &ElementCounts,
    actual: &ElementCounts,
    settings: &TenantScopeChangeSettings,
) -> VarianceOutcome {
    let (variance_count, variance_percent) = compute_variance(original, actual);
    let exceeds = exceeds_threshold(variance_count, variance_percent, settings);
    let should_block_workflow = exceeds && settings.mode.blocks_workflow();

    let status = if settings.mode == ScopeChangeMode::NoAction || !exceeds {
        ScopeComparisonStatus::WithinThreshold
    } else {
        ScopeComparisonStatus::ExceedsThreshold
    };

    VarianceOutcome {
        variance_count,
        variance_percent,
        exceeds_threshold: exceeds,
        should_block_workflow,
        status,
        message: variance_message(settings.mode, variance_count, variance_percent, exceeds),
    }
}

/// Staff-facing summary of the variance, worded per tenant mode.
pub fn variance_message(mode: ScopeChangeMode, count: i64, percent: f64, exceeds: bool) -> String {
    if count == 0 {
        return "Observed scope matches the original estimate.".to_string();
    }

    let direction = if count > 0 { "more" } else { "fewer" };
    let finding = format!(
        "Site visit found {} {} elements than estimated ({:.1}%).",
        count.unsigned_abs(),
        direction,
        percent.abs()
    );

    match mode {
        ScopeChangeMode::NoAction => format!("{finding} Recorded for reference only."),
        ScopeChangeMode::VarianceReportOnly => {
            format!("{finding} Variance reported to staff; the study continues.")
        }
        ScopeChangeMode::VarianceWithAmendment if exceeds => {
            format!("{finding} This exceeds the tenant threshold. Amendment required.")
        }
        ScopeChangeMode::VarianceWithAmendment => {
            format!("{finding} Within the tenant threshold; no amendment needed.")
        }
        ScopeChangeMode::AlwaysAmendment => {
            format!("{finding} Any scope change requires an amendment. Amendment required.")
        }
        ScopeChangeMode::TwoPhase if exceeds => format!(
            "{finding} Final pricing will be issued from the observed scope before planning continues."
        ),
        ScopeChangeMode::TwoPhase => {
            format!("{finding} Preliminary pricing stands; final pricing follows the observed scope.")
        }
    }
}
