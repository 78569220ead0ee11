// Study lifecycle statuses and the phases they are grouped into

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Every stage a study can be in. Exactly one is current per study.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum StudyStatus {
    // Request
    RequestCreated,
    RequestApproved,
    RequestDeclined,

    // Proposal
    ProposalCreated,
    ProposalReviewed,
    ProposalApproved,
    ProposalSent,
    ProposalChangesRequested,
    ProposalAccepted,

    // Data collection
    ServiceContactsRequested,
    ServiceContactsReceived,
    FinancialInfoRequested,
    FinancialInfoReceived,

    // Site visit
    SiteVisitPending,
    SiteVisitScheduled,
    SiteVisitCompleted,
    SiteVisitDataEntered,
    AmendmentPending,

    // Funding plan
    FundingPlanReady,
    FundingPlanInProcess,
    FundingPlanComplete,

    // Narrative
    NarrativeReady,
    NarrativeInProcess,
    NarrativeComplete,

    // Final report
    ReportReady,
    ReportInProcess,
    ReportComplete,

    // Completion
    RequestCompleted,
    RequestCancelled,
    RequestArchived,
}

/// Coarse grouping of statuses used for display and completion checks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumIter,
)]
pub enum StudyPhase {
    #[strum(to_string = "Request")]
    Request,
    #[strum(to_string = "Proposal")]
    Proposal,
    #[strum(to_string = "Data Collection")]
    DataCollection,
    #[strum(to_string = "Site Visit")]
    SiteVisit,
    #[strum(to_string = "Funding Plan")]
    FundingPlan,
    #[strum(to_string = "Narrative")]
    Narrative,
    #[strum(to_string = "Final Report")]
    FinalReport,
    #[strum(to_string = "Completion")]
    Completion,
}

impl StudyStatus {
    pub fn phase(&self) -> StudyPhase {
        use StudyStatus::*;
        match self {
            RequestCreated | RequestApproved | RequestDeclined => StudyPhase::Request,
            ProposalCreated | ProposalReviewed | ProposalApproved | ProposalSent
            | ProposalChangesRequested | ProposalAccepted => StudyPhase::Proposal,
            ServiceContactsRequested | ServiceContactsReceived | FinancialInfoRequested
            | FinancialInfoReceived => StudyPhase::DataCollection,
            SiteVisitPending | SiteVisitScheduled | SiteVisitCompleted | SiteVisitDataEntered
            | AmendmentPending => StudyPhase::SiteVisit,
            FundingPlanReady | FundingPlanInProcess | FundingPlanComplete => {
                StudyPhase::FundingPlan
            }
            NarrativeReady | NarrativeInProcess | NarrativeComplete => StudyPhase::Narrative,
            ReportReady | ReportInProcess | ReportComplete => StudyPhase::FinalReport,
            RequestCompleted | RequestCancelled | RequestArchived => StudyPhase::Completion,
        }
    }

    /// Work on the study is finished (delivered, cancelled or archived).
    pub fn is_complete(&self) -> bool {
        self.phase() == StudyPhase::Completion
    }
}
