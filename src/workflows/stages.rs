// Stage configuration registry
//
// Immutable lookup from a study status to what may happen there. Built once
// (usually via `StageRegistry::standard()`) and shared behind an `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::IntoEnumIterator;
use strum_macros::Display;

use super::flags::{ActionSet, ActorRole, ActorSet, StageAction};
use super::status::{StudyPhase, StudyStatus};

/// Named precondition a stage expects before it can be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum StageValidation {
    RequestDetailsComplete,
    ProposalExists,
    ProposalReviewed,
    ProposalApproved,
    ProposalAccepted,
    ServiceContactsProvided,
    FinancialInfoProvided,
    FinancialInfoReviewed,
    SiteVisitScheduled,
    SiteVisitPhotosUploaded,
    ElementsEntered,
    ScopeVarianceResolved,
    AmendmentAccepted,
    FundingPlanCreated,
    NarrativeWritten,
    ReportGenerated,
    ReportDelivered,
}

/// Everything the workflow knows about one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub status: Option<StudyStatus>,
    pub display_name: String,
    pub phase: Option<StudyPhase>,
    pub advanced_by: ActorSet,
    pub available_actions: ActionSet,
    pub required_validations: Vec<StageValidation>,
    pub auto_advance: bool,
    pub default_next: Option<StudyStatus>,
    pub alternative_transitions: BTreeMap<StageAction, StudyStatus>,
    pub notify_on_enter: ActorSet,
    pub notify_on_exit: ActorSet,
    pub action_required_message: String,
    pub waiting_message: String,
    pub parallel_with: Vec<StudyStatus>,
}

impl StageConfig {
    pub fn new(status: StudyStatus, display_name: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            display_name: display_name.into(),
            phase: Some(status.phase()),
            advanced_by: ActorSet::EMPTY,
            available_actions: ActionSet::EMPTY,
            required_validations: Vec::new(),
            auto_advance: false,
            default_next: None,
            alternative_transitions: BTreeMap::new(),
            notify_on_enter: ActorSet::EMPTY,
            notify_on_exit: ActorSet::EMPTY,
            action_required_message: String::new(),
            waiting_message: String::new(),
            parallel_with: Vec::new(),
        }
    }

    /// Configuration returned for statuses the registry does not know.
    /// Nothing is permitted from it.
    pub fn unconfigured() -> Self {
        Self {
            status: None,
            display_name: "Unknown stage".to_string(),
            phase: None,
            action_required_message: "This stage is not configured.".to_string(),
            waiting_message: "This stage is not configured.".to_string(),
            ..Self::new(StudyStatus::RequestCreated, "")
        }
    }

    /// Advance to `next`, performed by `by`.
    pub fn advances_to(mut self, next: StudyStatus, by: ActorSet) -> Self {
        self.default_next = Some(next);
        self.advanced_by = by;
        self.available_actions |= StageAction::Advance;
        self
    }

    /// Non-advance action leading to `target`.
    pub fn on(mut self, action: StageAction, target: StudyStatus) -> Self {
        self.alternative_transitions.insert(action, target);
        self.available_actions |= action;
        self
    }

    pub fn requires(mut self, validations: &[StageValidation]) -> Self {
        self.required_validations.extend_from_slice(validations);
        self
    }

    pub fn auto_advance(mut self) -> Self {
        self.auto_advance = true;
        self
    }

    pub fn notify(mut self, on_enter: ActorSet, on_exit: ActorSet) -> Self {
        self.notify_on_enter = on_enter;
        self.notify_on_exit = on_exit;
        self
    }

    pub fn messages(mut self, required: impl Into<String>, waiting: impl Into<String>) -> Self {
        self.action_required_message = required.into();
        self.waiting_message = waiting.into();
        self
    }

    pub fn parallel_with(mut self, siblings: &[StudyStatus]) -> Self {
        self.parallel_with.extend_from_slice(siblings);
        self
    }

    /// Every state reachable through the checked transition path.
    pub fn reachable(&self) -> Vec<StudyStatus> {
        let mut targets: Vec<StudyStatus> = self.default_next.into_iter().collect();
        for target in self.alternative_transitions.values() {
            if !targets.contains(target) {
                targets.push(*target);
            }
        }
        targets
    }
}

/// Read-only stage table.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: HashMap<StudyStatus, StageConfig>,
    fallback: StageConfig,
}

impl StageRegistry {
    pub fn builder() -> StageRegistryBuilder {
        StageRegistryBuilder::default()
    }

    pub fn get_config(&self, status: StudyStatus) -> &StageConfig {
        self.stages.get(&status).unwrap_or(&self.fallback)
    }

    pub fn is_configured(&self, status: StudyStatus) -> bool {
        self.stages.contains_key(&status)
    }

    /// Whether `role` may perform `action` while a study sits in `status`.
    pub fn can_actor_perform_action(
        &self,
        status: StudyStatus,
        role: ActorRole,
        action: StageAction,
    ) -> bool {
        if role == ActorRole::Admin && action.is_admin_only() {
            return true;
        }

        let config = self.get_config(status);
        if !config.available_actions.contains(action) {
            return false;
        }

        action != StageAction::Advance || config.advanced_by.contains(role)
    }

    pub fn get_next_stage(&self, status: StudyStatus, action: StageAction) -> Option<StudyStatus> {
        let config = self.get_config(status);
        match action {
            StageAction::Advance => config.default_next,
            other => config.alternative_transitions.get(&other).copied(),
        }
    }

    /// Statuses that may be open alongside `status` for the same study.
    pub fn parallel_siblings(&self, status: StudyStatus) -> &[StudyStatus] {
        &self.get_config(status).parallel_with
    }

    /// Configured statuses in declaration order.
    pub fn statuses(&self) -> Vec<StudyStatus> {
        StudyStatus::iter()
            .filter(|s| self.stages.contains_key(s))
            .collect()
    }

    /// The built-in study lifecycle.
    pub fn standard() -> Self {
        standard_stages()
            .into_iter()
            .fold(Self::builder(), |builder, stage| builder.stage(stage))
            .build()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Default)]
pub struct StageRegistryBuilder {
    stages: HashMap<StudyStatus, StageConfig>,
}

impl StageRegistryBuilder {
    /// Register a stage. A later registration for the same status replaces the earlier one.
    pub fn stage(mut self, config: StageConfig) -> Self {
        if let Some(status) = config.status {
            self.stages.insert(status, config);
        }
        self
    }

    pub fn build(self) -> StageRegistry {
        StageRegistry {
            stages: self.stages,
            fallback: StageConfig::unconfigured(),
        }
    }
}

fn standard_stages() -> Vec<StageConfig> {
    use ActorRole::*;
    use StageAction::*;
    use StageValidation as V;
    use StudyStatus::*;

    let staff = Staff | Admin;
    let field = Specialist | Staff | Admin;
    let client = Client | Staff | Admin;
    let system = System | Staff | Admin;
    let team = ActorSet::from(Staff) | Specialist;

    vec![
        // Request
        StageConfig::new(RequestCreated, "Request Submitted")
            .advances_to(RequestApproved, staff)
            .on(Reject, RequestDeclined)
            .on(Cancel, RequestCancelled)
            .requires(&[V::RequestDetailsComplete])
            .notify(ActorSet::from(Staff), ActorSet::EMPTY)
            .messages("Review the incoming request.", "Waiting for staff to review your request."),
        StageConfig::new(RequestApproved, "Request Approved")
            .advances_to(ProposalCreated, staff)
            .on(Cancel, RequestCancelled)
            .notify(ActorSet::from(Client), ActorSet::EMPTY)
            .messages("Prepare a proposal.", "Your request was approved. A proposal is being prepared."),
        StageConfig::new(RequestDeclined, "Request Declined")
            .advances_to(RequestArchived, system)
            .notify(ActorSet::from(Client), ActorSet::EMPTY)
            .messages("Archive the declined request.", "This request was declined."),
        // Proposal
        StageConfig::new(ProposalCreated, "Proposal Drafted")
            .advances_to(ProposalReviewed, staff | Specialist)
            .on(Cancel, RequestCancelled)
            .requires(&[V::ProposalExists])
            .messages("Review the proposal draft.", "A proposal is being drafted."),
        StageConfig::new(ProposalReviewed, "Proposal Reviewed")
            .advances_to(ProposalApproved, staff)
            .on(RequestChanges, ProposalCreated)
            .on(Cancel, RequestCancelled)
            .requires(&[V::ProposalReviewed])
            .notify(ActorSet::from(Admin), ActorSet::EMPTY)
            .messages("Approve the reviewed proposal.", "The proposal is awaiting approval."),
        StageConfig::new(ProposalApproved, "Proposal Approved")
            .advances_to(ProposalSent, system)
            .on(Cancel, RequestCancelled)
            .requires(&[V::ProposalApproved])
            .messages("Send the proposal to the client.", "The proposal is ready to send."),
        StageConfig::new(ProposalSent, "Proposal Sent")
            .advances_to(ProposalAccepted, client)
            .on(Reject, RequestDeclined)
            .on(RequestChanges, ProposalChangesRequested)
            .on(Cancel, RequestCancelled)
            .notify(ActorSet::from(Client), team)
            .messages("Review and accept the proposal.", "Waiting for the client to accept the proposal."),
        StageConfig::new(ProposalChangesRequested, "Proposal Changes Requested")
            .advances_to(ProposalCreated, staff)
            .on(Cancel, RequestCancelled)
            .notify(ActorSet::from(Staff), ActorSet::EMPTY)
            .messages("Revise the proposal.", "Your requested changes are being made."),
        StageConfig::new(ProposalAccepted, "Proposal Accepted")
            .advances_to(ServiceContactsRequested, system)
            .on(Cancel, RequestCancelled)
            .requires(&[V::ProposalAccepted])
            .auto_advance()
            .notify(team, ActorSet::EMPTY)
            .messages("Start data collection.", "Proposal accepted. Data collection starts shortly."),
        // Data collection
        StageConfig::new(ServiceContactsRequested, "Service Contacts Requested")
            .advances_to(ServiceContactsReceived, client)
            .on(Cancel, RequestCancelled)
            .requires(&[V::ServiceContactsProvided])
            .parallel_with(&[FinancialInfoRequested])
            .notify(ActorSet::from(Client), ActorSet::from(Staff))
            .messages("Provide service provider contacts.", "Waiting for service contacts."),
        StageConfig::new(ServiceContactsReceived, "Service Contacts Received")
            .advances_to(FinancialInfoRequested, system)
            .on(RequestChanges, ServiceContactsRequested)
            .messages("Request financial information.", "Service contacts received."),
        StageConfig::new(FinancialInfoRequested, "Financial Info Requested")
            .advances_to(FinancialInfoReceived, client)
            .on(Cancel, RequestCancelled)
            .requires(&[V::FinancialInfoProvided])
            .parallel_with(&[ServiceContactsRequested])
            .notify(ActorSet::from(Client), ActorSet::from(Staff))
            .messages("Provide reserve fund financial information.", "Waiting for financial information."),
        StageConfig::new(FinancialInfoReceived, "Financial Info Received")
            .advances_to(SiteVisitPending, staff)
            .on(RequestChanges, FinancialInfoRequested)
            .requires(&[V::FinancialInfoReviewed])
            .notify(ActorSet::EMPTY, ActorSet::from(Client))
            .messages("Review the submitted financial information.", "Financial information is under review."),
        // Site visit
        StageConfig::new(SiteVisitPending, "Site Visit Pending")
            .advances_to(SiteVisitScheduled, field)
            .on(Cancel, RequestCancelled)
            .requires(&[V::SiteVisitScheduled])
            .notify(ActorSet::from(Specialist), ActorSet::EMPTY)
            .messages("Schedule the site visit.", "A site visit will be scheduled."),
        StageConfig::new(SiteVisitScheduled, "Site Visit Scheduled")
            .advances_to(SiteVisitCompleted, field)
            .on(RequestChanges, SiteVisitPending)
            .on(Cancel, RequestCancelled)
            .notify(Client | Specialist, ActorSet::EMPTY)
            .messages("Complete the site visit.", "Your site visit is scheduled."),
        StageConfig::new(SiteVisitCompleted, "Site Visit Completed")
            .advances_to(SiteVisitDataEntered, field)
            .requires(&[V::SiteVisitPhotosUploaded])
            .messages("Enter the site visit data.", "The site visit is complete."),
        StageConfig::new(SiteVisitDataEntered, "Site Visit Data Entered")
            .advances_to(FundingPlanReady, field)
            .on(RequestChanges, AmendmentPending)
            .requires(&[V::ElementsEntered, V::ScopeVarianceResolved])
            .notify(ActorSet::from(Staff), ActorSet::EMPTY)
            .messages("Confirm the observed scope.", "Site visit findings are being processed."),
        StageConfig::new(AmendmentPending, "Scope Amendment Pending")
            .advances_to(FundingPlanReady, client)
            .on(Cancel, RequestCancelled)
            .requires(&[V::AmendmentAccepted])
            .notify(ActorSet::from(Client), ActorSet::from(Staff))
            .messages("Review and accept the scope amendment.", "Waiting for the client to respond to the amendment."),
        // Funding plan
        StageConfig::new(FundingPlanReady, "Funding Plan Ready")
            .advances_to(FundingPlanInProcess, team | Admin)
            .notify(ActorSet::from(Staff), ActorSet::EMPTY)
            .messages("Start the funding plan.", "The funding plan is queued."),
        StageConfig::new(FundingPlanInProcess, "Funding Plan In Process")
            .advances_to(FundingPlanComplete, team | Admin)
            .requires(&[V::FundingPlanCreated])
            .messages("Finish the funding plan.", "The funding plan is being prepared."),
        StageConfig::new(FundingPlanComplete, "Funding Plan Complete")
            .advances_to(NarrativeReady, system)
            .auto_advance()
            .messages("Start the narrative.", "The funding plan is complete."),
        // Narrative
        StageConfig::new(NarrativeReady, "Narrative Ready")
            .advances_to(NarrativeInProcess, team | Admin)
            .messages("Start writing the narrative.", "The narrative is queued."),
        StageConfig::new(NarrativeInProcess, "Narrative In Process")
            .advances_to(NarrativeComplete, team | Admin)
            .requires(&[V::NarrativeWritten])
            .messages("Finish the narrative.", "The narrative is being written."),
        StageConfig::new(NarrativeComplete, "Narrative Complete")
            .advances_to(ReportReady, system)
            .auto_advance()
            .messages("Generate the final report.", "The narrative is complete."),
        // Final report
        StageConfig::new(ReportReady, "Report Ready")
            .advances_to(ReportInProcess, staff)
            .messages("Start the final report.", "The final report is queued."),
        StageConfig::new(ReportInProcess, "Report In Process")
            .advances_to(ReportComplete, staff)
            .requires(&[V::ReportGenerated])
            .messages("Finish the final report.", "The final report is being generated."),
        StageConfig::new(ReportComplete, "Report Complete")
            .advances_to(RequestCompleted, client)
            .on(RequestChanges, ReportInProcess)
            .requires(&[V::ReportDelivered])
            .notify(ActorSet::from(Client), ActorSet::from(Staff))
            .messages("Review the final report.", "Your final report is ready."),
        // Completion
        StageConfig::new(RequestCompleted, "Completed")
            .advances_to(RequestArchived, system)
            .notify(Client | Staff, ActorSet::EMPTY)
            .messages("Archive the study.", "This study is complete."),
        StageConfig::new(RequestCancelled, "Cancelled")
            .advances_to(RequestArchived, system)
            .notify(Client | Staff, ActorSet::EMPTY)
            .messages("Archive the cancelled study.", "This study was cancelled."),
        StageConfig::new(RequestArchived, "Archived")
            .messages("", "This study is archived."),
    ]
}
