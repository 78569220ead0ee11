use anyhow::Result;
use std::sync::Arc;

use super::Command;
use crate::persistence::InMemoryWorkflowStore;
use crate::workflows::{
    ActorRole, NoopNotificationDispatcher, StageAction, StageConfig, StageRegistry, StudyStatus,
    TransitionEngine,
};

pub struct StagesCommand {
    pub json: bool,
}

pub struct TransitionsCommand {
    pub status: StudyStatus,
}

pub struct CanCommand {
    pub status: StudyStatus,
    pub role: ActorRole,
    pub action: StageAction,
}

/// Engine over the standard table with nothing behind it; only used for
/// read-only questions.
fn inspection_engine() -> TransitionEngine {
    TransitionEngine::new(
        Arc::new(StageRegistry::standard()),
        Arc::new(InMemoryWorkflowStore::new()),
        Arc::new(NoopNotificationDispatcher),
    )
}

fn alternatives(config: &StageConfig) -> String {
    if config.alternative_transitions.is_empty() {
        return "-".to_string();
    }
    config
        .alternative_transitions
        .iter()
        .map(|(action, target)| format!("{action}->{target}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StagesCommand {
    pub fn new(json: bool) -> Self {
        Self { json }
    }
}

impl Command for StagesCommand {
    async fn execute(&self) -> Result<()> {
        let registry = StageRegistry::standard();
        let configs: Vec<&StageConfig> = registry
            .statuses()
            .into_iter()
            .map(|status| registry.get_config(status))
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&configs)?);
            return Ok(());
        }

        let mut current_phase = None;
        for config in configs {
            if config.phase != current_phase {
                current_phase = config.phase;
                if let Some(phase) = current_phase {
                    println!();
                    println!("== {phase} ==");
                }
            }
            let status = config
                .status
                .map(|s| s.to_string())
                .unwrap_or_default();
            let next = config
                .default_next
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<26} {:<28} by {:<28} actions {:<40} next {:<26} alt {}{}",
                status,
                config.display_name,
                config.advanced_by.to_string(),
                config.available_actions.to_string(),
                next,
                alternatives(config),
                if config.auto_advance { " (auto)" } else { "" }
            );
        }
        Ok(())
    }
}

impl TransitionsCommand {
    pub fn new(status: StudyStatus) -> Self {
        Self { status }
    }
}

impl Command for TransitionsCommand {
    async fn execute(&self) -> Result<()> {
        let engine = inspection_engine();
        let allowed = engine.get_allowed_transitions(self.status);
        if allowed.is_empty() {
            println!("{} has no allowed transitions", self.status);
            return Ok(());
        }
        println!("{} can move to:", self.status);
        for status in allowed {
            println!("  {status}");
        }
        let siblings = engine.registry().parallel_siblings(self.status);
        if !siblings.is_empty() {
            let names: Vec<String> = siblings.iter().map(|s| s.to_string()).collect();
            println!("Runs in parallel with: {}", names.join(", "));
        }
        Ok(())
    }
}

impl CanCommand {
    pub fn new(status: StudyStatus, role: ActorRole, action: StageAction) -> Self {
        Self {
            status,
            role,
            action,
        }
    }
}

impl Command for CanCommand {
    async fn execute(&self) -> Result<()> {
        let registry = StageRegistry::standard();
        let allowed = registry.can_actor_perform_action(self.status, self.role, self.action);
        if !allowed {
            println!("no: {} may not {} at {}", self.role, self.action, self.status);
            return Ok(());
        }

        if self.action.is_admin_only() {
            println!(
                "yes: {} is an admin action, pick the target stage explicitly",
                self.action
            );
            return Ok(());
        }

        match registry.get_next_stage(self.status, self.action) {
            Some(next) => println!("yes: {} -> {}", self.status, next),
            None => println!("yes: {} stays at {}", self.action, self.status),
        }
        Ok(())
    }
}
