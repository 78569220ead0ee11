use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::scope::{ElementCounts, ScopeChangeMode};
use crate::workflows::{ActorRole, StageAction, StudyStatus};

pub mod commands;

#[derive(Parser)]
#[command(name = "reserve-flow")]
#[command(about = "Inspect the study workflow and scope variance rules")]
#[command(long_about = "reserve-flow prints the study stage table, checks which transitions and \
                       actions are allowed, and previews how a tenant's scope-change policy treats \
                       a variance between estimated and observed element counts.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every stage with its actors, actions and transitions
    Stages {
        /// Print the stage table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the statuses reachable from a status
    Transitions {
        /// Current status, e.g. ProposalSent
        status: StudyStatus,
    },
    /// Check whether a role may perform an action on a stage
    Can {
        status: StudyStatus,
        role: ActorRole,
        action: StageAction,
    },
    /// Evaluate a scope variance without storing anything
    Evaluate {
        /// Original counts as building,common,additional
        #[arg(long, value_parser = parse_counts)]
        original: ElementCounts,
        /// Observed counts as building,common,additional
        #[arg(long, value_parser = parse_counts)]
        actual: ElementCounts,
        /// Scope change mode (defaults to the configured one)
        #[arg(long)]
        mode: Option<ScopeChangeMode>,
        /// Percent threshold (defaults to the configured one)
        #[arg(long)]
        percent: Option<f64>,
        /// Element count threshold (defaults to the configured one)
        #[arg(long)]
        count: Option<u32>,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this file
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

impl Commands {
    /// Subcommand name, used as the operation in log spans.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Stages { .. } => "stages",
            Commands::Transitions { .. } => "transitions",
            Commands::Can { .. } => "can",
            Commands::Evaluate { .. } => "evaluate",
            Commands::Config { .. } => "config",
        }
    }
}

/// Parse `building,common,additional`.
pub fn parse_counts(value: &str) -> Result<ElementCounts, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!(
            "expected building,common,additional but got '{value}'"
        ));
    }
    let mut counts = [0u32; 3];
    for (slot, part) in counts.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| format!("'{part}' is not a non-negative element count"))?;
    }
    Ok(ElementCounts::new(counts[0], counts[1], counts[2]))
}
