use anyhow::Result;
use clap::Parser;
use tracing::Instrument;

use reserve_flow::cli::commands::{
    CanCommand, Command, ConfigCommand, EvaluateCommand, StagesCommand, TransitionsCommand,
};
use reserve_flow::cli::{Cli, Commands};
use reserve_flow::config::config;
use reserve_flow::observability::workflow_metrics;
use reserve_flow::telemetry::{create_study_span, generate_correlation_id, init_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config()?;
    init_telemetry(&config.observability)?;

    let operation = cli.command.name();
    let correlation_id = generate_correlation_id();
    let span = create_study_span(operation, None, None, Some(&correlation_id));

    let result = tokio::runtime::Runtime::new()?.block_on(
        async move {
            match cli.command {
                Commands::Stages { json } => StagesCommand::new(json).execute().await,
                Commands::Transitions { status } => {
                    TransitionsCommand::new(status).execute().await
                }
                Commands::Can {
                    status,
                    role,
                    action,
                } => CanCommand::new(status, role, action).execute().await,
                Commands::Evaluate {
                    original,
                    actual,
                    mode,
                    percent,
                    count,
                } => {
                    EvaluateCommand::new(
                        original,
                        actual,
                        config.scope_change.clone(),
                        mode,
                        percent,
                        count,
                    )
                    .execute()
                    .await
                }
                Commands::Config { write } => {
                    ConfigCommand::new(config.clone(), write).execute().await
                }
            }
        }
        .instrument(span),
    );

    if config.observability.metrics_enabled {
        workflow_metrics().log_stats();
    }
    result
}
