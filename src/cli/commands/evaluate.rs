use anyhow::Result;

use super::Command;
use crate::scope::{ElementCounts, ScopeChangeMode, ScopeComparisonEngine, TenantScopeChangeSettings};

pub struct EvaluateCommand {
    pub original: ElementCounts,
    pub actual: ElementCounts,
    pub settings: TenantScopeChangeSettings,
}

impl EvaluateCommand {
    /// Start from `defaults` and apply whichever overrides were given.
    pub fn new(
        original: ElementCounts,
        actual: ElementCounts,
        defaults: TenantScopeChangeSettings,
        mode: Option<ScopeChangeMode>,
        percent: Option<f64>,
        count: Option<u32>,
    ) -> Self {
        let mut settings = defaults;
        if let Some(mode) = mode {
            settings.mode = mode;
        }
        if percent.is_some() {
            settings.variance_percent_threshold = percent;
        }
        if count.is_some() {
            settings.variance_count_threshold = count;
        }
        Self {
            original,
            actual,
            settings,
        }
    }
}

impl Command for EvaluateCommand {
    async fn execute(&self) -> Result<()> {
        let outcome =
            ScopeComparisonEngine::evaluate_preview(&self.original, &self.actual, &self.settings);

        println!("mode:       {}", self.settings.mode);
        println!(
            "original:   {} (building {}, common {}, additional {})",
            self.original.total(),
            self.original.building,
            self.original.common,
            self.original.additional
        );
        println!(
            "actual:     {} (building {}, common {}, additional {})",
            self.actual.total(),
            self.actual.building,
            self.actual.common,
            self.actual.additional
        );
        println!(
            "variance:   {:+} ({:+.2}%)",
            outcome.variance_count, outcome.variance_percent
        );
        println!("status:     {}", outcome.status);
        println!("blocking:   {}", outcome.should_block_workflow);
        println!("{}", outcome.message);
        Ok(())
    }
}
