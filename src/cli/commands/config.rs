use anyhow::Result;
use std::path::PathBuf;

use super::Command;
use crate::config::ReserveFlowConfig;

pub struct ConfigCommand {
    pub config: ReserveFlowConfig,
    pub write: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn new(config: ReserveFlowConfig, write: Option<PathBuf>) -> Self {
        Self { config, write }
    }
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        print!("{}", self.config.to_toml()?);
        if let Some(path) = &self.write {
            self.config.save_to_file(path)?;
            eprintln!("Wrote configuration to {}", path.display());
        }
        Ok(())
    }
}
