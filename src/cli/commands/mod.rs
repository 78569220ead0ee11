use anyhow::Result;

pub mod config;
pub mod evaluate;
pub mod stages;

pub use config::ConfigCommand;
pub use evaluate::EvaluateCommand;
pub use stages::{CanCommand, StagesCommand, TransitionsCommand};

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}
