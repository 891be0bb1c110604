//! Handler command.
//!
//! Serves the query handler as an HTTP endpoint.

use std::sync::Arc;

use clap::Args;
use kbchat_core::{config::AppConfig, AppResult};
use kbchat_knowledge::QueryHandler;

use crate::serve;

/// Serve the query handler over HTTP
#[derive(Args, Debug)]
pub struct HandlerCommand {
    /// Address to bind (default: handler.bind from config)
    #[arg(short, long)]
    pub bind: Option<String>,
}

impl HandlerCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing handler command");

        config.validate_handler()?;
        let handler = QueryHandler::from_config(config)?;

        let bind = self.bind.as_deref().unwrap_or(&config.handler.bind);
        serve::start_handler_server(bind, Arc::new(handler)).await
    }
}
