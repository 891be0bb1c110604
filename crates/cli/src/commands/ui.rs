//! UI command.
//!
//! Serves the browser chat UI against a remote or in-process handler.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use kbchat_chat::{open_stores, HttpQueryApi, Login, QueryApi};
use kbchat_core::{config::AppConfig, AppError, AppResult};
use kbchat_knowledge::QueryHandler;

use crate::serve::{self, UiOptions};

/// Serve the browser chat UI
#[derive(Args, Debug)]
pub struct UiCommand {
    /// Address to bind (default: ui.bind from config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Query handler URL (default: API_URL / ui.apiUrl)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Answer in-process instead of calling a handler URL
    #[arg(long, conflicts_with = "api_url")]
    pub in_process: bool,
}

impl UiCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ui command");

        config.validate_ui()?;
        let login = Login::new(
            config.ui.username.clone().unwrap_or_default(),
            config.ui.password.clone().unwrap_or_default(),
        );

        let api = self.query_api(config)?;
        let (history, feedback) = open_stores(config)?;

        let bind = self.bind.as_deref().unwrap_or(&config.ui.bind);
        serve::start_ui_server(
            bind,
            UiOptions {
                api,
                history,
                feedback,
                login,
                page_title: config.ui.page_title.clone(),
                session_idle: Duration::from_secs(config.ui.session_idle_secs),
                link_expiry_secs: config.handler.presign_expiry_secs,
            },
        )
        .await
    }

    fn query_api(&self, config: &AppConfig) -> AppResult<Arc<dyn QueryApi>> {
        if self.in_process {
            config.validate_handler()?;
            tracing::info!("Answering questions in-process");
            return Ok(Arc::new(QueryHandler::from_config(config)?));
        }

        let url = self
            .api_url
            .clone()
            .or_else(|| config.ui.api_url.clone())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "No handler URL configured (API_URL, ui.apiUrl or --api-url); use --in-process to answer locally"
                        .to_string(),
                )
            })?;

        tracing::info!("Using query handler at {}", url);
        Ok(Arc::new(HttpQueryApi::new(url)?))
    }
}
