//! Ask command handler.
//!
//! Sends one question to the query handler and prints the answer with its
//! references.

use clap::Args;
use kbchat_chat::{HttpQueryApi, QueryApi};
use kbchat_core::{config::AppConfig, AppError, AppResult};
use kbchat_knowledge::{QueryHandler, QueryResponse};
use std::path::PathBuf;

/// Ask a single question
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub prompt: Option<String>,

    /// Read the question from a file
    #[arg(short, long, conflicts_with = "prompt")]
    pub file: Option<PathBuf>,

    /// Knowledge-base session to continue
    #[arg(short, long)]
    pub session: Option<String>,

    /// Query handler URL; answers in-process when neither this nor API_URL is set
    #[arg(long)]
    pub api_url: Option<String>,

    /// Output the raw handler response as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    /// Execute the ask command.
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let question = self.get_prompt()?;

        let response = match self.api_url.clone().or_else(|| config.ui.api_url.clone()) {
            Some(url) if !url.is_empty() => {
                tracing::info!("Asking handler at {}", url);
                HttpQueryApi::new(url)?
                    .query(&question, self.session.as_deref())
                    .await?
            }
            _ => {
                config.validate_handler()?;
                QueryHandler::from_config(config)?
                    .query(&question, self.session.as_deref())
                    .await?
            }
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            print!("{}", render_text(&response));
        }

        if response.is_success() {
            Ok(())
        } else {
            Err(AppError::Knowledge(
                response
                    .error
                    .unwrap_or_else(|| format!("Handler returned {}", response.status_code)),
            ))
        }
    }

    fn get_prompt(&self) -> AppResult<String> {
        let prompt = match (&self.prompt, &self.file) {
            (Some(prompt), _) => prompt.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => return Err(AppError::Config("No question provided".to_string())),
        };

        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(AppError::Config("Question is empty".to_string()));
        }
        Ok(prompt)
    }
}

/// Plain-text rendering: answer, numbered references, session id.
fn render_text(response: &QueryResponse) -> String {
    let mut out = format!("{}\n", response.generated_response);

    if !response.detailed_references.is_empty() {
        out.push_str("\nReferences:\n");
        for (i, reference) in response.detailed_references.iter().enumerate() {
            out.push_str(&format!("  [{}] {} (score {:.3})\n", i + 1, reference.uri, reference.score));
            if let Some(url) = &reference.presigned_url {
                out.push_str(&format!("      {}\n", url));
            }
        }
    }

    if let Some(session_id) = &response.session_id {
        out.push_str(&format!("\nSession: {}\n", session_id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_knowledge::Reference;

    #[test]
    fn test_render_text() {
        let mut reference = Reference::new("s3://docs/a.pdf", "alpha", 0.91234);
        reference.presigned_url = Some("https://signed/a".to_string());
        let response =
            QueryResponse::success("q", "The answer.", vec![reference], Some("s-1".to_string()));

        let text = render_text(&response);
        assert!(text.starts_with("The answer.\n"));
        assert!(text.contains("[1] s3://docs/a.pdf (score 0.912)"));
        assert!(text.contains("https://signed/a"));
        assert!(text.ends_with("Session: s-1\n"));
    }

    #[test]
    fn test_get_prompt() {
        let ask = AskCommand {
            prompt: Some("  hello  ".to_string()),
            file: None,
            session: None,
            api_url: None,
            json: false,
        };
        assert_eq!(ask.get_prompt().unwrap(), "hello");

        let empty = AskCommand {
            prompt: None,
            file: None,
            session: None,
            api_url: None,
            json: false,
        };
        assert!(empty.get_prompt().is_err());
    }
}
