//! Configuration management for kbchat.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config files (.kbchat/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Later sources win. The configuration is workspace-centric: local
//! development stores (history and feedback JSONL files) live in `.kbchat/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Default number of retrieval results requested from the knowledge base.
pub const DEFAULT_NUMBER_OF_RESULTS: u32 = 10;

/// Default lifetime of signed document URLs.
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .kbchat/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// AWS region for every vendor call
    pub region: String,

    /// Query handler settings
    pub handler: HandlerSettings,

    /// History / feedback storage settings
    pub storage: StorageSettings,

    /// Browser UI settings
    pub ui: UiSettings,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

/// Settings for the retrieve-and-generate query handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSettings {
    /// Knowledge base identifier
    pub knowledge_base_id: Option<String>,

    /// Foundation model ARN used for generation
    pub model_arn: Option<String>,

    /// Number of vector search results to retrieve
    #[serde(default = "default_number_of_results")]
    pub number_of_results: u32,

    /// Rerank model ARN; reranking is skipped when unset
    pub rerank_model_arn: Option<String>,

    /// Lifetime of signed document URLs, in seconds
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,

    /// Address the handler HTTP server binds to
    #[serde(default = "default_handler_bind")]
    pub bind: String,
}

/// Which key-value backend to use for history and feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Hosted DynamoDB tables
    Dynamodb,
    /// JSONL files under `.kbchat/`
    Local,
}

impl StorageBackend {
    /// Parse a backend name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dynamodb" | "dynamo" => Some(Self::Dynamodb),
            "local" | "file" => Some(Self::Local),
            _ => None,
        }
    }

    /// Like [`parse`](Self::parse), but an unknown name is a config error.
    pub fn from_setting(s: &str) -> AppResult<Self> {
        Self::parse(s).ok_or_else(|| {
            AppError::Config(format!(
                "Unknown storage backend '{}' (expected dynamodb or local)",
                s
            ))
        })
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_history_table")]
    pub history_table: String,

    #[serde(default = "default_feedback_table")]
    pub feedback_table: String,
}

/// Browser UI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSettings {
    /// Address the UI server binds to
    #[serde(default = "default_ui_bind")]
    pub bind: String,

    /// URL of the query handler (`POST` endpoint)
    pub api_url: Option<String>,

    /// Login user name
    pub username: Option<String>,

    /// Login password (normally supplied through CHATBOT_PASSWORD)
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Page title shown in the browser
    #[serde(default = "default_page_title")]
    pub page_title: String,

    /// Browser sessions idle longer than this are closed, in seconds
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
}

fn default_number_of_results() -> u32 {
    DEFAULT_NUMBER_OF_RESULTS
}

fn default_presign_expiry() -> u64 {
    DEFAULT_PRESIGN_EXPIRY_SECS
}

fn default_handler_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_ui_bind() -> String {
    "127.0.0.1:8501".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Dynamodb
}

fn default_history_table() -> String {
    "ChatHistory".to_string()
}

fn default_feedback_table() -> String {
    "ChatFeedback".to_string()
}

fn default_page_title() -> String {
    "Knowledge Assistant".to_string()
}

fn default_session_idle() -> u64 {
    8 * 60 * 60
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            knowledge_base_id: None,
            model_arn: None,
            number_of_results: default_number_of_results(),
            rerank_model_arn: None,
            presign_expiry_secs: default_presign_expiry(),
            bind: default_handler_bind(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            history_table: default_history_table(),
            feedback_table: default_feedback_table(),
        }
    }
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            bind: default_ui_bind(),
            api_url: None,
            username: None,
            password: None,
            page_title: default_page_title(),
            session_idle_secs: default_session_idle(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    aws: Option<AwsSection>,
    handler: Option<HandlerSettings>,
    storage: Option<StorageSettings>,
    ui: Option<UiSettings>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AwsSection {
    region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            region: "us-east-1".to_string(),
            handler: HandlerSettings::default(),
            storage: StorageSettings::default(),
            ui: UiSettings::default(),
            log_level: None,
            verbose: false,
            no_color: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and the environment.
    ///
    /// Environment variables:
    /// - `KBCHAT_WORKSPACE`: Override workspace path
    /// - `KBCHAT_CONFIG`: Path to config file
    /// - `AWS_REGION` / `AWS_DEFAULT_REGION`: Vendor region
    /// - `KNOWLEDGE_BASE_ID`, `FM_ARN`, `RERANK_MODEL_ARN`: Handler settings
    /// - `KBCHAT_STORAGE`: `dynamodb` or `local`
    /// - `API_URL`: Query handler URL for the UI
    /// - `CHATBOT_USERNAME`, `CHATBOT_PASSWORD`: UI login
    /// - `RUST_LOG`, `NO_COLOR`: Logging
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`load`](Self::load), with an explicit workspace and config file
    /// taking precedence over their environment variables.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        let workspace =
            workspace.or_else(|| std::env::var_os("KBCHAT_WORKSPACE").map(PathBuf::from));
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        config.config_file =
            config_file.or_else(|| std::env::var_os("KBCHAT_CONFIG").map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.kbchat_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut result = self.clone();

        if let Some(region) = config_file.aws.and_then(|aws| aws.region) {
            result.region = region;
        }

        if let Some(handler) = config_file.handler {
            result.handler = handler;
        }

        if let Some(storage) = config_file.storage {
            result.storage = storage;
        }

        if let Some(ui) = config_file.ui {
            result.ui = ui;
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        Ok(result)
    }

    /// Environment variables override the YAML config.
    fn apply_env(&mut self) -> AppResult<()> {
        if let Ok(region) =
            std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        {
            self.region = region;
        }

        if let Ok(id) = std::env::var("KNOWLEDGE_BASE_ID") {
            self.handler.knowledge_base_id = Some(id);
        }

        if let Ok(arn) = std::env::var("FM_ARN") {
            self.handler.model_arn = Some(arn);
        }

        if let Ok(arn) = std::env::var("RERANK_MODEL_ARN") {
            self.handler.rerank_model_arn = Some(arn);
        }

        if let Ok(backend) = std::env::var("KBCHAT_STORAGE") {
            self.storage.backend = StorageBackend::from_setting(&backend)?;
        }

        if let Ok(url) = std::env::var("API_URL") {
            self.ui.api_url = Some(url);
        }

        if let Ok(username) = std::env::var("CHATBOT_USERNAME") {
            self.ui.username = Some(username);
        }

        if let Ok(password) = std::env::var("CHATBOT_PASSWORD") {
            self.ui.password = Some(password);
        }

        if self.log_level.is_none() {
            self.log_level = std::env::var("RUST_LOG").ok();
        }

        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }

        Ok(())
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the file.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        region: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(region) = region {
            self.region = region;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .kbchat directory.
    pub fn kbchat_dir(&self) -> PathBuf {
        self.workspace.join(".kbchat")
    }

    /// Ensure the .kbchat directory exists.
    pub fn ensure_kbchat_dir(&self) -> AppResult<()> {
        let dir = self.kbchat_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Config(format!("Failed to create .kbchat directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Validate the settings the query handler needs.
    pub fn validate_handler(&self) -> AppResult<()> {
        if self.handler.knowledge_base_id.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Config(
                "Knowledge base id is not set (KNOWLEDGE_BASE_ID or handler.knowledgeBaseId)"
                    .to_string(),
            ));
        }

        if self.handler.model_arn.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::Config(
                "Foundation model ARN is not set (FM_ARN or handler.modelArn)".to_string(),
            ));
        }

        if self.handler.number_of_results == 0 {
            return Err(AppError::Config(
                "handler.numberOfResults must be at least 1".to_string(),
            ));
        }

        if self.handler.presign_expiry_secs == 0 || self.handler.presign_expiry_secs > 604_800 {
            return Err(AppError::Config(format!(
                "handler.presignExpirySecs must be between 1 and 604800, got {}",
                self.handler.presign_expiry_secs
            )));
        }

        Ok(())
    }

    /// Validate the settings the browser UI needs.
    pub fn validate_ui(&self) -> AppResult<()> {
        if self.ui.username.as_deref().unwrap_or("").is_empty()
            || self.ui.password.as_deref().unwrap_or("").is_empty()
        {
            return Err(AppError::Config(
                "UI login is not configured (CHATBOT_USERNAME / CHATBOT_PASSWORD)".to_string(),
            ));
        }
        Ok(())
    }
}
