use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::errors::AppError;

/// Filesystem locations used by the process.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub index_db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = env::var("DOCUCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let log_dir = data_dir.join("logs");
        let index_db_path = data_dir.join("index.db");
        let config_path = env::var("DOCUCHAT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("config.yml"));

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        Self {
            data_dir,
            log_dir,
            index_db_path,
            config_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8787 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Fixed system instruction block prepended to every turn. Persona and
    /// formatting rules live here, not in code.
    pub system_prompt: String,
    pub default_model: String,
    pub temperature: f64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Answer the user's questions; \
                            when context documents are provided, ground your answer in them."
                .to_string(),
            default_model: "openai/gpt-4o".to_string(),
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_sources: usize,
    pub max_collections: usize,
    pub embedding_model: String,
    pub user_agent: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 5000,
            chunk_overlap: 1000,
            top_k: 4,
            max_sources: 10,
            max_collections: 20,
            embedding_model: "text-embedding-3-small".to_string(),
            user_agent: format!("docuchat/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub openai: ProviderCredentials,
    pub anthropic: ProviderCredentials,
}

/// Typed application settings, loaded from `config.yml` with environment
/// overrides for credentials so keys never have to live in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub chat: ChatSettings,
    pub rag: RagSettings,
    pub providers: ProviderSettings,
}

impl Settings {
    pub fn load(paths: &AppPaths) -> Result<Self, AppError> {
        let mut settings = if paths.config_path.exists() {
            let contents = fs::read_to_string(&paths.config_path)
                .map_err(|e| AppError::Config(format!("failed to read config.yml: {e}")))?;
            serde_yaml::from_str::<Settings>(&contents)
                .map_err(|e| AppError::Config(format!("invalid config.yml: {e}")))?
        } else {
            Settings::default()
        };

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                settings.providers.openai.api_key = Some(key);
            }
        }
        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                settings.providers.anthropic.api_key = Some(key);
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.rag.chunk_size == 0 {
            return Err(AppError::Config("rag.chunk_size must be positive".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(AppError::Config(
                "rag.chunk_overlap must be smaller than rag.chunk_size".into(),
            ));
        }
        if self.rag.max_sources == 0 || self.rag.max_collections == 0 {
            return Err(AppError::Config(
                "rag.max_sources and rag.max_collections must be positive".into(),
            ));
        }
        Ok(())
    }
}
