//! Environment-based configuration.
//!
//! The service reads everything it needs at startup: backend URL and API
//! key, the two logical collection names, the embedder selection, and
//! the backup directory. Missing required values fail startup before the
//! server accepts a single request.
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `QDRANT_URL` | yes | — |
//! | `QDRANT_API_KEY` | no | unset |
//! | `KBV_DOCS_COLLECTION` | no | `kb_documents` |
//! | `KBV_CODE_COLLECTION` | no | `kb_code` |
//! | `KBV_BACKUP_DIR` | no | `./backups` |
//! | `KBV_EMBEDDING_PROVIDER` | no | `openai` |
//! | `KBV_EMBEDDING_MODEL` | for `openai` | — |
//! | `KBV_EMBEDDING_DIMS` | yes | — |
//! | `KBV_EMBEDDING_URL` | no | OpenAI endpoint |
//! | `KBV_TIMEOUT_SECS` | no | `30` |
//! | `KBV_VERIFY_THRESHOLD` | no | `1.0` |

use std::path::PathBuf;

use crate::error::{Result, VaultError};

#[derive(Debug, Clone)]
pub struct Config {
    pub backend_url: String,
    pub backend_api_key: Option<String>,
    pub docs_collection: String,
    pub code_collection: String,
    pub backup_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    /// Per-call timeout for backend operations, in seconds.
    pub timeout_secs: u64,
    /// Quality score a record must reach to pass verification.
    pub verify_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"hash"`.
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// Override for the embeddings endpoint (OpenAI-compatible).
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Read and validate the configuration from the environment.
    pub fn from_env() -> Result<Config> {
        let backend_url = env_opt("QDRANT_URL").ok_or_else(|| {
            VaultError::InvalidInput("QDRANT_URL environment variable must be set".into())
        })?;

        let provider = env_opt("KBV_EMBEDDING_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let model = match provider.as_str() {
            "hash" => env_opt("KBV_EMBEDDING_MODEL").unwrap_or_else(|| "hash".to_string()),
            _ => env_opt("KBV_EMBEDDING_MODEL").ok_or_else(|| {
                VaultError::InvalidInput(
                    "KBV_EMBEDDING_MODEL must be set for the openai provider".into(),
                )
            })?,
        };
        let dims: usize = env_opt("KBV_EMBEDDING_DIMS")
            .ok_or_else(|| {
                VaultError::InvalidInput("KBV_EMBEDDING_DIMS environment variable must be set".into())
            })?
            .parse()
            .map_err(|_| {
                VaultError::InvalidInput("KBV_EMBEDDING_DIMS must be a positive integer".into())
            })?;
        if dims == 0 {
            return Err(VaultError::InvalidInput(
                "KBV_EMBEDDING_DIMS must be a positive integer".into(),
            ));
        }

        let timeout_secs = env_opt("KBV_TIMEOUT_SECS")
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    VaultError::InvalidInput("KBV_TIMEOUT_SECS must be an integer".into())
                })
            })
            .transpose()?
            .unwrap_or(30);

        let verify_threshold = env_opt("KBV_VERIFY_THRESHOLD")
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    VaultError::InvalidInput("KBV_VERIFY_THRESHOLD must be a number".into())
                })
            })
            .transpose()?
            .unwrap_or(1.0);
        if !(0.0..=1.0).contains(&verify_threshold) {
            return Err(VaultError::InvalidInput(
                "KBV_VERIFY_THRESHOLD must be between 0.0 and 1.0".into(),
            ));
        }

        Ok(Config {
            backend_url,
            backend_api_key: env_opt("QDRANT_API_KEY"),
            docs_collection: env_opt("KBV_DOCS_COLLECTION")
                .unwrap_or_else(|| "kb_documents".to_string()),
            code_collection: env_opt("KBV_CODE_COLLECTION")
                .unwrap_or_else(|| "kb_code".to_string()),
            backup_dir: env_opt("KBV_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./backups")),
            embedding: EmbeddingConfig {
                provider,
                model,
                dims,
                api_url: env_opt("KBV_EMBEDDING_URL"),
                timeout_secs,
                max_retries: 5,
            },
            timeout_secs,
            verify_threshold,
        })
    }

    /// Configuration for in-process use against the in-memory store; no
    /// environment access.
    pub fn in_memory(dims: usize) -> Config {
        Config {
            backend_url: "memory://".to_string(),
            backend_api_key: None,
            docs_collection: "kb_documents".to_string(),
            code_collection: "kb_code".to_string(),
            backup_dir: PathBuf::from("./backups"),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                model: "hash".to_string(),
                dims,
                api_url: None,
                timeout_secs: 30,
                max_retries: 1,
            },
            timeout_secs: 30,
            verify_threshold: 1.0,
        }
    }
}
