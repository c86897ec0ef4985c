//! Configuration for the duel settlement engine.
//!
//! Defaults cover local development; production deployments load a TOML
//! file and override individual values through `FARTDUEL_*` environment
//! variables.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub duel: DuelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Duel timing and settlement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelConfig {
    /// Time both players have to lock a pick once the duel fills.
    pub selection_window_ms: i64,
    /// How long an OPEN session waits for an opponent before expiring.
    pub lobby_idle_timeout_ms: i64,
    /// How long a terminal session stays queryable before eviction.
    pub retention_window_ms: i64,
    /// Interval of the background sweep that drives timeouts and eviction.
    pub sweep_interval_ms: u64,
    /// Wallet address receiving the platform's 2% cut.
    pub platform_account: String,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            selection_window_ms: 25_000,
            lobby_idle_timeout_ms: 300_000,
            retention_window_ms: 60_000,
            sweep_interval_ms: 1_000,
            platform_account: "FARTduELTreasury11111111111111111111111111".to_string(),
        }
    }
}

/// Durable storage parameters (audit log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Attempts per resolution pass before the audit write is parked for
    /// the sweeper to retry.
    pub audit_retry_limit: u32,
    pub audit_retry_backoff_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./duel_data".to_string(),
            audit_retry_limit: 3,
            audit_retry_backoff_ms: 500,
        }
    }
}

/// HTTP API parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Loads configuration from an optional TOML file, applies environment
/// overrides, and validates the result.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(port) = env::var("FARTDUEL_API_PORT") {
            config.api.port = port
                .parse()
                .map_err(|_| EngineError::Config(format!("Invalid FARTDUEL_API_PORT: {}", port)))?;
        }
        if let Ok(addr) = env::var("FARTDUEL_API_ADDRESS") {
            config.api.listen_address = addr;
        }
        if let Ok(data_dir) = env::var("FARTDUEL_DATA_DIR") {
            config.storage.data_dir = data_dir;
        }
        if let Ok(window) = env::var("FARTDUEL_SELECTION_WINDOW_MS") {
            config.duel.selection_window_ms = window.parse().map_err(|_| {
                EngineError::Config(format!("Invalid FARTDUEL_SELECTION_WINDOW_MS: {}", window))
            })?;
        }
        if let Ok(account) = env::var("FARTDUEL_PLATFORM_ACCOUNT") {
            config.duel.platform_account = account;
        }

        Ok(())
    }

    fn validate(&self, config: &EngineConfig) -> EngineResult<()> {
        if config.duel.selection_window_ms <= 0 {
            return Err(EngineError::Config(
                "duel.selection_window_ms must be positive".to_string(),
            ));
        }
        if config.duel.lobby_idle_timeout_ms <= 0 {
            return Err(EngineError::Config(
                "duel.lobby_idle_timeout_ms must be positive".to_string(),
            ));
        }
        if config.duel.sweep_interval_ms == 0 {
            return Err(EngineError::Config(
                "duel.sweep_interval_ms cannot be zero".to_string(),
            ));
        }
        if config.duel.platform_account.is_empty() {
            return Err(EngineError::Config(
                "duel.platform_account cannot be empty".to_string(),
            ));
        }
        if config.storage.audit_retry_limit == 0 {
            return Err(EngineError::Config(
                "storage.audit_retry_limit cannot be zero".to_string(),
            ));
        }
        if config.api.enabled && config.api.port == 0 {
            return Err(EngineError::Config(
                "api.port cannot be zero when the API is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
