use crate::error::AgentError;

/// Runtime configuration, loaded from the environment and validated once
/// at startup. Invalid values fail fast with `ConfigError`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model_name: String,
    pub temperature: f64,
    pub max_iterations: usize,
    pub retrieval_k: usize,
    pub reasoner_timeout_secs: u64,
    pub upload_dir: String,
    pub log_level: String,
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: "gemini-2.0-flash-exp".to_string(),
            temperature: 0.1,
            max_iterations: 10,
            retrieval_k: 5,
            reasoner_timeout_secs: 30,
            upload_dir: "./uploads".to_string(),
            log_level: "INFO".to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AgentError> {
        let defaults = Settings::default();

        let settings = Settings {
            model_name: env_or("MODEL_NAME", &defaults.model_name),
            temperature: parse_env("TEMPERATURE", defaults.temperature)?,
            max_iterations: parse_env("MAX_ITERATIONS", defaults.max_iterations)?,
            retrieval_k: parse_env("RETRIEVAL_K", defaults.retrieval_k)?,
            reasoner_timeout_secs: parse_env(
                "REASONER_TIMEOUT_SECS",
                defaults.reasoner_timeout_secs,
            )?,
            upload_dir: env_or("UPLOAD_DIR", &defaults.upload_dir),
            log_level: env_or("LOG_LEVEL", &defaults.log_level),
            api_key: std::env::var("GOOGLE_API_KEY").ok(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model_name.trim().is_empty() {
            return Err(AgentError::ConfigError {
                message: "MODEL_NAME must not be empty".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgentError::ConfigError {
                message: format!(
                    "TEMPERATURE must be within [0.0, 2.0], got {}",
                    self.temperature
                ),
            });
        }
        if self.max_iterations == 0 {
            return Err(AgentError::ConfigError {
                message: "MAX_ITERATIONS must be at least 1".to_string(),
            });
        }
        if self.retrieval_k == 0 {
            return Err(AgentError::ConfigError {
                message: "RETRIEVAL_K must be at least 1".to_string(),
            });
        }
        if self.reasoner_timeout_secs == 0 {
            return Err(AgentError::ConfigError {
                message: "REASONER_TIMEOUT_SECS must be at least 1".to_string(),
            });
        }
        if self.upload_dir.trim().is_empty() {
            return Err(AgentError::ConfigError {
                message: "UPLOAD_DIR must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AgentError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| AgentError::ConfigError {
            message: format!("Invalid value for {}: '{}'", key, raw),
        }),
        Err(_) => Ok(default),
    }
}
