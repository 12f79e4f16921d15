use super::schema::AutoApplyConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./autoapply.yaml
    /// 2. ~/.autoapply/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<AutoApplyConfig, ConfigError> {
        let local_config = PathBuf::from("./autoapply.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".autoapply").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(AutoApplyConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<AutoApplyConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<AutoApplyConfig, ConfigError> {
        let config: AutoApplyConfig = serde_yaml::from_str(content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        assert_eq!(config.apply.max_steps, 12);
        assert_eq!(config.discovery.min_results, 15);
        assert_eq!(config.timing.sign_in_timeout_ms, 300_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "site:\n  base_url: https://www.indeed.com\napply:\n  max_steps: 4\n";
        let config = ConfigLoader::parse(yaml).unwrap();
        assert_eq!(config.site.base_url, "https://www.indeed.com");
        assert_eq!(config.apply.max_steps, 4);
        assert_eq!(config.apply.context_attempts, 5);
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = ConfigLoader::parse("site:\n  base_url: not a url\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unbounded_llm_retries() {
        let err = ConfigLoader::parse("llm:\n  max_retries: 64\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("llm.max_retries")));
        let config = ConfigLoader::parse("llm:\n  max_retries: 10\n").unwrap();
        assert_eq!(config.llm.max_retries, 10);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoapply.yaml");
        tokio::fs::write(&path, "llm:\n  model: gpt-4o\n").await.unwrap();
        let config = ConfigLoader::load_from(&path).await.unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
    }
}
