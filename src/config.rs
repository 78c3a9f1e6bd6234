//! Configuration loading and defaults for idlewatch.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

/// Main configuration for idlewatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds without input before the user counts as idle (default: 60).
    pub threshold_seconds: u64,

    /// Seconds between session polls (default: 5).
    pub poll_interval_seconds: u64,

    /// logind session id to watch.
    /// If unset, `XDG_SESSION_ID` or the caller's own session is used.
    pub session_id: Option<String>,

    /// Print changes as JSON lines instead of text.
    pub print_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_seconds: 60,
            poll_interval_seconds: 5,
            session_id: None,
            print_json: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("idlewatch").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.threshold_seconds, 60);
        assert_eq!(config.poll_interval_seconds, 5);
        assert!(config.session_id.is_none());
        assert!(!config.print_json);
        assert_eq!(config.threshold(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            threshold_seconds = 300
            session_id = "c1"
            print_json = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.threshold_seconds, 300);
        assert_eq!(config.session_id.as_deref(), Some("c1"));
        assert!(config.print_json);
        // Unset fields keep their defaults
        assert_eq!(config.poll_interval_seconds, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "poll_interval_seconds = 2").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.poll_interval_seconds, 2);
        assert_eq!(config.threshold_seconds, 60);
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threshold_seconds = \"soon\"").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(&missing).is_err());
    }
}
