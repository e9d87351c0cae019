//! Repository configuration.

use crate::error::EfsError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration as TOML, written by `Repository::create`.
pub const DEFAULT_CONFIG: &str = r#"# EarthFS Configuration

[tokenizer]
# Terms dropped from full-text indexing and queries
stop_words = []

# Remote peers to replicate from. Repeat the table per peer.
#
# [[pull]]
# host = "https://peer.example.org"
# username = "alice"
# password = "secret"
# query = ""
"#;

/// File name of the config at the repository root.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub pull: Vec<PullConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub stop_words: Vec<String>,
}

/// One pull job: which peer to follow and how to authenticate. The job id is
/// its position in the `pull` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub cookie: Option<String>,
    /// Query forwarded to the peer's `/efs/query` endpoint; empty pulls
    /// everything.
    #[serde(default)]
    pub query: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, EfsError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EfsError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(config.pull.is_empty());
        assert!(config.tokenizer.stop_words.is_empty());
    }

    #[test]
    fn pull_jobs_parse_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[pull]]
            host = "https://peer.example.org"
            username = "alice"
            password = "secret"

            [[pull]]
            host = "https://other.example.org"
            query = "tag=photos"
            "#,
        )
        .unwrap();
        assert_eq!(config.pull.len(), 2);
        assert_eq!(config.pull[0].host, "https://peer.example.org");
        assert!(config.pull[0].query.is_empty());
        assert_eq!(config.pull[1].query, "tag=photos");
        assert!(config.pull[1].cookie.is_none());
    }
}
