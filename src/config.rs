use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, ErrorContext, ErrorDetail, comments, state::PLANNING_DIR};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NotionConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub parent_page_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub comment_concurrency: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub notion: NotionConfig,
}

pub fn default_path(cwd: &Path) -> PathBuf {
    cwd.join(PLANNING_DIR).join(CONFIG_FILE)
}

/// Page ids are UUIDs, with or without dashes.
fn is_page_id(id: &str) -> bool {
    let hex: String = id.chars().filter(|c| *c != '-').collect();
    hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
    /// Load the config at `path`. A missing file is an empty config.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let context = ErrorContext::new(path);
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(error) => return Err(context.error(ErrorDetail::ReadConfig(error))),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|error| context.error(ErrorDetail::ParseConfig(error)))
    }

    pub fn comment_concurrency(&self) -> usize {
        self.notion
            .comment_concurrency
            .unwrap_or(comments::DEFAULT_CONCURRENCY)
    }

    pub fn validate(&self) -> Result<(), String> {
        let notion = &self.notion;
        if notion
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err("notion.api_key must not be empty".into());
        }
        if notion.comment_concurrency == Some(0) {
            return Err("notion.comment_concurrency must be at least 1".into());
        }
        if let Some(id) = &notion.parent_page_id {
            if !is_page_id(id) {
                return Err(format!("notion.parent_page_id {id:?} is not a page id"));
            }
        }
        if let Some(base_url) = &notion.base_url {
            url::Url::parse(base_url)
                .map_err(|error| format!("notion.base_url {base_url:?}: {error}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&default_path(dir.path())).await.unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.comment_concurrency(), comments::DEFAULT_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"notion": {"api_key": "secret_x", "parent_page_id": "1f2e3d4c-5b6a-7980-a1b2-c3d4e5f60718", "comment_concurrency": 2}, "mode": "yolo"}"#,
        )
        .await
        .unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.notion.api_key.as_deref(), Some("secret_x"));
        assert_eq!(config.comment_concurrency(), 2);
        assert_eq!(config.validate(), Ok(()));
    }

    #[tokio::test]
    async fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{notion: [").await.unwrap();
        let error = Config::load(&path).await.unwrap_err();
        assert!(matches!(*error.detail, ErrorDetail::ParseConfig(_)));
        assert!(error.to_string().contains("config.json"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.notion.api_key = Some(" ".into());
        assert!(config.validate().unwrap_err().contains("api_key"));

        let mut config = Config::default();
        config.notion.comment_concurrency = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.notion.parent_page_id = Some("not-a-page".into());
        assert!(config.validate().unwrap_err().contains("parent_page_id"));

        config.notion.parent_page_id = Some("1f2e3d4c5b6a7980a1b2c3d4e5f60718".into());
        assert_eq!(config.validate(), Ok(()));
    }
}
