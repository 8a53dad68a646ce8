use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "blogshift/0.1";
pub const DEFAULT_POSTS_DIR: &str = "blog-posts-master/posts";
pub const DEFAULT_OUTPUT_DIR: &str = "src/data/blog/articles";
pub const DEFAULT_METADATA_FILE: &str = "result.json";
pub const DEFAULT_DESCRIPTIONS_FILE: &str = "desc.json";
pub const DEFAULT_REDIRECTS_FILE: &str = "rewrite.json";
pub const DEFAULT_ERROR_LOG: &str = "error.log";
pub const DEFAULT_BASE_URL: &str = "https://example.com";
pub const DEFAULT_ARTICLE_PREFIX: &str = "/posts/articles";
pub const DEFAULT_AUTHOR: &str = "anonymous";
pub const DEFAULT_LANG: &str = "zh-CN";
pub const DEFAULT_REDIRECT_STATUS: u16 = 302;
pub const DEFAULT_API_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BlogshiftConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub posts_dir: Option<String>,
    pub output_dir: Option<String>,
    pub metadata_file: Option<String>,
    pub descriptions_file: Option<String>,
    pub redirects_file: Option<String>,
    pub error_log: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SiteSection {
    pub sitemap_url: Option<String>,
    pub base_url: Option<String>,
    pub article_prefix: Option<String>,
    pub author: Option<String>,
    pub lang: Option<String>,
    pub redirect_status: Option<u16>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LlmSection {
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub workers: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl BlogshiftConfig {
    /// Resolve the legacy base URL: env BLOGSHIFT_BASE_URL > config > DEFAULT_BASE_URL.
    pub fn base_url(&self) -> String {
        let value = env_override("BLOGSHIFT_BASE_URL")
            .or_else(|| self.site.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        value.trim_end_matches('/').to_string()
    }

    /// Resolve the sitemap URL: env > config > `{base_url}/sitemap.xml`.
    pub fn sitemap_url(&self) -> String {
        env_override("BLOGSHIFT_SITEMAP_URL")
            .or_else(|| self.site.sitemap_url.clone())
            .unwrap_or_else(|| format!("{}/sitemap.xml", self.base_url()))
    }

    pub fn article_prefix(&self) -> String {
        let prefix = self
            .site
            .article_prefix
            .as_deref()
            .unwrap_or(DEFAULT_ARTICLE_PREFIX)
            .trim_end_matches('/');
        if prefix.starts_with('/') || prefix.is_empty() {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        }
    }

    pub fn author(&self) -> &str {
        self.site.author.as_deref().unwrap_or(DEFAULT_AUTHOR)
    }

    pub fn lang(&self) -> &str {
        self.site.lang.as_deref().unwrap_or(DEFAULT_LANG)
    }

    pub fn redirect_status(&self) -> u16 {
        self.site.redirect_status.unwrap_or(DEFAULT_REDIRECT_STATUS)
    }

    pub fn user_agent(&self) -> String {
        self.site
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn api_url(&self) -> String {
        let value = env_override("BLOGSHIFT_API_URL")
            .or_else(|| self.llm.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        value.trim_end_matches('/').to_string()
    }

    pub fn model(&self) -> String {
        env_override("BLOGSHIFT_MODEL")
            .or_else(|| self.llm.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// The API key is never defaulted; `describe` fails early without one.
    pub fn api_key(&self) -> Option<String> {
        env_override("BLOGSHIFT_API_KEY").or_else(|| {
            self.llm
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string)
        })
    }

    pub fn workers(&self) -> usize {
        env_override("BLOGSHIFT_WORKERS")
            .and_then(|value| value.parse::<usize>().ok())
            .or(self.llm.workers)
            .unwrap_or(DEFAULT_WORKERS)
            .max(1)
    }

    pub fn llm_timeout_ms(&self) -> u64 {
        self.llm.timeout_ms.unwrap_or(DEFAULT_LLM_TIMEOUT_MS)
    }
}

/// Load and parse a BlogshiftConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BlogshiftConfig> {
    if !config_path.exists() {
        return Ok(BlogshiftConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BlogshiftConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
