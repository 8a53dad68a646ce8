use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{
    BlogshiftConfig, DEFAULT_DESCRIPTIONS_FILE, DEFAULT_ERROR_LOG, DEFAULT_METADATA_FILE,
    DEFAULT_OUTPUT_DIR, DEFAULT_POSTS_DIR, DEFAULT_REDIRECTS_FILE, load_config,
};

pub const CONFIG_FILENAME: &str = "blogshift.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub posts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub descriptions_file: PathBuf,
    pub redirects_file: PathBuf,
    pub error_log: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub posts_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nconfig_path={} ({})\nposts_dir={} ({})\noutput_dir={}\nmetadata_file={}\ndescriptions_file={}\nredirects_file={}\nerror_log={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.posts_dir),
            self.posts_source.as_str(),
            normalize_for_display(&self.output_dir),
            normalize_for_display(&self.metadata_file),
            normalize_for_display(&self.descriptions_file),
            normalize_for_display(&self.redirects_file),
            normalize_for_display(&self.error_log),
        )
    }
}

/// Resolved paths plus the config they were derived from.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub paths: ResolvedPaths,
    pub config: BlogshiftConfig,
}

pub fn resolve_runtime(context: &ResolutionContext, overrides: &PathOverrides) -> Result<Runtime> {
    resolve_runtime_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_runtime_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<Runtime>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = if let Some(path) = overrides.project_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("BLOGSHIFT_PROJECT_ROOT")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (context.cwd.clone(), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("BLOGSHIFT_CONFIG")) {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(CONFIG_FILENAME), ValueSource::Default)
    };

    let config = load_config(&config_path)?;
    let paths_section = &config.paths;
    let from_config = |value: &Option<String>, default: &str| {
        absolutize(Path::new(value.as_deref().unwrap_or(default)), &project_root)
    };

    let posts_source = if paths_section.posts_dir.is_some() {
        ValueSource::Config
    } else {
        ValueSource::Default
    };

    let paths = ResolvedPaths {
        posts_dir: from_config(&paths_section.posts_dir, DEFAULT_POSTS_DIR),
        output_dir: from_config(&paths_section.output_dir, DEFAULT_OUTPUT_DIR),
        metadata_file: from_config(&paths_section.metadata_file, DEFAULT_METADATA_FILE),
        descriptions_file: from_config(
            &paths_section.descriptions_file,
            DEFAULT_DESCRIPTIONS_FILE,
        ),
        redirects_file: from_config(&paths_section.redirects_file, DEFAULT_REDIRECTS_FILE),
        error_log: from_config(&paths_section.error_log, DEFAULT_ERROR_LOG),
        project_root,
        config_path,
        root_source,
        config_source,
        posts_source,
    };
    Ok(Runtime { paths, config })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
