use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "collector.env";
pub const DEFAULT_OUTPUT_ROOT: &str = ".";
pub const DEFAULT_BATCH_LIMIT: u64 = 500;
pub const API_KEY_VAR: &str = "YOUTUBE_API_KEY";
pub const OUTPUT_DIR_VAR: &str = "OUTPUT_DIR";
pub const BATCH_LIMIT_VAR: &str = "BATCH_LIMIT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("YouTube API key not found. Set YOUTUBE_API_KEY, add it to the env file, or pass --api-key")]
    MissingApiKey,
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Values read from the optional `KEY="value"` env file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub output_root: Option<PathBuf>,
    pub batch_limit: Option<String>,
}

/// Explicit values from the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub output_root: Option<PathBuf>,
    pub batch_limit: Option<u64>,
}

/// Fully resolved settings handed to the composition root.
#[derive(Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub api_key: String,
    pub output_root: PathBuf,
    pub batch_limit: u64,
}

impl std::fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("api_key", &"<redacted>")
            .field("output_root", &self.output_root)
            .field("batch_limit", &self.batch_limit)
            .finish()
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                API_KEY_VAR => cfg.api_key = Some(value.to_string()),
                OUTPUT_DIR_VAR => cfg.output_root = Some(PathBuf::from(value)),
                BATCH_LIMIT_VAR => cfg.batch_limit = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Where a single setting may come from, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub overrides: ConfigOverrides,
    pub env_api_key: Option<String>,
    pub env_output_root: Option<String>,
    pub env_batch_limit: Option<String>,
    pub file: Option<EnvConfig>,
}

impl Sources {
    /// Captures the process environment and the env file at `config_path`.
    pub fn gather(overrides: ConfigOverrides, config_path: &Path) -> Result<Self> {
        Ok(Self {
            overrides,
            env_api_key: env::var(API_KEY_VAR).ok(),
            env_output_root: env::var(OUTPUT_DIR_VAR).ok(),
            env_batch_limit: env::var(BATCH_LIMIT_VAR).ok(),
            file: read_env_config(config_path)?,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Staging settings only; these never require a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingSettings {
    pub output_root: PathBuf,
    pub batch_limit: u64,
}

/// Resolves the output root and batch limit: argument, then environment,
/// then env file, then default.
pub fn resolve_staging(sources: &Sources) -> Result<StagingSettings, ConfigError> {
    let file = sources.file.as_ref();

    let output_root = sources
        .overrides
        .output_root
        .clone()
        .or_else(|| non_blank(sources.env_output_root.as_deref()).map(PathBuf::from))
        .or_else(|| file.and_then(|f| f.output_root.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT));

    let batch_limit = match sources.overrides.batch_limit {
        Some(limit) => limit,
        None => match non_blank(sources.env_batch_limit.as_deref())
            .or_else(|| file.and_then(|f| f.batch_limit.as_deref()))
        {
            Some(raw) => parse_batch_limit(raw)?,
            None => DEFAULT_BATCH_LIMIT,
        },
    };

    Ok(StagingSettings {
        output_root,
        batch_limit,
    })
}

/// Resolves every setting. The API key follows the same order as the staging
/// settings; when no source has one the run must not start.
pub fn resolve(sources: &Sources) -> Result<CollectorConfig, ConfigError> {
    let api_key = non_blank(sources.overrides.api_key.as_deref())
        .or_else(|| non_blank(sources.env_api_key.as_deref()))
        .or_else(|| {
            sources
                .file
                .as_ref()
                .and_then(|f| non_blank(f.api_key.as_deref()))
        })
        .ok_or(ConfigError::MissingApiKey)?
        .to_owned();
    let StagingSettings {
        output_root,
        batch_limit,
    } = resolve_staging(sources)?;

    Ok(CollectorConfig {
        api_key,
        output_root,
        batch_limit,
    })
}

fn parse_batch_limit(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ConfigError::InvalidValue {
            key: BATCH_LIMIT_VAR,
            value: raw.to_owned(),
        }),
    }
}
