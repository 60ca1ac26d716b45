use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{DownloadMode, ExistingOutput, MirrorKind};
use crate::error::BgdError;
use crate::http::HttpSettings;
use crate::ncbi::{DEFAULT_DATASETS_BASE_URL, default_genome_include};
use crate::resolver::DEFAULT_ARCHIVE_HOST;

pub const CONFIG_FILE: &str = "bgd.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub accessions: Vec<AccessionEntry>,
    #[serde(default)]
    pub mode: Option<DownloadMode>,
    #[serde(default)]
    pub on_existing_output: Option<ExistingOutput>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub archive_host: Option<String>,
    #[serde(default)]
    pub datasets_base_url: Option<String>,
    #[serde(default)]
    pub mirror: Option<MirrorKind>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AccessionEntry {
    Shorthand(String),
    Detailed(AccessionEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccessionEntryObject {
    pub accession: String,
}

/// File settings with defaults applied. Fields the CLI may override stay
/// optional so the caller can tell "unset" from "set to the default".
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub source: Option<PathBuf>,
    pub schema_version: u32,
    pub accessions: Vec<String>,
    pub mode: Option<DownloadMode>,
    pub on_existing_output: Option<ExistingOutput>,
    pub mirror: Option<MirrorKind>,
    pub include: Vec<String>,
    pub archive_host: String,
    pub datasets_base_url: String,
    pub http: HttpSettings,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            source: None,
            schema_version: 1,
            accessions: Vec::new(),
            mode: None,
            on_existing_output: None,
            mirror: None,
            include: default_genome_include(),
            archive_host: DEFAULT_ARCHIVE_HOST.to_string(),
            datasets_base_url: DEFAULT_DATASETS_BASE_URL.to_string(),
            http: HttpSettings::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` when given; otherwise the first of `./bgd.json` and
    /// `<user config dir>/bgd/bgd.json` that exists, or built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, BgdError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_candidates()
                .into_iter()
                .find(|candidate| candidate.is_file())
            {
                Some(found) => found,
                None => {
                    debug!("no config file found, using defaults");
                    return Ok(ResolvedConfig::default());
                }
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BgdError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BgdError::ConfigParse(format!("{}: {err}", config_path.display())))?;
        debug!(path = %config_path.display(), "loaded config");

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    pub fn default_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = BaseDirs::new() {
            candidates.push(dirs.config_dir().join("bgd").join(CONFIG_FILE));
        }
        candidates
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BgdError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(BgdError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let accessions = config
            .accessions
            .into_iter()
            .filter_map(|entry| {
                let raw = match entry {
                    AccessionEntry::Shorthand(value) => value,
                    AccessionEntry::Detailed(obj) => obj.accession,
                };
                normalize_line(&raw).map(str::to_string)
            })
            .collect();

        let defaults = HttpSettings::default();
        let http = HttpSettings {
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
        };
        if http.timeout.is_zero() {
            return Err(BgdError::ConfigParse(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let include = match config.include {
            Some(include) if !include.is_empty() => include,
            Some(_) => {
                warn!("empty include list in config, using defaults");
                default_genome_include()
            }
            None => default_genome_include(),
        };

        Ok(ResolvedConfig {
            source: None,
            schema_version,
            accessions,
            mode: config.mode,
            on_existing_output: config.on_existing_output,
            mirror: config.mirror,
            include,
            archive_host: config
                .archive_host
                .unwrap_or_else(|| DEFAULT_ARCHIVE_HOST.to_string()),
            datasets_base_url: config
                .datasets_base_url
                .unwrap_or_else(|| DEFAULT_DATASETS_BASE_URL.to_string()),
            http,
        })
    }
}

/// One accession per line; surrounding whitespace and double quotes are
/// stripped, blank lines and `#` comments are skipped.
pub fn parse_accession_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(normalize_line)
        .map(str::to_string)
        .collect()
}

pub fn read_accession_file(path: &Path) -> Result<Vec<String>, BgdError> {
    let content = fs::read_to_string(path).map_err(|err| {
        BgdError::InvalidInput(format!("cannot read {}: {err}", path.display()))
    })?;
    Ok(parse_accession_lines(&content))
}

fn normalize_line(line: &str) -> Option<&str> {
    let trimmed = line.trim().trim_matches('"').trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        None
    } else {
        Some(trimmed)
    }
}
