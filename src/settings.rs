use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::mail_store::folders::CategorySource;

/// Main configuration struct, one section per subsystem.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub sorter: SorterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    /// Prompted for interactively when absent.
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(rename = "timeout", default = "default_connect_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    #[serde(rename = "timeout", default = "default_classifier_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_max_chars: usize,
    /// How many classification requests run concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between classification chunks.
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SorterConfig {
    #[serde(default = "default_source_folder")]
    pub source_folder: String,
    #[serde(default = "default_fallback")]
    pub fallback_category: String,
    /// Fixed taxonomy override; categories are derived from the live
    /// folder list when unset.
    pub categories: Option<Vec<String>>,
    /// Cap on messages considered per run.
    pub fetch_limit: Option<usize>,
}

impl Default for SorterConfig {
    fn default() -> Self {
        SorterConfig {
            source_folder: default_source_folder(),
            fallback_category: default_fallback(),
            categories: None,
            fetch_limit: None,
        }
    }
}

impl SorterConfig {
    pub fn category_source(&self) -> CategorySource {
        match &self.categories {
            Some(list) => CategorySource::Fixed(list.clone()),
            None => CategorySource::Folders,
        }
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_classifier_timeout() -> u64 {
    60
}

fn default_excerpt_chars() -> usize {
    1500
}

fn default_concurrency() -> usize {
    3
}

fn default_batch_delay() -> u64 {
    500
}

fn default_source_folder() -> String {
    "INBOX".to_string()
}

fn default_fallback() -> String {
    "Autre".to_string()
}

pub fn load_settings(path: &Path) -> Result<Config> {
    let file = File::open(path)
        .with_context(|| format!("cannot open settings file {}", path.display()))?;
    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    let config: Config = serde_yaml::from_reader(reader)
        .with_context(|| format!("cannot deserialize settings from {}", path.display()))?;

    Ok(config)
}
