// src/sources.rs
//! Static source table: where to fetch, how to fetch, and how to extract bodies.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const EMBEDDED_SOURCES: &str = include_str!("../config/sources.toml");
const DEFAULT_SOURCES_PATH: &str = "config/sources.toml";

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Feed,
    Scrape,
}

/// Selectors and noise phrases used when pulling an article body out of a page.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ExtractionRules {
    #[serde(default)]
    pub content_selectors: Vec<String>,
    #[serde(default)]
    pub unwanted_selectors: Vec<String>,
    #[serde(default)]
    pub unwanted_phrases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mode: FetchMode,
    /// Pins the article category for everything from this source.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub extraction: ExtractionRules,
}

fn default_priority() -> u8 {
    5
}

fn default_country() -> String {
    "GLOBAL".to_string()
}

impl SourceDescriptor {
    pub fn is_local(&self, home_country: &str) -> bool {
        self.country.eq_ignore_ascii_case(home_country)
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceDescriptor>,
}

/// Immutable lookup table of sources, ordered by priority.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<Vec<SourceDescriptor>>,
    by_name: Arc<HashMap<String, usize>>,
}

impl SourceRegistry {
    pub fn new(mut sources: Vec<SourceDescriptor>) -> Self {
        sources.retain(|s| !s.name.trim().is_empty() && !s.url.trim().is_empty());
        // stable: equal priorities keep file order
        sources.sort_by_key(|s| s.priority);

        let mut by_name = HashMap::with_capacity(sources.len());
        for (i, s) in sources.iter().enumerate() {
            by_name.entry(s.name.clone()).or_insert(i);
        }
        Self {
            sources: Arc::new(sources),
            by_name: Arc::new(by_name),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: SourcesFile = toml::from_str(s).context("parsing sources table")?;
        Ok(Self::new(file.sources))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sources from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Explicit path, then `config/sources.toml`, then the copy compiled into the binary.
    pub fn load_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            if !p.exists() {
                return Err(anyhow!("NEWS_SOURCES_PATH points to non-existent path {}", p.display()));
            }
            return Self::load_from(p);
        }
        let local = PathBuf::from(DEFAULT_SOURCES_PATH);
        if local.exists() {
            return Self::load_from(&local);
        }
        Self::embedded()
    }

    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(EMBEDDED_SOURCES)
    }

    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.by_name.get(name).map(|&i| &self.sources[i])
    }

    pub fn all(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Unknown names are never local.
    pub fn is_local(&self, name: &str, home_country: &str) -> bool {
        self.get(name).is_some_and(|s| s.is_local(home_country))
    }

    pub fn local_names(&self, home_country: &str) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.is_local(home_country))
            .map(|s| s.name.clone())
            .collect()
    }
}
