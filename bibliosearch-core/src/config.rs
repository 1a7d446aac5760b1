use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reader::DEFAULT_CHARS_PER_PAGE;
use crate::search::MAX_PAGE_SIZE;

pub const API_URL_ENV: &str = "BIBLIOSEARCH_API_URL";
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub page_size: usize,
    pub chars_per_page: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            chars_per_page: DEFAULT_CHARS_PER_PAGE,
        }
    }
}

impl Settings {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let settings = Self::from_toml(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        Ok(settings.normalized())
    }

    /// Applies environment overrides through `lookup`, usually `std::env::var`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.api_base_url = url;
        }
        self
    }

    pub fn with_overrides(
        mut self,
        api_base_url: Option<String>,
        page_size: Option<usize>,
        chars_per_page: Option<usize>,
    ) -> Self {
        if let Some(url) = api_base_url {
            self.api_base_url = url;
        }
        if let Some(size) = page_size {
            self.page_size = size;
        }
        if let Some(window) = chars_per_page {
            self.chars_per_page = window;
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.api_base_url = self.api_base_url.trim().to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = DEFAULT_API_URL.to_string();
        }
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self.chars_per_page = self.chars_per_page.max(1);
        self
    }
}

/// Where configuration and per-user data live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories, with `data_dir` replacing the data location when given.
    /// Without a home directory the config file is looked up inside `data_dir`.
    pub fn discover(data_dir: Option<PathBuf>) -> Result<Self> {
        match (ProjectDirs::from("org", "bibliosearch", "bibliosearch"), data_dir) {
            (Some(project_dirs), data_dir) => Ok(Self {
                config_file: project_dirs.config_dir().join(CONFIG_FILE),
                data_dir: data_dir.unwrap_or_else(|| project_dirs.data_dir().to_path_buf()),
            }),
            (None, Some(data_dir)) => Ok(Self {
                config_file: data_dir.join(CONFIG_FILE),
                data_dir,
            }),
            (None, None) => Err(anyhow!("unable to determine project directories")),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn favorites_file(&self) -> PathBuf {
        self.data_dir.join("favorites.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
