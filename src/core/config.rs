use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_library_file")]
    pub library_file: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    pub llm: LlmConfig,

    #[serde(default)]
    pub manga: MangaConfig,
}

/// Fixed panel counts for non-text sources. Text sources are sized from
/// their word count.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MangaConfig {
    #[serde(default = "default_image_panels")]
    pub image_panels: usize,
    #[serde(default = "default_document_panels")]
    pub document_panels: usize,
}

impl Default for MangaConfig {
    fn default() -> Self {
        Self {
            image_panels: default_image_panels(),
            document_panels: default_document_panels(),
        }
    }
}

fn default_library_file() -> String {
    "data/library.json".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_image_panels() -> usize {
    4
}
fn default_document_panels() -> usize {
    6
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml_ng::from_str(content)?;
        config.llm.resolve_api_key();
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.library_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
