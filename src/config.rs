use std::fs;
use std::path::{Path, PathBuf};

use analysis_driver::{InterfaceError, OutputFormat, SurrogateConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Root {
    #[serde(default)]
    pub driver: Driver,
    #[serde(default)]
    pub surrogate: Surrogate,
}

/// Which evaluator answers the parameter file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Linear regression fit from training data
    #[default]
    Surrogate,
    /// Two-variable Rosenbrock function
    Rosenbrock,
    /// Quartic objective with two quadratic constraints
    #[value(name = "text_book")]
    TextBook,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Driver {
    #[serde(default)]
    pub model: ModelKind,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Surrogate {
    /// Fitted model written by `driver fit`
    #[serde(default)]
    pub model: Option<PathBuf>,
    /// Training data to fit from when no fitted model is given
    #[serde(default)]
    pub training: Option<PathBuf>,
    #[serde(flatten)]
    pub options: SurrogateConfig,
}

impl Root {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|source| InterfaceError::Io {
                path: path.to_path_buf(),
                source,
            })
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut cfg: Root = toml::from_str(&text)
            .map_err(|e| InterfaceError::Config(e.to_string()))
            .with_context(|| format!("failed to parse config: {}", path.display()))?;

        // Relative data paths are resolved against the config file.
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for p in [&mut cfg.surrogate.model, &mut cfg.surrogate.training].into_iter().flatten() {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.surrogate.options.validate()?;

        if let Some(labels) = &self.surrogate.options.variable_labels {
            if labels.iter().any(|l| l.is_empty() || l.contains(char::is_whitespace)) {
                bail!("surrogate.variable_labels must be non-empty and contain no whitespace");
            }
            let mut sorted: Vec<&String> = labels.iter().collect();
            sorted.sort();
            sorted.dedup();
            if sorted.len() != labels.len() {
                bail!("surrogate.variable_labels must be unique");
            }
        }
        if let Some(labels) = &self.surrogate.options.response_labels {
            if labels.len() != 1 {
                bail!("surrogate.response_labels must name exactly one response");
            }
        }
        if self.surrogate.model.is_some() && self.surrogate.training.is_some() {
            bail!("surrogate.model and surrogate.training are mutually exclusive");
        }
        Ok(())
    }
}
