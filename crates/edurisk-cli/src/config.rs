//! Configuration file management for edurisk.
//!
//! Provides a TOML-based config file at `~/.config/edurisk/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use edurisk_core::plan::http::DEFAULT_MODEL;
use edurisk_core::risk::heuristic::DEFAULT_WEAK_PENALTY;
use edurisk_core::{
    HeuristicPredictor, HttpGenerator, HttpPredictor, Pipeline, PipelineConfig, RiskPredictor,
    TemplateGenerator, TextGenerator,
};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub predictor: PredictorSection,
    pub generator: GeneratorSection,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    /// Weighted indicator health, computed in-process.
    #[default]
    Heuristic,
    /// Remote prediction service.
    Http,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// Deterministic plans built from fixed action tables.
    #[default]
    Template,
    /// OpenAI-compatible chat completion endpoint.
    Http,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorSection {
    pub kind: PredictorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Risk points added per weak indicator by the heuristic predictor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weak_penalty: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub kind: GeneratorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the edurisk config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/edurisk` or `~/.config/edurisk`.
pub fn config_dir(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = env("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("edurisk");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("edurisk")
}

/// Return the path to the edurisk config file.
pub fn config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    config_dir(env).join("config.toml")
}

/// Process environment lookup, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // API keys may live here.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Overrides taken from the command line.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub predictor_url: Option<String>,
    pub generator_url: Option<String>,
    pub generator_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredictorChoice {
    Heuristic { weak_penalty: f64 },
    Http { url: String, api_key: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorChoice {
    Template,
    Http {
        url: String,
        api_key: Option<String>,
        model: String,
        temperature: Option<f32>,
    },
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct EduriskConfig {
    pub pipeline: PipelineConfig,
    pub predictor: PredictorChoice,
    pub generator: GeneratorChoice,
}

impl EduriskConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Config file: `--config` > `$XDG_CONFIG_HOME/edurisk/config.toml`
    ///   (a missing default file means all defaults; a missing explicit file
    ///   is an error)
    /// - Predictor URL: `--predictor-url` > `EDURISK_PREDICTOR_URL` > `predictor.url`
    /// - Generator URL: `--generator-url` > `EDURISK_GENERATOR_URL` > `generator.url`
    /// - Model: `--generator-model` > `EDURISK_GENERATOR_MODEL` > `generator.model` > `gpt-4o-mini`
    /// - API keys: `EDURISK_PREDICTOR_API_KEY` / `EDURISK_GENERATOR_API_KEY` > file
    ///
    /// A URL supplied by flag or env selects the HTTP capability regardless
    /// of the configured `kind`.
    pub fn resolve(cli: &CliOverrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_config(path)?,
            None => {
                let path = config_path(&env);
                if path.exists() {
                    load_config(&path)?
                } else {
                    ConfigFile::default()
                }
            }
        };
        file.pipeline
            .validate()
            .context("invalid [pipeline] configuration")?;

        let predictor = {
            let section = &file.predictor;
            let override_url = cli
                .predictor_url
                .clone()
                .or_else(|| env("EDURISK_PREDICTOR_URL"));
            let kind = if override_url.is_some() {
                PredictorKind::Http
            } else {
                section.kind
            };
            match kind {
                PredictorKind::Heuristic => PredictorChoice::Heuristic {
                    weak_penalty: section.weak_penalty.unwrap_or(DEFAULT_WEAK_PENALTY),
                },
                PredictorKind::Http => {
                    let Some(url) = override_url.or_else(|| section.url.clone()) else {
                        bail!(
                            "predictor kind is http but no URL is configured; \
                             set --predictor-url, EDURISK_PREDICTOR_URL, or predictor.url"
                        );
                    };
                    PredictorChoice::Http {
                        url,
                        api_key: env("EDURISK_PREDICTOR_API_KEY").or_else(|| section.api_key.clone()),
                    }
                }
            }
        };

        let generator = {
            let section = &file.generator;
            let override_url = cli
                .generator_url
                .clone()
                .or_else(|| env("EDURISK_GENERATOR_URL"));
            let kind = if override_url.is_some() {
                GeneratorKind::Http
            } else {
                section.kind
            };
            match kind {
                GeneratorKind::Template => GeneratorChoice::Template,
                GeneratorKind::Http => {
                    let Some(url) = override_url.or_else(|| section.url.clone()) else {
                        bail!(
                            "generator kind is http but no URL is configured; \
                             set --generator-url, EDURISK_GENERATOR_URL, or generator.url"
                        );
                    };
                    let model = cli
                        .generator_model
                        .clone()
                        .or_else(|| env("EDURISK_GENERATOR_MODEL"))
                        .or_else(|| section.model.clone())
                        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
                    GeneratorChoice::Http {
                        url,
                        api_key: env("EDURISK_GENERATOR_API_KEY").or_else(|| section.api_key.clone()),
                        model,
                        temperature: section.temperature,
                    }
                }
            }
        };

        Ok(Self {
            pipeline: file.pipeline,
            predictor,
            generator,
        })
    }

    /// Build the capabilities and the pipeline they feed.
    pub fn build_pipeline(self) -> Result<Pipeline> {
        let predictor: Arc<dyn RiskPredictor> = match self.predictor {
            PredictorChoice::Heuristic { weak_penalty } => Arc::new(
                HeuristicPredictor::new(self.pipeline.indicators.clone())
                    .with_weak_penalty(weak_penalty)
                    .with_floor_score(self.pipeline.thresholds.medium_below),
            ),
            PredictorChoice::Http { url, api_key } => Arc::new(HttpPredictor::new(url, api_key)),
        };
        let generator: Arc<dyn TextGenerator> = match self.generator {
            GeneratorChoice::Template => Arc::new(TemplateGenerator::new()),
            GeneratorChoice::Http {
                url,
                api_key,
                model,
                temperature,
            } => {
                let generator = HttpGenerator::new(url, model, api_key);
                match temperature {
                    Some(t) => Arc::new(generator.with_temperature(t)),
                    None => Arc::new(generator),
                }
            }
        };
        tracing::debug!(
            predictor = predictor.name(),
            generator = generator.name(),
            "capabilities selected"
        );
        Pipeline::new(self.pipeline, predictor, generator).context("invalid pipeline configuration")
    }
}
