mod assess_cmd;
mod config;
mod serve_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use assess_cmd::OutputFormat;
use config::{CliOverrides, EduriskConfig};

#[derive(Parser)]
#[command(
    name = "edurisk",
    about = "Student risk assessment and improvement plan synthesis"
)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/edurisk/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Risk prediction service URL (overrides EDURISK_PREDICTOR_URL)
    #[arg(long, global = true)]
    predictor_url: Option<String>,

    /// Plan generation endpoint URL (overrides EDURISK_GENERATOR_URL)
    #[arg(long, global = true)]
    generator_url: Option<String>,

    /// Plan generation model (overrides EDURISK_GENERATOR_MODEL)
    #[arg(long, global = true)]
    generator_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default edurisk config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Assess one student, or a JSON-lines batch of students
    Assess {
        /// Metric as NAME=VALUE (repeatable)
        #[arg(long = "metric", short = 'm', value_parser = assess_cmd::parse_metric_pair)]
        metrics: Vec<(String, String)>,
        /// JSON object of metrics ("-" reads stdin)
        #[arg(long, conflicts_with = "batch")]
        file: Option<PathBuf>,
        /// JSON-lines file, one metrics object per line
        #[arg(long, conflicts_with = "metrics")]
        batch: Option<PathBuf>,
        /// Maximum concurrent assessments in batch mode
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List the configured indicators
    Indicators {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Start the HTTP assessment server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            predictor_url: self.predictor_url.clone(),
            generator_url: self.generator_url.clone(),
            generator_model: self.generator_model.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = cli.overrides();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.config, force)?;
        }
        Commands::Assess {
            metrics,
            file,
            batch,
            concurrency,
            format,
        } => {
            let pipeline = EduriskConfig::resolve(&overrides, config::process_env)?.build_pipeline()?;
            let cancel = assess_cmd::cancel_on_ctrl_c();
            match batch {
                Some(path) => {
                    assess_cmd::cmd_batch(Arc::new(pipeline), &path, format, concurrency, cancel)
                        .await?;
                }
                None => {
                    let raw = assess_cmd::collect_metrics(file.as_deref(), &metrics)?;
                    assess_cmd::cmd_assess(&pipeline, raw, format, cancel).await?;
                }
            }
        }
        Commands::Indicators { format } => {
            let resolved = EduriskConfig::resolve(&overrides, config::process_env)?;
            assess_cmd::cmd_indicators(&resolved.pipeline.indicators, format)?;
        }
        Commands::Serve { bind, port } => {
            let pipeline = EduriskConfig::resolve(&overrides, config::process_env)?.build_pipeline()?;
            serve_cmd::run_serve(Arc::new(pipeline), &bind, port).await?;
        }
    }

    Ok(())
}

/// Execute `edurisk init`: write every default so it can be edited in place.
fn cmd_init(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(|| config::config_path(config::process_env));

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    config::save_config(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  predictor.kind = heuristic");
    println!("  generator.kind = template");
    println!("  indicators     = {}", cfg.pipeline.indicators.len());
    println!();
    println!("Next: run `edurisk assess --metric NAME=VALUE ...` or `edurisk serve`.");

    Ok(())
}
