//! `edurisk assess` and `edurisk indicators`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use edurisk_core::{IndicatorSpec, Pipeline, PipelineError, PipelineResult, RawMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

// -----------------------------------------------------------------------
// Input
// -----------------------------------------------------------------------

/// Parse a `name=value` pair from the command line.
///
/// The value is passed through as text; numeric coercion and range checks
/// happen in the pipeline so the error taxonomy is the same for every
/// input path.
pub fn parse_metric_pair(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {s:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("metric name is empty in {s:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Read a JSON object of metrics from `path`, or stdin when `path` is `-`.
pub fn read_metrics_file(path: &Path) -> Result<RawMetrics> {
    let contents = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read metrics from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metrics file: {}", path.display()))?
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("metrics file is not a JSON object: {}", path.display()))
}

/// Combine file metrics with `--metric` pairs; pairs win on conflict.
pub fn collect_metrics(
    file: Option<&Path>,
    pairs: &[(String, String)],
) -> Result<RawMetrics> {
    let mut raw = match file {
        Some(path) => read_metrics_file(path)?,
        None => RawMetrics::new(),
    };
    for (name, value) in pairs {
        raw.insert(name.clone(), value.clone());
    }
    if raw.is_empty() {
        bail!("no metrics given; pass --metric NAME=VALUE, --file, or --batch");
    }
    Ok(raw)
}

/// Cancel the returned token on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling assessments");
            trigger.cancel();
        }
    });
    token
}

// -----------------------------------------------------------------------
// Single assessment
// -----------------------------------------------------------------------

pub async fn cmd_assess(
    pipeline: &Pipeline,
    raw: RawMetrics,
    format: OutputFormat,
    cancel: CancellationToken,
) -> Result<()> {
    let result = pipeline
        .submit_with_cancel(&raw, cancel)
        .await
        .with_context(|| "assessment failed")?;
    match format {
        OutputFormat::Text => print!("{}", render_text(&result)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        ),
    }
    Ok(())
}

/// Human-readable report for one result.
pub fn render_text(result: &PipelineResult) -> String {
    let mut lines = Vec::new();
    let score = result
        .risk_score
        .map(|s| format!(" (score {s:.1})"))
        .unwrap_or_default();
    lines.push(format!(
        "Risk level:   {}{score}",
        result.risk_level.as_str().to_uppercase()
    ));

    if result.weak_areas.is_empty() {
        lines.push("Weak areas:   none".to_string());
    } else {
        lines.push("Weak areas:".to_string());
        for area in &result.weak_areas {
            lines.push(format!(
                "  - {} ({}): {} < {}",
                area.label, area.name, area.value, area.threshold
            ));
        }
    }

    lines.push(String::new());
    lines.push(format!("{}-day plan:", result.plan.days().len()));
    for day in result.plan.days() {
        match &day.focus {
            Some(focus) => lines.push(format!("  Day {} [{focus}]", day.day)),
            None => lines.push(format!("  Day {}", day.day)),
        }
        for rec in &day.recommendations {
            lines.push(format!("    - {rec}"));
        }
    }

    let meta = &result.metadata;
    lines.push(String::new());
    lines.push(format!("  Request:      {}", result.request_id));
    lines.push(format!("  Fingerprint:  {}", meta.fingerprint));
    lines.push(format!("  Cache:        {}", meta.cache));
    lines.push(format!(
        "  Attempts:     classification {}, synthesis {}",
        meta.classification_attempts, meta.synthesis_attempts
    ));
    lines.push(format!(
        "  Capabilities: {} / {}",
        meta.predictor, meta.generator
    ));

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

// -----------------------------------------------------------------------
// Batch
// -----------------------------------------------------------------------

/// One parsed line of a batch file.
#[derive(Debug)]
pub struct BatchEntry {
    /// 1-based line number in the input.
    pub line: usize,
    pub metrics: Result<RawMetrics, String>,
}

/// Parse a JSON-lines batch, skipping blank lines. Lines that are not JSON
/// objects become entries carrying the parse error.
pub fn parse_batch(contents: &str) -> Vec<BatchEntry> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| BatchEntry {
            line: i + 1,
            metrics: serde_json::from_str::<RawMetrics>(line).map_err(|e| e.to_string()),
        })
        .collect()
}

/// One output record of a batch run.
pub fn batch_record(line: usize, outcome: &Result<PipelineResult, BatchFailure>) -> Value {
    match outcome {
        Ok(result) => json!({ "line": line, "result": result }),
        Err(failure) => json!({
            "line": line,
            "error": { "kind": failure.kind, "message": failure.message },
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub kind: String,
    pub message: String,
}

impl From<PipelineError> for BatchFailure {
    fn from(e: PipelineError) -> Self {
        Self {
            kind: e.kind().as_str().to_string(),
            message: e.to_string(),
        }
    }
}

/// Assess every line of a JSON-lines file through one shared pipeline,
/// running up to `concurrency` requests at once. Output keeps input order.
pub async fn cmd_batch(
    pipeline: Arc<Pipeline>,
    path: &Path,
    format: OutputFormat,
    concurrency: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file: {}", path.display()))?;
    let entries = parse_batch(&contents);
    let total = entries.len();
    tracing::info!(total, concurrency, "starting batch");

    let mut outcomes = futures::stream::iter(entries)
        .map(|entry| {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            async move {
                let outcome = match entry.metrics {
                    Ok(raw) => pipeline
                        .submit_with_cancel(&raw, cancel)
                        .await
                        .map_err(BatchFailure::from),
                    Err(message) => Err(BatchFailure {
                        kind: "invalid_input".to_string(),
                        message,
                    }),
                };
                (entry.line, outcome)
            }
        })
        .buffered(concurrency.max(1));

    let mut failed = 0usize;
    while let Some((line, outcome)) = outcomes.next().await {
        if outcome.is_err() {
            failed += 1;
        }
        match format {
            OutputFormat::Json => println!("{}", batch_record(line, &outcome)),
            OutputFormat::Text => match &outcome {
                Ok(result) => println!(
                    "line {line}: {} ({} days, cache {})",
                    result.risk_level,
                    result.plan.days().len(),
                    result.metadata.cache
                ),
                Err(failure) => println!("line {line}: error {}: {}", failure.kind, failure.message),
            },
        }
    }

    tracing::info!(total, failed, "batch complete");
    if failed > 0 {
        bail!("{failed} of {total} assessments failed");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// Indicators
// -----------------------------------------------------------------------

pub fn cmd_indicators(indicators: &[IndicatorSpec], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(indicators).context("failed to serialize indicators")?
        ),
        OutputFormat::Text => {
            println!(
                "{:<24} {:<28} {:>14} {:>8} {:>10}",
                "NAME", "LABEL", "RANGE", "WEIGHT", "WEAK BELOW"
            );
            for spec in indicators {
                let weak = spec
                    .weak_below
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<28} {:>14} {:>8} {:>10}",
                    spec.name,
                    spec.label,
                    format!("{}..{}", spec.min, spec.max),
                    spec.weight,
                    weak
                );
            }
        }
    }
    Ok(())
}
