use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::model::OccupancyMetric;

/// Returned whenever no advisor text is available.
pub const FALLBACK_INSIGHT: &str = "Unable to generate insights at this time.";

pub const ADVISOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct AdvisorError(pub String);

impl std::fmt::Display for AdvisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "advisor error: {}", self.0)
    }
}

impl std::error::Error for AdvisorError {}

/// Produces narrative commentary on a set of occupancy metrics.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, prompt: &str) -> Result<String, AdvisorError>;
}

#[derive(Debug, Serialize)]
struct MetricSummary<'a> {
    reactor: &'a str,
    block: &'a str,
    proposed: String,
    actual: String,
    downtime: f64,
}

/// The compact JSON handed to the advisor: one object per reactor with
/// percentages to one decimal.
pub fn metrics_payload(metrics: &[OccupancyMetric]) -> String {
    let rows: Vec<MetricSummary<'_>> = metrics
        .iter()
        .map(|m| MetricSummary {
            reactor: &m.reactor_serial_no,
            block: &m.block_name,
            proposed: format!("{:.1}", m.proposed_percent),
            actual: format!("{:.1}", m.actual_percent),
            downtime: m.downtime_hours,
        })
        .collect();
    serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
}

pub fn build_prompt(metrics: &[OccupancyMetric]) -> String {
    format!(
        "Analyze the following reactor occupancy data for the manufacturing facility.\n\
         Provide 3 high-level management bullet points regarding:\n\
         1. Overall capacity utilization (Proposed vs Actual).\n\
         2. Any specific blocks or reactors that are bottlenecks or underutilized.\n\
         3. Maintenance impact on availability.\n\n\
         Data: {}\n\
         Keep the tone professional and concise.",
        metrics_payload(metrics)
    )
}

/// Ask the advisor, degrading to [`FALLBACK_INSIGHT`] on absence, error,
/// empty output or timeout. Never fails.
pub async fn insights_or_fallback(
    advisor: Option<&dyn Advisor>,
    metrics: &[OccupancyMetric],
    timeout: Duration,
) -> String {
    let Some(advisor) = advisor else {
        return FALLBACK_INSIGHT.to_string();
    };
    let prompt = build_prompt(metrics);
    match tokio::time::timeout(timeout, advisor.advise(&prompt)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        Ok(Ok(_)) => {
            warn!("advisor returned no text");
            FALLBACK_INSIGHT.to_string()
        }
        Ok(Err(e)) => {
            warn!("{e}");
            FALLBACK_INSIGHT.to_string()
        }
        Err(_) => {
            warn!("advisor timed out after {timeout:?}");
            FALLBACK_INSIGHT.to_string()
        }
    }
}

/// Runs an external program with the prompt on stdin and takes its stdout as
/// the insight text.
pub struct CommandAdvisor {
    program: String,
    args: Vec<String>,
}

impl CommandAdvisor {
    /// Split a command line on whitespace. `None` if it is blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Advisor for CommandAdvisor {
    async fn advise(&self, prompt: &str) -> Result<String, AdvisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdvisorError(format!("spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AdvisorError(format!("write prompt: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AdvisorError(format!("wait: {e}")))?;
        if !output.status.success() {
            return Err(AdvisorError(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
