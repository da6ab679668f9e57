//! Report analysis and rendering.
//!
//! Scores condense a run into three 0-100 numbers; recommendations turn the
//! same signals into actionable text. Rendering is deterministic: the same
//! report always produces byte-identical output in every format.

use serde::Serialize;
use std::fmt::Write as _;
use std::str::FromStr;
use tandem_common::report::{ExecutionReport, StepExecutionResult};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("JSON render failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV render failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("Text render failed: {0}")]
    Fmt(#[from] std::fmt::Error),
}

/// Aggregate counters and percentage rates over the executed steps.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub fallback_rate: f64,
    pub ai_usage_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub performance: u8,
    pub reliability: u8,
    pub adaptability: u8,
}

pub fn summarize(report: &ExecutionReport) -> Summary {
    let executed = report.executed_steps().count();
    let skipped = report.steps.len() - executed;
    let rate = |count: usize| {
        if executed == 0 {
            0.0
        } else {
            count as f64 / executed as f64 * 100.0
        }
    };
    Summary {
        total: report.steps.len(),
        success: report.success_count(),
        skipped,
        success_rate: rate(report.success_count()),
        fallback_rate: rate(report.fallback_count),
        ai_usage_rate: rate(report.ai_usage_count),
    }
}

/// Score a run on three axes.
///
/// Performance starts from the success rate and pays for fallbacks (half a
/// point each percent, capped at 20) and wall-clock time (a point per
/// second, capped at 20). Reliability is the success rate with a 10-point
/// bonus for a run that never needed a fallback. Adaptability rewards
/// semantic-path usage plus how often a fallback actually rescued a step.
pub fn score(report: &ExecutionReport) -> Scores {
    let summary = summarize(report);
    let total_secs = report.total_duration_ms as f64 / 1000.0;

    let performance =
        summary.success_rate - (summary.fallback_rate / 2.0).min(20.0) - total_secs.min(20.0);

    let reliability = summary.success_rate
        + if report.fallback_count == 0 { 10.0 } else { 0.0 };

    let rescued = report
        .executed_steps()
        .filter(|s| s.fallback_occurred && s.success)
        .count();
    let rescued_fraction = if report.fallback_count == 0 {
        0.0
    } else {
        rescued as f64 / report.fallback_count as f64
    };
    let adaptability = summary.ai_usage_rate + 30.0 * rescued_fraction;

    Scores {
        performance: clamp_score(performance),
        reliability: clamp_score(reliability),
        adaptability: clamp_score(adaptability),
    }
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Ordered recommendations derived from the report alone.
pub fn recommend(report: &ExecutionReport) -> Vec<String> {
    recommend_steps(&report.steps, report.total_duration_ms)
}

/// The same analysis over raw step results, usable before the report is
/// sealed.
pub fn recommend_steps(steps: &[StepExecutionResult], total_duration_ms: u64) -> Vec<String> {
    let executed = steps.iter().filter(|s| !s.was_skipped()).count();
    let fallbacks = steps.iter().filter(|s| s.fallback_occurred).count();
    let fallback_rate = if executed == 0 {
        0.0
    } else {
        fallbacks as f64 / executed as f64 * 100.0
    };
    let mut out = Vec::new();

    if total_duration_ms > 60_000 {
        out.push(format!(
            "Execution took {:.1}s; consider trimming waits or splitting the intent",
            total_duration_ms as f64 / 1000.0
        ));
    }
    if fallback_rate > 30.0 {
        out.push(format!(
            "{:.0}% of steps needed a fallback; re-record their snippets against the current page",
            fallback_rate
        ));
    }
    for step in steps.iter().filter(|s| !s.success && !s.was_skipped()) {
        let error = step.error.as_deref().unwrap_or("unknown error");
        out.push(format!("Step '{}' failed: {}", step.step_name, error));
    }
    out
}

pub fn render(report: &ExecutionReport, format: ReportFormat) -> Result<String, RenderError> {
    match format {
        ReportFormat::Text => render_text(report),
        ReportFormat::Json => render_json(report),
        ReportFormat::Csv => render_csv(report),
    }
}

fn render_text(report: &ExecutionReport) -> Result<String, RenderError> {
    let summary = summarize(report);
    let scores = score(report);
    let mut out = String::new();

    writeln!(
        out,
        "Execution report: {} ({})",
        report.spec_name, report.execution_id
    )?;
    writeln!(out, "Started:  {}", report.started_at.to_rfc3339())?;
    writeln!(
        out,
        "Duration: {:.1}s",
        report.total_duration_ms as f64 / 1000.0
    )?;
    writeln!(
        out,
        "Outcome:  {}",
        if report.overall_success {
            "SUCCESS"
        } else {
            "FAILURE"
        }
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "Steps: {} total, {} succeeded, {} skipped",
        summary.total, summary.success, summary.skipped
    )?;
    writeln!(
        out,
        "Success rate: {:.1}%  Fallback rate: {:.1}%  AI usage: {:.1}%",
        summary.success_rate, summary.fallback_rate, summary.ai_usage_rate
    )?;
    writeln!(out)?;
    writeln!(out, "Scores")?;
    writeln!(out, "  Performance:  {:>3}", scores.performance)?;
    writeln!(out, "  Reliability:  {:>3}", scores.reliability)?;
    writeln!(out, "  Adaptability: {:>3}", scores.adaptability)?;
    writeln!(out)?;
    writeln!(out, "Steps")?;
    for (index, step) in report.steps.iter().enumerate() {
        let status = if step.was_skipped() {
            "skipped"
        } else if step.success {
            "ok"
        } else {
            "failed"
        };
        write!(
            out,
            "  {:>2}. {:<24} {:<13} {:<7} {:>6}ms",
            index + 1,
            step.step_name,
            step.path_used,
            status,
            step.duration_ms
        )?;
        if step.fallback_occurred {
            write!(out, "  (fallback)")?;
        }
        writeln!(out)?;
        if let Some(error) = &step.error {
            writeln!(out, "      {}", error)?;
        }
    }
    if !report.suggestions.is_empty() {
        writeln!(out)?;
        writeln!(out, "Suggestions")?;
        for suggestion in &report.suggestions {
            writeln!(out, "  - {}", suggestion)?;
        }
    }
    Ok(out)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    execution_id: String,
    spec_name: &'a str,
    started_at: String,
    overall_success: bool,
    total_duration_ms: u64,
    summary: Summary,
    scores: Scores,
    steps: Vec<JsonStep<'a>>,
    suggestions: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonStep<'a> {
    step_name: &'a str,
    path_used: String,
    fallback_occurred: bool,
    success: bool,
    recovery: String,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot: Option<&'a str>,
    timestamp: String,
}

fn render_json(report: &ExecutionReport) -> Result<String, RenderError> {
    let view = JsonReport {
        execution_id: report.execution_id.to_string(),
        spec_name: &report.spec_name,
        started_at: report.started_at.to_rfc3339(),
        overall_success: report.overall_success,
        total_duration_ms: report.total_duration_ms,
        summary: summarize(report),
        scores: score(report),
        steps: report.steps.iter().map(json_step).collect(),
        suggestions: &report.suggestions,
    };
    Ok(serde_json::to_string_pretty(&view)?)
}

fn json_step(step: &StepExecutionResult) -> JsonStep<'_> {
    JsonStep {
        step_name: &step.step_name,
        path_used: step.path_used.to_string(),
        fallback_occurred: step.fallback_occurred,
        success: step.success,
        recovery: step.recovery.to_string(),
        duration_ms: step.duration_ms,
        error: step.error.as_deref(),
        screenshot: step.screenshot.as_deref(),
        timestamp: step.timestamp.to_rfc3339(),
    }
}

const CSV_HEADER: [&str; 9] = [
    "ExecutionID",
    "StepIndex",
    "StepName",
    "PathUsed",
    "FallbackOccurred",
    "Success",
    "Duration",
    "Error",
    "Timestamp",
];

fn render_csv(report: &ExecutionReport) -> Result<String, RenderError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    let execution_id = report.execution_id.to_string();
    for (index, step) in report.steps.iter().enumerate() {
        let row = [
            execution_id.clone(),
            index.to_string(),
            step.step_name.clone(),
            step.path_used.name().to_string(),
            step.fallback_occurred.to_string(),
            step.success.to_string(),
            step.duration_ms.to_string(),
            step.error.clone().unwrap_or_default(),
            step.timestamp.to_rfc3339(),
        ];
        writer.write_record(&row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| RenderError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_common::report::{RecoveryStatus, ReportBuilder};
    use tandem_common::spec::ExecutionPath;

    fn step(name: &str, success: bool, fallback: bool, path: ExecutionPath) -> StepExecutionResult {
        StepExecutionResult {
            step_name: name.to_string(),
            path_used: path,
            fallback_occurred: fallback,
            success,
            error: if success {
                None
            } else {
                Some("no such element".to_string())
            },
            recovery: if fallback {
                RecoveryStatus::RecoveredViaFallback
            } else {
                RecoveryStatus::NotAttempted
            },
            duration_ms: 100,
            screenshot: None,
            timestamp: Utc::now(),
        }
    }

    fn report_with(steps: Vec<StepExecutionResult>) -> ExecutionReport {
        let mut builder = ReportBuilder::new("demo");
        for s in steps {
            builder.record(s);
        }
        builder.finish(2_000, Vec::new())
    }

    #[test]
    fn test_scores_stay_in_range() {
        let report = report_with(vec![
            step("a", true, false, ExecutionPath::Deterministic),
            step("b", false, true, ExecutionPath::Semantic),
        ]);
        let scores = score(&report);
        assert!(scores.performance <= 100);
        assert!(scores.reliability <= 100);
        assert!(scores.adaptability <= 100);
    }

    #[test]
    fn test_clean_run_gets_reliability_bonus() {
        let report = report_with(vec![
            step("a", true, false, ExecutionPath::Deterministic),
            step("b", true, false, ExecutionPath::Deterministic),
        ]);
        assert_eq!(report.fallback_count, 0);
        assert_eq!(score(&report).reliability, 100);
    }

    #[test]
    fn test_partial_run_with_fallbacks() {
        // 3 of 5 succeed; two fallbacks, one of which rescued its step.
        let report = report_with(vec![
            step("a", true, false, ExecutionPath::Deterministic),
            step("b", true, true, ExecutionPath::Semantic),
            step("c", false, true, ExecutionPath::Semantic),
            step("d", false, false, ExecutionPath::Deterministic),
            step("e", true, false, ExecutionPath::Deterministic),
        ]);
        assert!(!report.overall_success);
        let summary = summarize(&report);
        assert_eq!(summary.success_rate, 60.0);
        assert_eq!(summary.fallback_rate, 40.0);
        // The consistency bonus is gone: reliability equals the raw rate.
        assert_eq!(score(&report).reliability, 60);
    }

    #[test]
    fn test_failed_step_named_in_recommendations() {
        let report = report_with(vec![
            step("login", true, false, ExecutionPath::Deterministic),
            step("checkout", false, false, ExecutionPath::Deterministic),
        ]);
        let recs = recommend(&report);
        assert!(recs.iter().any(|r| r.contains("checkout")));
    }

    #[test]
    fn test_recommendations_agree_before_and_after_finish() {
        let mut builder = ReportBuilder::new("demo");
        builder.record(step("a", true, true, ExecutionPath::Semantic));
        builder.record(step("b", false, false, ExecutionPath::Deterministic));
        let pre = recommend_steps(builder.steps(), 70_000);
        let report = builder.finish(70_000, pre.clone());
        assert_eq!(recommend(&report), pre);
        assert_eq!(report.suggestions, pre);
        assert!(pre.iter().any(|r| r.contains("Execution took")));
        assert!(pre.iter().any(|r| r.contains("Step 'b' failed")));
    }

    #[test]
    fn test_render_is_deterministic() {
        let report = report_with(vec![step("a", true, false, ExecutionPath::Deterministic)]);
        for format in [ReportFormat::Text, ReportFormat::Json, ReportFormat::Csv] {
            let first = render(&report, format).unwrap();
            let second = render(&report, format).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_csv_header_and_rows() {
        let report = report_with(vec![
            step("a", true, false, ExecutionPath::Deterministic),
            step("b", true, false, ExecutionPath::Semantic),
        ]);
        let csv = render(&report, ReportFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ExecutionID,StepIndex,StepName,PathUsed,FallbackOccurred,Success,Duration,Error,Timestamp"
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("json".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
