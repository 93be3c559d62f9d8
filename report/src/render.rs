//! Human-readable and JSON rendering of a [`Report`]

use crate::generator::Report;
use shop_bench_core::MetricSummary;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Rendering failures
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The output file could not be written
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    /// The report could not be serialized
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

const WIDTH: usize = 70;
const NAME_COLUMN: usize = 40;

/// Serialize the report as pretty JSON
pub fn to_json(report: &Report) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write the report as pretty JSON to `path`
pub fn write_json(report: &Report, path: impl AsRef<Path>) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Render the end-of-run summary
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_text(&mut out, report);
    out
}

fn write_text(out: &mut String, report: &Report) -> std::fmt::Result {
    writeln!(out, "{}", "=".repeat(WIDTH))?;
    writeln!(out, "   shop-bench: {}", report.scenario)?;
    writeln!(out, "{}", "=".repeat(WIDTH))?;

    let status = match (&report.setup_error, report.stop_reason) {
        (Some(_), None) => "ABORTED (setup)".to_string(),
        (Some(_), Some(_)) => "DEGRADED (setup)".to_string(),
        (None, Some(reason)) if report.partial => {
            format!("PARTIAL ({})", serde_plain(&reason))
        }
        (None, _) => "COMPLETED".to_string(),
    };
    writeln!(out, "  status:        {status}")?;
    if let Some(error) = &report.setup_error {
        writeln!(out, "  setup error:   {error}")?;
    }
    writeln!(
        out,
        "  elapsed:       {:.1}s   peak clients: {}",
        report.elapsed_secs, report.peak_concurrency
    )?;
    let c = &report.clients;
    writeln!(
        out,
        "  clients:       admitted {}, completed {}, setup failed {}, retired {}, interrupted {}",
        c.admitted, c.completed, c.setup_failed, c.retired, c.interrupted
    )?;

    if !report.thresholds.is_empty() {
        writeln!(out)?;
        writeln!(out, "Thresholds")?;
        for t in &report.thresholds {
            let mark = if t.passed { "✓" } else { "✗" };
            let observed = t
                .observed
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "no data".to_string());
            writeln!(out, "  {mark} {:<NAME_COLUMN$} observed {observed}", t.name)?;
        }
    }

    if !report.metrics.is_empty() {
        writeln!(out)?;
        writeln!(out, "Metrics")?;
        for (name, summary) in &report.metrics {
            let dotted = format!("{name}{}", ".".repeat(NAME_COLUMN.saturating_sub(name.len())));
            writeln!(out, "  {dotted}: {}", describe(summary))?;
        }
    }

    if let Some(f) = &report.fairness {
        writeln!(out)?;
        writeln!(out, "Fairness (capacity {})", f.capacity)?;
        writeln!(
            out,
            "  reported {}, forfeited {}, exact matches {}/{}, order preserved: {}",
            f.reported,
            f.forfeited.len(),
            f.exact_matches,
            f.expected_winners.len(),
            if f.order_preserved { "yes" } else { "no" }
        )?;
        if f.oversold {
            writeln!(
                out,
                "  OVERSOLD: {} winners for capacity {}",
                f.actual_winners.len(),
                f.capacity
            )?;
        }
        if !f.false_positives.is_empty() {
            writeln!(out, "  unexpected winners: {:?}", f.false_positives)?;
        }
        if !f.false_negatives.is_empty() {
            writeln!(out, "  missed winners:     {:?}", f.false_negatives)?;
        }
        if f.late_records > 0 {
            writeln!(out, "  late records:       {}", f.late_records)?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "RESULT: {}",
        if report.passed { "PASSED" } else { "FAILED" }
    )?;
    Ok(())
}

fn describe(summary: &MetricSummary) -> String {
    match summary {
        MetricSummary::Counter { count, rate } => format!("{count} ({rate:.2}/s)"),
        MetricSummary::Rate { hits, total, rate } => {
            format!("{:.2}% ({hits} of {total})", rate * 100.0)
        }
        MetricSummary::Trend(t) if t.count == 0 => "no samples".to_string(),
        MetricSummary::Trend(t) => format!(
            "avg={:.2} min={:.2} med={:.2} max={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
            t.mean, t.min, t.med, t.max, t.p90, t.p95, t.p99
        ),
    }
}

fn serde_plain<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
