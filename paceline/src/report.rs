use std::{
    fmt::Write as _,
    future::Future,
    io::{self, Write},
};

use serde::{Deserialize, Serialize};

use crate::{
    controller::RunSummary, error::ReportError, signal::StopReason,
    wait_events::WaitEventTally,
};

/// Everything known about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub clients: usize,
    pub stop_reason: StopReason,
    pub summary: RunSummary,
    /// Cumulative wait event samples, by label.
    pub wait_events: WaitEventTally,
}

/// Sends a [`RunReport`] somewhere (stdout, a file, a database...).
pub trait Reporter {
    fn report(&self, report: &RunReport) -> impl Future<Output = Result<(), ReportError>> + Send;
}

/// Human-readable report on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), ReportError> {
        let text = render_text(report);
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Pretty-printed JSON document on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    async fn report(&self, report: &RunReport) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(report)?;
        let mut out = io::stdout().lock();
        writeln!(out, "{json}")?;
        out.flush()?;
        Ok(())
    }
}

/// Text rendering used by [`StdoutReporter`]: a short summary followed by one
/// `label - count` line per wait event.
pub fn render_text(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Clients: {}", report.clients);
    let _ = writeln!(out, "Stopped: {}", report.stop_reason);
    let _ = writeln!(out, "Elapsed: {:.3}s", summary.elapsed.as_secs_f64());
    let _ = writeln!(out, "Transactions: {}", summary.transactions);
    let _ = writeln!(out, "Queries: {}", summary.statements);
    let _ = writeln!(out, "Average TPS: {:.2}", summary.average_tps);
    let _ = writeln!(out, "Average QPS: {:.2}", summary.average_qps);
    let _ = writeln!(out, "Final delay: {}us", summary.final_delay.as_micros());

    if report.wait_events.is_empty() {
        let _ = writeln!(out, "Wait events: none sampled");
    } else {
        let _ = writeln!(out, "Wait events:");
        for (label, count) in report.wait_events.iter() {
            let _ = writeln!(out, "{label} - {count}");
        }
    }
    out
}
