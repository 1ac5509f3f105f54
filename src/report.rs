//! Output formatting for analysis reports.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: the full [`AnalysisReport`] for downstream tooling

use colored::*;

use crate::engine::AnalysisReport;
use crate::facts::{Confidence, Finding, Severity};

// =============================================================================
// JSON Format
// =============================================================================

/// Serialize a report as pretty-printed JSON.
///
/// Every collection in the report is already ordered, so identical runs
/// produce identical text.
pub fn render_json(report: &AnalysisReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write the report to stdout as JSON.
pub fn write_json(report: &AnalysisReport) -> anyhow::Result<()> {
    println!("{}", render_json(report)?);
    Ok(())
}

// =============================================================================
// Pretty Format
// =============================================================================

/// Write the report in human-readable form.
pub fn write_pretty(path: &str, report: &AnalysisReport, fail_on: Severity) {
    println!();
    print!("  ");
    print!("{}", "faultline".cyan().bold());
    println!(" v{}", report.version);
    println!();

    print!("  {}", "Scanning: ".dimmed());
    println!("{}", path);
    print!("  {}", "Files:    ".dimmed());
    print!("{} analyzed", report.files_analyzed);
    if !report.degraded_files.is_empty() {
        print!(
            "  {}",
            format!("({} degraded)", report.degraded_files.len()).yellow()
        );
    }
    println!();
    if !report.endpoints.is_empty() {
        print!("  {}", "Channels: ".dimmed());
        println!("{}", report.endpoints.len());
    }
    println!();

    if !report.findings.is_empty() {
        write_findings(&report.findings);
        println!();
    }

    if !report.degraded_files.is_empty() {
        println!("  {} ({}):", "Degraded".yellow(), report.degraded_files.len());
        for d in &report.degraded_files {
            println!("    {}  {}", d.path.blue(), d.reason.dimmed());
        }
        println!();
    }

    if !report.skipped_checks.is_empty() {
        println!(
            "  {}",
            format!(
                "{} check(s) skipped for insufficient data (use --verbose for details)",
                report.skipped_checks.len()
            )
            .dimmed()
        );
        println!();
    }

    write_summary(report, fail_on);
    println!();
}

fn write_findings(findings: &[Finding]) {
    println!("  {} ({}):", "Findings".bold(), findings.len());
    println!();

    for f in findings {
        write_severity_tag(f.severity);
        print!("  ");
        print!("{:<26}", f.kind.as_str().dimmed());
        print!("{}", f.file.blue());
        if f.line > 0 {
            print!("{}", format!(":{}", f.line).dimmed());
        }
        if f.confidence != Confidence::High {
            print!("  {}", format!("[{} confidence]", f.confidence).dimmed());
        }
        println!();

        println!("              {}", f.rationale);
        if let Some(radius) = &f.blast_radius {
            let reach = if radius.reachable_entry_points {
                "reaches an entry point".red().to_string()
            } else {
                "no entry point within depth".dimmed().to_string()
            };
            println!(
                "              {} {} direct caller(s), {}",
                "blast radius:".dimmed(),
                radius.direct_callers,
                reach
            );
            if let Some(path) = radius.sample_paths.first() {
                println!("              {}", path.join(" -> ").dimmed());
            }
        }
        println!();
    }
}

fn write_severity_tag(severity: Severity) {
    match severity {
        Severity::Critical => print!("    {}", "CRIT ".red().bold()),
        Severity::High => print!("    {}", "HIGH ".red()),
        Severity::Medium => print!("    {}", "MED  ".yellow()),
        Severity::Low => print!("    {}", "LOW  ".blue()),
    }
}

fn write_summary(report: &AnalysisReport, fail_on: Severity) {
    let counts = report.count_by_severity();
    let parts: Vec<String> = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ]
    .iter()
    .map(|s| format!("{} {}", counts.get(s).copied().unwrap_or(0), s))
    .collect();
    print!("  {}", parts.join(", ").dimmed());
    print!("  ");

    if report.count_at_or_above(fail_on) == 0 {
        print!("{}", "PASSED".green());
    } else {
        print!("{}", format!("FAILED (fail-on: {})", fail_on).red());
    }
    println!();
}
