//! Text and JSON rendering of run results for the terminal.

use docsort_core::rules::RuleSet;
use docsort_core::{RunError, RunReport};
use serde_json::json;
use std::fmt::Write;
use std::path::Path;
use storage::StoredSnapshot;

pub fn render_run(report: &RunReport, json: bool) -> anyhow::Result<String> {
    let progress = &report.progress;
    if json {
        let value = json!({
            "status": report.status,
            "total": progress.total,
            "done": progress.processed(),
            "processed_this_run": report.processed_this_run,
            "skipped": report.skipped,
            "category_counts": progress.category_counts,
            "error_count": progress.error_count,
            "empty_content": progress.empty_content,
            "stats_path": report.stats_path,
            "stats": report.stats,
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut out = String::new();
    let status = serde_json::to_value(report.status)?;
    writeln!(out, "status: {}", status.as_str().unwrap_or("unknown"))?;
    writeln!(
        out,
        "files: {} total, {} processed this run, {} skipped as already done",
        progress.total, report.processed_this_run, report.skipped
    )?;
    write_counts(&mut out, progress.category_counts.iter(), progress.error_count)?;
    if progress.empty_content > 0 {
        writeln!(out, "empty documents: {}", progress.empty_content)?;
    }
    if let Some(stats) = &report.stats {
        writeln!(
            out,
            "elapsed: {:.1}s total, {:.1}s this run ({:.2} files/s), success rate {:.1}%",
            stats.elapsed_secs, stats.session_secs, stats.files_per_second, stats.success_rate
        )?;
    }
    if let Some(path) = &report.stats_path {
        writeln!(out, "statistics: {}", path.display())?;
    }
    if !progress.recent_errors.is_empty() {
        writeln!(out, "recent errors:")?;
        for record in progress.recent_errors.iter().rev().take(10) {
            writeln!(out, "  {}: {}", record.path, record.reason)?;
        }
    }
    Ok(out.trim_end().to_string())
}

pub fn render_failure(err: &RunError, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(&json!({
            "status": "failed",
            "error": err.to_string(),
        }))?);
    }
    Ok(format!("status: failed\nerror: {err}"))
}

pub fn render_status(
    snapshot: Option<&StoredSnapshot>,
    path: &Path,
    json: bool,
) -> anyhow::Result<String> {
    let Some(snapshot) = snapshot else {
        return Ok(if json {
            serde_json::to_string_pretty(&json!({ "unfinished": false }))?
        } else {
            "no unfinished run".to_string()
        });
    };
    let progress = &snapshot.progress;
    if json {
        return Ok(serde_json::to_string_pretty(&json!({
            "unfinished": true,
            "snapshot": path,
            "started_at": progress.started_at,
            "saved_at": snapshot.saved_at,
            "total": progress.total,
            "done": progress.processed(),
            "pending": progress.pending(),
            "category_counts": progress.category_counts,
            "error_count": progress.error_count,
            "empty_content": progress.empty_content,
        }))?);
    }

    let mut out = String::new();
    writeln!(out, "unfinished run: {}", path.display())?;
    writeln!(
        out,
        "started {}, last checkpoint {}",
        progress.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(
        out,
        "files: {} of {} done, {} pending",
        progress.processed(),
        progress.total,
        progress.pending()
    )?;
    write_counts(&mut out, progress.category_counts.iter(), progress.error_count)?;
    Ok(out.trim_end().to_string())
}

pub fn render_rules(rules: &RuleSet) -> String {
    if rules.is_empty() {
        return "no categories configured; every file is unclassified".to_string();
    }
    let mut out = String::new();
    for (i, rule) in rules.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {}", i + 1, rule.name());
        if !rule.include().is_empty() {
            let _ = writeln!(out, "     include: {}", rule.include().join(", "));
        }
        if !rule.exclude().is_empty() {
            let _ = writeln!(out, "     exclude: {}", rule.exclude().join(", "));
        }
    }
    out.trim_end().to_string()
}

fn write_counts<'a>(
    out: &mut String,
    counts: impl Iterator<Item = (&'a String, &'a u64)>,
    errors: u64,
) -> std::fmt::Result {
    let counts: Vec<_> = counts.collect();
    let width = counts
        .iter()
        .map(|(name, _)| name.chars().count())
        .chain([5])
        .max()
        .unwrap_or(5);
    for (name, count) in counts {
        writeln!(out, "  {name:<width$}  {count:>6}")?;
    }
    writeln!(out, "  {:<width$}  {errors:>6}", "error")
}
