//! # Pretty printing
//!
//! Coloured terminal output for the `sr` binary. Every printer writes to any
//! [`Write`] so output can be captured in tests; the `print_*` wrappers target
//! stdout.
//!
//! Colours follow one scheme: headings bold cyan, ids yellow, scores green,
//! skipped feedback dark grey.

use std::error::Error;
use std::io::{Write, stdout};

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};

use crate::engine::Recommendations;
use crate::index_builder::{BuildStats, IndexStatus};
use crate::maintenance::MaintenanceStats;
use crate::service::{FeedbackOutcome, IngestOutcome};

fn heading<W: Write>(out: &mut W, text: &str) -> Result<(), Box<dyn Error>> {
    out.execute(SetForegroundColor(Color::Cyan))?;
    out.execute(SetAttribute(Attribute::Bold))?;
    writeln!(out, "{}", text)?;
    out.execute(SetAttribute(Attribute::Reset))?;
    out.execute(SetForegroundColor(Color::Reset))?;
    Ok(())
}

fn coloured<W: Write>(out: &mut W, color: Color, text: &str) -> Result<(), Box<dyn Error>> {
    out.execute(SetForegroundColor(color))?;
    write!(out, "{}", text)?;
    out.execute(SetForegroundColor(Color::Reset))?;
    Ok(())
}

fn fields<W: Write>(out: &mut W, rows: &[(&str, String)]) -> Result<(), Box<dyn Error>> {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        write!(out, "  {:width$}  ", key, width = width)?;
        coloured(out, Color::Yellow, value)?;
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_recommendations<W: Write>(
    out: &mut W,
    recs: &Recommendations,
) -> Result<(), Box<dyn Error>> {
    heading(
        out,
        &format!(
            "{} ({} samples)",
            recs.recommendation_type, recs.based_on_samples
        ),
    )?;
    if recs.items.is_empty() {
        coloured(out, Color::DarkGrey, "  nothing left to recommend")?;
        writeln!(out)?;
        return Ok(());
    }
    for item in &recs.items {
        write!(out, "{:>4}. ", item.rank)?;
        coloured(out, Color::Yellow, item.id.as_str())?;
        write!(out, "  ")?;
        coloured(out, Color::Green, &format!("{:.4}", item.score))?;
        if let Some(name) = &item.metadata.filename {
            write!(out, "  {}", name)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_feedback<W: Write>(
    out: &mut W,
    verb: &str,
    outcome: &FeedbackOutcome,
) -> Result<(), Box<dyn Error>> {
    if outcome.applied {
        coloured(out, Color::Green, &format!("{} recorded", verb))?;
    } else {
        let reason = outcome
            .reason
            .and_then(|r| serde_json::to_value(r).ok())
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        coloured(
            out,
            Color::DarkGrey,
            &format!("{} recorded, preference unchanged ({})", verb, reason),
        )?;
    }
    writeln!(out, "; {} samples", outcome.sample_count)?;
    Ok(())
}

pub fn write_ingest<W: Write>(out: &mut W, outcome: &IngestOutcome) -> Result<(), Box<dyn Error>> {
    heading(out, "Ingested")?;
    fields(
        out,
        &[
            ("id", outcome.id.to_string()),
            ("embedded", outcome.embedded.to_string()),
            (
                "attribute",
                outcome
                    .attribute
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".into()),
            ),
        ],
    )
}

pub fn write_build_stats<W: Write>(out: &mut W, stats: &BuildStats) -> Result<(), Box<dyn Error>> {
    heading(out, &format!("Index v{}", stats.version))?;
    fields(
        out,
        &[
            ("indexed", stats.indexed.to_string()),
            ("rejected", stats.rejected.len().to_string()),
            ("embedded", stats.embedded.to_string()),
            ("no_feature_deleted", stats.no_feature_deleted.to_string()),
            ("failed", stats.failed.to_string()),
        ],
    )
}

pub fn write_index_status<W: Write>(out: &mut W, status: &IndexStatus) -> Result<(), Box<dyn Error>> {
    heading(out, "Index status")?;
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    fields(
        out,
        &[
            ("initialized", status.initialized.to_string()),
            ("count", status.count.to_string()),
            ("dimension", or_dash(status.dimension.map(|d| d.to_string()))),
            ("version", or_dash(status.version.map(|v| v.to_string()))),
        ],
    )
}

pub fn write_maintenance<W: Write>(
    out: &mut W,
    stats: &MaintenanceStats,
) -> Result<(), Box<dyn Error>> {
    heading(out, "Embedding maintenance")?;
    fields(
        out,
        &[
            ("total_items", stats.total_items.to_string()),
            ("processed", stats.processed.to_string()),
            ("no_feature_deleted", stats.no_feature_deleted.to_string()),
            ("invalid_deleted", stats.invalid_deleted.to_string()),
            ("failed", stats.failed.to_string()),
            ("with_embeddings", stats.with_embeddings.to_string()),
            ("remaining", stats.remaining.to_string()),
        ],
    )
}

pub fn print_recommendations(recs: &Recommendations) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_recommendations(&mut out, recs)?;
    out.flush()?;
    Ok(())
}

pub fn print_feedback(verb: &str, outcome: &FeedbackOutcome) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_feedback(&mut out, verb, outcome)?;
    out.flush()?;
    Ok(())
}

pub fn print_ingest(outcome: &IngestOutcome) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_ingest(&mut out, outcome)?;
    out.flush()?;
    Ok(())
}

pub fn print_build_stats(stats: &BuildStats) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_build_stats(&mut out, stats)?;
    out.flush()?;
    Ok(())
}

pub fn print_index_status(status: &IndexStatus) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_index_status(&mut out, status)?;
    out.flush()?;
    Ok(())
}

pub fn print_maintenance(stats: &MaintenanceStats) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    write_maintenance(&mut out, stats)?;
    out.flush()?;
    Ok(())
}
