//! CLI output formatting for every subcommand.
//!
//! # Information-First Display
//!
//! Each asset leads with its locator, the thing an editor recognises from the
//! CMS. Storage keys, file names and failure reasons are secondary context on
//! indented lines underneath.
//!
//! ## Extract
//!
//! ```text
//! References (3)
//! 001 /uploads/hero-wide.jpg
//!     banner, desktop in /hero
//! 002 /uploads/hero-narrow.jpg
//!     banner, mobile in /hero
//! 003 https://cdn.example.com/team.png
//!     generic
//! ```
//!
//! ## Run
//!
//! ```text
//! Fetching 3 assets (8 workers)
//! stored   /uploads/hero-wide.jpg
//!     banner/L3VwbG9h.jpg (copied)
//! failed   /uploads/hero-narrow.jpg
//!     fetch: HTTP 404 from https://cms.example.com/uploads/hero-narrow.jpg
//! reused   https://cdn.example.com/team.png
//!     aHR0cHM6Ly9j.webp
//! fallback /uploads/hero-narrow.jpg → /uploads/hero-wide.jpg (/hero)
//! Manifest: src/generated/asset-mapping.json (3 assets)
//! Assets: 1 stored, 1 reused, 0 degraded, 1 fallback, 0 failed (3 total)
//! ```
//!
//! # Architecture
//!
//! Each `format_*` function returns `Vec<String>` and is pure, so the layout
//! is unit tested without capturing stdout. `main` prints the lines.

use crate::manifest::{Manifest, WrittenManifest};
use crate::pipeline::{PipelineEvent, RunSummary};
use crate::store::{AssetOutcome, AssetStatus};
use crate::types::AssetReference;

/// Width of the status column in run output.
const STATUS_WIDTH: usize = 8;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// One-line classification of a reference: `banner, mobile in /hero`.
fn classification(reference: &AssetReference) -> String {
    match (reference.role, reference.group.as_deref()) {
        (Some(role), Some(group)) => {
            format!("{}, {} in {}", reference.category, role.as_str(), group)
        }
        (Some(role), None) => format!("{}, {}", reference.category, role.as_str()),
        _ => reference.category.to_string(),
    }
}

fn status_word(status: &AssetStatus) -> &'static str {
    match status {
        AssetStatus::Stored(c) if c.is_degraded() => "degraded",
        AssetStatus::Stored(_) => "stored",
        AssetStatus::Reused => "reused",
        AssetStatus::Migrated => "migrated",
        AssetStatus::Substituted { .. } => "fallback",
        AssetStatus::Failed { .. } => "failed",
    }
}

// ============================================================================
// Extract
// ============================================================================

/// Format the references found in CMS content.
pub fn format_references(references: &[AssetReference]) -> Vec<String> {
    let mut lines = vec![format!("References ({})", references.len())];
    for (i, reference) in references.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), reference.locator));
        lines.push(format!("    {}", classification(reference)));
    }
    lines
}

// ============================================================================
// Run
// ============================================================================

/// Format one asset's terminal state.
pub fn format_outcome(outcome: &AssetOutcome) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<width$} {}",
        status_word(&outcome.status),
        outcome.reference.locator,
        width = STATUS_WIDTH
    )];
    let relative = outcome
        .stored
        .as_ref()
        .map(|s| crate::store::relative_path(s.category, &s.file_name()));
    match (&outcome.status, relative) {
        (AssetStatus::Failed { stage, reason }, _) => {
            lines.push(format!("    {stage}: {reason}"));
        }
        (AssetStatus::Stored(conversion), Some(path)) => {
            lines.push(format!("    {path} ({conversion})"));
        }
        (AssetStatus::Substituted { from }, Some(path)) => {
            lines.push(format!("    {path} (desktop asset {from})"));
        }
        (_, Some(path)) => lines.push(format!("    {path}")),
        (_, None) => {}
    }
    lines
}

/// Format a single run progress event as display lines.
pub fn format_pipeline_event(event: &PipelineEvent) -> Vec<String> {
    match event {
        PipelineEvent::Started {
            references,
            workers,
        } => vec![format!(
            "Fetching {} assets ({} workers)",
            references, workers
        )],
        PipelineEvent::Asset(outcome) => format_outcome(outcome),
        PipelineEvent::Fallback(link) => {
            let group = link
                .group()
                .map(|g| format!(" ({g})"))
                .unwrap_or_default();
            vec![format!(
                "{:<width$} {} → {}{}",
                "fallback",
                link.primary.locator,
                link.substitute.locator,
                group,
                width = STATUS_WIDTH
            )]
        }
        PipelineEvent::ManifestWritten { path, assets } => {
            vec![format!("Manifest: {} ({} assets)", path.display(), assets)]
        }
    }
}

/// Final summary line of a run.
pub fn format_summary(summary: &RunSummary) -> Vec<String> {
    vec![format!("Assets: {}", summary)]
}

// ============================================================================
// Reclassify
// ============================================================================

/// Format the result of a migration-only run.
pub fn format_reclassify(outcomes: &[AssetOutcome]) -> Vec<String> {
    if outcomes.is_empty() {
        return vec!["Nothing to migrate".to_string()];
    }
    let mut lines = Vec::new();
    for outcome in outcomes {
        lines.extend(format_outcome(outcome));
    }
    let moved = outcomes
        .iter()
        .filter(|o| o.status == AssetStatus::Migrated)
        .count();
    lines.push(format!("Migrated {} of {} banner assets", moved, outcomes.len()));
    lines
}

// ============================================================================
// Manifest
// ============================================================================

/// Format what the Manifest Builder published.
pub fn format_manifest_report(manifest: &Manifest, written: &WrittenManifest) -> Vec<String> {
    let c = &manifest.counts;
    let mut lines = vec![
        format!(
            "{} assets ({} generic, {} banner, {} converted)",
            c.total, c.generic, c.banner, c.converted
        ),
        format!("    Mapping: {}", written.mapping.display()),
        format!(
            "    Aliases: {} ({} entries)",
            written.module.display(),
            manifest.aliases.len()
        ),
    ];
    if !manifest.diagnostics.is_empty() {
        lines.push(format!("Skipped aliases ({})", manifest.diagnostics.len()));
        for d in &manifest.diagnostics {
            lines.push(format!(
                "    {}: kept {}, skipped {}",
                d.alias, d.bound_to, d.rejected
            ));
        }
    }
    lines
}
