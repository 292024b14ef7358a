//! Ranked lead reports assembled from progress snapshots, plus their on-disk export.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use leadscore_core::{Criterion, PriorityTier, ScoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::progress::{AnalysisStatus, ErrorKind, ProgressEntry};

pub const REPORT_MARKDOWN: &str = "lead_report.md";
pub const REPORT_JSON: &str = "lead_report.json";
pub const REPORT_MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLead {
    pub rank: usize,
    pub result: ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErroredRecord {
    pub name: String,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadReport {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub completed: usize,
    pub in_flight: usize,
    /// Keyed by tier label.
    pub tier_counts: BTreeMap<String, usize>,
    pub ranked: Vec<RankedLead>,
    pub errored: Vec<ErroredRecord>,
    /// Records never dispatched, in table order.
    pub not_analyzed: Vec<String>,
}

/// Whether an entry's stored result belongs in the ranking.
///
/// A record being re-scored keeps its earlier good result visible until the new one lands.
fn is_rankable(entry: &ProgressEntry) -> bool {
    match entry.status {
        AnalysisStatus::Completed => entry.result.is_some(),
        AnalysisStatus::Analyzing => entry.good_total().is_some(),
        AnalysisStatus::Pending | AnalysisStatus::Error => false,
    }
}

/// Rank scored entries by total (descending, ties by name) and collect the rest.
pub fn assemble_report(entries: &[ProgressEntry]) -> LeadReport {
    let mut scored = entries
        .iter()
        .filter(|e| is_rankable(e))
        .filter_map(|e| e.result.clone())
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| {
        b.total_score
            .cmp(&a.total_score)
            .then_with(|| a.event_name.to_lowercase().cmp(&b.event_name.to_lowercase()))
    });

    let mut tier_counts = BTreeMap::new();
    for result in &scored {
        *tier_counts
            .entry(result.next_step_strategy.label().to_string())
            .or_default() += 1;
    }

    let errored = entries
        .iter()
        .filter(|e| e.status == AnalysisStatus::Error)
        .map(|e| ErroredRecord {
            name: e.name.clone(),
            kind: e.error_kind,
            message: e.error.clone().unwrap_or_default(),
        })
        .collect();

    LeadReport {
        generated_at: Utc::now(),
        total_records: entries.len(),
        completed: entries
            .iter()
            .filter(|e| e.status == AnalysisStatus::Completed)
            .count(),
        in_flight: entries
            .iter()
            .filter(|e| e.status == AnalysisStatus::Analyzing)
            .count(),
        tier_counts,
        ranked: scored
            .into_iter()
            .enumerate()
            .map(|(i, result)| RankedLead { rank: i + 1, result })
            .collect(),
        errored,
        not_analyzed: entries
            .iter()
            .filter(|e| e.status == AnalysisStatus::Pending)
            .map(|e| e.name.clone())
            .collect(),
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn criterion_cell(result: &ScoreResult, criterion: Criterion) -> String {
    if result.disabled_criteria.contains(&criterion) {
        "off".to_string()
    } else {
        result.sub_score(criterion).to_string()
    }
}

pub fn render_markdown(report: &LeadReport) -> String {
    let mut lines = vec![
        "# Event Lead Report".to_string(),
        String::new(),
        format!("- Generated: {}", report.generated_at.to_rfc3339()),
        format!("- Records: {}", report.total_records),
        format!("- Completed: {}", report.completed),
        format!("- Errored: {}", report.errored.len()),
        format!("- Not analyzed: {}", report.not_analyzed.len()),
    ];
    if report.in_flight > 0 {
        lines.push(format!("- In flight: {}", report.in_flight));
    }
    for tier in [PriorityTier::High, PriorityTier::Medium, PriorityTier::Low] {
        if let Some(count) = report.tier_counts.get(tier.label()) {
            lines.push(format!("- {}: {count}", tier.label()));
        }
    }

    lines.push(String::new());
    lines.push("## Ranked Leads".to_string());
    lines.push(String::new());
    if report.ranked.is_empty() {
        lines.push("_No scored records yet._".to_string());
    } else {
        lines.push(
            "| # | Event | Total | History | Region | Contact | Delegates | Next step | Contact email | Problems |"
                .to_string(),
        );
        lines.push("|---|---|---|---|---|---|---|---|---|---|".to_string());
        for lead in &report.ranked {
            let r = &lead.result;
            let email = r
                .primary_contact
                .as_ref()
                .and_then(|c| c.email.as_deref())
                .unwrap_or("-");
            lines.push(format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                lead.rank,
                cell(&r.event_name),
                r.total_score,
                criterion_cell(r, Criterion::History),
                criterion_cell(r, Criterion::Region),
                criterion_cell(r, Criterion::Contact),
                criterion_cell(r, Criterion::Delegates),
                r.next_step_strategy.label(),
                cell(email),
                cell(&r.problems.join("; ")),
            ));
        }
    }

    if !report.errored.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        lines.push(String::new());
        for err in &report.errored {
            let kind = match err.kind {
                Some(ErrorKind::Data) => "data",
                Some(ErrorKind::RateLimit) => "rate limit",
                Some(ErrorKind::Transient) | None => "transient",
            };
            lines.push(format!("- {} ({kind}): {}", err.name, err.message));
        }
    }

    if !report.not_analyzed.is_empty() {
        lines.push(String::new());
        lines.push("## Not Analyzed".to_string());
        lines.push(String::new());
        lines.extend(report.not_analyzed.iter().map(|name| format!("- {name}")));
    }

    lines.push(String::new());
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone)]
pub struct WrittenReport {
    pub dir: PathBuf,
    pub manifest: ReportManifest,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write via a sibling temp file and rename so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp report file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp report file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp report file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming temp report {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Export `report` to `reports/<run_id>/` under `workspace_root`.
pub async fn write_report(
    workspace_root: &Path,
    run_id: Uuid,
    report: &LeadReport,
) -> Result<WrittenReport> {
    let dir = workspace_root.join("reports").join(run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let markdown = render_markdown(report).into_bytes();
    let json = serde_json::to_vec_pretty(report).context("serializing lead report")?;

    let mut files = Vec::new();
    for (name, bytes) in [(REPORT_MARKDOWN, &markdown), (REPORT_JSON, &json)] {
        write_atomic(&dir.join(name), bytes).await?;
        files.push(ReportManifestFile {
            name: name.to_string(),
            sha256: sha256_hex(bytes),
            bytes: bytes.len() as u64,
        });
    }

    let manifest = ReportManifest {
        schema_version: 1,
        run_id,
        files,
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    write_atomic(&dir.join(REPORT_MANIFEST), &manifest_bytes).await?;

    Ok(WrittenReport { dir, manifest })
}

/// Summaries of the most recent `runs` exported reports, newest first.
pub fn report_history_markdown(workspace_root: &Path, runs: usize) -> Result<String> {
    let reports_root = workspace_root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter(|entry| entry.path().join(REPORT_JSON).exists())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Lead Report History".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let json_path = dir.path().join(REPORT_JSON);
        let report: LeadReport = serde_json::from_str(
            &std::fs::read_to_string(&json_path)
                .with_context(|| format!("reading {}", json_path.display()))?,
        )
        .with_context(|| format!("parsing {}", json_path.display()))?;

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- generated: {}", report.generated_at.to_rfc3339()));
        lines.push(format!(
            "- records: {} (completed {}, errored {}, not analyzed {})",
            report.total_records,
            report.completed,
            report.errored.len(),
            report.not_analyzed.len()
        ));
        if let Some(top) = report.ranked.first() {
            lines.push(format!(
                "- top lead: {} ({})",
                top.result.event_name, top.result.total_score
            ));
        }
        lines.push(format!("- report: `{}`", dir.path().join(REPORT_MARKDOWN).display()));
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{Outcome, ProgressTable};
    use leadscore_core::EventRecord;
    use tempfile::tempdir;

    fn result(name: &str, total: u8) -> ScoreResult {
        ScoreResult {
            event_name: name.to_string(),
            history_score: 0,
            region_score: 0,
            contact_score: 0,
            delegates_score: total,
            total_score: total,
            disabled_criteria: vec![],
            vietnam_events_count: 0,
            total_events: 0,
            average_delegates: None,
            past_events_history_summary: String::new(),
            primary_contact: None,
            notes: String::new(),
            problems: vec!["Missing contact information".into()],
            next_step_strategy: PriorityTier::from_total(total),
            data_issues: vec![],
            data_quality_score: 50,
        }
    }

    async fn sample_entries() -> Vec<ProgressEntry> {
        let table = ProgressTable::new();
        let ids = table
            .register(&[
                EventRecord::new("Beta Expo"),
                EventRecord::new("Acme Summit"),
                EventRecord::new("Gamma Forum"),
                EventRecord::new("Delta Week"),
                EventRecord::new("Zeta Meeting"),
            ])
            .await;
        table
            .settle(ids[0], Outcome::Scored(result("Beta Expo", 45)))
            .await
            .unwrap();
        table
            .settle(ids[1], Outcome::Scored(result("Acme Summit", 45)))
            .await
            .unwrap();
        table
            .settle(ids[2], Outcome::Scored(result("Gamma Forum", 70)))
            .await
            .unwrap();
        table
            .settle(
                ids[3],
                Outcome::Failed {
                    kind: ErrorKind::Transient,
                    message: "timed out".into(),
                },
            )
            .await
            .unwrap();
        table.snapshot().await
    }

    #[tokio::test]
    async fn ranking_orders_by_total_then_name() {
        let report = assemble_report(&sample_entries().await);
        let order = report
            .ranked
            .iter()
            .map(|l| (l.rank, l.result.event_name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![(1, "Gamma Forum"), (2, "Acme Summit"), (3, "Beta Expo")]
        );
        assert_eq!(report.tier_counts.get("high priority"), Some(&1));
        assert_eq!(report.tier_counts.get("medium priority"), Some(&2));
        assert_eq!(report.errored.len(), 1);
        assert_eq!(report.not_analyzed, vec!["Zeta Meeting".to_string()]);

        let md = render_markdown(&report);
        assert!(md.contains("| 1 | Gamma Forum | 70 |"));
        assert!(md.contains("- Delta Week (transient): timed out"));
        assert!(md.contains("## Not Analyzed"));
    }

    #[tokio::test]
    async fn rescoring_keeps_the_earlier_result_ranked() {
        let table = ProgressTable::new();
        let id = table
            .restore_completed("Acme Summit", result("Acme Summit", 62))
            .await;
        let before = assemble_report(&table.snapshot().await);
        assert_eq!(before.ranked.len(), 1);

        table.mark_analyzing(id).await.unwrap();
        let during = assemble_report(&table.snapshot().await);
        assert_eq!(during.ranked.len(), 1);
        assert_eq!(during.ranked[0].result.total_score, 62);
        assert_eq!(during.in_flight, 1);
        assert_eq!(during.completed, 0);
        assert!(during.not_analyzed.is_empty());
        assert_eq!(during.tier_counts.get("high priority"), Some(&1));

        // Nothing good to show yet for a first-time analysis.
        let fresh = table.register_name("Beta Expo").await;
        table.mark_analyzing(fresh).await.unwrap();
        let report = assemble_report(&table.snapshot().await);
        assert_eq!(report.ranked.len(), 1);
        assert_eq!(report.in_flight, 2);
    }

    #[test]
    fn disabled_criteria_render_as_off() {
        let mut disabled = result("Acme Summit", 40);
        disabled.disabled_criteria = vec![Criterion::Contact];
        let report = LeadReport {
            generated_at: Utc::now(),
            total_records: 1,
            completed: 1,
            in_flight: 0,
            tier_counts: BTreeMap::new(),
            ranked: vec![RankedLead {
                rank: 1,
                result: disabled,
            }],
            errored: vec![],
            not_analyzed: vec![],
        };

        let md = render_markdown(&report);
        assert!(md.contains("| 1 | Acme Summit | 40 | 0 | 0 | off | 40 |"));
    }

    #[tokio::test]
    async fn written_report_matches_manifest_hashes() {
        let dir = tempdir().expect("tempdir");
        let report = assemble_report(&sample_entries().await);
        let run_id = Uuid::new_v4();

        let written = write_report(dir.path(), run_id, &report).await.unwrap();
        assert_eq!(written.manifest.files.len(), 2);
        for file in &written.manifest.files {
            let bytes = std::fs::read(written.dir.join(&file.name)).unwrap();
            assert_eq!(sha256_hex(&bytes), file.sha256);
            assert_eq!(bytes.len() as u64, file.bytes);
        }
        let leftovers = std::fs::read_dir(&written.dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let history = report_history_markdown(dir.path(), 5).unwrap();
        assert!(history.contains(&format!("## Run `{run_id}`")));
        assert!(history.contains("top lead: Gamma Forum (70)"));
    }
}
