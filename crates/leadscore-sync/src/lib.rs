//! Analysis runs: bounded-concurrency scoring over imported event records.

pub mod progress;
pub mod rate_limit;
pub mod report;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadscore_core::{ContactRecord, CriteriaToggles, Criterion, EventRecord, ScoreResult};
use leadscore_scoring::{ScoreError, ScoringEngine};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use progress::{
    AnalysisStatus, ErrorKind, Outcome, ProgressEntry, ProgressError, ProgressTable, RecordId,
    Settled,
};
pub use rate_limit::{detect_rate_limit, RateLimitGate};
pub use report::{
    assemble_report, render_markdown, report_history_markdown, write_report, LeadReport,
    WrittenReport,
};

pub const CRATE_NAME: &str = "leadscore-sync";

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Workers per batch.
    pub max_concurrency: usize,
    /// Records past this cap are registered but never dispatched.
    pub max_records: usize,
    pub batch_delay: Duration,
    pub worker_timeout: Option<Duration>,
    pub toggles: CriteriaToggles,
    pub workspace_root: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_records: 200,
            batch_delay: Duration::from_millis(300),
            worker_timeout: None,
            toggles: CriteriaToggles::default(),
            workspace_root: PathBuf::from("."),
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut toggles = defaults.toggles;
        if let Ok(list) = std::env::var("LEADSCORE_DISABLED_CRITERIA") {
            let (criteria, unknown) = parse_criteria_list(&list);
            for name in unknown {
                warn!(criterion = %name, "ignoring unknown criterion in LEADSCORE_DISABLED_CRITERIA");
            }
            for criterion in criteria {
                toggles = toggles.disable(criterion);
            }
        }
        toggles.icca_qualification = std::env::var("LEADSCORE_ICCA_ADVISORY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);

        Self {
            max_concurrency: std::env::var("LEADSCORE_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_concurrency),
            max_records: std::env::var("LEADSCORE_MAX_RECORDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_records),
            batch_delay: std::env::var("LEADSCORE_BATCH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_delay),
            worker_timeout: std::env::var("LEADSCORE_WORKER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            toggles,
            workspace_root: std::env::var("LEADSCORE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
        }
    }
}

/// Split a comma-separated criteria list into known criteria and unrecognized names.
pub fn parse_criteria_list(list: &str) -> (Vec<Criterion>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for part in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match Criterion::parse(part) {
            Some(c) if !known.contains(&c) => known.push(c),
            Some(_) => {}
            None => unknown.push(part.to_string()),
        }
    }
    (known, unknown)
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("bad record data: {0}")]
    Data(String),
    #[error("rate limited upstream, retry after {}s: {message}", .retry_after.as_secs())]
    RateLimit {
        retry_after: Duration,
        message: String,
    },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("analysis timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl AnalysisError {
    /// Sort an analyzer failure into the error taxonomy.
    pub fn classify(err: anyhow::Error) -> Self {
        let err = match err.downcast::<AnalysisError>() {
            Ok(already) => return already,
            Err(err) => err,
        };
        if let Some(score_err) = err.downcast_ref::<ScoreError>() {
            return AnalysisError::Data(score_err.to_string());
        }
        let message = format!("{err:#}");
        match detect_rate_limit(&message) {
            Some(retry_after) => AnalysisError::RateLimit {
                retry_after,
                message,
            },
            None => AnalysisError::Transient(message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Data(_) => ErrorKind::Data,
            AnalysisError::RateLimit { .. } => ErrorKind::RateLimit,
            AnalysisError::Transient(_) | AnalysisError::Timeout(_) | AnalysisError::Panicked(_) => {
                ErrorKind::Transient
            }
        }
    }
}

/// Produces a score for one record. Implementations may call out to slow or flaky services.
#[async_trait]
pub trait RecordAnalyzer: Send + Sync {
    async fn analyze(&self, record: &EventRecord, contacts: &[ContactRecord]) -> Result<ScoreResult>;
}

/// Local rule-based analyzer: resolve related contacts, then score.
#[derive(Debug, Clone)]
pub struct ScoringAnalyzer {
    engine: ScoringEngine,
    toggles: CriteriaToggles,
}

impl ScoringAnalyzer {
    pub fn new(engine: ScoringEngine, toggles: CriteriaToggles) -> Self {
        Self { engine, toggles }
    }
}

#[async_trait]
impl RecordAnalyzer for ScoringAnalyzer {
    async fn analyze(&self, record: &EventRecord, contacts: &[ContactRecord]) -> Result<ScoreResult> {
        Ok(self
            .engine
            .score_with_contacts(record, contacts, &self.toggles)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_records: usize,
    pub dispatched: usize,
    pub batches: usize,
    pub completed: usize,
    pub errored: usize,
    pub suppressed_regressions: usize,
    pub rate_limit_pauses: usize,
    pub not_analyzed: usize,
    pub report: LeadReport,
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    errored: usize,
    suppressed: usize,
}

impl Tally {
    fn record(&mut self, settled: Settled) {
        match settled {
            Settled::Completed { .. } => self.completed += 1,
            Settled::Errored => self.errored += 1,
            Settled::RegressionSuppressed { .. } => self.suppressed += 1,
        }
    }
}

/// Everything one spawned worker needs; cloned per record.
#[derive(Clone)]
struct Worker {
    analyzer: Arc<dyn RecordAnalyzer>,
    progress: Arc<ProgressTable>,
    rate_limit: Arc<RateLimitGate>,
    contacts: Arc<Vec<ContactRecord>>,
    timeout: Option<Duration>,
}

impl Worker {
    async fn run(self, id: RecordId, record: EventRecord) -> Result<Settled, ProgressError> {
        self.progress.mark_analyzing(id).await?;
        let span = info_span!("score_record", record = %record.name, %id);

        let outcome = match self.analyze(&record).instrument(span.clone()).await {
            Ok(result) => {
                debug!(parent: &span, total = result.total_score, "record scored");
                Outcome::Scored(result)
            }
            Err(err) => {
                if let AnalysisError::RateLimit { retry_after, .. } = &err {
                    self.rate_limit.trip(*retry_after).await;
                }
                warn!(parent: &span, error = %err, "record analysis failed");
                Outcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };
        self.progress.settle(id, outcome).await
    }

    async fn analyze(&self, record: &EventRecord) -> Result<ScoreResult, AnalysisError> {
        let call = self.analyzer.analyze(record, &self.contacts);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(AnalysisError::classify),
                Err(_) => Err(AnalysisError::Timeout(limit)),
            },
            None => call.await.map_err(AnalysisError::classify),
        }
    }
}

/// Bounded pool of scoring workers sharing one progress table.
///
/// Records are dispatched in fixed-size batches; every worker of a batch is awaited before
/// the next batch starts. A report snapshot is published after each batch.
pub struct AgentPool {
    config: AnalysisConfig,
    analyzer: Arc<dyn RecordAnalyzer>,
    progress: Arc<ProgressTable>,
    rate_limit: Arc<RateLimitGate>,
    snapshots: watch::Sender<Option<LeadReport>>,
}

impl AgentPool {
    pub fn new(config: AnalysisConfig, analyzer: Arc<dyn RecordAnalyzer>) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            config,
            analyzer,
            progress: Arc::new(ProgressTable::new()),
            rate_limit: Arc::new(RateLimitGate::new()),
            snapshots,
        }
    }

    /// Pool backed by the local scoring engine with the configured toggles.
    pub fn scoring(config: AnalysisConfig, engine: ScoringEngine) -> Self {
        let analyzer = Arc::new(ScoringAnalyzer::new(engine, config.toggles));
        Self::new(config, analyzer)
    }

    pub fn with_progress(mut self, progress: Arc<ProgressTable>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<ProgressTable> {
        self.progress.clone()
    }

    pub fn rate_limit(&self) -> Arc<RateLimitGate> {
        self.rate_limit.clone()
    }

    /// Latest report snapshot; `None` until the first batch settles.
    pub fn subscribe(&self) -> watch::Receiver<Option<LeadReport>> {
        self.snapshots.subscribe()
    }

    fn worker(&self, contacts: Arc<Vec<ContactRecord>>) -> Worker {
        Worker {
            analyzer: self.analyzer.clone(),
            progress: self.progress.clone(),
            rate_limit: self.rate_limit.clone(),
            contacts,
            timeout: self.config.worker_timeout,
        }
    }

    async fn publish(&self) -> LeadReport {
        let report = assemble_report(&self.progress.snapshot().await);
        self.snapshots.send_replace(Some(report.clone()));
        report
    }

    pub async fn run(&self, records: Vec<EventRecord>, contacts: Vec<ContactRecord>) -> AnalysisRunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis_run", %run_id, records = records.len());
        self.run_inner(run_id, records, contacts).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        records: Vec<EventRecord>,
        contacts: Vec<ContactRecord>,
    ) -> AnalysisRunSummary {
        let started_at = Utc::now();
        let total_records = records.len();
        let ids = self.progress.register(&records).await;

        let cap = self.config.max_records.min(total_records);
        if total_records > cap {
            info!(
                cap,
                left_pending = total_records - cap,
                "record cap reached; remaining records stay pending"
            );
        }

        let mut seen = HashSet::new();
        let mut queue = Vec::with_capacity(cap);
        for (id, record) in ids.into_iter().zip(records).take(cap) {
            if seen.insert(id) {
                queue.push((id, record));
            } else {
                debug!(record = %record.name, %id, "duplicate record name; first occurrence already queued");
            }
        }

        let contacts = Arc::new(contacts);
        let batch_size = self.config.max_concurrency.max(1);
        let mut tally = Tally::default();
        let mut rate_limit_pauses = 0;
        let mut batches = 0;

        for (batch_index, batch) in queue.chunks(batch_size).enumerate() {
            if batch_index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            if !self.rate_limit.wait_until_clear().await.is_zero() {
                rate_limit_pauses += 1;
            }

            let handles = batch
                .iter()
                .map(|(id, record)| {
                    let worker = self.worker(contacts.clone());
                    let handle = tokio::spawn(worker.run(*id, record.clone()));
                    (*id, record.name.clone(), handle)
                })
                .collect::<Vec<_>>();

            for (id, name, handle) in handles {
                let settled = match handle.await {
                    Ok(settled) => settled,
                    Err(join_err) => {
                        let err = AnalysisError::Panicked(join_err.to_string());
                        error!(record = %name, %id, error = %err, "worker did not finish");
                        self.progress
                            .settle(
                                id,
                                Outcome::Failed {
                                    kind: err.kind(),
                                    message: err.to_string(),
                                },
                            )
                            .await
                    }
                };
                match settled {
                    Ok(settled) => tally.record(settled),
                    Err(err) => {
                        error!(record = %name, %id, error = %err, "could not settle record");
                        tally.errored += 1;
                    }
                }
            }

            batches += 1;
            let snapshot = self.publish().await;
            info!(
                batch = batch_index + 1,
                size = batch.len(),
                completed = snapshot.completed,
                errored = snapshot.errored.len(),
                "batch settled"
            );
        }

        let report = self.publish().await;
        let summary = AnalysisRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_records,
            dispatched: queue.len(),
            batches,
            completed: tally.completed,
            errored: tally.errored,
            suppressed_regressions: tally.suppressed,
            rate_limit_pauses,
            not_analyzed: report.not_analyzed.len(),
            report,
        };
        info!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            errored = summary.errored,
            suppressed = summary.suppressed_regressions,
            not_analyzed = summary.not_analyzed,
            "analysis run finished"
        );
        summary
    }

    /// Run then export the final report under the configured workspace root.
    pub async fn run_and_export(
        &self,
        records: Vec<EventRecord>,
        contacts: Vec<ContactRecord>,
    ) -> Result<(AnalysisRunSummary, WrittenReport)> {
        let summary = self.run(records, contacts).await;
        let written = write_report(&self.config.workspace_root, summary.run_id, &summary.report).await?;
        Ok((summary, written))
    }

    /// Score a single record again, outside any batch. Goes through the same guard.
    pub async fn rescore(
        &self,
        record: EventRecord,
        contacts: &[ContactRecord],
    ) -> Result<Settled, ProgressError> {
        let id = match self.progress.lookup(&record.name).await {
            Some(id) => id,
            None => self.progress.register_name(&record.name).await,
        };
        self.rate_limit.wait_until_clear().await;
        let worker = self.worker(Arc::new(contacts.to_vec()));
        let settled = tokio::spawn(worker.run(id, record)).await;
        let settled = match settled {
            Ok(settled) => settled,
            Err(join_err) => {
                let err = AnalysisError::Panicked(join_err.to_string());
                self.progress
                    .settle(
                        id,
                        Outcome::Failed {
                            kind: err.kind(),
                            message: err.to_string(),
                        },
                    )
                    .await
            }
        };
        self.publish().await;
        settled
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use leadscore_core::{EditionRecord, PriorityTier};

    use super::*;

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
            problems: vec![],
            next_step_strategy: PriorityTier::from_total(total),
            data_issues: vec![],
            data_quality_score: 0,
        }
    }

    enum Behavior {
        Score(u8),
        Fail(&'static str),
        Panic,
        Hang,
    }

    struct StubAnalyzer {
        behavior: HashMap<String, Behavior>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl StubAnalyzer {
        fn new(behavior: Vec<(&str, Behavior)>) -> Self {
            Self {
                behavior: behavior
                    .into_iter()
                    .map(|(name, b)| (name.to_string(), b))
                    .collect(),
                delay: Duration::from_millis(20),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordAnalyzer for StubAnalyzer {
        async fn analyze(&self, record: &EventRecord, _contacts: &[ContactRecord]) -> Result<ScoreResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.behavior.get(&record.name) {
                Some(Behavior::Score(total)) => Ok(result(&record.name, *total)),
                Some(Behavior::Fail(message)) => Err(anyhow!(*message)),
                Some(Behavior::Panic) => panic!("analyzer blew up on {}", record.name),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(result(&record.name, 1))
                }
                None => Ok(result(&record.name, 40)),
            }
        }
    }

    fn config(concurrency: usize, max_records: usize) -> AnalysisConfig {
        AnalysisConfig {
            max_concurrency: concurrency,
            max_records,
            ..AnalysisConfig::default()
        }
    }

    fn events(names: &[&str]) -> Vec<EventRecord> {
        names.iter().map(|n| EventRecord::new(*n)).collect()
    }

    #[test]
    fn criteria_lists_parse_with_unknowns_reported() {
        let (known, unknown) = parse_criteria_list("history, Contact,,bogus,history");
        assert_eq!(known, vec![Criterion::History, Criterion::Contact]);
        assert_eq!(unknown, vec!["bogus".to_string()]);
    }

    #[test]
    fn errors_are_classified() {
        let data = AnalysisError::classify(anyhow::Error::new(ScoreError::MissingName));
        assert_eq!(data.kind(), ErrorKind::Data);

        let limited = AnalysisError::classify(anyhow!("HTTP 429: retry after 9"));
        assert!(matches!(
            limited,
            AnalysisError::RateLimit { retry_after, .. } if retry_after == Duration::from_secs(9)
        ));

        let flaky = AnalysisError::classify(anyhow!("connection reset"));
        assert_eq!(flaky.kind(), ErrorKind::Transient);

        let passthrough = AnalysisError::classify(AnalysisError::Data("bad row".into()).into());
        assert!(matches!(passthrough, AnalysisError::Data(m) if m == "bad row"));
    }

    #[tokio::test(start_paused = true)]
    async fn cap_leaves_excess_records_pending() {
        let names = (1..=250).map(|i| format!("Event {i:03}")).collect::<Vec<_>>();
        let records = names.iter().map(EventRecord::new).collect::<Vec<_>>();
        let analyzer = Arc::new(StubAnalyzer::new(vec![]));
        let pool = AgentPool::new(config(10, 200), analyzer.clone());

        let summary = pool.run(records, vec![]).await;

        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 200);
        assert!(analyzer.peak.load(Ordering::SeqCst) <= 10);
        assert_eq!(summary.dispatched, 200);
        assert_eq!(summary.batches, 20);
        assert_eq!(summary.completed, 200);
        assert_eq!(summary.not_analyzed, 50);
        assert_eq!(summary.report.not_analyzed, names[200..].to_vec());

        let entry = pool.progress().get_by_name("Event 201").await.unwrap();
        assert_eq!(entry.status, AnalysisStatus::Pending);
        assert_eq!(entry.result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_stay_inside_their_record() {
        let analyzer = Arc::new(StubAnalyzer::new(vec![
            ("Beta Expo", Behavior::Fail("upstream returned garbage")),
            ("Gamma Forum", Behavior::Panic),
            ("Delta Week", Behavior::Score(55)),
        ]));
        let pool = AgentPool::new(config(5, 200), analyzer);

        let summary = pool
            .run(
                events(&["Acme Summit", "Beta Expo", "Gamma Forum", "Delta Week", "Zeta Meeting"]),
                vec![],
            )
            .await;

        assert_eq!(summary.completed, 3);
        assert_eq!(summary.errored, 2);
        let progress = pool.progress();
        let gamma = progress.get_by_name("Gamma Forum").await.unwrap();
        assert_eq!(gamma.status, AnalysisStatus::Error);
        assert!(gamma.error.unwrap_or_default().contains("panicked"));
        let beta = progress.get_by_name("Beta Expo").await.unwrap();
        assert_eq!(beta.error_kind, Some(ErrorKind::Transient));
        assert_eq!(summary.report.ranked[0].result.event_name, "Delta Week");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rescore_keeps_the_earlier_good_score() {
        let analyzer = Arc::new(StubAnalyzer::new(vec![(
            "Acme Summit",
            Behavior::Fail("model overloaded"),
        )]));
        let pool = AgentPool::new(config(10, 200), analyzer);
        pool.progress()
            .restore_completed("Acme Summit", result("Acme Summit", 62))
            .await;

        let summary = pool.run(events(&["Acme Summit"]), vec![]).await;

        assert_eq!(summary.suppressed_regressions, 1);
        let entry = pool.progress().get_by_name("Acme Summit").await.unwrap();
        assert_eq!(entry.status, AnalysisStatus::Completed);
        assert_eq!(entry.good_total(), Some(62));
        assert_eq!(summary.report.ranked[0].result.total_score, 62);

        let again = pool.rescore(EventRecord::new("Acme Summit"), &[]).await.unwrap();
        assert_eq!(again, Settled::RegressionSuppressed { kept_total: 62 });
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_pauses_the_next_batch() {
        let analyzer = Arc::new(StubAnalyzer::new(vec![(
            "Acme Summit",
            Behavior::Fail("429 Too Many Requests, retry after 7"),
        )]));
        let pool = AgentPool::new(
            AnalysisConfig {
                batch_delay: Duration::ZERO,
                ..config(1, 200)
            },
            analyzer,
        );

        let started = tokio::time::Instant::now();
        let summary = pool.run(events(&["Acme Summit", "Beta Expo"]), vec![]).await;

        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(summary.rate_limit_pauses, 1);
        assert!(!pool.rate_limit().is_paused().await);
        let acme = pool.progress().get_by_name("Acme Summit").await.unwrap();
        assert_eq!(acme.error_kind, Some(ErrorKind::RateLimit));
        let beta = pool.progress().get_by_name("Beta Expo").await.unwrap();
        assert_eq!(beta.status, AnalysisStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_workers_time_out() {
        let analyzer = Arc::new(StubAnalyzer::new(vec![("Stuck Congress", Behavior::Hang)]));
        let pool = AgentPool::new(
            AnalysisConfig {
                worker_timeout: Some(Duration::from_secs(2)),
                ..config(4, 200)
            },
            analyzer,
        );

        let summary = pool.run(events(&["Stuck Congress", "Quick Expo"]), vec![]).await;

        assert_eq!(summary.errored, 1);
        let stuck = pool.progress().get_by_name("Stuck Congress").await.unwrap();
        assert_eq!(stuck.status, AnalysisStatus::Error);
        assert!(stuck.error.unwrap_or_default().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_follow_each_batch() {
        let analyzer = Arc::new(StubAnalyzer::new(vec![]));
        let pool = AgentPool::new(config(2, 200), analyzer);
        let mut snapshots = pool.subscribe();
        assert!(snapshots.borrow().is_none());

        pool.run(events(&["A Meeting", "B Meeting", "C Meeting"]), vec![])
            .await;

        assert!(snapshots.has_changed().unwrap());
        let latest = snapshots.borrow_and_update().clone().expect("snapshot published");
        assert_eq!(latest.completed, 3);
        assert!(latest.not_analyzed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scoring_pool_ranks_vietnam_history_first() {
        let vietnam = EventRecord::new("Asia Pacific Dental Congress")
            .with_organization("APDF")
            .with_field("OrgID", "1042")
            .with_edition(EditionRecord {
                year: Some("2023".into()),
                city: Some("Da Nang".into()),
                country: Some("Vietnam".into()),
                attendance: Some(450.0),
                ..EditionRecord::default()
            });
        let elsewhere = EventRecord::new("Nordic Forestry Meeting").with_edition(EditionRecord {
            year: Some("2022".into()),
            city: Some("Oslo".into()),
            country: Some("Norway".into()),
            attendance: Some(60.0),
            ..EditionRecord::default()
        });
        let contacts = vec![ContactRecord::new()
            .with_field("OrgID", "1042")
            .with_field("FullName", "Tran Minh")
            .with_field("Email", "minh@apdf.org")
            .with_field("Phone", "+84 28 3822 1234")];

        let pool = AgentPool::scoring(config(4, 200), ScoringEngine::default());
        let summary = pool.run(vec![elsewhere, vietnam], contacts).await;

        let ranked = &summary.report.ranked;
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].result.event_name, "Asia Pacific Dental Congress");
        assert_eq!(ranked[0].result.next_step_strategy, PriorityTier::High);
        assert!(ranked[0].result.total_score > ranked[1].result.total_score);
    }
}
