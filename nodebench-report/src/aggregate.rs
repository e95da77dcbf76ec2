use std::{collections::BTreeMap, fmt};

use nodebench_core::{BenchmarkRun, ConfigError, NodeUrl};
use nodebench_storage::{HistoricalStore, StorageBackend};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use crate::{markdown, permalink, ReportError};

/// Score change between the first and last appearance that still counts as
/// stable.
const STABLE_BAND: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Trailing days of history to include.
    pub days: u32,
    /// Restrict the report to these nodes.
    pub nodes: Option<Vec<NodeUrl>>,
    pub top_k: usize,
    /// Overrides the derived permalink.
    pub permlink: Option<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            days: 7,
            nodes: None,
            top_k: 5,
            permlink: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
    Failing,
}

impl Trend {
    fn between(first: f64, last: f64, last_working: bool) -> Self {
        if !last_working {
            Self::Failing
        } else if last - first > STABLE_BAND {
            Self::Improving
        } else if first - last > STABLE_BAND {
            Self::Degrading
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Improving => "improving",
            Self::Degrading => "degrading",
            Self::Stable => "stable",
            Self::Failing => "failing",
        })
    }
}

/// One node's standing over the report window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub url: NodeUrl,
    pub runs: u32,
    pub working_runs: u32,
    /// Mean score over every run the node appeared in.
    pub mean_score: f64,
    pub first_score: f64,
    pub last_score: f64,
    pub trend: Trend,
    pub version: Option<String>,
    /// Windowed rank, only for nodes that worked at least once.
    pub rank: Option<u32>,
}

impl NodeSummary {
    /// Share of runs in which the node was working, as a percentage.
    #[must_use]
    pub fn uptime(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        f64::from(self.working_runs) * 100.0 / f64::from(self.runs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopNode {
    pub url: NodeUrl,
    pub rank: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub days: u32,
}

/// Structured side of a report. The shape is the same for every domain; only
/// the probe names differ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    pub permlink: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub domain: String,
    pub window: ReportWindow,
    pub run_count: usize,
    pub node_count: usize,
    /// Failing nodes in the latest run of the window.
    pub failing_count: usize,
    pub probes: Vec<String>,
    pub top_nodes: Vec<TopNode>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub title: String,
    pub permlink: String,
    /// Markdown body.
    pub body: String,
    pub metadata: ReportMetadata,
    /// Every summarized node, ranked ones first.
    pub nodes: Vec<NodeSummary>,
}

/// Builds windowed reports for one domain.
#[derive(Clone, Debug)]
pub struct Aggregator {
    domain: String,
    settings: ReportSettings,
}

impl Aggregator {
    pub fn new(domain: impl Into<String>, settings: ReportSettings) -> Result<Self, ConfigError> {
        if settings.days == 0 {
            return Err(ConfigError::InvalidWindow(settings.days));
        }
        Ok(Self {
            domain: domain.into(),
            settings,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    /// Reads the trailing window ending at `now` and builds the report. An
    /// empty history still yields a report.
    #[instrument(level = "debug", skip(self, store), fields(domain = %self.domain))]
    pub async fn generate<B: StorageBackend>(
        &self,
        store: &HistoricalStore<B>,
        now: OffsetDateTime,
    ) -> Result<Report, ReportError> {
        let window = self.window(now);
        let runs = store.query_window(window.start, window.end).await?;
        debug!(runs = runs.len(), "history window loaded");
        self.build(&runs, window, now)
    }

    #[must_use]
    pub fn window(&self, now: OffsetDateTime) -> ReportWindow {
        ReportWindow {
            start: now - time::Duration::days(i64::from(self.settings.days)),
            end: now,
            days: self.settings.days,
        }
    }

    /// Builds the report from runs already read from history, oldest first.
    /// Runs of other domains are ignored.
    pub fn build(
        &self,
        runs: &[BenchmarkRun],
        window: ReportWindow,
        now: OffsetDateTime,
    ) -> Result<Report, ReportError> {
        let runs: Vec<&BenchmarkRun> = runs
            .iter()
            .filter(|run| run.domain == self.domain)
            .collect();
        let nodes = self.summarize(&runs);
        let latest = runs.last().copied();

        let title = permalink::title(&self.domain, now.date())?;
        let permlink = match &self.settings.permlink {
            Some(explicit) => explicit.clone(),
            None => permalink::permalink(&title, now.date())?,
        };
        let top_nodes = nodes
            .iter()
            .filter_map(|node| {
                node.rank.map(|rank| TopNode {
                    url: node.url.clone(),
                    rank,
                })
            })
            .take(self.settings.top_k)
            .collect();

        let metadata = ReportMetadata {
            title: title.clone(),
            permlink: permlink.clone(),
            generated_at: now,
            domain: self.domain.clone(),
            window,
            run_count: runs.len(),
            node_count: nodes.len(),
            failing_count: latest.map_or(0, BenchmarkRun::failing_count),
            probes: latest.map(|run| run.probes.clone()).unwrap_or_default(),
            top_nodes,
        };
        let body = markdown::render(&metadata, &nodes, latest)?;

        info!(
            domain = %self.domain,
            runs = metadata.run_count,
            nodes = metadata.node_count,
            top = metadata.top_nodes.len(),
            %permlink,
            "report generated"
        );
        Ok(Report {
            title,
            permlink,
            body,
            metadata,
            nodes,
        })
    }

    /// Per-node figures over `runs`, ranked by mean score with the URL
    /// breaking ties. Nodes that never worked come last, unranked.
    fn summarize(&self, runs: &[&BenchmarkRun]) -> Vec<NodeSummary> {
        let mut by_node: BTreeMap<&NodeUrl, NodeSummary> = BTreeMap::new();
        let mut totals: BTreeMap<&NodeUrl, f64> = BTreeMap::new();

        for run in runs {
            for record in &run.records {
                if let Some(filter) = &self.settings.nodes {
                    if !filter.contains(&record.node) {
                        continue;
                    }
                }
                let summary = by_node.entry(&record.node).or_insert_with(|| NodeSummary {
                    url: record.node.clone(),
                    runs: 0,
                    working_runs: 0,
                    mean_score: 0.0,
                    first_score: record.score,
                    last_score: record.score,
                    trend: Trend::Stable,
                    version: None,
                    rank: None,
                });
                summary.runs += 1;
                if record.is_working() {
                    summary.working_runs += 1;
                }
                summary.last_score = record.score;
                summary.trend =
                    Trend::between(summary.first_score, record.score, record.is_working());
                if record.version.is_some() {
                    summary.version.clone_from(&record.version);
                }
                *totals.entry(&record.node).or_default() += record.score;
            }
        }

        let mut nodes: Vec<NodeSummary> = by_node
            .into_iter()
            .map(|(url, mut summary)| {
                let total = totals.get(url).copied().unwrap_or_default();
                summary.mean_score = total / f64::from(summary.runs.max(1));
                summary
            })
            .collect();
        nodes.sort_by(|a, b| {
            (b.working_runs > 0)
                .cmp(&(a.working_runs > 0))
                .then_with(|| b.mean_score.total_cmp(&a.mean_score))
                .then_with(|| a.url.cmp(&b.url))
        });
        let mut next = 1;
        for node in nodes.iter_mut().filter(|node| node.working_runs > 0) {
            node.rank = Some(next);
            next += 1;
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nodebench_core::{
        scoring, Connection, ErrorCategory, NodeResult, ProbeFailure, ProbeResult, ProbeSample,
        RunConfig, RunId, ScoringPolicy,
    };
    use nodebench_storage::MemoryBackend;
    use time::macros::datetime;

    use super::*;

    /// `latencies` maps a node to its block probe latency in ms, `None` when
    /// the node is down for that run.
    fn run_at(started_at: OffsetDateTime, latencies: &[(&str, Option<u64>)]) -> BenchmarkRun {
        let policy = ScoringPolicy::default();
        let mut records: Vec<_> = latencies
            .iter()
            .map(|(raw, latency)| {
                let node = NodeUrl::parse(raw).unwrap();
                let result = match latency {
                    Some(ms) => NodeResult {
                        node,
                        connection: Connection::established(Duration::from_millis(5), 1),
                        probes: vec![ProbeResult::passed(
                            "block",
                            ProbeSample::timed(Duration::from_millis(*ms))
                                .with_fact("version", "1.27.5"),
                        )],
                    },
                    None => NodeResult::unreachable(
                        node,
                        ProbeFailure::new(ErrorCategory::Connection, "connection refused"),
                        3,
                    ),
                };
                policy.assess(result)
            })
            .collect();
        scoring::rank(&mut records);
        scoring::rank_probes(&mut records);
        BenchmarkRun {
            run_id: RunId::from_time(started_at),
            domain: "hive".to_owned(),
            started_at,
            finished_at: started_at + time::Duration::minutes(3),
            config: RunConfig::default(),
            probes: vec!["block".to_owned()],
            records,
        }
    }

    fn aggregator(settings: ReportSettings) -> Aggregator {
        Aggregator::new("hive", settings).unwrap()
    }

    const NOW: OffsetDateTime = datetime!(2024-05-01 09:00 UTC);

    fn history() -> Vec<BenchmarkRun> {
        vec![
            run_at(
                datetime!(2024-04-28 09:00 UTC),
                &[
                    ("https://a.example", Some(50)),
                    ("https://b.example", Some(400)),
                    ("https://c.example", None),
                ],
            ),
            run_at(
                datetime!(2024-04-30 09:00 UTC),
                &[
                    ("https://a.example", Some(55)),
                    ("https://b.example", Some(100)),
                    ("https://c.example", None),
                ],
            ),
        ]
    }

    #[test]
    fn zero_days_is_rejected() {
        let settings = ReportSettings {
            days: 0,
            ..ReportSettings::default()
        };
        assert!(matches!(
            Aggregator::new("hive", settings),
            Err(ConfigError::InvalidWindow(0))
        ));
    }

    #[test]
    fn ranks_by_windowed_mean_score() {
        let agg = aggregator(ReportSettings::default());
        let report = agg.build(&history(), agg.window(NOW), NOW).unwrap();

        let top: Vec<_> = report
            .metadata
            .top_nodes
            .iter()
            .map(|top| (top.url.as_str().to_owned(), top.rank))
            .collect();
        assert_eq!(
            top,
            vec![
                ("https://a.example/".to_owned(), 1),
                ("https://b.example/".to_owned(), 2),
            ]
        );

        let c = &report.nodes[2];
        assert_eq!(c.url.as_str(), "https://c.example/");
        assert_eq!((c.runs, c.working_runs, c.rank), (2, 0, None));
        assert_eq!(c.trend, Trend::Failing);
        assert!(c.uptime().abs() < f64::EPSILON);

        let b = &report.nodes[1];
        assert_eq!(b.trend, Trend::Improving);
        assert!((b.uptime() - 100.0).abs() < f64::EPSILON);
        assert_eq!(b.version.as_deref(), Some("1.27.5"));
        assert_eq!(report.nodes[0].trend, Trend::Stable);
        assert_eq!(report.metadata.failing_count, 1);
        assert_eq!(report.metadata.run_count, 2);
    }

    #[test]
    fn top_k_and_node_filter_apply() {
        let agg = aggregator(ReportSettings {
            top_k: 1,
            nodes: Some(vec![
                NodeUrl::parse("https://b.example").unwrap(),
                NodeUrl::parse("https://c.example").unwrap(),
            ]),
            ..ReportSettings::default()
        });
        let report = agg.build(&history(), agg.window(NOW), NOW).unwrap();
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.metadata.top_nodes.len(), 1);
        assert_eq!(report.metadata.top_nodes[0].url.as_str(), "https://b.example/");
        assert_eq!(report.metadata.top_nodes[0].rank, 1);
    }

    #[test]
    fn equal_scores_break_ties_by_url() {
        let runs = vec![run_at(
            datetime!(2024-04-30 09:00 UTC),
            &[("https://z.example", Some(80)), ("https://m.example", Some(80))],
        )];
        let agg = aggregator(ReportSettings::default());
        let report = agg.build(&runs, agg.window(NOW), NOW).unwrap();
        assert_eq!(report.metadata.top_nodes[0].url.as_str(), "https://m.example/");
        assert_eq!(report.metadata.top_nodes[1].url.as_str(), "https://z.example/");
    }

    #[test]
    fn title_and_permalink_follow_generation_date() {
        let agg = aggregator(ReportSettings::default());
        let report = agg.build(&history(), agg.window(NOW), NOW).unwrap();
        assert_eq!(report.title, "Hive Benchmark Report - 2024/05/01");
        assert_eq!(report.permlink, "20240501-hive-benchmark-report-20240501");

        let explicit = aggregator(ReportSettings {
            permlink: Some("weekly-nodes".to_owned()),
            ..ReportSettings::default()
        });
        let report = explicit.build(&history(), explicit.window(NOW), NOW).unwrap();
        assert_eq!(report.permlink, "weekly-nodes");
        assert_eq!(report.metadata.permlink, "weekly-nodes");
    }

    #[test]
    fn metadata_shape_is_domain_independent() {
        let hive = aggregator(ReportSettings::default());
        let engine = Aggregator::new("engine", ReportSettings::default()).unwrap();
        let keys = |agg: &Aggregator| {
            let report = agg.build(&history(), agg.window(NOW), NOW).unwrap();
            let json = serde_json::to_value(&report.metadata).unwrap();
            let mut keys: Vec<String> = json.as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&hive), keys(&engine));
    }

    #[tokio::test]
    async fn empty_history_still_reports() {
        let store = HistoricalStore::new(MemoryBackend::new());
        let agg = aggregator(ReportSettings::default());
        let report = agg.generate(&store, NOW).await.unwrap();

        assert!(report.metadata.top_nodes.is_empty());
        assert_eq!(report.metadata.run_count, 0);
        assert_eq!(report.metadata.window.start, datetime!(2024-04-24 09:00 UTC));
        assert!(report.body.starts_with("# Hive Benchmark Report - 2024/05/01"));
    }

    #[tokio::test]
    async fn same_window_gives_same_top_nodes() {
        let store = HistoricalStore::new(MemoryBackend::new());
        for run in history() {
            store.record_run(&run).await.unwrap();
        }
        // A run outside the window must not count.
        store
            .record_run(&run_at(
                datetime!(2024-04-01 09:00 UTC),
                &[("https://c.example", Some(1))],
            ))
            .await
            .unwrap();

        let agg = aggregator(ReportSettings::default());
        let first = agg.generate(&store, NOW).await.unwrap();
        let second = agg.generate(&store, NOW).await.unwrap();
        assert_eq!(first.metadata.top_nodes, second.metadata.top_nodes);
        assert_eq!(first.metadata.run_count, 2);
        assert_eq!(first.metadata.top_nodes.len(), 2);
    }
}
