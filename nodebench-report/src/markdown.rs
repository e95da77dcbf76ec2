//! Markdown body of a report.

use std::fmt::{self, Write as _};

use nodebench_core::{BenchmarkRun, NodeRecord, ProbeOutcome};
use time::macros::format_description;

use crate::{NodeSummary, ReportMetadata};

fn day(at: time::OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| at.to_string())
}

/// Table cells must not break the row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render(
    metadata: &ReportMetadata,
    nodes: &[NodeSummary],
    latest: Option<&BenchmarkRun>,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# {}", metadata.title)?;
    writeln!(out)?;
    writeln!(
        out,
        "Window: {} to {} ({} days), {} runs.",
        day(metadata.window.start),
        day(metadata.window.end),
        metadata.window.days,
        metadata.run_count
    )?;
    writeln!(out)?;

    let Some(latest) = latest else {
        writeln!(out, "No benchmark runs were recorded in this window.")?;
        return Ok(out);
    };

    failing_nodes(&mut out, latest)?;
    ranking(&mut out, nodes)?;
    uptime(&mut out, nodes)?;
    for probe in &latest.probes {
        probe_timings(&mut out, latest, probe)?;
    }
    Ok(out)
}

fn failing_nodes(out: &mut String, run: &BenchmarkRun) -> fmt::Result {
    writeln!(out, "## Failing nodes")?;
    writeln!(out)?;
    let failing: Vec<&NodeRecord> = run.failing().collect();
    if failing.is_empty() {
        writeln!(out, "Every node passed the last run.")?;
        return writeln!(out);
    }
    writeln!(out, "| node | category | error |")?;
    writeln!(out, "| --- | --- | --- |")?;
    for record in failing {
        let (category, error) = record
            .error
            .as_ref()
            .map_or(("unexpected", ""), |failure| {
                (failure.category.label(), failure.error.as_str())
            });
        writeln!(out, "| <{}> | {category} | {} |", record.node, cell(error))?;
    }
    writeln!(out)
}

fn ranking(out: &mut String, nodes: &[NodeSummary]) -> fmt::Result {
    writeln!(out, "## Overall ranking")?;
    writeln!(out)?;
    writeln!(out, "| rank | node | mean score | working runs | version |")?;
    writeln!(out, "| --- | --- | --- | --- | --- |")?;
    for node in nodes {
        let Some(rank) = node.rank else { continue };
        writeln!(
            out,
            "| {rank} | <{}> | {:.2} | {}/{} | {} |",
            node.url,
            node.mean_score,
            node.working_runs,
            node.runs,
            node.version.as_deref().map_or_else(|| "-".to_owned(), cell)
        )?;
    }
    writeln!(out)
}

fn uptime(out: &mut String, nodes: &[NodeSummary]) -> fmt::Result {
    writeln!(out, "## Uptime and trend")?;
    writeln!(out)?;
    writeln!(out, "| node | uptime | runs | trend | first score | last score |")?;
    writeln!(out, "| --- | --- | --- | --- | --- | --- |")?;
    for node in nodes {
        writeln!(
            out,
            "| <{}> | {:.1}% | {} | {} | {:.2} | {:.2} |",
            node.url,
            node.uptime(),
            node.runs,
            node.trend,
            node.first_score,
            node.last_score
        )?;
    }
    writeln!(out)
}

fn probe_timings(out: &mut String, run: &BenchmarkRun, probe: &str) -> fmt::Result {
    writeln!(out, "## Probe `{probe}`")?;
    writeln!(out)?;
    writeln!(out, "| rank | node | time | items |")?;
    writeln!(out, "| --- | --- | --- | --- |")?;

    let mut rows: Vec<(&NodeRecord, Option<u32>)> = run
        .records
        .iter()
        .filter(|record| record.is_working())
        .filter_map(|record| record.probe(probe).map(|result| (record, result.rank)))
        .collect();
    rows.sort_by(|(a, a_rank), (b, b_rank)| {
        a_rank
            .unwrap_or(u32::MAX)
            .cmp(&b_rank.unwrap_or(u32::MAX))
            .then_with(|| a.node.cmp(&b.node))
    });

    for (record, rank) in rows {
        let Some(result) = record.probe(probe) else {
            continue;
        };
        let rank = rank.map_or_else(|| "-".to_owned(), |rank| rank.to_string());
        match &result.outcome {
            ProbeOutcome::Passed(sample) => {
                let items = sample.items.map_or_else(|| "-".to_owned(), |n| n.to_string());
                writeln!(
                    out,
                    "| {rank} | <{}> | {:.3} s | {items} |",
                    record.node,
                    sample.latency().as_secs_f64()
                )?;
            }
            ProbeOutcome::Failed(failure) => {
                writeln!(out, "| {rank} | <{}> | {} | - |", record.node, failure.category)?;
            }
        }
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nodebench_core::{
        scoring, Connection, ErrorCategory, NodeResult, NodeUrl, ProbeFailure, ProbeResult,
        ProbeSample, RunConfig, RunId, ScoringPolicy,
    };
    use time::macros::datetime;

    use super::*;
    use crate::{ReportWindow, TopNode};

    fn metadata(run_count: usize) -> ReportMetadata {
        ReportMetadata {
            title: "Hive Benchmark Report - 2024/05/01".to_owned(),
            permlink: "20240501-hive-benchmark-report-20240501".to_owned(),
            generated_at: datetime!(2024-05-01 09:00 UTC),
            domain: "hive".to_owned(),
            window: ReportWindow {
                start: datetime!(2024-04-24 09:00 UTC),
                end: datetime!(2024-05-01 09:00 UTC),
                days: 7,
            },
            run_count,
            node_count: 0,
            failing_count: 0,
            probes: vec!["block".to_owned()],
            top_nodes: Vec::<TopNode>::new(),
        }
    }

    #[test]
    fn empty_window_renders_a_note() {
        let body = render(&metadata(0), &[], None).unwrap();
        assert!(body.starts_with("# Hive Benchmark Report - 2024/05/01\n"));
        assert!(body.contains("2024-04-24 09:00 to 2024-05-01 09:00 (7 days), 0 runs."));
        assert!(body.contains("No benchmark runs were recorded"));
        assert!(!body.contains("## Overall ranking"));
    }

    #[test]
    fn latest_run_sections() {
        let policy = ScoringPolicy::default();
        let up = policy.assess(NodeResult {
            node: NodeUrl::parse("https://up.example").unwrap(),
            connection: Connection::established(Duration::from_millis(3), 1),
            probes: vec![ProbeResult::passed(
                "block",
                ProbeSample::timed(Duration::from_millis(250)),
            )],
        });
        let down = policy.assess(NodeResult::unreachable(
            NodeUrl::parse("https://down.example").unwrap(),
            ProbeFailure::new(ErrorCategory::Timeout, "no answer | at all"),
            3,
        ));
        let mut records = vec![up, down];
        scoring::rank(&mut records);
        scoring::rank_probes(&mut records);
        let started_at = datetime!(2024-04-30 09:00 UTC);
        let run = BenchmarkRun {
            run_id: RunId::from_time(started_at),
            domain: "hive".to_owned(),
            started_at,
            finished_at: started_at,
            config: RunConfig::default(),
            probes: vec!["block".to_owned()],
            records,
        };

        let body = render(&metadata(1), &[], Some(&run)).unwrap();
        assert!(body.contains("| <https://down.example/> | timeout | no answer \\| at all |"));
        assert!(body.contains("## Probe `block`"));
        assert!(body.contains("| 1 | <https://up.example/> | 0.250 s | - |"));
    }
}
