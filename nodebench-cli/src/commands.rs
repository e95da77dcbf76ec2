use std::{fmt::Write as _, path::Path, sync::Arc};

use color_eyre::eyre::{Result, WrapErr as _};
use nodebench_core::{BenchmarkRun, ConfigError};
use nodebench_engine::{JsonRpcConnector, Orchestrator};
use nodebench_report::{
    Aggregator, DirectoryPublisher, DryRunPublisher, Post, Publisher, Report,
};
use nodebench_storage::{HistoricalStore, RocksBackend, RocksBackendSettings};
use time::OffsetDateTime;
use tracing::{error, info};

use crate::config::{Config, ReportArgs, StorageConfig};

/// Nodes listed in the printed summary.
const SUMMARY_TOP: usize = 3;

pub fn open_store(storage: &StorageConfig) -> Result<HistoricalStore<RocksBackend>> {
    let backend = RocksBackend::new(RocksBackendSettings {
        db_path: storage.db_path.clone(),
        read_only: false,
    })
    .wrap_err_with(|| format!("opening history at {}", storage.db_path.display()))?;
    Ok(HistoricalStore::new(backend))
}

/// Benchmarks the configured nodes, records the run and prints a summary.
/// Failing nodes do not make this fail; storage does.
pub async fn run(config: &Config, report_path: Option<&Path>) -> Result<()> {
    let store = open_store(&config.storage)?;
    let probes = config.domain.probe_set(&config.probes);
    let connector = Arc::new(JsonRpcConnector::new(probes.handshake().clone()));
    let orchestrator = Orchestrator::new(connector, probes, config.benchmark.clone())?;

    let run = orchestrator.run(&config.nodes).await?;
    store.record_run(&run).await?;

    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_vec_pretty(&run.report())?)
            .wrap_err_with(|| format!("writing run report to {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }
    print!("{}", summary(&run));
    Ok(())
}

/// Aggregates the trailing window into a report, writes it, and publishes it
/// when asked. A failed publish is reported but does not fail the command.
pub async fn report(config: &Config, args: &ReportArgs) -> Result<()> {
    let store = open_store(&config.storage)?;
    let aggregator = Aggregator::new(config.domain.label(), config.report.settings_with(args))?;
    let report = aggregator
        .generate(&store, OffsetDateTime::now_utc())
        .await?;
    write_report(config, &report)?;
    println!("{} ({} runs)", report.title, report.metadata.run_count);

    if !(args.publish || args.dry_run) {
        return Ok(());
    }
    let tags = if args.tags.is_empty() {
        config.report.tags.clone()
    } else {
        args.tags.clone()
    };
    let community = args
        .community
        .clone()
        .or_else(|| config.report.community.clone());
    let post = Post::from_report(&report, tags, community);
    let publisher: Box<dyn Publisher> = if args.dry_run {
        Box::new(DryRunPublisher)
    } else {
        Box::new(DirectoryPublisher::new(&config.report.publish_dir))
    };
    match publisher.publish(&post).await {
        Ok(confirmation) => println!(
            "Published {} to {}",
            confirmation.permlink, confirmation.location
        ),
        Err(err) => {
            error!(%err, permlink = %post.permlink, "publishing failed");
            eprintln!("Failed to publish the report: {err}");
        }
    }
    Ok(())
}

/// Prints every run of the trailing `days` as one JSON line.
pub async fn history(config: &Config, days: u32) -> Result<()> {
    if days == 0 {
        return Err(ConfigError::InvalidWindow(days).into());
    }
    let store = open_store(&config.storage)?;
    let end = OffsetDateTime::now_utc();
    let start = end - time::Duration::days(i64::from(days));
    for run in store.query_window(start, end).await? {
        println!("{}", serde_json::to_string(&run)?);
    }
    Ok(())
}

fn write_report(config: &Config, report: &Report) -> Result<()> {
    let markdown = &config.report.markdown_path;
    let metadata = &config.report.metadata_path;
    std::fs::write(markdown, &report.body)
        .wrap_err_with(|| format!("writing {}", markdown.display()))?;
    std::fs::write(metadata, serde_json::to_vec_pretty(&report.metadata)?)
        .wrap_err_with(|| format!("writing {}", metadata.display()))?;
    info!(
        markdown = %markdown.display(),
        metadata = %metadata.display(),
        "report written"
    );
    Ok(())
}

#[must_use]
pub fn summary(run: &BenchmarkRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {}: {} working, {} failing",
        run.run_id,
        run.working_count(),
        run.failing_count()
    );
    for record in run.ranking().into_iter().take(SUMMARY_TOP) {
        let _ = writeln!(
            out,
            "  {}. {} (score {:.2})",
            record.rank.unwrap_or_default(),
            record.node,
            record.score
        );
    }
    for record in run.failing() {
        let reason = record
            .error
            .as_ref()
            .map_or_else(String::new, |failure| format!(" [{}] {}", failure.category, failure.error));
        let _ = writeln!(out, "  failing: {}{reason}", record.node);
    }
    out
}
