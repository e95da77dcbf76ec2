use std::{fs::File, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use nodebench_core::{NodeUrl, RunConfig, Scheduling};
use nodebench_engine::{Domain, ProbeSettings};
use nodebench_report::ReportSettings;
use nodebench_tracing::{LogFormat, LogOutput, LoggerSettings};
use serde::{Deserialize, Serialize};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path for a yaml-encoded config file
    pub config: PathBuf,
    /// Dry-run flag. If active, the binary will try to deserialize the config
    /// file and then exit.
    #[clap(long = "check-config", action)]
    pub check_config_only: bool,
    /// Overrides log config.
    #[clap(flatten)]
    pub log: LogArgs,
    /// Overrides benchmark config.
    #[clap(flatten)]
    pub benchmark: BenchmarkArgs,
    #[clap(flatten)]
    pub storage: StorageArgs,
    /// Defaults to `run`.
    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Benchmark the configured nodes and record the run.
    Run {
        /// Where to write the single-run JSON report.
        #[clap(long)]
        report_path: Option<PathBuf>,
    },
    /// Aggregate recent history into a report.
    Report(ReportArgs),
    /// Print recorded runs as JSON lines.
    History {
        #[clap(long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    #[clap(long = "log-level", env = "NODEBENCH_LOG_LEVEL")]
    pub log_level: Option<Level>,
    /// `plain` or `json`.
    #[clap(long = "log-format", env = "NODEBENCH_LOG_FORMAT")]
    pub log_format: Option<String>,
    /// Log into daily rolling files under this directory.
    #[clap(long = "log-dir", env = "NODEBENCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BenchmarkArgs {
    /// `hive` or `engine`.
    #[clap(long, env = "NODEBENCH_DOMAIN")]
    pub domain: Option<Domain>,
    /// Replaces the configured node list. Repeat for several nodes.
    #[clap(long = "node")]
    pub nodes: Vec<String>,
    #[clap(long)]
    pub workers: Option<usize>,
    /// Benchmark one node at a time.
    #[clap(long, action)]
    pub sequential: bool,
    #[clap(long = "probe-budget-secs")]
    pub probe_budget_secs: Option<u64>,
    #[clap(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
    #[clap(long = "call-retries")]
    pub call_retries: Option<u32>,
    #[clap(long = "connect-retries")]
    pub connect_retries: Option<u32>,
    #[clap(long = "concurrent-probes", action)]
    pub concurrent_probes: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    #[clap(long = "db-path", env = "NODEBENCH_DB_PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ReportArgs {
    #[clap(long)]
    pub days: Option<u32>,
    #[clap(long = "top")]
    pub top_k: Option<usize>,
    /// Use this permalink instead of deriving one from the title.
    #[clap(long)]
    pub permlink: Option<String>,
    /// Comma-separated tags.
    #[clap(long, value_delimiter = ',')]
    pub tags: Vec<String>,
    #[clap(long)]
    pub community: Option<String>,
    /// Publish the report after writing it.
    #[clap(long, action)]
    pub publish: bool,
    /// Log the post instead of publishing it.
    #[clap(long = "dry-run", action)]
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("nodebench-history"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(flatten)]
    pub settings: ReportSettings,
    pub markdown_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Where published posts are written.
    pub publish_dir: PathBuf,
    pub tags: Vec<String>,
    pub community: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            settings: ReportSettings::default(),
            markdown_path: PathBuf::from("benchmark_post.md"),
            metadata_path: PathBuf::from("benchmark_metadata.json"),
            publish_dir: PathBuf::from("published"),
            tags: Vec::new(),
            community: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub domain: Domain,
    pub nodes: Vec<NodeUrl>,
    #[serde(default)]
    pub benchmark: RunConfig,
    #[serde(default)]
    pub probes: ProbeSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logger: LoggerSettings,
}

impl Config {
    /// Reads the YAML file, warning about fields nothing consumes.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let config = serde_ignored::deserialize::<_, _, Self>(
            serde_yaml::Deserializer::from_reader(File::open(path)?),
            |path| {
                eprintln!("Warning: Ignored unknown configuration field: {path}");
            },
        )?;
        Ok(config)
    }

    pub fn update_from_args(
        mut self,
        log_args: LogArgs,
        benchmark_args: BenchmarkArgs,
        storage_args: StorageArgs,
    ) -> Result<Self> {
        update_logger(&mut self.logger, log_args)?;
        update_benchmark(&mut self, benchmark_args)?;
        if let Some(db_path) = storage_args.db_path {
            self.storage.db_path = db_path;
        }
        Ok(self)
    }

    /// Checks what can be checked without touching the network or the disk.
    pub fn validate(&self) -> Result<()> {
        self.benchmark.validate()?;
        if self.nodes.is_empty() {
            return Err(nodebench_core::ConfigError::EmptyNodeList.into());
        }
        if self.report.settings.days == 0 {
            return Err(nodebench_core::ConfigError::InvalidWindow(0).into());
        }
        Ok(())
    }
}

pub fn update_logger(logger: &mut LoggerSettings, log_args: LogArgs) -> Result<()> {
    let LogArgs {
        log_level,
        log_format,
        log_dir,
    } = log_args;

    if let Some(level) = log_level {
        logger.level = level;
    }

    if let Some(format) = log_format {
        logger.format = match format.to_ascii_lowercase().as_str() {
            "plain" => LogFormat::Plain,
            "json" => LogFormat::Json,
            other => return Err(eyre!("unknown log format `{other}`")),
        };
    }

    if let Some(directory) = log_dir {
        logger.output = LogOutput::File {
            directory,
            prefix: "nodebench.log".to_owned(),
        };
    }

    Ok(())
}

pub fn update_benchmark(config: &mut Config, benchmark_args: BenchmarkArgs) -> Result<()> {
    let BenchmarkArgs {
        domain,
        nodes,
        workers,
        sequential,
        probe_budget_secs,
        timeout_secs,
        call_retries,
        connect_retries,
        concurrent_probes,
    } = benchmark_args;

    if let Some(domain) = domain {
        config.domain = domain;
    }

    if !nodes.is_empty() {
        config.nodes = nodes
            .iter()
            .map(|raw| NodeUrl::parse(raw))
            .collect::<Result<_, _>>()?;
    }

    let benchmark = &mut config.benchmark;
    if sequential {
        benchmark.scheduling = Scheduling::Sequential;
    } else if let Some(max_workers) = workers {
        benchmark.scheduling = Scheduling::Concurrent { max_workers };
    }

    if let Some(secs) = probe_budget_secs {
        benchmark.probe_budget = Duration::from_secs(secs);
    }

    if let Some(secs) = timeout_secs {
        benchmark.timeout = Duration::from_secs(secs);
    }

    if let Some(retries) = call_retries {
        benchmark.call_retries = retries;
    }

    if let Some(retries) = connect_retries {
        benchmark.connect_retries = retries;
    }

    if concurrent_probes {
        benchmark.concurrent_probes = true;
    }

    Ok(())
}

impl ReportConfig {
    /// Report settings with the command line overrides applied.
    #[must_use]
    pub fn settings_with(&self, args: &ReportArgs) -> ReportSettings {
        let mut settings = self.settings.clone();
        if let Some(days) = args.days {
            settings.days = days;
        }
        if let Some(top_k) = args.top_k {
            settings.top_k = top_k;
        }
        if args.permlink.is_some() {
            settings.permlink.clone_from(&args.permlink);
        }
        settings
    }
}
