//! Logging setup for the nodebench binaries.
//!
//! Events go through a `tracing_subscriber` registry with an [`EnvFilter`]
//! and a plain or JSON formatter writing to stdout, stderr or a daily rolling
//! file. Writes are non-blocking; keep the returned [`WorkerGuard`] alive for
//! as long as logs should be flushed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::ParseError, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
    util::TryInitError, EnvFilter, Layer, Registry,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Daily rolling files named `<prefix>.<date>` under `directory`.
    File { directory: PathBuf, prefix: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSettings {
    #[serde(with = "serde_level")]
    pub level: Level,
    /// Extra filter directives, `nodebench_engine=trace` for instance.
    pub directives: Vec<String>,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            format: LogFormat::default(),
            output: LogOutput::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("could not open the log file: {0}")]
    File(#[from] InitError),
    #[error("a global logger is already installed: {0}")]
    Init(#[from] TryInitError),
}

impl LoggerSettings {
    /// `RUST_LOG` wins over the configured level and directives.
    pub fn filter(&self) -> Result<EnvFilter, ParseError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut spec = self.level.as_str().to_ascii_lowercase();
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        EnvFilter::try_new(spec)
    }

    /// Installs the global subscriber.
    pub fn init(&self) -> Result<WorkerGuard, LoggerError> {
        let filter = self.filter()?;
        let (writer, guard, ansi) = match &self.output {
            LogOutput::Stdout => {
                let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
                (writer, guard, true)
            }
            LogOutput::Stderr => {
                let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
                (writer, guard, true)
            }
            LogOutput::File { directory, prefix } => {
                let appender = RollingFileAppender::builder()
                    .rotation(Rotation::DAILY)
                    .filename_prefix(prefix)
                    .build(directory)?;
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (writer, guard, false)
            }
        };

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Plain => fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .boxed(),
        };
        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()?;
        Ok(guard)
    }
}

mod serde_level {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(level.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn settings_from_yaml() {
        let settings: LoggerSettings = serde_yaml::from_str(
            "level: debug\nformat: json\noutput:\n  kind: file\n  directory: /var/log/nodebench\n  prefix: bench.log\n",
        )
        .unwrap();
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(
            settings.output,
            LogOutput::File {
                directory: PathBuf::from("/var/log/nodebench"),
                prefix: "bench.log".to_owned(),
            }
        );

        let defaults: LoggerSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaults, LoggerSettings::default());
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(serde_yaml::from_str::<LoggerSettings>("level: loud").is_err());
    }

    #[test]
    fn file_output_installs_once() {
        let dir = TempDir::new().unwrap();
        let settings = LoggerSettings {
            output: LogOutput::File {
                directory: dir.path().to_path_buf(),
                prefix: "nodebench.log".to_owned(),
            },
            ..LoggerSettings::default()
        };
        let guard = settings.init().unwrap();
        tracing::info!("logger installed");
        assert!(matches!(settings.init(), Err(LoggerError::Init(_))));
        drop(guard);
    }
}
