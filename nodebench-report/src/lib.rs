pub mod aggregate;
pub mod error;
pub mod markdown;
pub mod permalink;
pub mod publish;

pub use aggregate::{
    Aggregator, NodeSummary, Report, ReportMetadata, ReportSettings, ReportWindow, TopNode, Trend,
};
pub use error::{PublishError, ReportError};
pub use permalink::{domain_name, permalink, slugify, title};
pub use publish::{
    default_tags, Confirmation, DirectoryPublisher, DryRunPublisher, Post, Publisher,
};
