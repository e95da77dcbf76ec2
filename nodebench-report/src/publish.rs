use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{PublishError, Report, ReportMetadata};

/// Tags used when the caller supplies none.
#[must_use]
pub fn default_tags(domain: &str) -> Vec<String> {
    let tags: &[&str] = if domain.eq_ignore_ascii_case("engine") {
        &["hive-engine", "benchmark", "nodes", "performance", "api"]
    } else {
        &["hive", "benchmark", "nodes", "api", "performance"]
    };
    tags.iter().map(|tag| (*tag).to_owned()).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub content: String,
    pub metadata: ReportMetadata,
    pub permlink: String,
    pub tags: Vec<String>,
    pub community: Option<String>,
}

impl Post {
    /// An empty tag list falls back to [`default_tags`].
    #[must_use]
    pub fn from_report(report: &Report, tags: Vec<String>, community: Option<String>) -> Self {
        let tags = if tags.is_empty() {
            default_tags(&report.metadata.domain)
        } else {
            tags
        };
        Self {
            content: report.body.clone(),
            metadata: report.metadata.clone(),
            permlink: report.permlink.clone(),
            tags,
            community,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub permlink: String,
    /// Where the post ended up, a path or a URL.
    pub location: String,
}

/// Destination of a finished report. Publishing twice is the caller's
/// concern; implementations need not deduplicate.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &Post) -> Result<Confirmation, PublishError>;
}

/// Writes `<permlink>.md` and `<permlink>.json` into a directory.
#[derive(Clone, Debug)]
pub struct DirectoryPublisher {
    directory: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(&self, post: &Post) -> Result<Confirmation, PublishError> {
        if post.permlink.is_empty() || post.permlink.contains(['/', '\\']) {
            return Err(PublishError::Rejected(format!(
                "permlink `{}` is not a file name",
                post.permlink
            )));
        }
        tokio::fs::create_dir_all(&self.directory).await?;
        let markdown = self.directory.join(format!("{}.md", post.permlink));
        let json = self.directory.join(format!("{}.json", post.permlink));
        tokio::fs::write(&markdown, &post.content).await?;
        tokio::fs::write(&json, serde_json::to_vec_pretty(post)?).await?;
        info!(path = %markdown.display(), tags = ?post.tags, "report published");
        Ok(Confirmation {
            permlink: post.permlink.clone(),
            location: markdown.display().to_string(),
        })
    }
}

/// Logs what would be published and touches nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, post: &Post) -> Result<Confirmation, PublishError> {
        info!(
            permlink = %post.permlink,
            title = %post.metadata.title,
            tags = ?post.tags,
            community = ?post.community,
            bytes = post.content.len(),
            "dry run, report not published"
        );
        Ok(Confirmation {
            permlink: post.permlink.clone(),
            location: "dry-run".to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use time::macros::datetime;

    use super::*;
    use crate::{Aggregator, ReportSettings};

    fn report() -> Report {
        let now = datetime!(2024-05-01 09:00 UTC);
        let agg = Aggregator::new("hive", ReportSettings::default()).unwrap();
        agg.build(&[], agg.window(now), now).unwrap()
    }

    #[tokio::test]
    async fn directory_publisher_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let post = Post::from_report(&report(), Vec::new(), Some("hive-1".to_owned()));
        assert_eq!(post.tags, default_tags("hive"));

        let confirmation = DirectoryPublisher::new(dir.path())
            .publish(&post)
            .await
            .unwrap();
        assert_eq!(confirmation.permlink, "20240501-hive-benchmark-report-20240501");

        let body = std::fs::read_to_string(
            dir.path().join("20240501-hive-benchmark-report-20240501.md"),
        )
        .unwrap();
        assert_eq!(body, post.content);
        let stored: Post = serde_json::from_slice(
            &std::fs::read(dir.path().join("20240501-hive-benchmark-report-20240501.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(stored, post);
    }

    #[tokio::test]
    async fn path_like_permlink_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut post = Post::from_report(&report(), vec!["nodes".to_owned()], None);
        post.permlink = "../escape".to_owned();
        let err = DirectoryPublisher::new(dir.path())
            .publish(&post)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let post = Post::from_report(&report(), Vec::new(), None);
        let confirmation = DryRunPublisher.publish(&post).await.unwrap();
        assert_eq!(confirmation.location, "dry-run");
    }
}
