use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::app::ports::{BatchSink, SinkReport};
use crate::config::PublishConfig;
use crate::constants;
use crate::domain::ClassifiedRecord;
use crate::pipeline::RunOutput;

/// Publishes article bodies as `<UrlName>.html` into the directory mapped to
/// each line of business. Online articles are written, archived ones removed.
pub struct HtmlPublishSink {
    settings: PublishConfig,
}

#[derive(Debug, PartialEq)]
enum PublishAction {
    Write { url_name: String, html: String },
    Remove { url_name: String },
    Skip,
}

impl HtmlPublishSink {
    pub fn new(settings: PublishConfig) -> Self {
        Self { settings }
    }

    fn action_for(&self, record: &ClassifiedRecord) -> PublishAction {
        let text = |field: &str| {
            record
                .get(field)
                .map(|value| value.to_string())
                .filter(|value| !value.trim().is_empty())
        };

        let status = text(&self.settings.status_field);
        let title = text(&self.settings.title_field);
        let url_name = text(&self.settings.url_name_field);

        match (status.as_deref(), title, url_name) {
            (Some(status), Some(_), Some(url_name)) if status == self.settings.online_value => {
                match text(&self.settings.content_field) {
                    Some(html) => PublishAction::Write { url_name, html },
                    None => PublishAction::Skip,
                }
            }
            (Some(status), Some(_), Some(url_name)) if status == self.settings.archived_value => {
                PublishAction::Remove { url_name }
            }
            _ => PublishAction::Skip,
        }
    }

    async fn publish(&self, dir: &Path, record: &ClassifiedRecord, report: &mut SinkReport) {
        let action = self.action_for(record);
        let url_name = match &action {
            PublishAction::Write { url_name, .. } | PublishAction::Remove { url_name } => url_name.clone(),
            PublishAction::Skip => {
                report.skipped += 1;
                return;
            }
        };
        if !is_safe_file_stem(&url_name) {
            warn!(sequence = record.sequence(), "Refusing to publish unsafe url name '{}'", url_name);
            report.failed += 1;
            return;
        }
        let path = dir.join(format!("{}.{}", url_name, constants::PUBLISHED_EXTENSION));

        match action {
            PublishAction::Write { html, .. } => {
                if let Ok(existing) = tokio::fs::read(&path).await {
                    if fingerprint(&existing) == fingerprint(html.as_bytes()) {
                        debug!("Unchanged {}", path.display());
                        report.unchanged += 1;
                        return;
                    }
                }
                match tokio::fs::write(&path, html.as_bytes()).await {
                    Ok(()) => {
                        debug!("Published {}", path.display());
                        report.delivered += 1;
                    }
                    Err(e) => {
                        error!("Failed to write {}: {}", path.display(), e);
                        report.failed += 1;
                    }
                }
            }
            PublishAction::Remove { .. } => match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    report.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Already absent {}", path.display());
                    report.unchanged += 1;
                }
                Err(e) => {
                    error!("Failed to remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            },
            PublishAction::Skip => {}
        }
    }
}

#[async_trait]
impl BatchSink for HtmlPublishSink {
    fn name(&self) -> &'static str {
        "html_publish"
    }

    async fn deliver(&self, output: &RunOutput) -> Result<SinkReport> {
        let mut report = SinkReport::default();

        for batch in &output.batches {
            if batch.is_empty() {
                continue;
            }
            let Some(dir) = self.settings.lob_mapping.get(batch.lob.as_str()) else {
                error!(lob = %batch.lob, records = batch.len(), "No output directory mapped for line of business");
                report.failed += batch.len();
                continue;
            };
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                error!(lob = %batch.lob, "Failed to create {}: {}", dir.display(), e);
                report.failed += batch.len();
                continue;
            }

            let mut lob_report = SinkReport::default();
            for record in &batch.records {
                self.publish(dir, record, &mut lob_report).await;
            }
            info!(
                lob = %batch.lob,
                written = lob_report.delivered,
                removed = lob_report.removed,
                unchanged = lob_report.unchanged,
                failed = lob_report.failed,
                "Published batch to {}",
                dir.display()
            );
            report.merge(lob_report);
        }

        Ok(report)
    }
}

/// SHA-256 of the content, hex encoded
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn is_safe_file_stem(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unsafe_url_names_rejected() {
        assert!(is_safe_file_stem("reset-your-pin"));
        assert!(!is_safe_file_stem("../etc/passwd"));
        assert!(!is_safe_file_stem("a/b"));
        assert!(!is_safe_file_stem(""));
    }
}
