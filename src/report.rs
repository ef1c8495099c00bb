use crate::error::MirrorError;
use crate::types::{DownloadOutcome, DownloadStatus, MirrorResult};
use std::path::Path;

impl MirrorResult {
    /// `Downloaded: 3 images, 1 scripts.`, leaving out empty categories.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(category, count)| format!("{count} {category}"))
            .collect();
        if parts.is_empty() {
            return "Downloaded: 0 files.".to_string();
        }
        format!("Downloaded: {}.", parts.join(", "))
    }

    /// Like [`summary`](Self::summary) but lists every requested category.
    pub fn verbose_summary(&self) -> String {
        if self.counts.is_empty() {
            return "Downloaded: 0 files.".to_string();
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(category, count)| format!("{count} {category}"))
            .collect();
        format!("Downloaded: {}.", parts.join(", "))
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes).sum()
    }
}

/// One row per resource outcome.
pub fn write_stats_csv(outcomes: &[DownloadOutcome], path: &Path) -> Result<(), MirrorError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;

    wtr.write_record([
        "Category",
        "Local path",
        "Status",
        "Size (KB)",
        "Duration (s)",
        "Attempts",
        "URL",
        "Error",
    ])?;

    for outcome in outcomes {
        let status = match &outcome.status {
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::AlreadyPresent => "already present",
            DownloadStatus::Failed(_) => "failed",
        };
        wtr.write_record([
            outcome.category.label().to_string(),
            outcome.local_path.clone(),
            status.to_string(),
            format!("{:.2}", outcome.bytes as f64 / 1024.0),
            format!("{:.2}", outcome.duration.as_secs_f64()),
            outcome.attempts.to_string(),
            outcome.resolved_url.to_string(),
            outcome.failure().map(|r| r.to_string()).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::types::Category;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    fn result(counts: &[(Category, usize)]) -> MirrorResult {
        MirrorResult {
            success: true,
            counts: counts.iter().copied().collect::<BTreeMap<_, _>>(),
            document_path: None,
            reason: None,
            outcomes: Vec::new(),
        }
    }

    fn outcome(path: &str, status: DownloadStatus) -> DownloadOutcome {
        DownloadOutcome {
            category: Category::Image,
            original_url: path.to_string(),
            resolved_url: Url::parse(&format!("http://x.test/{path}")).unwrap(),
            local_path: format!("images/{path}"),
            bytes: 2048,
            attempts: 1,
            duration: Duration::from_millis(250),
            status,
        }
    }

    #[test]
    fn compact_summary_omits_zero_counts() {
        let r = result(&[(Category::Image, 2), (Category::Link, 0), (Category::Script, 1)]);
        assert_eq!(r.summary(), "Downloaded: 2 images, 1 scripts.");
    }

    #[test]
    fn verbose_summary_lists_every_category_in_order() {
        let r = result(&[
            (Category::Xml, 0),
            (Category::Image, 2),
            (Category::Video, 0),
            (Category::Link, 0),
            (Category::Script, 1),
        ]);
        assert_eq!(
            r.verbose_summary(),
            "Downloaded: 2 images, 0 links, 1 scripts, 0 videos, 0 xmls."
        );
    }

    #[test]
    fn empty_mirror_summary() {
        assert_eq!(result(&[(Category::Image, 0)]).summary(), "Downloaded: 0 files.");
        assert_eq!(result(&[]).verbose_summary(), "Downloaded: 0 files.");
    }

    #[test]
    fn stats_csv_has_a_row_per_outcome() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats/mirror.csv");
        let outcomes = vec![
            outcome("a.png", DownloadStatus::Downloaded),
            outcome("b.png", DownloadStatus::Failed(FailureReason::Status(404))),
        ];

        write_stats_csv(&outcomes, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "images/a.png");
        assert_eq!(&rows[0][2], "downloaded");
        assert_eq!(&rows[0][3], "2.00");
        assert_eq!(&rows[1][2], "failed");
        assert_eq!(&rows[1][7], "HTTP status 404");
    }
}
