use crate::error::MirrorError;
use crate::fetcher::Fetcher;
use crate::locator::ResourceLocator;
use crate::sanitizer::{disambiguate, local_file_name};
use crate::types::{Category, CategoryOutcome, DownloadOutcome, DownloadTask};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use kuchiki::NodeRef;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use url::Url;

/// Downloads every resource of one category and rewrites the document's
/// references to the files that made it to disk.
pub struct CategoryDownloader {
    fetcher: Fetcher,
    parallelism: usize,
    show_progress: bool,
}

impl CategoryDownloader {
    pub fn new(fetcher: Fetcher, parallelism: usize, show_progress: bool) -> Self {
        Self {
            fetcher,
            parallelism: parallelism.max(1),
            show_progress,
        }
    }

    pub async fn run(
        &self,
        category: Category,
        document: &NodeRef,
        base_url: &Url,
        work_dir: &Path,
    ) -> Result<CategoryOutcome, MirrorError> {
        let Some(locator) = ResourceLocator::for_category(document, category) else {
            return Ok(CategoryOutcome::empty(category));
        };

        let category_dir = work_dir.join(category.label());
        let tasks = self.create_download_tasks(category, &locator, base_url, &category_dir);
        if tasks.is_empty() {
            info!("No {} found", category);
            return Ok(CategoryOutcome::empty(category));
        }
        let discovered = tasks.len();

        let mut outcomes: Vec<(usize, DownloadOutcome)> = Vec::with_capacity(discovered);
        let mut pending = Vec::new();
        for (index, task) in tasks.into_iter().enumerate() {
            match tokio::fs::metadata(&task.output_path).await {
                Ok(meta) if meta.is_file() => {
                    debug!("Already present: {}", task.output_path.display());
                    outcomes.push((index, DownloadOutcome::already_present(task, meta.len())));
                }
                _ => pending.push((index, task)),
            }
        }

        let pb = self.create_progress_bar(category, pending.len());
        let mut results = stream::iter(pending)
            .map(|(index, task)| {
                let fetcher = self.fetcher.clone();
                tokio::spawn(async move { (index, fetcher.fetch(task).await) })
            })
            .buffer_unordered(self.parallelism);

        while let Some(joined) = results.next().await {
            let (index, outcome) = joined?;
            pb.inc(1);
            outcomes.push((index, outcome));
        }

        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<DownloadOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        let saved_paths: HashMap<&str, &str> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| (o.resolved_url.as_str(), o.local_path.as_str()))
            .collect();
        let saved = saved_paths.len();

        let rewritten = locator.rewrite(|value| {
            let url = resolve(base_url, value)?;
            saved_paths.get(url.as_str()).map(|path| path.to_string())
        });

        pb.finish_with_message(format!("{category}: {saved}/{discovered} saved"));
        info!(
            "Completed {}: {}/{} saved, {} references rewritten",
            category, saved, discovered, rewritten
        );

        Ok(CategoryOutcome {
            category,
            discovered,
            saved,
            outcomes,
        })
    }

    /// One task per distinct resolved URL, in document order. The first
    /// occurrence of a URL decides its local name; distinct URLs that
    /// sanitize to the same name get a numeric suffix.
    fn create_download_tasks(
        &self,
        category: Category,
        locator: &ResourceLocator<'_>,
        base_url: &Url,
        category_dir: &Path,
    ) -> Vec<DownloadTask> {
        let mut seen = HashSet::new();
        let mut taken_names = HashSet::new();
        let mut tasks = Vec::new();

        for reference in locator.references(category) {
            let Some(url) = resolve(base_url, &reference.original) else {
                debug!("Skipping {} reference {:?}", category, reference.original);
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }

            let base_name = local_file_name(&url, category);
            let mut file_name = base_name.clone();
            let mut n = 1;
            while taken_names.contains(&file_name) {
                file_name = disambiguate(&base_name, n);
                n += 1;
            }
            taken_names.insert(file_name.clone());

            debug!("{} -> {}/{}", url, category.label(), file_name);
            tasks.push(DownloadTask {
                category,
                original_url: reference.original,
                local_path: format!("{}/{}", category.label(), file_name),
                output_path: category_dir.join(&file_name),
                url,
            });
        }

        info!("Found {} distinct {} to mirror", tasks.len(), category);
        tasks
    }

    fn create_progress_bar(&self, category: Category, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}/{len}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(format!("Downloading {category}"));
        pb
    }
}

/// Joins a raw reference onto the page URL. Only http(s) targets are
/// mirrored; fragments are dropped so `a.png#x` and `a.png` are one file.
pub fn resolve(base_url: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut url = base_url.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
