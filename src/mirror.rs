use crate::config::MirrorConfig;
use crate::downloader::{resolve, CategoryDownloader};
use crate::error::MirrorError;
use crate::fetcher::Fetcher;
use crate::locator::ResourceLocator;
use crate::types::{MirrorRequest, MirrorResult};
use kuchiki::traits::TendrilSink;
use kuchiki::NodeRef;
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Builds a local copy of one page and the resources it references.
///
/// The returned future keeps the parsed document across await points and is
/// therefore not `Send`; drive it on the calling task. Resource downloads
/// themselves run on spawned tasks. Dropping the future cancels them.
pub struct PageMirror {
    config: MirrorConfig,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl PageMirror {
    pub fn new(config: MirrorConfig) -> Result<Self, MirrorError> {
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            cancel: CancellationToken::new(),
        })
    }

    /// Ties every run to `cancel`: cancelling it stops in-flight downloads
    /// and turns the run into a failure.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Never fails outright: request-level errors come back as a failed
    /// [`MirrorResult`] carrying the reason.
    pub async fn save_page(&self, request: &MirrorRequest) -> MirrorResult {
        match self.try_save_page(request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Mirror of {} failed: {}", request.url, e);
                MirrorResult::failure(e.to_string())
            }
        }
    }

    async fn try_save_page(&self, request: &MirrorRequest) -> Result<MirrorResult, MirrorError> {
        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(MirrorError::InvalidUrl(format!(
                "{} (only http and https are supported)",
                request.url
            )));
        }

        let cancel = self.cancel.child_token();
        let _guard = cancel.clone().drop_guard();
        let start_time = Instant::now();
        info!("Mirroring {} into {}", request.url, request.paths.work_dir.display());

        let (document, base_url) = self.fetch_document(request, &cancel).await?;

        let work_dir = &request.paths.work_dir;
        tokio::fs::create_dir_all(work_dir).await?;
        for category in request.resource_categories() {
            tokio::fs::create_dir_all(work_dir.join(category.label())).await?;
        }

        let fetcher = Fetcher::new(self.client.clone(), cancel.clone())
            .with_credential(request.credential.clone(), &request.url)
            .with_size_limit(request.size_limit)
            .with_retries(request.max_retries, self.config.retry_delay);
        let downloader = CategoryDownloader::new(fetcher, request.parallelism, self.config.show_progress);

        let mut counts = BTreeMap::new();
        let mut outcomes = Vec::new();
        for category in request.resource_categories() {
            let outcome = downloader.run(category, &document, &base_url, work_dir).await?;
            counts.insert(category, outcome.saved);
            outcomes.extend(outcome.outcomes);
            if cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
        }

        // Rewritten references are relative to the working directory.
        let stripped = ResourceLocator::new(&document, "base", "href").strip();
        if stripped > 0 {
            debug!("Dropped <base href> from {}", request.url);
        }

        let document_path = request.paths.document_path();
        let mut html = Vec::new();
        document.serialize(&mut html)?;
        tokio::fs::write(&document_path, html).await?;

        info!(
            "Mirrored {} in {:.2?}: {} of {} resources saved",
            request.url,
            start_time.elapsed(),
            counts.values().sum::<usize>(),
            outcomes.len()
        );

        Ok(MirrorResult {
            success: true,
            counts,
            document_path: Some(document_path),
            reason: None,
            outcomes,
        })
    }

    /// Root fetch is a single attempt: without the document there is
    /// nothing to mirror.
    async fn fetch_document(
        &self,
        request: &MirrorRequest,
        cancel: &CancellationToken,
    ) -> Result<(NodeRef, Url), MirrorError> {
        let mut req = self.client.get(request.url.clone());
        if let Some(credential) = &request.credential {
            req = req.basic_auth(&credential.username, Some(&credential.password));
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
            resp = req.send() => resp?,
        };
        if !resp.status().is_success() {
            return Err(MirrorError::RootStatus {
                url: request.url.to_string(),
                status: resp.status(),
            });
        }

        let final_url = resp.url().clone();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
            body = resp.text() => body?,
        };
        debug!("Fetched {} ({} bytes)", final_url, body.len());

        let document = kuchiki::parse_html().one(body);
        let base_url = document_base(&document, &final_url);
        Ok((document, base_url))
    }
}

/// `<base href>` wins over the URL the document was served from.
fn document_base(document: &NodeRef, page_url: &Url) -> Url {
    ResourceLocator::new(document, "base", "href")
        .values()
        .next()
        .and_then(|href| resolve(page_url, &href))
        .unwrap_or_else(|| page_url.clone())
}
