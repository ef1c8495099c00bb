//! Request handling around the mirror, from the incoming message text to
//! the packaged archive handed back to the requester.

use crate::archive;
use crate::credentials::CredentialStore;
use crate::mirror::PageMirror;
use crate::parser::parse_message;
use crate::types::{
    Credential, MirrorRequest, MirrorResult, RequestPaths, DEFAULT_MAX_RETRIES, DEFAULT_PARALLELISM,
};
use log::{error, info, warn};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub size_limit: Option<u64>,
    pub max_retries: u32,
    pub parallelism: usize,
    /// Upper bound on one whole mirror run.
    pub deadline: Option<Duration>,
    pub verbose_summary: bool,
    pub keep_working_dir: bool,
    pub probe: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            size_limit: Some(DEFAULT_SIZE_LIMIT),
            max_retries: DEFAULT_MAX_RETRIES,
            parallelism: DEFAULT_PARALLELISM,
            deadline: None,
            verbose_summary: false,
            keep_working_dir: false,
            probe: true,
        }
    }
}

/// What goes back to the requester.
#[derive(Debug)]
pub struct Reply {
    pub success: bool,
    pub text: String,
    pub archive: Option<PathBuf>,
    pub result: Option<MirrorResult>,
}

impl Reply {
    fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
            archive: None,
            result: None,
        }
    }
}

pub struct Frontend {
    mirror: PageMirror,
    credentials: CredentialStore,
    workspace: PathBuf,
    options: RequestOptions,
}

impl Frontend {
    pub fn new(
        mirror: PageMirror,
        credentials: CredentialStore,
        workspace: impl Into<PathBuf>,
        options: RequestOptions,
    ) -> Self {
        Self {
            mirror,
            credentials,
            workspace: workspace.into(),
            options,
        }
    }

    pub async fn handle_message(&self, requester: &str, text: &str) -> Reply {
        let parsed = match parse_message(text) {
            Ok(parsed) => parsed,
            Err(e) => return Reply::failure(e.to_string()),
        };

        let credential = match self.credentials.lookup(requester, &parsed.url).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Ignoring credential store {}: {}", self.credentials.path().display(), e);
                None
            }
        };

        if self.options.probe {
            let timeout = self.mirror.config().probe_timeout;
            if !is_reachable(self.mirror.client(), &parsed.url, credential.as_ref(), timeout).await {
                return Reply::failure("The URL is invalid or inaccessible");
            }
        }

        let paths = RequestPaths::for_requester(&self.workspace, requester);
        let request = MirrorRequest {
            url: parsed.url,
            categories: parsed.categories,
            size_limit: self.options.size_limit,
            credential,
            max_retries: self.options.max_retries,
            parallelism: self.options.parallelism,
            paths,
        };

        let result = self.run_mirror(&request).await;
        if !result.success {
            self.cleanup(&request.paths).await;
            let reason = result.reason.clone().unwrap_or_else(|| "unknown error".into());
            return Reply {
                success: false,
                text: format!("Something went wrong: {reason}"),
                archive: None,
                result: Some(result),
            };
        }

        let summary = if self.options.verbose_summary {
            result.verbose_summary()
        } else {
            result.summary()
        };

        if let Err(e) = archive::package(&request.paths.work_dir, &request.paths.archive_path).await {
            error!("Packaging {} failed: {}", request.paths.work_dir.display(), e);
            self.cleanup(&request.paths).await;
            archive::remove_archive(&request.paths.archive_path).await;
            return Reply {
                success: false,
                text: format!("Something went wrong: {e}"),
                archive: None,
                result: Some(result),
            };
        }
        self.cleanup(&request.paths).await;

        info!("Request from {} done: {}", requester, summary);
        Reply {
            success: true,
            text: summary,
            archive: Some(request.paths.archive_path),
            result: Some(result),
        }
    }

    async fn run_mirror(&self, request: &MirrorRequest) -> MirrorResult {
        let Some(deadline) = self.options.deadline else {
            return self.mirror.save_page(request).await;
        };
        match tokio::time::timeout(deadline, self.mirror.save_page(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Mirror of {} exceeded {:?}", request.url, deadline);
                MirrorResult::failure(format!("Mirror timed out after {deadline:?}"))
            }
        }
    }

    async fn cleanup(&self, paths: &RequestPaths) {
        if self.options.keep_working_dir {
            return;
        }
        if let Err(e) = archive::remove_working_dir(&paths.work_dir).await {
            warn!("Failed to remove {}: {}", paths.work_dir.display(), e);
        }
    }
}

/// HEAD probe, falling back to GET for servers that refuse HEAD.
pub async fn is_reachable(
    client: &reqwest::Client,
    url: &Url,
    credential: Option<&Credential>,
    timeout: Duration,
) -> bool {
    let send = |method: reqwest::Method| {
        let mut req = client.request(method, url.clone()).timeout(timeout);
        if let Some(credential) = credential {
            req = req.basic_auth(&credential.username, Some(&credential.password));
        }
        req.send()
    };

    let status = match send(reqwest::Method::HEAD).await {
        Ok(resp)
            if resp.status() == StatusCode::METHOD_NOT_ALLOWED
                || resp.status() == StatusCode::NOT_IMPLEMENTED =>
        {
            match send(reqwest::Method::GET).await {
                Ok(resp) => resp.status(),
                Err(e) => {
                    warn!("Probe of {} failed: {}", url, e);
                    return false;
                }
            }
        }
        Ok(resp) => resp.status(),
        Err(e) => {
            warn!("Probe of {} failed: {}", url, e);
            return false;
        }
    };

    if !status.is_success() {
        warn!("Probe of {} returned {}", url, status);
    }
    status.is_success()
}
