use crate::error::FailureReason;
use crate::types::{Credential, DownloadOutcome, DownloadStatus, DownloadTask};
use futures::StreamExt;
use log::{debug, error, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};

/// Bytes buffered before each write to disk.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Appended to a file name while its body is still streaming. Sanitized
/// resource names never contain `-`, so no saved resource ends with it.
pub const PARTIAL_SUFFIX: &str = ".webdl-part";

/// Downloads single resources for one request. Cloning is cheap: the
/// underlying connection pool is shared between clones.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    /// Sent only to URLs sharing the origin it was stored for.
    credential: Option<(Credential, Origin)>,
    size_limit: Option<u64>,
    max_retries: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, cancel: CancellationToken) -> Self {
        Self {
            client,
            credential: None,
            size_limit: None,
            max_retries: 1,
            retry_delay: Duration::ZERO,
            cancel,
        }
    }

    /// Scopes `credential` to the origin of `site`; other hosts never see it.
    pub fn with_credential(mut self, credential: Option<Credential>, site: &Url) -> Self {
        self.credential = credential.map(|credential| (credential, site.origin()));
        self
    }

    fn credential_for(&self, url: &Url) -> Option<&Credential> {
        match &self.credential {
            Some((credential, origin)) if url.origin() == *origin => Some(credential),
            _ => None,
        }
    }

    pub fn with_size_limit(mut self, size_limit: Option<u64>) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Total attempts, including the first. Zero is treated as one.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub async fn fetch(&self, task: DownloadTask) -> DownloadOutcome {
        let start_time = Instant::now();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => Err(FailureReason::Cancelled),
                result = self.attempt(&task) => result,
            };

            match attempt {
                Ok(bytes) => break Ok(bytes),
                Err(reason) if reason.is_retryable() && attempts < self.max_retries => {
                    warn!(
                        "Attempt {}/{} failed for {}: {}",
                        attempts, self.max_retries, task.url, reason
                    );
                    let delay = self.retry_delay * attempts;
                    tokio::select! {
                        _ = self.cancel.cancelled() => break Err(FailureReason::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                Err(reason) => {
                    error!(
                        "Attempt {}/{} failed for {}: {}",
                        attempts, self.max_retries, task.url, reason
                    );
                    break Err(reason);
                }
            }
        };

        let (bytes, status) = match result {
            Ok(bytes) => {
                debug!("Saved {} ({} bytes) to {}", task.url, bytes, task.output_path.display());
                (bytes, DownloadStatus::Downloaded)
            }
            Err(reason) => {
                remove_partial(&task.output_path).await;
                (0, DownloadStatus::Failed(reason))
            }
        };

        DownloadOutcome {
            category: task.category,
            original_url: task.original_url,
            resolved_url: task.url,
            local_path: task.local_path,
            bytes,
            attempts,
            duration: start_time.elapsed(),
            status,
        }
    }

    async fn attempt(&self, task: &DownloadTask) -> Result<u64, FailureReason> {
        let mut request = self.client.get(task.url.clone());
        if let Some(credential) = self.credential_for(&task.url) {
            request = request.basic_auth(&credential.username, Some(&credential.password));
        }
        let resp = request.send().await?;

        if !resp.status().is_success() {
            return Err(FailureReason::Status(resp.status().as_u16()));
        }

        if let (Some(limit), Some(declared)) = (self.size_limit, resp.content_length()) {
            if declared > limit {
                return Err(FailureReason::SizeLimit {
                    size: declared,
                    limit,
                });
            }
        }

        let part_path = partial_path(&task.output_path);
        let file = File::create(&part_path).await.map_err(FailureReason::io)?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = resp.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            if let Some(limit) = self.size_limit {
                if downloaded > limit {
                    return Err(FailureReason::SizeLimit {
                        size: downloaded,
                        limit,
                    });
                }
            }
            writer.write_all(&chunk).await.map_err(FailureReason::io)?;
        }

        writer.flush().await.map_err(FailureReason::io)?;
        drop(writer);
        tokio::fs::rename(&part_path, &task.output_path)
            .await
            .map_err(FailureReason::io)?;

        Ok(downloaded)
    }
}

pub fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    output_path.with_file_name(name)
}

async fn remove_partial(output_path: &Path) {
    let part_path = partial_path(output_path);
    match tokio::fs::remove_file(&part_path).await {
        Ok(()) => debug!("Removed partial download {}", part_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", part_path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::test_support::{wait_until, FlakyServer, StallServer};
    use crate::types::Category;
    use mockito::{Matcher, Server};
    use tempfile::TempDir;

    fn task(url: &str, dir: &Path, name: &str) -> DownloadTask {
        DownloadTask {
            category: Category::Image,
            original_url: url.to_string(),
            url: Url::parse(url).unwrap(),
            local_path: format!("images/{name}"),
            output_path: dir.join(name),
        }
    }

    fn fetcher() -> Fetcher {
        let client = MirrorConfig::quiet().build_client().unwrap();
        Fetcher::new(client, CancellationToken::new())
    }

    #[tokio::test]
    async fn downloads_body_to_destination() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_body("png-bytes")
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let outcome = fetcher()
            .fetch(task(&format!("{}/a.png", server.url()), dir.path(), "a.png"))
            .await;

        assert_eq!(outcome.status, DownloadStatus::Downloaded);
        assert_eq!(outcome.bytes, 9);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(std::fs::read(dir.path().join("a.png")).unwrap(), b"png-bytes");
        assert!(!partial_path(&dir.path().join("a.png")).exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn oversized_resource_is_not_retried_or_written() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/big.bin")
            .with_status(200)
            .with_body(vec![0u8; 100])
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let outcome = fetcher()
            .with_size_limit(Some(10))
            .with_retries(5, Duration::ZERO)
            .fetch(task(&format!("{}/big.bin", server.url()), dir.path(), "big.bin"))
            .await;

        assert_eq!(
            outcome.status,
            DownloadStatus::Failed(FailureReason::SizeLimit { size: 100, limit: 10 })
        );
        assert!(!outcome.is_success());
        assert!(!dir.path().join("big.bin").exists());
        assert!(!partial_path(&dir.path().join("big.bin")).exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_retried_until_attempts_run_out() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.png")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let outcome = fetcher()
            .with_retries(3, Duration::ZERO)
            .fetch(task(&format!("{}/missing.png", server.url()), dir.path(), "missing.png"))
            .await;

        assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::Status(503)));
        assert_eq!(outcome.attempts, 3);
        assert!(!dir.path().join("missing.png").exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn succeeds_on_final_attempt_after_transport_failures() {
        let server = FlakyServer::start(2, "late-bytes").await;
        let dir = TempDir::new().unwrap();

        let outcome = fetcher()
            .with_retries(3, Duration::ZERO)
            .fetch(task(&server.url("/late.png"), dir.path(), "late.png"))
            .await;

        assert_eq!(outcome.status, DownloadStatus::Downloaded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(server.connections(), 3);
        assert_eq!(std::fs::read(dir.path().join("late.png")).unwrap(), b"late-bytes");
    }

    #[tokio::test]
    async fn cancelled_fetch_reports_cancellation() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/a.png")
            .with_status(200)
            .with_body("x")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = MirrorConfig::quiet().build_client().unwrap();

        let outcome = Fetcher::new(client, cancel)
            .fetch(task(&format!("{}/a.png", server.url()), dir.path(), "a.png"))
            .await;

        assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::Cancelled));
        assert!(!dir.path().join("a.png").exists());
    }

    #[tokio::test]
    async fn sends_basic_auth_when_configured() {
        let mut server = Server::new_async().await;
        // "alice:secret" base64-encoded.
        let mock = server
            .mock("GET", "/private.css")
            .match_header("authorization", "Basic YWxpY2U6c2VjcmV0")
            .with_status(200)
            .with_body("body{}")
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let site = Url::parse(&format!("{}/page", server.url())).unwrap();

        let outcome = fetcher()
            .with_credential(Some(Credential::new("alice", "secret")), &site)
            .fetch(task(&format!("{}/private.css", server.url()), dir.path(), "private.css"))
            .await;

        assert!(outcome.is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn credential_is_not_sent_to_other_hosts() {
        let site = Server::new_async().await;
        let mut cdn = Server::new_async().await;
        let anonymous = cdn
            .mock("GET", "/lib.js")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body("lib()")
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let site_url = Url::parse(&format!("{}/page", site.url())).unwrap();

        let outcome = fetcher()
            .with_credential(Some(Credential::new("alice", "secret")), &site_url)
            .fetch(task(&format!("{}/lib.js", cdn.url()), dir.path(), "lib.js"))
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.status);
        anonymous.assert_async().await;
    }

    #[tokio::test]
    async fn cancellation_mid_body_removes_partial_file() {
        let server = StallServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("slow.png");
        let cancel = CancellationToken::new();
        let client = MirrorConfig::quiet().build_client().unwrap();
        let fetcher = Fetcher::new(client, cancel.clone());
        let task = task(&server.url("/slow.png"), dir.path(), "slow.png");

        let handle = tokio::spawn(async move { fetcher.fetch(task).await });
        assert!(server.stalled().await);
        let part = partial_path(&output);
        assert!(wait_until(|| part.exists()).await);
        cancel.cancel();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.status, DownloadStatus::Failed(FailureReason::Cancelled));
        assert!(!part.exists());
        assert!(!output.exists());
        assert!(server.closed().await);
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/w/images/a.png")),
            PathBuf::from("/w/images/a.png.webdl-part")
        );
    }
}
