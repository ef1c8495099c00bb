//! Per-user basic-auth credentials, stored as one JSON document:
//! `{ "<user id>": { "<site>": { "username": ..., "password": ... } } }`.
//!
//! A site is a host, optionally with a port (`intranet.local:8080`).

use crate::error::MirrorError;
use crate::types::Credential;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_AUTH_FILE: &str = "auth.json";

type SiteCredentials = BTreeMap<String, Credential>;
type Record = BTreeMap<String, SiteCredentials>;

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, user_id: &str) -> Result<SiteCredentials, MirrorError> {
        let mut record = self.load().await?;
        Ok(record.remove(user_id).unwrap_or_default())
    }

    pub async fn put(
        &self,
        user_id: &str,
        site: &str,
        username: &str,
        password: &str,
    ) -> Result<(), MirrorError> {
        let site = site_key(site)?;
        let mut record = self.load().await?;
        record
            .entry(user_id.to_string())
            .or_default()
            .insert(site.clone(), Credential::new(username, password));
        self.save(&record).await?;
        debug!("Stored credentials for user {} on {}", user_id, site);
        Ok(())
    }

    /// Returns `true` if a credential was removed.
    pub async fn remove(&self, user_id: &str, site: &str) -> Result<bool, MirrorError> {
        let site = site_key(site)?;
        let mut record = self.load().await?;
        let Some(sites) = record.get_mut(user_id) else {
            return Ok(false);
        };
        if sites.remove(&site).is_none() {
            return Ok(false);
        }
        if sites.is_empty() {
            record.remove(user_id);
        }
        self.save(&record).await?;
        Ok(true)
    }

    /// Credential for the site serving `url`: an exact `host:port` entry
    /// first, then the bare host.
    pub async fn lookup(&self, user_id: &str, url: &Url) -> Result<Option<Credential>, MirrorError> {
        let Some(host) = url.host_str() else {
            return Ok(None);
        };
        let mut sites = self.get(user_id).await?;
        let host = host.to_ascii_lowercase();
        if let Some(port) = url.port() {
            if let Some(credential) = sites.remove(&format!("{host}:{port}")) {
                return Ok(Some(credential));
            }
        }
        Ok(sites.remove(&host))
    }

    async fn load(&self) -> Result<Record, MirrorError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Record::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Record::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, record: &Record) -> Result<(), MirrorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(record)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Normalizes user input (`Example.com`, `https://example.com/login`,
/// `example.com:8443`) to the key credentials are stored under.
pub fn site_key(site: &str) -> Result<String, MirrorError> {
    let site = site.trim();
    let key = if site.contains("://") {
        let url = Url::parse(site)?;
        let host = url
            .host_str()
            .ok_or_else(|| MirrorError::Credential(format!("{site} has no host")))?;
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    } else {
        site.trim_end_matches('/').to_string()
    };
    if key.is_empty() {
        return Err(MirrorError::Credential("site must not be empty".into()));
    }
    Ok(key.to_ascii_lowercase())
}
