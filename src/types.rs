use crate::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_PARALLELISM: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// File name of the serialized root document inside the working directory.
pub const PAGE_FILE_NAME: &str = "page.html";

/// One class of page sub-resource. `Html` is the root document itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Image,
    Link,
    Script,
    Video,
    Xml,
    Html,
}

impl Category {
    /// Every category that maps to downloadable sub-resources, in the order
    /// they are processed and reported.
    pub const RESOURCES: [Category; 5] = [
        Category::Image,
        Category::Link,
        Category::Script,
        Category::Video,
        Category::Xml,
    ];

    pub fn all() -> BTreeSet<Category> {
        Self::RESOURCES
            .into_iter()
            .chain(std::iter::once(Category::Html))
            .collect()
    }

    /// Tag and attribute holding this category's references.
    pub fn selector(self) -> Option<(&'static str, &'static str)> {
        match self {
            Category::Image => Some(("img", "src")),
            Category::Link => Some(("link", "href")),
            Category::Script => Some(("script", "src")),
            Category::Video => Some(("video", "src")),
            Category::Xml => Some(("xml", "src")),
            Category::Html => None,
        }
    }

    /// Subdirectory name and summary label.
    pub fn label(self) -> &'static str {
        match self {
            Category::Image => "images",
            Category::Link => "links",
            Category::Script => "scripts",
            Category::Video => "videos",
            Category::Xml => "xmls",
            Category::Html => "html",
        }
    }

    pub fn is_resource(self) -> bool {
        self.selector().is_some()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parses `username:password`. The password may itself contain colons.
    pub fn parse(raw: &str) -> Option<Self> {
        let (username, password) = raw.split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Where one request lives on disk: the working directory the mirror is
/// built in and the archive it is packaged into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPaths {
    pub work_dir: PathBuf,
    pub archive_path: PathBuf,
}

impl RequestPaths {
    pub fn for_requester(root: &Path, requester: &str) -> Self {
        let name: String = requester
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let name = if name.is_empty() { "request".to_string() } else { name };
        Self {
            work_dir: root.join(&name),
            archive_path: root.join(format!("{name}.zip")),
        }
    }

    pub fn document_path(&self) -> PathBuf {
        self.work_dir.join(PAGE_FILE_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct MirrorRequest {
    pub url: Url,
    pub categories: BTreeSet<Category>,
    pub size_limit: Option<u64>,
    pub credential: Option<Credential>,
    pub max_retries: u32,
    pub parallelism: usize,
    pub paths: RequestPaths,
}

impl MirrorRequest {
    pub fn new(url: Url, paths: RequestPaths) -> Self {
        Self {
            url,
            categories: Category::all(),
            size_limit: None,
            credential: None,
            max_retries: DEFAULT_MAX_RETRIES,
            parallelism: DEFAULT_PARALLELISM,
            paths,
        }
    }

    pub fn resource_categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.categories.iter().copied().filter(|c| c.is_resource())
    }
}

/// A reference found in the document, exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub tag: &'static str,
    pub attribute: &'static str,
    pub original: String,
    pub category: Category,
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub category: Category,
    pub original_url: String,
    pub url: Url,
    /// Path relative to the working directory, as written into the document.
    pub local_path: String,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded,
    AlreadyPresent,
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub category: Category,
    pub original_url: String,
    pub resolved_url: Url,
    pub local_path: String,
    pub bytes: u64,
    pub attempts: u32,
    pub duration: Duration,
    pub status: DownloadStatus,
}

impl DownloadOutcome {
    pub fn already_present(task: DownloadTask, bytes: u64) -> Self {
        Self {
            category: task.category,
            original_url: task.original_url,
            resolved_url: task.url,
            local_path: task.local_path,
            bytes,
            attempts: 0,
            duration: Duration::ZERO,
            status: DownloadStatus::AlreadyPresent,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, DownloadStatus::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            DownloadStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryOutcome {
    pub category: Category,
    /// Distinct resolved URLs found for the category.
    pub discovered: usize,
    pub saved: usize,
    pub outcomes: Vec<DownloadOutcome>,
}

impl CategoryOutcome {
    pub fn empty(category: Category) -> Self {
        Self {
            category,
            discovered: 0,
            saved: 0,
            outcomes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorResult {
    pub success: bool,
    pub counts: BTreeMap<Category, usize>,
    pub document_path: Option<PathBuf>,
    pub reason: Option<String>,
    pub outcomes: Vec<DownloadOutcome>,
}

impl MirrorResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            counts: BTreeMap::new(),
            document_path: None,
            reason: Some(reason.into()),
            outcomes: Vec::new(),
        }
    }

    pub fn count(&self, category: Category) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }
}
