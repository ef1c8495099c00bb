use crate::credentials::DEFAULT_AUTH_FILE;
use crate::frontend::DEFAULT_SIZE_LIMIT;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror a web page and its resources into a zip archive", long_about = None)]
pub struct Cli {
    /// Requester id: names the working directory and scopes stored credentials
    #[arg(short, long, global = true, default_value = "local")]
    pub user: String,

    /// Credential store file
    #[arg(long, global = true, default_value = DEFAULT_AUTH_FILE)]
    pub auth_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mirror a page and package it as a zip archive
    Mirror(MirrorArgs),

    /// Manage stored basic-auth credentials
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Args, Debug)]
pub struct MirrorArgs {
    /// Page URL (http or https)
    pub url: String,

    /// Components to download: img, css, script, video, xml, html (default: all)
    pub components: Vec<String>,

    /// Directory the working directory and archive are created in
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// Where to deliver the archive (default: <workspace>/<user>.zip)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent downloads per category
    #[arg(short, long, default_value = "4")]
    pub parallelism: usize,

    /// Attempts per resource before giving up
    #[arg(short, long, default_value = "3")]
    pub retries: u32,

    /// Skip resources larger than this many bytes (0 disables the limit)
    #[arg(short, long, default_value_t = DEFAULT_SIZE_LIMIT)]
    pub size_limit: u64,

    /// Per-request timeout in seconds
    #[arg(short, long, default_value = "30")]
    pub timeout: u64,

    /// Abort the whole mirror after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Skip the reachability check before mirroring
    #[arg(long)]
    pub no_probe: bool,

    /// Keep the working directory after packaging
    #[arg(long)]
    pub keep_dir: bool,

    /// List every requested category in the summary, including empty ones
    #[arg(short, long)]
    pub verbose: bool,

    /// Write per-resource download statistics to this CSV file
    #[arg(long)]
    pub stats: Option<PathBuf>,

    /// Hide progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Store credentials for a site
    Add {
        /// Host (optionally host:port) or URL of the site
        site: String,
        /// Credentials as username:password
        credentials: String,
    },

    /// Forget the credentials stored for a site
    Remove { site: String },

    /// Show the sites credentials are stored for
    List,
}
