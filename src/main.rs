mod archive;
mod cli;
mod config;
mod credentials;
mod downloader;
mod error;
mod fetcher;
mod frontend;
mod locator;
mod mirror;
mod parser;
mod report;
mod sanitizer;
#[cfg(test)]
mod test_support;
mod types;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{AuthAction, Cli, Command, MirrorArgs};
use colored::*;
use config::MirrorConfig;
use credentials::CredentialStore;
use frontend::{Frontend, RequestOptions};
use log::{error, info, warn};
use mirror::PageMirror;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use types::Credential;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!("Starting webdl as user {}", cli.user);

    let store = CredentialStore::new(&cli.auth_file);
    match cli.command {
        Command::Mirror(args) => run_mirror(&cli.user, store, args).await,
        Command::Auth { action } => run_auth(&cli.user, store, action).await,
    }
}

async fn run_mirror(user: &str, store: CredentialStore, args: MirrorArgs) -> anyhow::Result<()> {
    let config = MirrorConfig {
        request_timeout: Duration::from_secs(args.timeout),
        show_progress: !args.quiet,
        ..MirrorConfig::default()
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling downloads");
            interrupt.cancel();
        }
    });

    let mirror = PageMirror::new(config)?.with_cancellation(cancel);
    let options = RequestOptions {
        size_limit: (args.size_limit > 0).then_some(args.size_limit),
        max_retries: args.retries,
        parallelism: args.parallelism,
        deadline: args.deadline.map(Duration::from_secs),
        verbose_summary: args.verbose,
        keep_working_dir: args.keep_dir,
        probe: !args.no_probe,
    };
    let frontend = Frontend::new(mirror, store, &args.workspace, options);

    let message = std::iter::once(args.url.as_str())
        .chain(args.components.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let reply = frontend.handle_message(user, &message).await;

    if let (Some(stats_path), Some(result)) = (&args.stats, &reply.result) {
        if let Err(e) = report::write_stats_csv(&result.outcomes, stats_path) {
            error!("Failed to write stats CSV: {}", e);
        }
    }

    if !reply.success {
        eprintln!("{}", "Mirror failed".red());
        bail!(reply.text);
    }

    let archive = reply
        .archive
        .context("mirror succeeded without producing an archive")?;
    let delivered = match &args.output {
        Some(output) => deliver(&archive, output).await?,
        None => archive,
    };

    println!("\n{}", "Download Summary:".bold());
    println!("{}", reply.text.green());
    if let Some(result) = &reply.result {
        println!(
            "Total data transferred: {:.2} MB",
            result.total_bytes() as f64 / 1_048_576.0
        );
        let failed: Vec<_> = result.failed().collect();
        if !failed.is_empty() {
            println!("\n{}", "Failed Downloads:".red().bold());
            for outcome in failed {
                let reason = outcome.failure().map(|r| r.to_string()).unwrap_or_default();
                println!("✗ {} - Error: {}", outcome.local_path.red(), reason);
                println!("  URL: {}", outcome.resolved_url);
            }
        }
    }
    println!("\nArchive: {}", delivered.display().to_string().green());
    Ok(())
}

/// Moves the archive to where the user asked for it. Falls back to copying
/// when the destination is on another filesystem.
async fn deliver(archive: &Path, output: &Path) -> anyhow::Result<PathBuf> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(archive, output).await.is_err() {
        tokio::fs::copy(archive, output)
            .await
            .with_context(|| format!("failed to deliver archive to {}", output.display()))?;
        archive::remove_archive(archive).await;
    }
    Ok(output.to_path_buf())
}

async fn run_auth(user: &str, store: CredentialStore, action: AuthAction) -> anyhow::Result<()> {
    match action {
        AuthAction::Add { site, credentials } => {
            let Some(credential) = Credential::parse(&credentials) else {
                bail!("Please send your username and password in the format 'username:password'");
            };
            store
                .put(user, &site, &credential.username, &credential.password)
                .await?;
            println!("{}", "Credentials saved successfully.".green());
        }
        AuthAction::Remove { site } => {
            if store.remove(user, &site).await? {
                println!("{}", "Credentials removed.".green());
            } else {
                println!("{}", format!("No credentials stored for {site}.").yellow());
            }
        }
        AuthAction::List => {
            let sites = store.get(user).await?;
            if sites.is_empty() {
                println!("No credentials stored.");
            }
            for (site, credential) in sites {
                println!("{}\t{}", site.bold(), credential.username);
            }
        }
    }
    Ok(())
}
