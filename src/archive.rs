use crate::error::MirrorError;
use crate::fetcher::PARTIAL_SUFFIX;
use log::{debug, info, warn};
use std::fs::File;
use std::io;
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zips `work_dir` into `archive_path`. Entries are rooted at the working
/// directory's own name, so unpacking recreates that directory. Unfinished
/// downloads are left out.
/// Returns the number of files written.
pub async fn package(work_dir: &Path, archive_path: &Path) -> Result<usize, MirrorError> {
    let work_dir = work_dir.to_path_buf();
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || write_zip(&work_dir, &archive_path)).await?
}

/// Removes a working directory. A directory that is already gone is fine.
pub async fn remove_working_dir(work_dir: &Path) -> Result<(), MirrorError> {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => {
            debug!("Removed {}", work_dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn remove_archive(archive_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(archive_path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", archive_path.display(), e);
        }
    }
}

fn write_zip(work_dir: &Path, archive_path: &Path) -> Result<usize, MirrorError> {
    let base = work_dir.parent().unwrap_or_else(|| Path::new(""));
    if work_dir.file_name().is_none() {
        return Err(MirrorError::InvalidRequest(format!(
            "cannot archive {}",
            work_dir.display()
        )));
    }

    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(work_dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let Some(name) = entry_name(path, base) else {
            continue;
        };

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut source = File::open(path)?;
            io::copy(&mut source, &mut zip)?;
            files += 1;
        }
    }

    zip.finish()?;
    info!("Packaged {} files into {}", files, archive_path.display());
    Ok(files)
}

/// Archive entry name: the path below `base`, `/`-separated.
fn entry_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
