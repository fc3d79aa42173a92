//! Tenant backup traversal.
//!
//! Walks sites, then document libraries, then folders and files, strictly
//! in the order the provider returns them. The cancellation token is only
//! consulted before each site; a site already in progress runs to the end.
//!
//! Failures are contained at the smallest unit that owns them:
//! - enumerating the tenant's sites fails the whole run,
//! - anything else inside a site abandons that site,
//! - fetching or writing a single file skips that file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{BackupError, ProviderError};
use crate::progress::{BackupEvent, RunState};
use crate::provider::{ByteStream, RemoteDirectory};
use crate::types::{
    BackupConfig, BackupOutcome, BackupReport, RemoteFile, RemoteFolder, SiteFailure,
};
use crate::utils::{UNTITLED_SITE, is_skipped_library, site_dir, subfolder_dir};

/// Backs up every site of the tenant reachable through `provider`.
///
/// # Returns
///
/// Returns a `BackupReport` whose outcome is:
/// - `Completed` once every site has been attempted (including the case
///   where the tenant has no sites)
/// - `Cancelled` if the token was cancelled before some site started
///
/// Partial output of a cancelled run is left on disk.
///
/// # Errors
///
/// Returns `BackupError::Enumerate` if the tenant's sites cannot be listed.
pub async fn run_backup<P>(
    provider: &P,
    config: &BackupConfig,
    state: &RunState,
) -> Result<BackupReport, BackupError>
where
    P: RemoteDirectory + ?Sized,
{
    let started_at = Instant::now();
    info!(
        "Starting {} backup into {:?}",
        config.mode, config.backup_root
    );

    let sites = match provider.list_sites().await {
        Ok(sites) => sites,
        Err(e) => {
            state.emit(BackupEvent::Fatal {
                error: e.to_string(),
            });
            return Err(BackupError::Enumerate(e));
        }
    };

    let total = sites.len() as u64;
    state.progress().set_sites_total(total);

    let mut report = BackupReport {
        outcome: BackupOutcome::Completed,
        mode: config.mode,
        sites_total: total,
        sites_processed: 0,
        sites_failed: Vec::new(),
        files_downloaded: 0,
        files_failed: 0,
        elapsed: Default::default(),
    };

    if sites.is_empty() {
        state.emit(BackupEvent::NoSites);
        report.elapsed = started_at.elapsed();
        return Ok(report);
    }

    for (site_index, site) in sites.iter().enumerate() {
        if state.is_cancelled() {
            state.emit(BackupEvent::Cancelled);
            report.outcome = BackupOutcome::Cancelled;
            break;
        }

        let index = site_index as u64 + 1;
        state.progress().start_site(index);
        state.emit(BackupEvent::SiteStarted {
            url: site.url.clone(),
            index,
            total,
        });

        match backup_site(provider, &site.url, &config.backup_root, state).await {
            Ok(()) => report.sites_processed += 1,
            Err(e) => {
                let message = e.to_string();
                state.emit(BackupEvent::SiteFailed {
                    url: site.url.clone(),
                    error: message.clone(),
                });
                report.sites_failed.push(SiteFailure {
                    url: site.url.clone(),
                    message,
                });
            }
        }
    }

    if report.outcome == BackupOutcome::Completed {
        state.emit(BackupEvent::Completed);
    }

    let snapshot = state.snapshot();
    report.files_downloaded = snapshot.files_total;
    report.files_failed = snapshot.files_failed;
    report.elapsed = started_at.elapsed();
    info!(
        "Backup finished ({:?}) in {:?}: {} of {} sites processed, {} files downloaded",
        report.outcome, report.elapsed, report.sites_processed, total, report.files_downloaded
    );
    Ok(report)
}

/// Backs up the document libraries of one site into a directory named
/// after the site's title.
async fn backup_site<P>(
    provider: &P,
    site_url: &str,
    backup_root: &Path,
    state: &RunState,
) -> Result<(), ProviderError>
where
    P: RemoteDirectory + ?Sized,
{
    let title = provider
        .site_title(site_url)
        .await?
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED_SITE.to_string());
    let local_site_dir = site_dir(backup_root, &title);
    fs::create_dir_all(&local_site_dir).await?;
    debug!("Site {:?} maps to {:?}", site_url, local_site_dir);

    let libraries = provider.list_libraries(site_url).await?;
    for library in libraries {
        if is_skipped_library(&library.title) {
            state.emit(BackupEvent::LibrarySkipped {
                title: library.title,
            });
            continue;
        }

        state.emit(BackupEvent::LibraryStarted {
            title: library.title.clone(),
        });
        download_tree(provider, site_url, &library.root_folder, &local_site_dir, state).await?;
    }
    Ok(())
}

/// Mirrors `root` and everything below it into `local_root`.
///
/// Folders are visited depth-first in listing order, each folder's files
/// before its subfolders. A folder that cannot be listed or created fails
/// the walk; a file that cannot be downloaded is skipped.
async fn download_tree<P>(
    provider: &P,
    site_url: &str,
    root: &RemoteFolder,
    local_root: &Path,
    state: &RunState,
) -> Result<(), ProviderError>
where
    P: RemoteDirectory + ?Sized,
{
    let mut pending: Vec<(String, PathBuf)> =
        vec![(root.server_relative_url.clone(), local_root.to_path_buf())];

    while let Some((remote_path, local_path)) = pending.pop() {
        let listing = provider.list_folder(site_url, &remote_path).await?;
        fs::create_dir_all(&local_path).await?;
        state.progress().folder_visited();

        for file in &listing.files {
            download_file(provider, site_url, file, &local_path, state).await;
        }

        // Reversed so the first subfolder is popped first
        for folder in listing.folders.iter().rev() {
            pending.push((
                folder.server_relative_url.clone(),
                subfolder_dir(&local_path, &folder.name),
            ));
        }
    }
    Ok(())
}

async fn download_file<P>(
    provider: &P,
    site_url: &str,
    file: &RemoteFile,
    local_dir: &Path,
    state: &RunState,
) where
    P: RemoteDirectory + ?Sized,
{
    state.emit(BackupEvent::FileStarted {
        name: file.name.clone(),
    });

    let local_file_path = local_dir.join(&file.name);
    let result = match provider.fetch_file(site_url, &file.server_relative_url).await {
        Ok(content) => write_local_file(&local_file_path, content).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => state.progress().file_downloaded(),
        Err(e) => {
            state.progress().file_failed();
            state.emit(BackupEvent::FileFailed {
                name: file.name.clone(),
                error: e.to_string(),
            });
        }
    }
}

/// Streams `content` into `path`, truncating any existing file.
///
/// A file whose content fails part way is removed again so no truncated
/// copy is left behind.
async fn write_local_file(path: &Path, mut content: ByteStream) -> Result<(), ProviderError> {
    let download_time = Instant::now();
    let mut local_file = fs::File::create(path).await?;

    match copy_chunks(&mut local_file, &mut content).await {
        Ok(written) => {
            info!(
                "File {:?} written ({} bytes). Time taken {:?}",
                path,
                written,
                download_time.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            drop(local_file);
            if let Err(remove_error) = fs::remove_file(path).await {
                warn!("Could not remove partial file {:?}: {}", path, remove_error);
            }
            Err(e)
        }
    }
}

async fn copy_chunks(
    local_file: &mut fs::File,
    content: &mut ByteStream,
) -> Result<u64, ProviderError> {
    let mut written = 0u64;
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        local_file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    local_file.flush().await?;
    Ok(written)
}
